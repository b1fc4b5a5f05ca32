//! Byte codecs for protocol bundles. The same SSZ discipline as the outer
//! transports: capped variable fields, canonical layout.

use blstrs::{G1Affine, G1Projective, Scalar};
use group::Curve;
use ssz::{Decode, Encode};
use ssz_derive::{Decode, Encode};
use ssz_types::typenum::{U1024, U13, U512};
use ssz_types::VariableList;

use crate::types::{Deal, DealBundle, Justification, JustificationBundle, ResponseBundle};

const POINT_LEN: usize = 48;

#[derive(Encode, Decode)]
struct DealSsz {
    share_holder: u64,
    encrypted_share: VariableList<u8, U512>,
}

#[derive(Encode, Decode)]
struct DealBundleSsz {
    dealer: u64,
    commits: VariableList<u8, U1024>,
    deals: VariableList<DealSsz, U13>,
}

#[derive(Encode, Decode)]
struct ResponseBundleSsz {
    sender: u64,
    complaints: VariableList<u64, U13>,
}

#[derive(Encode, Decode)]
struct JustificationSsz {
    share_holder: u64,
    share: [u8; 32],
}

#[derive(Encode, Decode)]
struct JustificationBundleSsz {
    dealer: u64,
    justifications: VariableList<JustificationSsz, U13>,
}

#[derive(Debug)]
pub struct CodecError(pub String);

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bundle codec: {}", self.0)
    }
}

impl std::error::Error for CodecError {}

impl From<ssz::DecodeError> for CodecError {
    fn from(e: ssz::DecodeError) -> Self {
        Self(format!("{e:?}"))
    }
}

fn decode_point(bytes: &[u8]) -> Result<G1Projective, CodecError> {
    let arr: [u8; POINT_LEN] = bytes
        .try_into()
        .map_err(|_| CodecError("point must be 48 bytes".into()))?;
    Option::<G1Affine>::from(G1Affine::from_compressed(&arr))
        .map(Into::into)
        .ok_or_else(|| CodecError("point is not on the curve".into()))
}

fn decode_commits(bytes: &[u8]) -> Result<Vec<G1Projective>, CodecError> {
    if bytes.len() % POINT_LEN != 0 {
        return Err(CodecError("commits are not a whole number of points".into()));
    }
    bytes.chunks(POINT_LEN).map(decode_point).collect()
}

fn encode_commits(commits: &[G1Projective]) -> Vec<u8> {
    commits
        .iter()
        .flat_map(|c| c.to_affine().to_compressed())
        .collect()
}

pub fn encode_deal_bundle(bundle: &DealBundle) -> Result<Vec<u8>, CodecError> {
    let deals: Vec<DealSsz> = bundle
        .deals
        .iter()
        .map(|d| {
            Ok(DealSsz {
                share_holder: d.share_holder,
                encrypted_share: VariableList::new(d.encrypted_share.clone())
                    .map_err(|_| CodecError("encrypted share exceeds cap".into()))?,
            })
        })
        .collect::<Result<_, CodecError>>()?;
    let ssz = DealBundleSsz {
        dealer: bundle.dealer,
        commits: VariableList::new(encode_commits(&bundle.commits))
            .map_err(|_| CodecError("too many commits".into()))?,
        deals: VariableList::new(deals).map_err(|_| CodecError("too many deals".into()))?,
    };
    Ok(ssz.as_ssz_bytes())
}

pub fn decode_deal_bundle(data: &[u8]) -> Result<DealBundle, CodecError> {
    let ssz = DealBundleSsz::from_ssz_bytes(data)?;
    Ok(DealBundle {
        dealer: ssz.dealer,
        commits: decode_commits(&ssz.commits)?,
        deals: ssz
            .deals
            .iter()
            .map(|d| Deal {
                share_holder: d.share_holder,
                encrypted_share: d.encrypted_share.to_vec(),
            })
            .collect(),
    })
}

pub fn encode_response_bundle(bundle: &ResponseBundle) -> Result<Vec<u8>, CodecError> {
    let ssz = ResponseBundleSsz {
        sender: bundle.sender,
        complaints: VariableList::new(bundle.complaints.clone())
            .map_err(|_| CodecError("too many complaints".into()))?,
    };
    Ok(ssz.as_ssz_bytes())
}

pub fn decode_response_bundle(data: &[u8]) -> Result<ResponseBundle, CodecError> {
    let ssz = ResponseBundleSsz::from_ssz_bytes(data)?;
    Ok(ResponseBundle {
        sender: ssz.sender,
        complaints: ssz.complaints.to_vec(),
    })
}

pub fn encode_justification_bundle(
    bundle: &JustificationBundle,
) -> Result<Vec<u8>, CodecError> {
    let justifications: Vec<JustificationSsz> = bundle
        .justifications
        .iter()
        .map(|j| JustificationSsz {
            share_holder: j.share_holder,
            share: j.share.to_bytes_be(),
        })
        .collect();
    let ssz = JustificationBundleSsz {
        dealer: bundle.dealer,
        justifications: VariableList::new(justifications)
            .map_err(|_| CodecError("too many justifications".into()))?,
    };
    Ok(ssz.as_ssz_bytes())
}

pub fn decode_justification_bundle(data: &[u8]) -> Result<JustificationBundle, CodecError> {
    let ssz = JustificationBundleSsz::from_ssz_bytes(data)?;
    let justifications = ssz
        .justifications
        .iter()
        .map(|j| {
            Option::<Scalar>::from(Scalar::from_bytes_be(&j.share))
                .map(|share| Justification {
                    share_holder: j.share_holder,
                    share,
                })
                .ok_or_else(|| CodecError("justified share out of field".into()))
        })
        .collect::<Result<_, CodecError>>()?;
    Ok(JustificationBundle {
        dealer: ssz.dealer,
        justifications,
    })
}
