use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::typenum::{Sum, U1024, U13, U2048, U32768, U4096, U512, U8192};
use ssz_types::{FixedVector, VariableList};
use tree_hash_derive::TreeHash;

use crate::serde_hex;
use crate::transport::TransportType;
use crate::RequestId;

/// Owner signatures on reshare messages may be ECDSA (65 bytes) or an
/// EIP-1271 contract blob; the fleet caps them at 1536 bytes.
pub type U1536 = Sum<U1024, U512>;

/// One operator as carried inside ceremony messages: its registry id and its
/// base64 PEM encoded RSA public key.
#[derive(Debug, Clone, PartialEq, Encode, Decode, TreeHash)]
pub struct Operator {
    pub id: u64,
    pub pub_key: VariableList<u8, U2048>,
}

impl Operator {
    pub fn new(id: u64, pub_key: Vec<u8>) -> Result<Self, ssz_types::Error> {
        Ok(Self {
            id,
            pub_key: VariableList::new(pub_key)?,
        })
    }
}

/// First message of a ceremony, built and signed by the initiator.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Init {
    pub operators: VariableList<Operator, U13>,
    /// Signing threshold, always `N - (N - 1) / 3`.
    pub t: u64,
    pub withdrawal_credentials: VariableList<u8, U256Cap>,
    pub fork: [u8; 4],
    pub owner: [u8; 20],
    pub nonce: u64,
    pub initiator_public_key: VariableList<u8, U2048>,
}

pub type U256Cap = ssz_types::typenum::U256;

/// Fresh DKG public point from one operator, sent in response to `Init`.
/// `commits` is empty except during resharing, where old operators attach the
/// public polynomial of the existing share.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Exchange {
    pub pk: VariableList<u8, U2048>,
    pub commits: VariableList<u8, U2048>,
}

/// A DKG protocol bundle in flight: `msg_type` is one of the three bundle
/// tags, `data` the bundle's byte encoding.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct KyberMessage {
    pub msg_type: TransportType,
    pub data: VariableList<u8, U4096>,
}

/// Ceremony message transferring custody from an old committee to a new one.
/// Signed by the owner account (see [`SignedReshare`]), so it is also a
/// tree-hash container.
#[derive(Debug, Clone, PartialEq, Encode, Decode, TreeHash)]
pub struct Reshare {
    pub validator_pubkey: FixedVector<u8, ssz_types::typenum::U48>,
    pub old_operators: VariableList<Operator, U13>,
    pub new_operators: VariableList<Operator, U13>,
    pub old_t: u64,
    pub new_t: u64,
    pub owner: FixedVector<u8, ssz_types::typenum::U20>,
    pub nonce: u64,
    /// The SSV keyshares payload of the existing validator
    /// (`sig || pubkeys || encrypted shares`); old operators recover their
    /// share from it.
    pub keyshares: VariableList<u8, U8192>,
    pub initiator_public_key: VariableList<u8, U2048>,
}

/// A [`Reshare`] with the owner's signature over its hash tree root.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct SignedReshare {
    pub reshare: Reshare,
    pub signature: VariableList<u8, U1536>,
}

/// Liveness probe payload; the interesting content is in the reply.
#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct Ping {
    pub marker: u64,
}

/// Health check reply: the operator's encoded RSA public key. The software
/// version rides in the enclosing transport.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Pong {
    pub pub_key: VariableList<u8, U2048>,
}

/// Final ceremony artifacts pushed back to every operator for audit.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ResultData {
    pub operators: VariableList<Operator, U13>,
    pub identifier: RequestId,
    pub deposit_data: VariableList<u8, U8192>,
    pub keyshares_data: VariableList<u8, U32768>,
    pub proofs: VariableList<SignedProof, U13>,
}

/// Request for a partial BLS signature over an arbitrary root, used to re-sign
/// with existing shares. Operators locate their own entry in `operators`,
/// decrypt their share from `keyshares` and sign `signing_root`.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct BlsSignRequest {
    pub operators: VariableList<Operator, U13>,
    pub t: u64,
    pub keyshares: VariableList<u8, U8192>,
    pub signing_root: [u8; 32],
    pub initiator_public_key: VariableList<u8, U2048>,
}

/// Post-ceremony liveness check of a keyshares payload: operators decrypt
/// their share and sign the ceremony identifier.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ValidateKeyshares {
    pub operators: VariableList<Operator, U13>,
    pub t: u64,
    pub keyshares: VariableList<u8, U8192>,
    pub initiator_public_key: VariableList<u8, U2048>,
}

/// Binds one operator's encrypted share to a validator and owner. Signed with
/// the operator's RSA key ([`SignedProof`]) and published next to the
/// keyshares file.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct Proof {
    #[serde(with = "serde_hex::fixed")]
    pub validator_pubkey: [u8; 48],
    #[serde(
        serialize_with = "serialize_var_list_hex",
        deserialize_with = "deserialize_var_list_hex"
    )]
    pub encrypted_share: VariableList<u8, U512>,
    #[serde(with = "serde_hex::fixed")]
    pub share_pubkey: [u8; 48],
    #[serde(with = "serde_hex::fixed")]
    pub owner: [u8; 20],
}

fn serialize_var_list_hex<S: serde::Serializer>(
    list: &VariableList<u8, U512>,
    ser: S,
) -> Result<S::Ok, S::Error> {
    serde_hex::serialize(list.as_ref() as &[u8], ser)
}

fn deserialize_var_list_hex<'de, D: serde::Deserializer<'de>>(
    de: D,
) -> Result<VariableList<u8, U512>, D::Error> {
    let bytes = serde_hex::deserialize(de)?;
    VariableList::new(bytes).map_err(|_| serde::de::Error::custom("encrypted share too long"))
}

/// RSA-PSS signature of the operator over the SSZ encoding of the proof.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct SignedProof {
    pub proof: Proof,
    #[serde(with = "serde_hex::fixed")]
    pub signature: [u8; 256],
}
