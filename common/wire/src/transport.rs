use ssz::{Decode, DecodeError, Encode};
use ssz_derive::{Decode, Encode};
use ssz_types::typenum::{U13, U2048, U512, U8388608};
use ssz_types::VariableList;

use crate::RequestId;

/// Discriminator for the payload carried in [`Transport::data`].
///
/// The wire-level tag is authoritative; dispatch is an exhaustive match on
/// this enum and an unknown tag fails decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum TransportType {
    Init = 0,
    Kyber = 1,
    ReshareExchange = 2,
    Exchange = 3,
    Output = 4,
    KyberDealBundle = 5,
    KyberResponseBundle = 6,
    KyberJustificationBundle = 7,
    BlsSignRequest = 8,
    Error = 9,
    Ping = 10,
    Pong = 11,
    Reshare = 12,
    ReshareKyber = 13,
    Result = 14,
    ValidateKeyshares = 15,
    Empty = 16,
}

impl TransportType {
    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(Self::Init),
            1 => Some(Self::Kyber),
            2 => Some(Self::ReshareExchange),
            3 => Some(Self::Exchange),
            4 => Some(Self::Output),
            5 => Some(Self::KyberDealBundle),
            6 => Some(Self::KyberResponseBundle),
            7 => Some(Self::KyberJustificationBundle),
            8 => Some(Self::BlsSignRequest),
            9 => Some(Self::Error),
            10 => Some(Self::Ping),
            11 => Some(Self::Pong),
            12 => Some(Self::Reshare),
            13 => Some(Self::ReshareKyber),
            14 => Some(Self::Result),
            15 => Some(Self::ValidateKeyshares),
            16 => Some(Self::Empty),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "InitMessageType",
            Self::Kyber => "KyberMessageType",
            Self::ReshareExchange => "ReshareExchangeMessageType",
            Self::Exchange => "ExchangeMessageType",
            Self::Output => "OutputMessageType",
            Self::KyberDealBundle => "KyberDealBundleMessageType",
            Self::KyberResponseBundle => "KyberResponseBundleMessageType",
            Self::KyberJustificationBundle => "KyberJustificationBundleMessageType",
            Self::BlsSignRequest => "BlsSignRequestType",
            Self::Error => "ErrorMessageType",
            Self::Ping => "PingMessageType",
            Self::Pong => "PongMessageType",
            Self::Reshare => "ReshareMessageType",
            Self::ReshareKyber => "ReshareKyberMessageType",
            Self::Result => "ResultMessageType",
            Self::ValidateKeyshares => "ValidateKeysharesType",
            Self::Empty => "EmptyMessageType",
        };
        f.write_str(name)
    }
}

impl Encode for TransportType {
    fn is_ssz_fixed_len() -> bool {
        true
    }

    fn ssz_fixed_len() -> usize {
        8
    }

    fn ssz_bytes_len(&self) -> usize {
        8
    }

    fn ssz_append(&self, buf: &mut Vec<u8>) {
        (*self as u64).ssz_append(buf)
    }
}

impl Decode for TransportType {
    fn is_ssz_fixed_len() -> bool {
        true
    }

    fn ssz_fixed_len() -> usize {
        8
    }

    fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let tag = u64::from_ssz_bytes(bytes)?;
        Self::from_u64(tag)
            .ok_or_else(|| DecodeError::BytesInvalid(format!("unknown transport type {tag}")))
    }
}

/// The unauthenticated transport frame.
///
/// `version` carries a UTF-8 semver string; initiator and operators abort on
/// any mismatch.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Transport {
    pub msg_type: TransportType,
    pub identifier: RequestId,
    pub data: VariableList<u8, U8388608>,
    pub version: VariableList<u8, U2048>,
}

impl Transport {
    pub fn new(
        msg_type: TransportType,
        identifier: RequestId,
        data: Vec<u8>,
        version: &[u8],
    ) -> Result<Self, ssz_types::Error> {
        Ok(Self {
            msg_type,
            identifier,
            data: VariableList::new(data)?,
            version: VariableList::new(version.to_vec())?,
        })
    }
}

/// An RSA-PSS authenticated [`Transport`]. `signer == 0` denotes the
/// initiator; any other value is an operator id.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct SignedTransport {
    pub message: Transport,
    pub signer: u64,
    pub signature: VariableList<u8, U2048>,
}

/// A bundle of peer messages relayed by the initiator in one POST. The outer
/// signature is the initiator's RSA-PSS over the concatenation of the inner
/// messages' SSZ bytes.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct MultipleSignedTransports {
    pub identifier: RequestId,
    pub messages: VariableList<SignedTransport, U13>,
    pub signature: VariableList<u8, U2048>,
}

/// Error payload returned by operators in HTTP bodies.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ErrSsz {
    pub error: VariableList<u8, U512>,
}

impl ErrSsz {
    pub fn new(msg: &str) -> Self {
        let mut bytes = msg.as_bytes().to_vec();
        bytes.truncate(512);
        Self {
            // truncated above, cannot exceed the cap
            error: VariableList::new(bytes).expect("error message within cap"),
        }
    }

    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.error).into_owned()
    }
}
