//! Wire containers for DKG ceremonies.
//!
//! Every message travelling between the initiator and the operators is SSZ
//! encoded with explicit caps on variable-length fields, so that the byte
//! layout matches the deployed operator fleet exactly. The transport envelope
//! ([`SignedTransport`]) carries an RSA-PSS signature over the SSZ encoding of
//! the inner [`Transport`].

pub use result::CeremonyResult;
pub use transport::{
    ErrSsz, MultipleSignedTransports, SignedTransport, Transport, TransportType,
};

pub use messages::{
    BlsSignRequest, Exchange, Init, KyberMessage, Operator, Ping, Pong, Proof, Reshare,
    ResultData, SignedProof, SignedReshare, ValidateKeyshares,
};

pub use share_blob::{build_shares_blob, parse_shares_blob, BlobError, SharesBlob};

mod messages;
mod result;
pub mod serde_hex;
mod share_blob;
mod transport;

/// Ceremony identifier: 16 random bytes followed by an 8 byte nonce.
pub type RequestId = [u8; 24];

/// Upper bound on an encoded RSA public key.
pub const MAX_RSA_PUBKEY_LEN: usize = 2048;
/// Upper bound on operators participating in one ceremony.
pub const MAX_OPERATORS: usize = 13;
/// BLS public key length (G1, compressed).
pub const BLS_PUBKEY_LEN: usize = 48;
/// BLS signature length (G2, compressed).
pub const BLS_SIGNATURE_LEN: usize = 96;
/// RSA-2048 PKCS#1 v1.5 ciphertext length of an encrypted share.
pub const ENCRYPTED_SHARE_LEN: usize = 256;
