use std::fmt::Display;

/// Errors raised by the cryptographic primitives.
#[derive(Debug)]
pub enum CryptoError {
    /// Underlying OpenSSL failure.
    Openssl(openssl::error::ErrorStack),
    /// An RSA public key could not be parsed or encoded.
    InvalidRsaKey(String),
    /// An RSA signature failed verification.
    SignatureInvalid,
    /// A partial BLS signature failed verification; carries the operator id.
    PartialSignature(u64),
    /// Lagrange recovery produced a signature that does not verify.
    SignatureReconstruction,
    /// A BLS point or scalar could not be deserialized.
    InvalidBlsEncoding(String),
    /// Keystore decryption or parsing failure.
    Keystore(String),
    /// Malformed deposit parameters (credentials, amount, fork).
    Deposit(String),
}

impl Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Openssl(e) => write!(f, "openssl: {e}"),
            Self::InvalidRsaKey(e) => write!(f, "invalid RSA public key: {e}"),
            Self::SignatureInvalid => write!(f, "rsa signature verification failed"),
            Self::PartialSignature(id) => {
                write!(f, "partial signature from operator {id} is invalid")
            }
            Self::SignatureReconstruction => {
                write!(f, "could not reconstruct a valid signature")
            }
            Self::InvalidBlsEncoding(e) => write!(f, "invalid BLS encoding: {e}"),
            Self::Keystore(e) => write!(f, "keystore: {e}"),
            Self::Deposit(e) => write!(f, "deposit data: {e}"),
        }
    }
}

impl std::error::Error for CryptoError {}

impl From<openssl::error::ErrorStack> for CryptoError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::Openssl(e)
    }
}
