use dkg_crypto::CryptoError;
use pedersen::DkgError;

/// Everything that can go wrong inside one ceremony instance. Any of these
/// ends the ceremony: the error text is broadcast back to the initiator and
/// the instance is evicted.
#[derive(Debug)]
pub enum OwnerError {
    /// The transport version does not match ours.
    WrongVersion,
    /// The message identifier does not match this instance.
    WrongCeremony,
    /// The signer is not part of this instance's operator set.
    UnknownSigner(u64),
    /// A second message of the same kind from the same signer.
    Duplicate,
    /// Ceremony parameters failed validation.
    BadParameters(String),
    /// A payload failed to decode.
    Malformed(String),
    /// Signature or share verification failure.
    Crypto(CryptoError),
    /// The DKG protocol aborted.
    Protocol(DkgError),
    /// A message arrived that the current state cannot accept.
    State(String),
}

impl std::fmt::Display for OwnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongVersion => write!(f, "wrong version"),
            Self::WrongCeremony => write!(f, "message has wrong ceremony identifier"),
            Self::UnknownSigner(id) => write!(f, "ops not exist for this instance: {id}"),
            Self::Duplicate => write!(f, "duplicate message"),
            Self::BadParameters(e) => f.write_str(e),
            Self::Malformed(e) => write!(f, "malformed message: {e}"),
            Self::Crypto(e) => write!(f, "{e}"),
            Self::Protocol(e) => write!(f, "{e}"),
            Self::State(e) => f.write_str(e),
        }
    }
}

impl std::error::Error for OwnerError {}

impl From<CryptoError> for OwnerError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

impl From<DkgError> for OwnerError {
    fn from(e: DkgError) -> Self {
        match e {
            DkgError::Duplicate => Self::Duplicate,
            other => Self::Protocol(other),
        }
    }
}
