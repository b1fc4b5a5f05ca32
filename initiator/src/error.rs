use std::fmt::Display;

/// Initiator-side failures. Any of these aborts the ceremony; nothing is
/// retried and no partial artifacts are written.
#[derive(Debug)]
pub enum InitiatorError {
    /// Input validation failure, raised before any network I/O.
    Config(String),
    /// HTTP or envelope decoding failure.
    Transport(String),
    /// A specific operator failed or returned an error payload.
    Operator { id: u64, message: String },
    /// Signature or artifact verification failure.
    Ceremony(String),
}

impl Display for InitiatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) | Self::Transport(e) | Self::Ceremony(e) => f.write_str(e),
            Self::Operator { id, message } => write!(f, "operator ID: {id}, {message}"),
        }
    }
}

impl std::error::Error for InitiatorError {}

impl From<dkg_crypto::CryptoError> for InitiatorError {
    fn from(e: dkg_crypto::CryptoError) -> Self {
        Self::Ceremony(e.to_string())
    }
}
