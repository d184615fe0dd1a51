use serde_derive::{Deserialize, Serialize};

/// A tskv result returning the crate Error type.
pub type CResult<T> = std::result::Result<T, Error>;

/// A tskv error. Expected conditions (missing keys, rejected prepares) are
/// not errors; they surface as `Option` or reply codes. Errors are kept for
/// the codec boundary and genuine internal failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An internal invariant was violated.
    Internal(String),

    /// A value could not be encoded or decoded.
    Serialization(String),

    /// The caller handed us something malformed.
    InvalidInput(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
            Error::Serialization(msg) => write!(f, "serialization error: {}", msg),
            Error::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
