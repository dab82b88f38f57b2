use thiserror::Error;

/// Errors produced by the netplay protocol and server layers.
#[derive(Debug, Error)]
pub enum PlayError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid call: {0}")]
    InvalidCall(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("terminal not found: {0}")]
    TerminalNotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<ciborium::de::Error<std::io::Error>> for PlayError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        PlayError::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for PlayError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        PlayError::Codec(e.to_string())
    }
}

pub type PlayResult<T> = Result<T, PlayError>;
