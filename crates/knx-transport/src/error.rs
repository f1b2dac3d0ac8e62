use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid group address: {0}")]
    InvalidAddress(String),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("connector not connected")]
    NotConnected,
    #[error("invalid telegram: {0}")]
    InvalidTelegram(&'static str),
}
