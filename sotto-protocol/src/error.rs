//! Error types for protocol parsing

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unrecognized protocol line: {0}")]
    UnknownLine(String),

    #[error("Invalid level value: {0}")]
    InvalidLevel(String),
}
