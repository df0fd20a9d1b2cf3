//! Protocol-level error types.

use thiserror::Error;

/// Errors raised while building or reading wire payloads.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("postback field '{field}' contains reserved character '{reserved}'")]
    ReservedCharacter { field: &'static str, reserved: char },

    #[error("postback payload is {len} bytes, limit is {max}")]
    PayloadTooLong { len: usize, max: usize },

    #[error("postback field '{0}' is empty")]
    EmptyField(&'static str),
}

/// Convenience alias for protocol results.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
