// ABOUTME: Client-facing error types, layering connection failures with client-engine invariants
// ABOUTME: Provides structured error reporting with automatic conversion from the connection layer

use crate::connection::ConnectionError;
use crate::correlation::DuplicateId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    DuplicateId(#[from] DuplicateId),

    #[error("server rejected the handshake")]
    InvalidHandshake,

    #[error("client is not connected")]
    NotConnected,
}

pub type ClientResult<T> = Result<T, ClientError>;
