// ABOUTME: Server-facing error types, layering connection failures with server-engine invariants

use crate::connection::ConnectionError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("client sent a malformed or unexpected handshake")]
    InvalidHandshake,

    #[error("no free client id available")]
    NoFreeId,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;
