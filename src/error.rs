//! Process and transport level failures
//!
//! These never reach a client as protocol errors; the listener logs them
//! and closes the connection.

use crate::protocol::X11Error;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid byte-order byte 0x{0:02x}")]
    BadByteOrder(u8),

    #[error("connection setup rejected: {0}")]
    SetupRejected(String),

    #[error("no client ids left")]
    ClientsExhausted,

    #[error("backend initialisation failed: {0}")]
    Backend(String),

    #[error("stream can no longer be framed: {0}")]
    Framing(X11Error),
}

pub type ServerResult<T> = Result<T, ServerError>;
