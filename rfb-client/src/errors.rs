//! Error types for the viewer core.

use std::io;
use thiserror::Error;

/// Errors surfaced by the client handshake and decoder loop.
#[derive(Debug, Error)]
pub enum RfbClientError {
    /// The server broke the protocol: bad framing, unknown message type,
    /// an impossible field value.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Security negotiation or authentication failed.
    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),

    /// Transport-level failure (socket read/write).
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A codec failed to decode a rectangle payload.
    #[error("compression failure: {0}")]
    Compression(String),

    /// The server sent a rectangle in an encoding we never advertised.
    /// Fatal on the client side: the payload length is unknowable.
    #[error("unsupported encoding {0}")]
    UnsupportedEncoding(i32),
}

impl RfbClientError {
    /// Wrap a codec error, keeping its context chain in the message.
    pub fn compression(err: anyhow::Error) -> Self {
        Self::Compression(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, RfbClientError>;
