//! Server-side error types.

use thiserror::Error;

/// Errors a connection can die of.
///
/// Everything here except `UnsupportedEncoding` is fatal for the
/// connection: the session guarantees listener de-registration and driver
/// release before one of these surfaces. `UnsupportedEncoding` is handled
/// locally by downgrading to Raw and never escapes the encoder.
#[derive(Debug, Error)]
pub enum RfbServerError {
    /// The peer sent something the protocol does not allow here.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Security negotiation failed; reported per version-specific framing.
    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),

    /// I/O error or premature EOF on the transport.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Corrupt or unrecoverable zlib stream state.
    #[error("compression failure: {0}")]
    Compression(String),

    /// A rectangle asked for an encoding this server does not implement.
    #[error("unsupported encoding {0}")]
    UnsupportedEncoding(i32),
}

impl RfbServerError {
    /// Wrap a codec error; compressed stream state is unrecoverable, so
    /// these close the connection.
    pub fn compression(err: anyhow::Error) -> Self {
        Self::Compression(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, RfbServerError>;
