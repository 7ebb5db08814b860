//! Client-side RFB protocol handshake.
//!
//! This module implements the three-phase RFB (Remote Framebuffer) protocol handshake
//! from the viewer's side:
//!
//! 1. **Protocol Version Negotiation** - Client and server agree on RFB version (3.3 or 3.8)
//! 2. **Security Handshake** - Negotiate and execute security/authentication type
//! 3. **Initialization** - Exchange ClientInit/ServerInit messages
//!
//! The client always advertises RFB 3.8 but will negotiate down to 3.3 if the server
//! only supports 3.3-3.6. Versions 3.7 and above negotiate identically from the
//! client's point of view once 3.8 is advertised.
//!
//! # Security Types
//!
//! `None` (1) and `VNC Authentication` (2) are supported. VNC authentication
//! needs a [`ChallengeResponder`] to turn the server's 16-byte challenge into
//! a response; the cipher itself lives with the credential store, not here.
//!
//! # Error Handling
//!
//! This module follows a fail-fast policy: invalid protocol versions are
//! rejected immediately, unsupported security types cause connection failure,
//! and malformed messages produce clear errors with no silent degradation.

use crate::io::{RfbInStream, RfbOutStream};
use crate::messages;
use crate::messages::types::{
    SCHEME_CONNECT_FAILED, SECURITY_RESULT_FAILED, SECURITY_RESULT_OK, SECURITY_TYPE_NONE,
    SECURITY_TYPE_VNC_AUTH,
};
use crate::version::RfbVersion;
use tokio::io::{AsyncRead, AsyncWrite};

/// Computes the 16-byte response to a VNC authentication challenge.
///
/// Separated out so the handshake does not depend on any particular
/// cipher or credential storage.
pub trait ChallengeResponder: Send + Sync {
    fn respond(&self, challenge: &[u8; 16]) -> [u8; 16];
}

impl<F> ChallengeResponder for F
where
    F: Fn(&[u8; 16]) -> [u8; 16] + Send + Sync,
{
    fn respond(&self, challenge: &[u8; 16]) -> [u8; 16] {
        self(challenge)
    }
}

/// Negotiate RFB protocol version with the server.
///
/// Reads the server's 12-byte version string, then replies with our own.
/// Servers reporting 3.3 through 3.6 are driven through the legacy 3.3
/// security path; everything newer negotiates as 3.8.
pub async fn negotiate_version<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
) -> std::io::Result<RfbVersion> {
    let mut version_buf = [0u8; 12];
    instream.read_bytes(&mut version_buf).await?;
    let server_version = RfbVersion::parse(&version_buf)?;

    if server_version < RfbVersion::V3_3 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("unsupported RFB version {} (< 3.3)", server_version),
        ));
    }

    let negotiated = if server_version.is_legacy() {
        RfbVersion::V3_3
    } else {
        RfbVersion::V3_8
    };

    // Always advertise 3.8; the negotiated version governs framing.
    outstream.write_bytes(&RfbVersion::V3_8.to_wire());
    outstream.flush().await?;

    Ok(negotiated)
}

/// Negotiate security type with the server.
///
/// `responder` enables VNC authentication; with `None` only the `None`
/// security type can succeed.
pub async fn negotiate_security<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
    negotiated: RfbVersion,
    responder: Option<&dyn ChallengeResponder>,
) -> std::io::Result<()> {
    if negotiated.is_legacy() {
        negotiate_security_3_3(instream, outstream, responder).await
    } else {
        negotiate_security_3_8(instream, outstream, responder).await
    }
}

async fn negotiate_security_3_8<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
    responder: Option<&dyn ChallengeResponder>,
) -> std::io::Result<()> {
    let count = instream.read_u8().await?;

    if count == 0 {
        let reason = instream.read_string().await?;
        return Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("server offered no security types: {}", reason),
        ));
    }

    let mut types = vec![0u8; count as usize];
    instream.read_bytes(&mut types).await?;

    let chosen = if types.contains(&SECURITY_TYPE_NONE) {
        SECURITY_TYPE_NONE
    } else if types.contains(&SECURITY_TYPE_VNC_AUTH) && responder.is_some() {
        SECURITY_TYPE_VNC_AUTH
    } else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("no usable security type offered by server (got {:?})", types),
        ));
    };

    outstream.write_u8(chosen);
    outstream.flush().await?;

    if chosen == SECURITY_TYPE_VNC_AUTH {
        answer_vnc_challenge(instream, outstream, responder.unwrap()).await?;
    }

    // 3.8 sends SecurityResult for every security type, None included.
    read_security_result(instream, true).await
}

async fn negotiate_security_3_3<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
    responder: Option<&dyn ChallengeResponder>,
) -> std::io::Result<()> {
    // In 3.3 the server picks the scheme and writes it as a u32.
    let scheme = instream.read_u32().await?;

    match scheme {
        SCHEME_CONNECT_FAILED => {
            let reason = instream.read_string().await?;
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("server rejected connection: {}", reason),
            ))
        }
        s if s == SECURITY_TYPE_NONE as u32 => Ok(()),
        s if s == SECURITY_TYPE_VNC_AUTH as u32 => {
            let responder = responder.ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "server requires VNC authentication but no credentials were supplied",
                )
            })?;
            answer_vnc_challenge(instream, outstream, responder).await?;
            // 3.3 failures have no reason string.
            read_security_result(instream, false).await
        }
        other => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("unsupported RFB 3.3 security scheme: {}", other),
        )),
    }
}

async fn answer_vnc_challenge<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
    responder: &dyn ChallengeResponder,
) -> std::io::Result<()> {
    let mut challenge = [0u8; 16];
    instream.read_bytes(&mut challenge).await?;
    outstream.write_bytes(&responder.respond(&challenge));
    outstream.flush().await
}

async fn read_security_result<R: AsyncRead + Unpin>(
    instream: &mut RfbInStream<R>,
    reason_on_failure: bool,
) -> std::io::Result<()> {
    let result = instream.read_u32().await?;
    match result {
        SECURITY_RESULT_OK => Ok(()),
        SECURITY_RESULT_FAILED => {
            let reason = if reason_on_failure {
                instream.read_string().await?
            } else {
                "authentication failed".to_string()
            };
            Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("security handshake failed: {}", reason),
            ))
        }
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid security result value: {} (expected 0 or 1)", other),
        )),
    }
}

/// Send ClientInit message to the server.
pub async fn send_client_init<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    shared: bool,
) -> std::io::Result<()> {
    let client_init = messages::ClientInit { shared };
    client_init.write_to(outstream);
    outstream.flush().await?;
    Ok(())
}

/// Receive ServerInit message from the server.
pub async fn recv_server_init<R: AsyncRead + Unpin>(
    instream: &mut RfbInStream<R>,
) -> std::io::Result<messages::ServerInit> {
    messages::ServerInit::read_from(instream).await
}
