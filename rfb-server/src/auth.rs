//! Server-side security negotiation.
//!
//! The negotiator owns a list of [`Authenticator`] trait objects and drives
//! the version-dependent wire framing around them: 3.7+ clients get a list
//! of security type codes and pick one, legacy clients are told a single
//! scheme as a big-endian u32. The authenticators themselves only see an
//! opaque byte pipe, so new schemes slot in without touching the framing.

use crate::errors::{Result, RfbServerError};
use async_trait::async_trait;
use rand::Rng;
use rfb_protocol::io::{WireInput, WireOutput};
use rfb_protocol::messages::types::{
    SCHEME_CONNECT_FAILED, SECURITY_RESULT_FAILED, SECURITY_RESULT_OK, SECURITY_TYPE_NONE,
    SECURITY_TYPE_VNC_AUTH,
};
use rfb_protocol::RfbVersion;

/// One pluggable security scheme.
///
/// `process` runs the scheme's sub-protocol over the wire and reports
/// whether the client passed. Returning `Ok(false)` with a non-empty
/// [`sub_auth_types`](Authenticator::sub_auth_types) list means the scheme
/// acts as a selector: negotiation restarts restricted to the listed types.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// RFB security type code this scheme answers to.
    fn security_type(&self) -> u8;

    /// Run the scheme's wire exchange.
    async fn process(
        &mut self,
        input: &mut dyn WireInput,
        output: &mut dyn WireOutput,
    ) -> Result<bool>;

    /// Security types this scheme delegates to when `process` returns
    /// `Ok(false)` without failing the connection.
    fn sub_auth_types(&self) -> Option<Vec<u8>> {
        None
    }

    /// Hook invoked after SecurityResult has been written, before
    /// ClientInit. Schemes that wrap the transport or send follow-up
    /// data do it here.
    async fn post_authentication(
        &mut self,
        _input: &mut dyn WireInput,
        _output: &mut dyn WireOutput,
    ) -> Result<()> {
        Ok(())
    }
}

/// The "None" security type. Always passes.
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    fn security_type(&self) -> u8 {
        SECURITY_TYPE_NONE
    }

    async fn process(
        &mut self,
        _input: &mut dyn WireInput,
        _output: &mut dyn WireOutput,
    ) -> Result<bool> {
        Ok(true)
    }
}

/// Classic VNC challenge-response authentication.
///
/// Sends a random 16-byte challenge and hands the client's response to a
/// verifier closure. The DES cipher lives with the credential store, not
/// here; the verifier is expected to encrypt the challenge with the stored
/// password and compare.
pub struct VncAuth {
    verifier: Box<dyn Fn(&[u8; 16], &[u8; 16]) -> bool + Send + Sync>,
}

impl VncAuth {
    pub fn new<F>(verifier: F) -> Self
    where
        F: Fn(&[u8; 16], &[u8; 16]) -> bool + Send + Sync + 'static,
    {
        Self {
            verifier: Box::new(verifier),
        }
    }
}

#[async_trait]
impl Authenticator for VncAuth {
    fn security_type(&self) -> u8 {
        SECURITY_TYPE_VNC_AUTH
    }

    async fn process(
        &mut self,
        input: &mut dyn WireInput,
        output: &mut dyn WireOutput,
    ) -> Result<bool> {
        let challenge: [u8; 16] = rand::thread_rng().gen();
        output.write_bytes(&challenge);
        output.flush().await?;

        let mut response = [0u8; 16];
        input.read_bytes(&mut response).await?;
        Ok((self.verifier)(&challenge, &response))
    }
}

/// Outcome of a successful negotiation, handed back to the session so it
/// can run [`Authenticator::post_authentication`] later.
pub struct NegotiationOutcome {
    pub security_type: u8,
    pub winner: usize,
}

/// Drives the security phase of the handshake.
pub struct SecurityNegotiator {
    authenticators: Vec<Box<dyn Authenticator>>,
}

impl SecurityNegotiator {
    pub fn new(authenticators: Vec<Box<dyn Authenticator>>) -> Self {
        Self { authenticators }
    }

    /// Convenience constructor for an open server.
    pub fn no_auth() -> Self {
        Self::new(vec![Box::new(NoAuth)])
    }

    pub fn authenticator_mut(&mut self, index: usize) -> &mut dyn Authenticator {
        self.authenticators[index].as_mut()
    }

    /// Run the whole security phase: advertise, select, process, and write
    /// the SecurityResult with version-appropriate framing.
    pub async fn negotiate(
        &mut self,
        version: RfbVersion,
        input: &mut dyn WireInput,
        output: &mut dyn WireOutput,
    ) -> Result<NegotiationOutcome> {
        // Candidate set narrows when a selector scheme defers to its
        // sub-auth types.
        let mut candidates: Vec<usize> = (0..self.authenticators.len()).collect();
        let mut tried: Vec<u8> = Vec::new();

        loop {
            let chosen = if version >= RfbVersion::V3_7 {
                self.select_modern(&candidates, input, output).await?
            } else {
                self.select_legacy(&candidates, output).await?
            };

            let security_type = self.authenticators[chosen].security_type();
            tried.push(security_type);
            tracing::debug!(security_type, "running security scheme");

            match self.authenticators[chosen].process(input, output).await {
                Ok(true) => {
                    // 3.8 always confirms; 3.3/3.7 only for types that
                    // have their own sub-protocol.
                    if version >= RfbVersion::V3_8 || security_type != SECURITY_TYPE_NONE {
                        output.write_u32(SECURITY_RESULT_OK);
                        output.flush().await?;
                    }
                    return Ok(NegotiationOutcome {
                        security_type,
                        winner: chosen,
                    });
                }
                Ok(false) => {
                    if let Some(allowed) = self.authenticators[chosen].sub_auth_types() {
                        candidates = (0..self.authenticators.len())
                            .filter(|&i| {
                                let t = self.authenticators[i].security_type();
                                allowed.contains(&t) && !tried.contains(&t)
                            })
                            .collect();
                        if candidates.is_empty() {
                            return self
                                .fail(version, security_type, "no acceptable sub-authentication", output)
                                .await;
                        }
                        continue;
                    }
                    return self
                        .fail(version, security_type, "authentication rejected", output)
                        .await;
                }
                Err(RfbServerError::Transport(err)) => return Err(err.into()),
                Err(err) => {
                    return self.fail(version, security_type, &err.to_string(), output).await;
                }
            }
        }
    }

    /// 3.7+ framing: advertise the candidate type codes, read the client's
    /// choice.
    async fn select_modern(
        &self,
        candidates: &[usize],
        input: &mut dyn WireInput,
        output: &mut dyn WireOutput,
    ) -> Result<usize> {
        let codes: Vec<u8> = candidates
            .iter()
            .map(|&i| self.authenticators[i].security_type())
            .collect();
        if codes.is_empty() {
            output.write_u8(0);
            output.write_string("no supported security types");
            output.flush().await?;
            return Err(RfbServerError::AuthenticationFailure(
                "no security types to offer".into(),
            ));
        }

        output.write_u8(codes.len() as u8);
        output.write_bytes(&codes);
        output.flush().await?;

        let choice = input.read_u8().await?;
        candidates
            .iter()
            .copied()
            .find(|&i| self.authenticators[i].security_type() == choice)
            .ok_or_else(|| {
                RfbServerError::AuthenticationFailure(format!(
                    "client chose unadvertised security type {}",
                    choice
                ))
            })
    }

    /// Pre-3.7 framing: the server dictates a single scheme as a u32. Only
    /// the two schemes RFB 3.3 defines can be dictated.
    async fn select_legacy(
        &self,
        candidates: &[usize],
        output: &mut dyn WireOutput,
    ) -> Result<usize> {
        let legacy = candidates.iter().copied().find(|&i| {
            let t = self.authenticators[i].security_type();
            t == SECURITY_TYPE_NONE || t == SECURITY_TYPE_VNC_AUTH
        });
        match legacy {
            Some(i) => {
                output.write_u32(self.authenticators[i].security_type() as u32);
                output.flush().await?;
                Ok(i)
            }
            None => {
                output.write_u32(SCHEME_CONNECT_FAILED);
                output.write_string("no security scheme usable with this protocol version");
                output.flush().await?;
                Err(RfbServerError::AuthenticationFailure(
                    "legacy client but no RFB 3.3 scheme configured".into(),
                ))
            }
        }
    }

    /// Write the version-appropriate failure framing and surface the error.
    async fn fail(
        &self,
        version: RfbVersion,
        security_type: u8,
        reason: &str,
        output: &mut dyn WireOutput,
    ) -> Result<NegotiationOutcome> {
        tracing::info!(security_type, reason, "security negotiation failed");
        if version >= RfbVersion::V3_8 {
            output.write_u32(SECURITY_RESULT_FAILED);
            output.write_string(reason);
            output.flush().await?;
        } else if version == RfbVersion::V3_7 {
            // 3.7 has no failure reason; the connection just closes.
        } else if security_type != SECURITY_TYPE_NONE {
            output.write_u32(SECURITY_RESULT_FAILED);
            output.flush().await?;
        }
        Err(RfbServerError::AuthenticationFailure(reason.to_string()))
    }
}
