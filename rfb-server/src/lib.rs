//! Server-side RFB (VNC) core.
//!
//! This crate turns a [`DisplayDriver`] (the screen, cursor and input
//! sinks) into RFB sessions. One [`ConnectionSession`] is created per
//! accepted transport; it runs the handshake through a pluggable
//! [`SecurityNegotiator`], then serves framebuffer updates queued by
//! driver events through its [`UpdateEncoder`]. Client messages are
//! dispatched via an extension table, so vendor message types plug in
//! beside the core protocol.
//!
//! The crate is transport-agnostic: anything `AsyncRead + AsyncWrite`
//! works, the listener/accept loop belongs to the embedder.

pub mod auth;
pub mod driver;
pub mod errors;
pub mod extensions;
pub mod session;
pub mod update;

pub use auth::{Authenticator, NoAuth, SecurityNegotiator, VncAuth};
pub use driver::{
    DisplayDriver, DisplayEvent, DisplayEventListener, EventHub, PointerShape, SubscriptionId,
};
pub use errors::{Result, RfbServerError};
pub use extensions::{ExtensionContext, ExtensionTable, ProtocolExtension, SessionSettings};
pub use session::{ConnectionSession, SessionState};
pub use update::{Reply, UpdateEncoder};
