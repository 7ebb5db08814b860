//! RFB (Remote Framebuffer) protocol implementation.
//!
//! This crate provides the core wire layer shared by the server and viewer
//! cores: buffered I/O streams, message serialization/deserialization,
//! version parsing, and the client-side protocol handshake.
//!
//! # Modules
//!
//! - [`io`] - Buffered I/O streams (RfbInStream, RfbOutStream) and the
//!   object-safe [`WireInput`]/[`WireOutput`] facades
//! - [`version`] - Protocol version strings (`RFB xxx.yyy\n`)
//! - [`messages`] - Message types for both directions of the protocol
//! - [`handshake`] - Client-side version/security/init handshake

pub mod handshake;
pub mod io;
pub mod messages;
pub mod version;

// Re-export commonly used types
pub use handshake::ChallengeResponder;
pub use io::{RfbInStream, RfbOutStream, WireInput, WireOutput};
pub use version::RfbVersion;
