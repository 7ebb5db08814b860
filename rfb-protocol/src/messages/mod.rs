//! RFB protocol message types.
//!
//! This module provides types and parsers for all RFB (Remote Framebuffer) protocol messages
//! exchanged between client and server. Messages are categorized into:
//!
//! - **Core types** ([`types`]) - Shared types like PixelFormat, Rectangle, and encoding constants
//! - **Server messages** ([`server`]) - Messages sent from server to client
//! - **Client messages** ([`client`]) - Messages sent from client to server
//!
//! # Wire Format Rules
//!
//! All messages follow these invariants:
//!
//! 1. **Big-endian byte order** - All multi-byte integers use network byte order
//! 2. **Strict boolean validation** - Boolean fields must be exactly 0 or 1 (any other value is an error)
//! 3. **Padding validation** - Padding bytes must be zero
//! 4. **Fail-fast errors** - Invalid data results in errors, no defensive fallbacks
//!
//! # Pixel Payloads
//!
//! `FramebufferUpdate` only parses rectangle headers (x, y, width, height,
//! encoding). The encoding-specific pixel payloads are produced and consumed
//! by the codecs, which read directly from the stream after each header.
//!
//! # Examples
//!
//! ```no_run
//! use rfb_protocol::messages::types::PixelFormat;
//! use rfb_protocol::messages::client::ClientInit;
//!
//! // Create a client init message (shared connection)
//! let client_init = ClientInit { shared: true };
//! ```

pub mod client;
pub mod server;
pub mod types;

#[cfg(test)]
mod proptest_framing;

// Re-export commonly used types
pub use types::{
    PixelFormat, Rectangle, ENCODING_RAW, ENCODING_RRE, ENCODING_TIGHT,
    PSEUDO_ENCODING_DESKTOP_SIZE, PSEUDO_ENCODING_POINTER_POS, PSEUDO_ENCODING_RICH_CURSOR,
    PSEUDO_ENCODING_X11_CURSOR,
};

pub use server::{
    Bell, ColorMapEntry, FramebufferUpdate, ServerCutText, ServerInit, SetColorMapEntries,
};

pub use client::{
    ClientCutText, ClientInit, FramebufferUpdateRequest, KeyEvent, PointerEvent, SetEncodings,
    SetPixelFormat,
};
