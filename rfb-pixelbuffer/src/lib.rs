//! RFB pixel buffer types and utilities.
//!
//! This crate provides pixel format descriptions and buffer management for the
//! RFB/VNC protocol implementation.
//!
//! # Modules
//!
//! - [`format`] - Pixel format descriptions, color map handling, conversions
//! - [`buffer`] - [`PixelBuffer`] / [`MutablePixelBuffer`] access traits
//! - [`managed`] - [`ManagedPixelBuffer`], the owned framebuffer implementation

pub mod buffer;
pub mod format;
pub mod managed;

pub use buffer::{MutablePixelBuffer, PixelBuffer};
pub use format::{ColorMapEntry, PixelFormat};
pub use managed::ManagedPixelBuffer;
