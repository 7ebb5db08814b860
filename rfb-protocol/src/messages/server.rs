//! Server-to-client RFB messages.
//!
//! This module defines all messages sent from the VNC server to the client.

use super::types::{PixelFormat, Rectangle};
use crate::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};

/// ServerInit message - initial server parameters.
///
/// Sent by the server after the ClientInit message. Provides framebuffer
/// dimensions, pixel format, and desktop name.
///
/// # Wire Format
///
/// - 2 bytes: framebuffer width
/// - 2 bytes: framebuffer height
/// - 16 bytes: PixelFormat
/// - 4 bytes: name length
/// - N bytes: name string (UTF-8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub framebuffer_width: u16,
    pub framebuffer_height: u16,
    pub pixel_format: PixelFormat,
    pub name: String,
}

impl ServerInit {
    /// Read ServerInit from an RFB input stream.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        let framebuffer_width = stream.read_u16().await?;
        let framebuffer_height = stream.read_u16().await?;
        let pixel_format = PixelFormat::read_from(stream).await?;
        let name_length = stream.read_u32().await? as usize;
        if name_length > crate::io::MAX_STRING_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("desktop name of {} bytes exceeds limit", name_length),
            ));
        }

        let mut name_bytes = vec![0u8; name_length];
        stream.read_bytes(&mut name_bytes).await?;
        let name = String::from_utf8(name_bytes).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid UTF-8: {}", e),
            )
        })?;

        Ok(Self {
            framebuffer_width,
            framebuffer_height,
            pixel_format,
            name,
        })
    }

    /// Write ServerInit to an RFB output stream.
    pub fn write_to<W: AsyncWrite + Unpin>(
        &self,
        stream: &mut RfbOutStream<W>,
    ) -> std::io::Result<()> {
        stream.write_u16(self.framebuffer_width);
        stream.write_u16(self.framebuffer_height);
        self.pixel_format.write_to(stream)?;
        stream.write_u32(self.name.len() as u32);
        stream.write_bytes(self.name.as_bytes());
        Ok(())
    }
}

/// FramebufferUpdate message - screen update with rectangle headers.
///
/// **Important**: This struct only contains rectangle headers. The encoding-specific
/// pixel data that follows each rectangle is **not** parsed here and must be handled
/// by the codec registered for each rectangle's encoding.
///
/// # Wire Format
///
/// - 1 byte: message type (0)
/// - 1 byte: padding
/// - 2 bytes: number of rectangles
/// - For each rectangle: 12-byte Rectangle header (x, y, width, height, encoding)
///   - Encoding-specific pixel data follows (not parsed here)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferUpdate {
    pub rectangles: Vec<Rectangle>,
}

impl FramebufferUpdate {
    /// Read FramebufferUpdate from an RFB input stream.
    ///
    /// **Note**: This only reads rectangle headers. Callers must separately
    /// handle encoding-specific pixel data for each rectangle based on its
    /// encoding type.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        // Skip message type (already read by caller) and padding
        stream.skip(1).await?; // padding

        let num_rectangles = stream.read_u16().await? as usize;
        let mut rectangles = Vec::with_capacity(num_rectangles);

        for _ in 0..num_rectangles {
            rectangles.push(Rectangle::read_from(stream).await?);
        }

        Ok(Self { rectangles })
    }

    /// Write FramebufferUpdate to an RFB output stream.
    ///
    /// **Note**: This only writes the message header and rectangle headers.
    /// Encoding-specific pixel data must be written separately after calling
    /// this method.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(0); // message type
        stream.write_u8(0); // padding
        stream.write_u16(self.rectangles.len() as u16);

        for rect in &self.rectangles {
            rect.write_to(stream);
        }
    }
}

/// Color map entry (RGB triplet).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorMapEntry {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

/// SetColorMapEntries message - update color map.
///
/// Used for palette-based color modes (not common in modern VNC).
///
/// # Wire Format
///
/// - 1 byte: message type (1)
/// - 1 byte: padding
/// - 2 bytes: first color index
/// - 2 bytes: number of colors
/// - For each color: 6 bytes (red u16, green u16, blue u16)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetColorMapEntries {
    pub first_color: u16,
    pub colors: Vec<ColorMapEntry>,
}

impl SetColorMapEntries {
    /// Read SetColorMapEntries from an RFB input stream.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        stream.skip(1).await?; // padding
        let first_color = stream.read_u16().await?;
        let num_colors = stream.read_u16().await? as usize;

        let mut colors = Vec::with_capacity(num_colors);
        for _ in 0..num_colors {
            colors.push(ColorMapEntry {
                red: stream.read_u16().await?,
                green: stream.read_u16().await?,
                blue: stream.read_u16().await?,
            });
        }

        Ok(Self {
            first_color,
            colors,
        })
    }

    /// Write SetColorMapEntries to an RFB output stream.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(1); // message type
        stream.write_u8(0); // padding
        stream.write_u16(self.first_color);
        stream.write_u16(self.colors.len() as u16);

        for color in &self.colors {
            stream.write_u16(color.red);
            stream.write_u16(color.green);
            stream.write_u16(color.blue);
        }
    }
}

/// Bell message - audible notification.
///
/// Signals that a bell/beep should be sounded.
///
/// # Wire Format
///
/// - 1 byte: message type (2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bell;

impl Bell {
    /// Read Bell from an RFB input stream (no additional data).
    pub async fn read_from<R: AsyncRead + Unpin>(
        _stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        // Bell has no body, just the message type
        Ok(Self)
    }

    /// Write Bell to an RFB output stream.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(2); // message type
    }
}

/// ServerCutText message - clipboard update from server.
///
/// Sends clipboard text from the server to the client.
///
/// # Wire Format
///
/// - 1 byte: message type (3)
/// - 3 bytes: padding
/// - 4 bytes: text length
/// - N bytes: text (Latin-1 encoding)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCutText {
    pub text: String,
}

impl ServerCutText {
    /// Read ServerCutText from an RFB input stream.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        stream.skip(3).await?; // padding
        let text = stream.read_string().await?;
        Ok(Self { text })
    }

    /// Write ServerCutText to an RFB output stream.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(3); // message type
        stream.write_u8(0); // padding
        stream.write_u8(0); // padding
        stream.write_u8(0); // padding
        stream.write_u32(self.text.len() as u32);
        stream.write_bytes(self.text.as_bytes());
    }
}
