//! Core RFB protocol types.
//!
//! This module defines fundamental types used throughout the RFB protocol:
//! - [`PixelFormat`] - Describes pixel format (bit depths, color channels, endianness)
//! - [`Rectangle`] - Rectangle header with encoding type
//! - Encoding, pseudo-encoding, security and message-type constants

use crate::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};

/// RFB pixel format specification.
///
/// Describes how pixels are encoded in the framebuffer, including:
/// - Bits per pixel and color depth
/// - RGB channel sizes and bit positions
/// - Byte order (big/little endian)
///
/// # Wire Format
///
/// PixelFormat is 16 bytes on the wire:
/// - 1 byte: bits_per_pixel
/// - 1 byte: depth
/// - 1 byte: big_endian (0 or 1)
/// - 1 byte: true_color (0 or 1)
/// - 2 bytes: red_max
/// - 2 bytes: green_max
/// - 2 bytes: blue_max
/// - 1 byte: red_shift
/// - 1 byte: green_shift
/// - 1 byte: blue_shift
/// - 3 bytes: padding (must be zero)
///
/// # Examples
///
/// ```
/// use rfb_protocol::messages::types::PixelFormat;
///
/// // Standard 32-bit RGB format
/// let pf = PixelFormat {
///     bits_per_pixel: 32,
///     depth: 24,
///     big_endian: 0,
///     true_color: 1,
///     red_max: 255,
///     green_max: 255,
///     blue_max: 255,
///     red_shift: 16,
///     green_shift: 8,
///     blue_shift: 0,
/// };
///
/// assert_eq!(pf.bytes_per_pixel(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: u8, // Boolean: must be 0 or 1
    pub true_color: u8, // Boolean: must be 0 or 1
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// Calculate bytes per pixel (1, 2, 3, or 4).
    pub fn bytes_per_pixel(&self) -> u8 {
        self.bits_per_pixel.div_ceil(8)
    }

    /// Parse a PixelFormat from its 16-byte wire record.
    ///
    /// The record is peer-supplied, so the fields a codec later divides or
    /// shifts by are validated here: bits_per_pixel must be 8, 16 or 32,
    /// and a true-colour format must have non-zero channel maxima.
    ///
    /// # Errors
    ///
    /// Returns an error if bits_per_pixel is not 8, 16 or 32, a true-colour
    /// format carries a zero channel maximum, boolean fields (big_endian,
    /// true_color) are not 0 or 1, or the 3 trailing padding bytes are not
    /// zero.
    pub fn from_bytes(bytes: &[u8; 16]) -> std::io::Result<Self> {
        let bits_per_pixel = bytes[0];
        if !matches!(bits_per_pixel, 8 | 16 | 32) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bits_per_pixel must be 8, 16 or 32, got {}", bits_per_pixel),
            ));
        }
        let big_endian = bytes[2];
        let true_color = bytes[3];
        if big_endian > 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("big_endian must be 0 or 1, got {}", big_endian),
            ));
        }
        if true_color > 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("true_color must be 0 or 1, got {}", true_color),
            ));
        }
        if bytes[13..16] != [0, 0, 0] {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("padding must be zero, got {:?}", &bytes[13..16]),
            ));
        }
        let red_max = u16::from_be_bytes([bytes[4], bytes[5]]);
        let green_max = u16::from_be_bytes([bytes[6], bytes[7]]);
        let blue_max = u16::from_be_bytes([bytes[8], bytes[9]]);
        if true_color == 1 && (red_max == 0 || green_max == 0 || blue_max == 0) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "true-colour format with a zero channel maximum: r={} g={} b={}",
                    red_max, green_max, blue_max
                ),
            ));
        }
        Ok(Self {
            bits_per_pixel,
            depth: bytes[1],
            big_endian,
            true_color,
            red_max,
            green_max,
            blue_max,
            red_shift: bytes[10],
            green_shift: bytes[11],
            blue_shift: bytes[12],
        })
    }

    /// Read a PixelFormat from an RFB input stream.
    ///
    /// # Errors
    ///
    /// Returns an error if EOF is reached before all 16 bytes are read, or
    /// if the record fails the [`from_bytes`](Self::from_bytes) validation.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        let mut raw = [0u8; 16];
        stream.read_bytes(&mut raw).await?;
        Self::from_bytes(&raw)
    }

    /// Write this PixelFormat to an RFB output stream.
    ///
    /// # Errors
    ///
    /// Returns an error if boolean fields are not 0 or 1.
    pub fn write_to<W: AsyncWrite + Unpin>(
        &self,
        stream: &mut RfbOutStream<W>,
    ) -> std::io::Result<()> {
        // Validate booleans before writing
        if self.big_endian > 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("big_endian must be 0 or 1, got {}", self.big_endian),
            ));
        }
        if self.true_color > 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("true_color must be 0 or 1, got {}", self.true_color),
            ));
        }

        stream.write_u8(self.bits_per_pixel);
        stream.write_u8(self.depth);
        stream.write_u8(self.big_endian);
        stream.write_u8(self.true_color);
        stream.write_u16(self.red_max);
        stream.write_u16(self.green_max);
        stream.write_u16(self.blue_max);
        stream.write_u8(self.red_shift);
        stream.write_u8(self.green_shift);
        stream.write_u8(self.blue_shift);
        // 3 bytes padding (must be zero)
        stream.write_u8(0);
        stream.write_u8(0);
        stream.write_u8(0);

        Ok(())
    }
}

/// Rectangle header for framebuffer updates.
///
/// Describes a rectangular region of the screen along with the encoding
/// type used for its pixel data.
///
/// # Wire Format
///
/// Rectangle header is 12 bytes:
/// - 2 bytes: x position
/// - 2 bytes: y position
/// - 2 bytes: width
/// - 2 bytes: height
/// - 4 bytes: encoding type (signed i32)
///
/// The struct only carries the header. The pixel payload follows on the
/// wire and is produced/consumed by the codec selected by `encoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rectangle {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: i32,
}

impl Rectangle {
    /// Read a Rectangle header from an RFB input stream.
    ///
    /// **Note**: This only reads the 12-byte header. The encoding-specific
    /// pixel data that follows must be handled separately.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            x: stream.read_u16().await?,
            y: stream.read_u16().await?,
            width: stream.read_u16().await?,
            height: stream.read_u16().await?,
            encoding: stream.read_i32().await?,
        })
    }

    /// Write a Rectangle header to an RFB output stream.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u16(self.x);
        stream.write_u16(self.y);
        stream.write_u16(self.width);
        stream.write_u16(self.height);
        stream.write_i32(self.encoding);
    }
}

//
// Encoding type constants
//

/// Raw encoding - uncompressed pixel data.
pub const ENCODING_RAW: i32 = 0;

/// RRE (Rise-and-Run-length Encoding).
pub const ENCODING_RRE: i32 = 2;

/// Tight encoding - zlib/palette/gradient compression with JPEG support.
pub const ENCODING_TIGHT: i32 = 7;

//
// Pseudo-encodings (for capability negotiation)
//

/// DesktopSize pseudo-encoding - server may announce framebuffer resizes.
pub const PSEUDO_ENCODING_DESKTOP_SIZE: i32 = -223;

/// PointerPos pseudo-encoding - server may report pointer movement.
pub const PSEUDO_ENCODING_POINTER_POS: i32 = -232;

/// RichCursor pseudo-encoding - cursor glyph with full alpha mask.
pub const PSEUDO_ENCODING_RICH_CURSOR: i32 = -239;

/// X11Cursor pseudo-encoding - two-color cursor glyph with bitmask.
pub const PSEUDO_ENCODING_X11_CURSOR: i32 = -240;

//
// Security type constants (3.7+ negotiation)
//

/// Invalid security type; precedes a connection failure reason.
pub const SECURITY_TYPE_INVALID: u8 = 0;

/// No security - no authentication required.
pub const SECURITY_TYPE_NONE: u8 = 1;

/// VNC authentication - challenge-response with password.
pub const SECURITY_TYPE_VNC_AUTH: u8 = 2;

//
// Legacy security schemes (3.3: server picks, written as u32)
//

/// Connection failed; a reason string follows.
pub const SCHEME_CONNECT_FAILED: u32 = 0;

/// SecurityResult success code.
pub const SECURITY_RESULT_OK: u32 = 0;

/// SecurityResult failure code.
pub const SECURITY_RESULT_FAILED: u32 = 1;

//
// Client-to-server message types
//

pub const CMSG_SET_PIXEL_FORMAT: u8 = 0;
pub const CMSG_SET_ENCODINGS: u8 = 2;
pub const CMSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
pub const CMSG_KEY_EVENT: u8 = 4;
pub const CMSG_POINTER_EVENT: u8 = 5;
pub const CMSG_CLIENT_CUT_TEXT: u8 = 6;

/// TightVNC file transfer extension message.
pub const CMSG_FILE_TRANSFER: u8 = 7;

//
// Server-to-client message types
//

pub const SMSG_FRAMEBUFFER_UPDATE: u8 = 0;
pub const SMSG_SET_COLOR_MAP_ENTRIES: u8 = 1;
pub const SMSG_BELL: u8 = 2;
pub const SMSG_SERVER_CUT_TEXT: u8 = 3;
