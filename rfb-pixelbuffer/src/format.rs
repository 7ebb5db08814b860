//! RFB pixel format descriptions and conversions.
//!
//! This module defines the [`PixelFormat`] type which describes how pixels are encoded
//! in the RFB protocol. It handles various color depths, endianness, and channel layouts.
//!
//! # Color Models
//!
//! The RFB protocol supports two color models:
//! - **True color** (direct color): Each pixel directly encodes RGB values using bit fields
//! - **Color map**: Pixels are indices into a separate color lookup table
//!
//! Both are supported here. For color-mapped formats the lookup table lives on
//! the [`PixelFormat`] itself; it starts empty and is populated when the map
//! arrives (SetColorMapEntries on the viewer side, the display driver on the
//! server side). The invariant is that a non-empty map only ever exists on a
//! format with `true_color == false`.
//!
//! # Pixel Format Components
//!
//! - **bits_per_pixel**: Storage size in bits (typically 8, 16, or 32)
//! - **depth**: Actual color depth (sum of significant bits in R, G, B channels)
//! - **big_endian**: Byte order for multi-byte pixels
//! - **red/green/blue_max**: Maximum value for each color channel (e.g., 255 for 8-bit)
//! - **red/green/blue_shift**: Bit position of the least significant bit of each channel
//!
//! # Critical Note: Stride is in Pixels, Not Bytes!
//!
//! **IMPORTANT**: The stride in pixel buffers is measured in **pixels**,
//! not bytes. When calculating byte offsets, always multiply stride by
//! `bytes_per_pixel()`:  `byte_length = height * stride * bytes_per_pixel()`
//!
//! # Example
//!
//! ```
//! use rfb_pixelbuffer::PixelFormat;
//!
//! // Create standard RGB888 format (32bpp, little-endian)
//! let pf = PixelFormat::rgb888();
//! assert_eq!(pf.bytes_per_pixel(), 4);
//! assert_eq!(pf.depth, 24);
//!
//! // Convert a pixel to RGBA8888
//! let pixel = [0xCC, 0xBB, 0xAA, 0x00]; // Little-endian: 0x00AABBCC
//! let rgba = pf.to_rgb888(&pixel);
//! assert_eq!(rgba, [0xAA, 0xBB, 0xCC, 0xFF]);
//!
//! // Convert RGBA8888 back to pixel format
//! let raw = pf.from_rgb888([0xAA, 0xBB, 0xCC, 0xFF]);
//! assert_eq!(raw, vec![0xCC, 0xBB, 0xAA, 0x00]);
//! ```

pub use rfb_protocol::messages::server::ColorMapEntry;

/// Describes an RFB pixel format and provides conversions to/from RGB888.
///
/// This structure contains all the information needed to encode and decode pixels
/// in the RFB protocol. It handles various bit depths, endianness, and color channel
/// layouts, plus the color lookup table for indexed formats.
///
/// # Standard Formats
///
/// Use [`PixelFormat::rgb888()`] for the most common format: 32-bit RGBA with
/// 8 bits per channel, little-endian byte order. [`PixelFormat::indexed8()`]
/// gives the classic 8-bit color-mapped format.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelFormat {
    /// Bits used per pixel (bpp), e.g., 32 for RGB888 in 32-bit storage.
    pub bits_per_pixel: u8,

    /// Actual color depth (sum of significant bits), e.g., 24 for RGB888.
    pub depth: u8,

    /// Byte order for multi-byte pixels (`true` = big endian, `false` = little endian).
    pub big_endian: bool,

    /// True color (direct color) vs. color map (`false`).
    pub true_color: bool,

    /// Maximum valid red component value in this format (e.g., 255 for 8-bit red).
    pub red_max: u16,

    /// Maximum valid green component value in this format.
    pub green_max: u16,

    /// Maximum valid blue component value in this format.
    pub blue_max: u16,

    /// Bit shift for the least significant bit of the red component.
    pub red_shift: u8,

    /// Bit shift for the least significant bit of the green component.
    pub green_shift: u8,

    /// Bit shift for the least significant bit of the blue component.
    pub blue_shift: u8,

    /// Color lookup table for indexed formats.
    ///
    /// Must stay empty when `true_color` is true. Indexed pixels are
    /// resolved through this table; an index past the end resolves to
    /// black until the map arrives.
    pub color_map: Vec<ColorMapEntry>,
}

impl PixelFormat {
    /// Returns bytes-per-pixel (storage width), rounded up to the nearest byte.
    ///
    /// # Note
    ///
    /// This returns the **byte** size of a single pixel. In contrast, stride values
    /// elsewhere in the pixel buffer API are measured in **pixels**, not bytes.
    /// Always multiply stride by `bytes_per_pixel()` when calculating byte offsets.
    pub fn bytes_per_pixel(&self) -> u8 {
        self.bits_per_pixel.div_ceil(8)
    }

    /// Returns a standard little-endian 32bpp RGB888 pixel format.
    ///
    /// This is the most common format:
    /// - 32 bits per pixel (4 bytes)
    /// - 24-bit color depth (8 bits per channel)
    /// - Little-endian byte order
    /// - Red at bit 16, Green at bit 8, Blue at bit 0
    ///
    /// In memory, a pixel with R=0xAA, G=0xBB, B=0xCC is stored as:
    /// `[0xCC, 0xBB, 0xAA, 0x00]` (blue, green, red, padding)
    pub fn rgb888() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_color: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
            color_map: Vec::new(),
        }
    }

    /// Returns an 8-bit color-mapped format with an empty lookup table.
    ///
    /// Populate the table with [`set_color_map`](Self::set_color_map) once
    /// the map is known.
    pub fn indexed8() -> Self {
        Self {
            bits_per_pixel: 8,
            depth: 8,
            big_endian: false,
            true_color: false,
            red_max: 0,
            green_max: 0,
            blue_max: 0,
            red_shift: 0,
            green_shift: 0,
            blue_shift: 0,
            color_map: Vec::new(),
        }
    }

    /// True when this is a color-mapped (indexed) format.
    pub fn is_indexed(&self) -> bool {
        !self.true_color
    }

    /// Returns the color lookup table (empty for true-color formats).
    pub fn color_map(&self) -> &[ColorMapEntry] {
        &self.color_map
    }

    /// Install color map entries starting at `first_color`.
    ///
    /// # Panics
    ///
    /// Panics when called on a true-color format; the map only exists for
    /// indexed formats.
    pub fn set_color_map(&mut self, first_color: u16, entries: &[ColorMapEntry]) {
        assert!(
            !self.true_color,
            "color map is only valid for indexed formats"
        );
        let end = first_color as usize + entries.len();
        if self.color_map.len() < end {
            self.color_map.resize(
                end,
                ColorMapEntry {
                    red: 0,
                    green: 0,
                    blue: 0,
                },
            );
        }
        self.color_map[first_color as usize..end].copy_from_slice(entries);
    }

    /// True when pixels degrade to 3-byte TPIXELs in the Tight encoding.
    ///
    /// Tight drops the padding byte when the format is 32bpp, depth 24,
    /// with all channel maxima at 255: exactly 3 significant bytes per
    /// pixel travel on the wire instead of 4.
    pub fn is_tight_native(&self) -> bool {
        self.true_color
            && self.bits_per_pixel == 32
            && self.depth == 24
            && self.red_max == 255
            && self.green_max == 255
            && self.blue_max == 255
    }

    /// Converts a pixel from this format to RGBA8888 `[R, G, B, A]` where `A=255`.
    ///
    /// Indexed formats resolve through the color map; an index outside the
    /// map yields black.
    ///
    /// # Panics
    ///
    /// Panics if `pixel.len()` does not equal `self.bytes_per_pixel()`, or if a
    /// true-color format has a zero channel max (invalid format).
    pub fn to_rgb888(&self, pixel: &[u8]) -> [u8; 4] {
        let bpp = self.bytes_per_pixel() as usize;
        assert_eq!(
            pixel.len(),
            bpp,
            "pixel length {} does not match bytes_per_pixel {}",
            pixel.len(),
            bpp
        );

        let value = self.assemble(pixel);

        if !self.true_color {
            return match self.color_map.get(value as usize) {
                // Map entries are 16-bit per channel; take the high byte.
                Some(entry) => [
                    (entry.red >> 8) as u8,
                    (entry.green >> 8) as u8,
                    (entry.blue >> 8) as u8,
                    255,
                ],
                None => [0, 0, 0, 255],
            };
        }

        // Extract color components by shifting and masking
        let r = ((value >> self.red_shift) & (self.red_max as u32)) as u16;
        let g = ((value >> self.green_shift) & (self.green_max as u32)) as u16;
        let b = ((value >> self.blue_shift) & (self.blue_max as u32)) as u16;

        // Scale to 8-bit (0-255)
        assert!(self.red_max > 0, "red_max must be > 0");
        assert!(self.green_max > 0, "green_max must be > 0");
        assert!(self.blue_max > 0, "blue_max must be > 0");

        let r8 = ((r * 255) / self.red_max) as u8;
        let g8 = ((g * 255) / self.green_max) as u8;
        let b8 = ((b * 255) / self.blue_max) as u8;

        [r8, g8, b8, 255]
    }

    /// Converts an RGBA8888 pixel `[R, G, B, A]` to this format.
    ///
    /// The alpha channel is ignored (only RGB channels are encoded).
    /// Indexed formats pick the nearest entry in the color map.
    pub fn from_rgb888(&self, rgb: [u8; 4]) -> Vec<u8> {
        if !self.true_color {
            return self.disassemble(self.nearest_map_index(rgb));
        }

        // Scale from 8-bit to format range
        let r = (rgb[0] as u32 * self.red_max as u32) / 255;
        let g = (rgb[1] as u32 * self.green_max as u32) / 255;
        let b = (rgb[2] as u32 * self.blue_max as u32) / 255;

        let value = (r << self.red_shift) | (g << self.green_shift) | (b << self.blue_shift);
        self.disassemble(value)
    }

    /// Extract a native pixel's 3 significant bytes in RGB order.
    ///
    /// The Tight and RRE codecs carry non-indexed colors as 3 bytes with
    /// red first regardless of the negotiated shifts; this helper is the
    /// single place that assumption lives.
    pub fn pack_rgb(&self, pixel: &[u8]) -> [u8; 3] {
        let [r, g, b, _] = self.to_rgb888(pixel);
        [r, g, b]
    }

    /// Rebuild a native pixel from 3 wire bytes in RGB order.
    ///
    /// Inverse of [`pack_rgb`](Self::pack_rgb).
    pub fn unpack_rgb(&self, rgb: [u8; 3]) -> Vec<u8> {
        self.from_rgb888([rgb[0], rgb[1], rgb[2], 255])
    }

    /// Assemble raw pixel bytes into a u32 value per the format's endianness.
    fn assemble(&self, pixel: &[u8]) -> u32 {
        let bpp = self.bytes_per_pixel() as usize;
        let mut value = 0u32;
        if self.big_endian {
            for &byte in pixel.iter().take(bpp) {
                value = (value << 8) | (byte as u32);
            }
        } else {
            for (i, &byte) in pixel.iter().take(bpp).enumerate() {
                value |= (byte as u32) << (i * 8);
            }
        }
        value
    }

    /// Write a u32 pixel value out as raw bytes per the format's endianness.
    fn disassemble(&self, mut value: u32) -> Vec<u8> {
        let bpp = self.bytes_per_pixel() as usize;
        let mut result = vec![0u8; bpp];
        if self.big_endian {
            for i in 0..bpp {
                result[bpp - 1 - i] = (value & 0xFF) as u8;
                value >>= 8;
            }
        } else {
            for item in result.iter_mut().take(bpp) {
                *item = (value & 0xFF) as u8;
                value >>= 8;
            }
        }
        result
    }

    fn nearest_map_index(&self, rgb: [u8; 4]) -> u32 {
        let mut best = 0u32;
        let mut best_dist = u32::MAX;
        for (i, entry) in self.color_map.iter().enumerate() {
            let dr = (entry.red >> 8) as i32 - rgb[0] as i32;
            let dg = (entry.green >> 8) as i32 - rgb[1] as i32;
            let db = (entry.blue >> 8) as i32 - rgb[2] as i32;
            let dist = (dr * dr + dg * dg + db * db) as u32;
            if dist < best_dist {
                best_dist = dist;
                best = i as u32;
            }
        }
        best
    }

    /// Check if this pixel format is RGB888 (32bpp, 24-bit depth, little-endian).
    pub fn is_rgb888(&self) -> bool {
        self.bits_per_pixel == 32
            && self.depth == 24
            && !self.big_endian
            && self.true_color
            && self.red_max == 255
            && self.green_max == 255
            && self.blue_max == 255
            && self.red_shift == 16
            && self.green_shift == 8
            && self.blue_shift == 0
    }
}

/// Convert from protocol PixelFormat to pixelbuffer PixelFormat.
///
/// The wire record carries no color map; for indexed formats the map
/// starts empty and is installed when SetColorMapEntries arrives.
impl From<rfb_protocol::messages::types::PixelFormat> for PixelFormat {
    fn from(pf: rfb_protocol::messages::types::PixelFormat) -> Self {
        Self {
            bits_per_pixel: pf.bits_per_pixel,
            depth: pf.depth,
            big_endian: pf.big_endian != 0,
            true_color: pf.true_color != 0,
            red_max: pf.red_max,
            green_max: pf.green_max,
            blue_max: pf.blue_max,
            red_shift: pf.red_shift,
            green_shift: pf.green_shift,
            blue_shift: pf.blue_shift,
            color_map: Vec::new(),
        }
    }
}

/// Convert back to the 16-byte wire record (the color map travels separately).
impl From<&PixelFormat> for rfb_protocol::messages::types::PixelFormat {
    fn from(pf: &PixelFormat) -> Self {
        Self {
            bits_per_pixel: pf.bits_per_pixel,
            depth: pf.depth,
            big_endian: pf.big_endian as u8,
            true_color: pf.true_color as u8,
            red_max: pf.red_max,
            green_max: pf.green_max,
            blue_max: pf.blue_max,
            red_shift: pf.red_shift,
            green_shift: pf.green_shift,
            blue_shift: pf.blue_shift,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        let pf = PixelFormat::rgb888();
        assert_eq!(pf.bytes_per_pixel(), 4);

        // Test rounding up
        let pf_12bit = PixelFormat {
            bits_per_pixel: 12,
            depth: 12,
            big_endian: false,
            true_color: true,
            red_max: 15,
            green_max: 15,
            blue_max: 15,
            red_shift: 8,
            green_shift: 4,
            blue_shift: 0,
            color_map: Vec::new(),
        };
        assert_eq!(pf_12bit.bytes_per_pixel(), 2); // 12 bits rounds up to 2 bytes
    }

    #[test]
    fn test_rgb888_format() {
        let pf = PixelFormat::rgb888();
        assert_eq!(pf.bits_per_pixel, 32);
        assert_eq!(pf.depth, 24);
        assert!(!pf.big_endian);
        assert!(pf.true_color);
        assert_eq!(pf.red_max, 255);
        assert_eq!(pf.green_max, 255);
        assert_eq!(pf.blue_max, 255);
        assert_eq!(pf.red_shift, 16);
        assert_eq!(pf.green_shift, 8);
        assert_eq!(pf.blue_shift, 0);
        assert!(pf.is_tight_native());
    }

    #[test]
    fn test_to_rgb888_little_endian() {
        let pf = PixelFormat::rgb888();

        // 0x00112233 little-endian = [0x33, 0x22, 0x11, 0x00]
        let pixel = [0x33, 0x22, 0x11, 0x00];
        let rgba = pf.to_rgb888(&pixel);
        assert_eq!(rgba, [0x11, 0x22, 0x33, 0xFF]);
    }

    #[test]
    fn test_from_rgb888_little_endian() {
        let pf = PixelFormat::rgb888();

        let rgba = [0xAA, 0xBB, 0xCC, 0xFF];
        let raw = pf.from_rgb888(rgba);
        // 0x00AABBCC little-endian = [0xCC, 0xBB, 0xAA, 0x00]
        assert_eq!(raw, vec![0xCC, 0xBB, 0xAA, 0x00]);
    }

    #[test]
    fn test_round_trip_rgb888() {
        let pf = PixelFormat::rgb888();

        let original = [0x12, 0x34, 0x56, 0xFF];
        let encoded = pf.from_rgb888(original);
        let decoded = pf.to_rgb888(&encoded);
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_big_endian_conversion() {
        let pf = PixelFormat {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: true, // Big endian
            true_color: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
            color_map: Vec::new(),
        };

        // 0x00112233 big-endian = [0x00, 0x11, 0x22, 0x33]
        let pixel = [0x00, 0x11, 0x22, 0x33];
        let rgba = pf.to_rgb888(&pixel);
        assert_eq!(rgba, [0x11, 0x22, 0x33, 0xFF]);

        // Round trip
        let encoded = pf.from_rgb888([0xAA, 0xBB, 0xCC, 0xFF]);
        assert_eq!(encoded, vec![0x00, 0xAA, 0xBB, 0xCC]);
        let decoded = pf.to_rgb888(&encoded);
        assert_eq!(decoded, [0xAA, 0xBB, 0xCC, 0xFF]);
    }

    #[test]
    fn test_rgb565_format() {
        // 16-bit RGB565: 5 bits red, 6 bits green, 5 bits blue
        let pf = PixelFormat {
            bits_per_pixel: 16,
            depth: 16,
            big_endian: false,
            true_color: true,
            red_max: 31,   // 5 bits
            green_max: 63, // 6 bits
            blue_max: 31,  // 5 bits
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
            color_map: Vec::new(),
        };

        assert_eq!(pf.bytes_per_pixel(), 2);
        assert!(!pf.is_tight_native());

        // Test conversion: max values should scale to 255
        let rgba = [255, 255, 255, 255];
        let encoded = pf.from_rgb888(rgba);
        assert_eq!(encoded.len(), 2);

        let decoded = pf.to_rgb888(&encoded);
        assert_eq!(decoded, [255, 255, 255, 255]);
    }

    #[test]
    fn test_indexed_lookup() {
        let mut pf = PixelFormat::indexed8();
        assert!(pf.is_indexed());
        assert!(!pf.is_tight_native());

        pf.set_color_map(
            0,
            &[
                ColorMapEntry { red: 0xFF00, green: 0, blue: 0 },
                ColorMapEntry { red: 0, green: 0xFF00, blue: 0 },
            ],
        );

        assert_eq!(pf.to_rgb888(&[0]), [0xFF, 0, 0, 0xFF]);
        assert_eq!(pf.to_rgb888(&[1]), [0, 0xFF, 0, 0xFF]);
        // Out-of-map index resolves to black
        assert_eq!(pf.to_rgb888(&[7]), [0, 0, 0, 0xFF]);
    }

    #[test]
    fn test_indexed_set_color_map_offset() {
        let mut pf = PixelFormat::indexed8();
        pf.set_color_map(
            2,
            &[ColorMapEntry { red: 0, green: 0, blue: 0xFF00 }],
        );
        assert_eq!(pf.color_map().len(), 3);
        assert_eq!(pf.to_rgb888(&[2]), [0, 0, 0xFF, 0xFF]);
    }

    #[test]
    fn test_indexed_nearest_from_rgb888() {
        let mut pf = PixelFormat::indexed8();
        pf.set_color_map(
            0,
            &[
                ColorMapEntry { red: 0, green: 0, blue: 0 },
                ColorMapEntry { red: 0xFF00, green: 0xFF00, blue: 0xFF00 },
            ],
        );
        assert_eq!(pf.from_rgb888([250, 250, 250, 255]), vec![1]);
        assert_eq!(pf.from_rgb888([5, 5, 5, 255]), vec![0]);
    }

    #[test]
    fn test_pack_unpack_rgb() {
        let pf = PixelFormat::rgb888();
        let pixel = pf.from_rgb888([0x12, 0x34, 0x56, 0xFF]);
        assert_eq!(pf.pack_rgb(&pixel), [0x12, 0x34, 0x56]);
        assert_eq!(pf.unpack_rgb([0x12, 0x34, 0x56]), pixel);
    }

    #[test]
    #[should_panic(expected = "pixel length")]
    fn test_to_rgb888_wrong_size_panics() {
        let pf = PixelFormat::rgb888();
        let wrong_size = [0x11, 0x22]; // Only 2 bytes, need 4
        pf.to_rgb888(&wrong_size);
    }

    #[test]
    #[should_panic(expected = "red_max must be > 0")]
    fn test_to_rgb888_zero_max_panics() {
        let pf = PixelFormat {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_color: true,
            red_max: 0, // Invalid!
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
            color_map: Vec::new(),
        };
        let pixel = [0x00, 0x00, 0x00, 0x00];
        pf.to_rgb888(&pixel);
    }

    #[test]
    #[should_panic(expected = "only valid for indexed")]
    fn test_set_color_map_on_true_color_panics() {
        let mut pf = PixelFormat::rgb888();
        pf.set_color_map(0, &[ColorMapEntry { red: 0, green: 0, blue: 0 }]);
    }
}
