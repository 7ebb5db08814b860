//! Tight encoding - zlib/palette/gradient compression with JPEG decode.
//!
//! Tight (type 7) is the workhorse encoding. Every rectangle starts with a
//! compression control byte:
//!
//! ```text
//! bit 7..4: operation          bit 3..0: zlib stream reset flags
//!   0x8  FILL  (solid colour)    bit i set = reset stream i before
//!   0x9  JPEG  (decode only)     decoding this rectangle
//!   0xxx Basic (see below)
//! ```
//!
//! Basic operations carry the zlib stream index in bits 4-5 and an
//! "explicit filter byte follows" flag in bit 6. The filter is one of:
//!
//! - `0x00` COPY: literal TPIXELs.
//! - `0x01` PALETTE: colour count byte, palette TPIXELs, then indices.
//!   Exactly 2 colours packs indices 1 bit per pixel, MSB first, each row
//!   padded to a whole byte.
//! - `0x02` GRADIENT: per-channel residuals against the prediction
//!   `clamp(left + above - aboveLeft, 0, 255)`.
//!
//! A TPIXEL is 3 bytes in RGB order when the format is tight native
//! (32bpp, depth 24, 8-bit channels); otherwise it is a full native pixel.
//!
//! Basic payloads of at least [`TIGHT_MIN_BYTES_TO_COMPRESS`] bytes travel
//! zlib-compressed through the selected stream, preceded by the compact
//! length of the *compressed* byte count. Shorter payloads are sent as-is.
//! Stream dictionaries persist across rectangles; a rectangle may only
//! decompress as a continuation of its predecessors on the same stream.
//!
//! The encoder never emits JPEG: it is lossy and cannot honour the
//! bit-exact decode(encode(x)) == x contract. JPEG rectangles are decoded
//! for interoperability with servers that send them.

use crate::{
    grab_rect_pixels, Decoder, Encoder, MutablePixelBuffer, PixelBuffer, PixelFormat, Rectangle,
    RfbInStream, ZlibStreams, ENCODING_TIGHT,
};
use anyhow::{anyhow, bail, Context, Result};
use rfb_common::Rect;
use std::io::Cursor;
use tokio::io::AsyncRead;

// Control byte operations (upper nibble).
const TIGHT_EXPLICIT_FILTER: u8 = 0x04;
const TIGHT_FILL: u8 = 0x08;
const TIGHT_JPEG: u8 = 0x09;
const TIGHT_MAX_SUBENCODING: u8 = 0x09;

// Filter ids following an explicit filter flag.
const TIGHT_FILTER_COPY: u8 = 0x00;
const TIGHT_FILTER_PALETTE: u8 = 0x01;
const TIGHT_FILTER_GRADIENT: u8 = 0x02;

/// Rectangles wider than this must be split before Tight encoding.
pub const TIGHT_MAX_WIDTH: u16 = 2048;

/// Basic payloads below this many bytes are sent uncompressed.
pub const TIGHT_MIN_BYTES_TO_COMPRESS: usize = 12;

// Zlib stream assignment on the encode side. The wire allows any stream
// for any filter; keeping them separate preserves each dictionary's
// locality.
const STREAM_COPY: usize = 0;
const STREAM_PALETTE: usize = 1;
const STREAM_GRADIENT: usize = 2;

/// The Tight codec.
///
/// Encoding policy: one colour becomes FILL, up to 256 colours become a
/// palette, anything else is sent as literal TPIXELs through zlib. Callers
/// that know a rectangle is continuous-tone (screenshots of photos,
/// gradients) can opt into the gradient filter with
/// [`with_gradient`](Self::with_gradient).
#[derive(Default)]
pub struct TightCodec {
    gradient_hint: bool,
}

impl TightCodec {
    /// Prefer the gradient filter for multi-colour rectangles.
    ///
    /// Only honoured for tight-native formats; other formats fall back to
    /// the palette/copy policy.
    pub fn with_gradient(gradient_hint: bool) -> Self {
        Self { gradient_hint }
    }

    fn tpixel_len(format: &PixelFormat) -> usize {
        if format.is_tight_native() {
            3
        } else {
            format.bytes_per_pixel() as usize
        }
    }

    /// Append one native pixel in TPIXEL form.
    fn write_tpixel(out: &mut Vec<u8>, native: &[u8], format: &PixelFormat) {
        if format.is_tight_native() {
            out.extend_from_slice(&format.pack_rgb(native));
        } else {
            out.extend_from_slice(native);
        }
    }

    /// Convert a TPIXEL slice back to a native pixel.
    fn tpixel_to_native(tpixel: &[u8], format: &PixelFormat) -> Vec<u8> {
        if format.is_tight_native() {
            format.unpack_rgb([tpixel[0], tpixel[1], tpixel[2]])
        } else {
            tpixel.to_vec()
        }
    }

    /// Convert a whole TPIXEL payload to native pixels for `image_rect`.
    fn tpixels_to_native(data: &[u8], format: &PixelFormat) -> Vec<u8> {
        if !format.is_tight_native() {
            return data.to_vec();
        }
        let mut native = Vec::with_capacity(data.len() / 3 * 4);
        for tpixel in data.chunks_exact(3) {
            native.extend_from_slice(&format.unpack_rgb([tpixel[0], tpixel[1], tpixel[2]]));
        }
        native
    }

    fn write_compact_length(out: &mut Vec<u8>, mut value: usize) {
        debug_assert!(value < (1 << 22));
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    /// Append a basic-mode payload: raw when short, compressed with a
    /// compact length prefix otherwise.
    fn write_payload(
        out: &mut Vec<u8>,
        data: &[u8],
        stream_id: usize,
        streams: &mut ZlibStreams,
    ) -> Result<()> {
        if data.len() < TIGHT_MIN_BYTES_TO_COMPRESS {
            out.extend_from_slice(data);
            return Ok(());
        }
        let compressed = streams.compress(stream_id, data)?;
        Self::write_compact_length(out, compressed.len());
        out.extend_from_slice(&compressed);
        Ok(())
    }

    /// Read a basic-mode payload of known uncompressed size.
    async fn read_payload<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
        uncompressed_len: usize,
        stream_id: usize,
        streams: &mut ZlibStreams,
    ) -> Result<Vec<u8>> {
        if uncompressed_len < TIGHT_MIN_BYTES_TO_COMPRESS {
            let mut data = vec![0u8; uncompressed_len];
            stream
                .read_bytes(&mut data)
                .await
                .context("Failed to read uncompressed Tight data")?;
            return Ok(data);
        }

        let compressed_len = stream
            .read_compact_length()
            .await
            .context("Failed to read Tight compressed length")?;
        let mut compressed = vec![0u8; compressed_len];
        stream
            .read_bytes(&mut compressed)
            .await
            .with_context(|| {
                format!("Failed to read {} bytes of compressed Tight data", compressed_len)
            })?;
        streams.decompress(stream_id, &compressed, uncompressed_len)
    }

    /// Per-channel gradient prediction, clamped to the byte range.
    fn gradient_predict(left: i16, above: i16, above_left: i16) -> u8 {
        (left + above - above_left).clamp(0, 255) as u8
    }

    fn decode_gradient(
        data: &[u8],
        rect: &Rectangle,
        format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        let width = rect.width as usize;
        let height = rect.height as usize;

        let mut prev_row = vec![0u8; width * 3];
        let mut curr_row = vec![0u8; width * 3];
        let bpp = format.bytes_per_pixel() as usize;
        let mut native = Vec::with_capacity(width * height * bpp);

        for y in 0..height {
            for x in 0..width {
                let src = (y * width + x) * 3;
                for c in 0..3 {
                    let left = if x > 0 { curr_row[(x - 1) * 3 + c] as i16 } else { 0 };
                    let above = prev_row[x * 3 + c] as i16;
                    let above_left = if x > 0 { prev_row[(x - 1) * 3 + c] as i16 } else { 0 };
                    let predicted = Self::gradient_predict(left, above, above_left);
                    curr_row[x * 3 + c] = predicted.wrapping_add(data[src + c]);
                }
                let rgb = [curr_row[x * 3], curr_row[x * 3 + 1], curr_row[x * 3 + 2]];
                native.extend_from_slice(&format.unpack_rgb(rgb));
            }
            std::mem::swap(&mut prev_row, &mut curr_row);
        }

        let dest = Rect::new(rect.x as i32, rect.y as i32, width as u32, height as u32);
        buffer.image_rect(dest, &native, width)?;
        Ok(())
    }

    fn encode_gradient(rgb: &[u8], width: usize, height: usize) -> Vec<u8> {
        let mut residuals = Vec::with_capacity(rgb.len());
        let mut prev_row = vec![0u8; width * 3];
        let mut curr_row = vec![0u8; width * 3];

        for y in 0..height {
            for x in 0..width {
                let src = (y * width + x) * 3;
                for c in 0..3 {
                    let left = if x > 0 { curr_row[(x - 1) * 3 + c] as i16 } else { 0 };
                    let above = prev_row[x * 3 + c] as i16;
                    let above_left = if x > 0 { prev_row[(x - 1) * 3 + c] as i16 } else { 0 };
                    let predicted = Self::gradient_predict(left, above, above_left);
                    curr_row[x * 3 + c] = rgb[src + c];
                    residuals.push(rgb[src + c].wrapping_sub(predicted));
                }
            }
            std::mem::swap(&mut prev_row, &mut curr_row);
        }
        residuals
    }

    async fn decode_palette<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        stream_id: usize,
        streams: &mut ZlibStreams,
    ) -> Result<()> {
        let size_byte = stream
            .read_u8()
            .await
            .context("Failed to read Tight palette size")?;
        let palette_size = size_byte as usize + 1;
        if palette_size < 2 {
            bail!("Tight PALETTE: invalid palette size {}", palette_size);
        }

        let tpixel_len = Self::tpixel_len(format);
        let mut palette_wire = vec![0u8; palette_size * tpixel_len];
        stream
            .read_bytes(&mut palette_wire)
            .await
            .context("Failed to read Tight palette entries")?;

        let bpp = format.bytes_per_pixel() as usize;
        let mut palette = Vec::with_capacity(palette_size);
        for entry in palette_wire.chunks_exact(tpixel_len) {
            palette.push(Self::tpixel_to_native(entry, format));
        }

        let width = rect.width as usize;
        let height = rect.height as usize;
        let index_len = if palette_size == 2 {
            height * width.div_ceil(8)
        } else {
            width * height
        };
        let indices = Self::read_payload(stream, index_len, stream_id, streams).await?;

        let mut native = Vec::with_capacity(width * height * bpp);
        if palette_size == 2 {
            let row_bytes = width.div_ceil(8);
            for y in 0..height {
                let row = &indices[y * row_bytes..(y + 1) * row_bytes];
                for x in 0..width {
                    let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
                    native.extend_from_slice(&palette[bit as usize]);
                }
            }
        } else {
            for (i, &index) in indices.iter().enumerate() {
                let Some(pixel) = palette.get(index as usize) else {
                    bail!(
                        "Tight PALETTE: index {} out of range at pixel {} (palette size {})",
                        index,
                        i,
                        palette_size
                    );
                };
                native.extend_from_slice(pixel);
            }
        }

        let dest = Rect::new(rect.x as i32, rect.y as i32, width as u32, height as u32);
        buffer.image_rect(dest, &native, width)?;
        Ok(())
    }

    async fn decode_jpeg<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        let jpeg_len = stream
            .read_compact_length()
            .await
            .context("Failed to read Tight JPEG length")?;
        let mut jpeg_data = vec![0u8; jpeg_len];
        stream
            .read_bytes(&mut jpeg_data)
            .await
            .with_context(|| format!("Failed to read {} bytes of Tight JPEG data", jpeg_len))?;

        let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(&jpeg_data));
        let pixels = decoder.decode().context("Failed to decode Tight JPEG data")?;
        let info = decoder
            .info()
            .ok_or_else(|| anyhow!("JPEG decoder missing metadata"))?;

        if info.width != rect.width || info.height != rect.height {
            bail!(
                "Tight JPEG: dimension mismatch (JPEG {}x{} vs rect {}x{})",
                info.width,
                info.height,
                rect.width,
                rect.height
            );
        }
        if info.pixel_format != jpeg_decoder::PixelFormat::RGB24 {
            bail!("Tight JPEG: unsupported JPEG pixel format {:?}", info.pixel_format);
        }

        let width = rect.width as usize;
        let height = rect.height as usize;
        let bpp = format.bytes_per_pixel() as usize;
        let mut native = Vec::with_capacity(width * height * bpp);
        for rgb in pixels.chunks_exact(3) {
            native.extend_from_slice(&format.from_rgb888([rgb[0], rgb[1], rgb[2], 255]));
        }

        let dest = Rect::new(rect.x as i32, rect.y as i32, width as u32, height as u32);
        buffer.image_rect(dest, &native, width)?;
        Ok(())
    }
}

impl Encoder for TightCodec {
    fn encoding_type(&self) -> i32 {
        ENCODING_TIGHT
    }

    fn encode(
        &mut self,
        rect: &Rectangle,
        buffer: &dyn PixelBuffer,
        wire_format: &PixelFormat,
        streams: &mut ZlibStreams,
    ) -> Result<Vec<u8>> {
        if rect.width == 0 || rect.height == 0 {
            return Ok(Vec::new());
        }
        if rect.width > TIGHT_MAX_WIDTH {
            bail!(
                "Tight: rectangle too wide ({} > {} max), split before encoding",
                rect.width,
                TIGHT_MAX_WIDTH
            );
        }

        let width = rect.width as usize;
        let height = rect.height as usize;
        let bpp = wire_format.bytes_per_pixel() as usize;
        let pixels = grab_rect_pixels(rect, buffer, wire_format)
            .context("failed to read framebuffer for Tight encode")?;

        // Colour census, capped just past the palette limit.
        let mut colours: Vec<&[u8]> = Vec::new();
        for pixel in pixels.chunks_exact(bpp) {
            if !colours.iter().any(|c| *c == pixel) {
                colours.push(pixel);
                if colours.len() > 256 {
                    break;
                }
            }
        }

        // Solid rectangle: FILL, never compressed.
        if colours.len() == 1 {
            let mut out = vec![TIGHT_FILL << 4];
            Self::write_tpixel(&mut out, colours[0], wire_format);
            return Ok(out);
        }

        // Continuous-tone hint: gradient filter over RGB residuals.
        if self.gradient_hint && wire_format.is_tight_native() {
            let mut rgb = Vec::with_capacity(width * height * 3);
            for pixel in pixels.chunks_exact(bpp) {
                rgb.extend_from_slice(&wire_format.pack_rgb(pixel));
            }
            let residuals = Self::encode_gradient(&rgb, width, height);

            let mut out = vec![
                ((STREAM_GRADIENT as u8) << 4) | (TIGHT_EXPLICIT_FILTER << 4),
                TIGHT_FILTER_GRADIENT,
            ];
            Self::write_payload(&mut out, &residuals, STREAM_GRADIENT, streams)?;
            return Ok(out);
        }

        // Few colours: palette filter.
        if colours.len() <= 256 {
            let palette: Vec<Vec<u8>> = colours.iter().map(|c| c.to_vec()).collect();
            let mut out = vec![
                ((STREAM_PALETTE as u8) << 4) | (TIGHT_EXPLICIT_FILTER << 4),
                TIGHT_FILTER_PALETTE,
                (palette.len() - 1) as u8,
            ];
            for colour in &palette {
                Self::write_tpixel(&mut out, colour, wire_format);
            }

            let index_of = |pixel: &[u8]| -> u8 {
                palette.iter().position(|c| c == pixel).unwrap_or(0) as u8
            };

            let indices = if palette.len() == 2 {
                // 1 bit per pixel, MSB first, rows padded to whole bytes.
                let row_bytes = width.div_ceil(8);
                let mut packed = vec![0u8; height * row_bytes];
                for y in 0..height {
                    for x in 0..width {
                        let pixel = &pixels[(y * width + x) * bpp..(y * width + x + 1) * bpp];
                        if index_of(pixel) == 1 {
                            packed[y * row_bytes + x / 8] |= 0x80 >> (x % 8);
                        }
                    }
                }
                packed
            } else {
                pixels.chunks_exact(bpp).map(index_of).collect()
            };

            Self::write_payload(&mut out, &indices, STREAM_PALETTE, streams)?;
            return Ok(out);
        }

        // Many colours: literal TPIXELs through zlib.
        let mut tpixels = Vec::with_capacity(width * height * Self::tpixel_len(wire_format));
        for pixel in pixels.chunks_exact(bpp) {
            Self::write_tpixel(&mut tpixels, pixel, wire_format);
        }
        let mut out = vec![
            ((STREAM_COPY as u8) << 4) | (TIGHT_EXPLICIT_FILTER << 4),
            TIGHT_FILTER_COPY,
        ];
        Self::write_payload(&mut out, &tpixels, STREAM_COPY, streams)?;
        Ok(out)
    }
}

impl Decoder for TightCodec {
    fn encoding_type(&self) -> i32 {
        ENCODING_TIGHT
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        streams: &mut ZlibStreams,
    ) -> Result<()> {
        let buffer_before = stream.available();
        tracing::debug!(
            target: "rfb_encodings::framing",
            "Tight decode start: rect=[{},{} {}x{}] buffer_before={}",
            rect.x, rect.y, rect.width, rect.height,
            buffer_before
        );

        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }
        if rect.width > TIGHT_MAX_WIDTH {
            bail!(
                "Tight: rectangle too wide ({} > {} max)",
                rect.width,
                TIGHT_MAX_WIDTH
            );
        }

        let comp_ctl = stream.read_u8().await.with_context(|| {
            format!(
                "Failed to read Tight compression control at ({}, {})",
                rect.x, rect.y
            )
        })?;

        // Reset flags apply before anything else in the rectangle.
        for i in 0..4 {
            if (comp_ctl & (1 << i)) != 0 {
                streams.reset(i);
            }
        }

        let comp_type = comp_ctl >> 4;
        tracing::debug!(
            "Tight: comp_ctl={:#04x} comp_type={:#x} reset_bits={:#x}",
            comp_ctl, comp_type, comp_ctl & 0x0F
        );

        if comp_type == TIGHT_FILL {
            let mut tpixel = vec![0u8; Self::tpixel_len(pixel_format)];
            stream
                .read_bytes(&mut tpixel)
                .await
                .context("Failed to read Tight FILL colour")?;
            let native = Self::tpixel_to_native(&tpixel, pixel_format);

            let dest = Rect::new(
                rect.x as i32,
                rect.y as i32,
                rect.width as u32,
                rect.height as u32,
            );
            buffer
                .fill_rect(dest, &native)
                .context("Failed to fill Tight FILL rectangle")?;
            return Ok(());
        }

        if comp_type == TIGHT_JPEG {
            return Self::decode_jpeg(stream, rect, pixel_format, buffer).await;
        }

        if comp_type > TIGHT_MAX_SUBENCODING {
            bail!(
                "Tight: invalid compression type {} (max {})",
                comp_type,
                TIGHT_MAX_SUBENCODING
            );
        }

        // Basic mode: bits 4-5 select the stream, bit 6 announces a filter.
        let stream_id = ((comp_ctl >> 4) & 0x03) as usize;
        let filter = if (comp_ctl & 0x40) != 0 {
            stream
                .read_u8()
                .await
                .context("Failed to read Tight filter id")?
        } else {
            TIGHT_FILTER_COPY
        };

        let width = rect.width as usize;
        let height = rect.height as usize;

        match filter {
            TIGHT_FILTER_COPY => {
                let data_len = width * height * Self::tpixel_len(pixel_format);
                let data = Self::read_payload(stream, data_len, stream_id, streams).await?;
                let native = Self::tpixels_to_native(&data, pixel_format);
                let dest = Rect::new(rect.x as i32, rect.y as i32, width as u32, height as u32);
                buffer.image_rect(dest, &native, width)?;
            }
            TIGHT_FILTER_PALETTE => {
                Self::decode_palette(stream, rect, pixel_format, buffer, stream_id, streams)
                    .await?;
            }
            TIGHT_FILTER_GRADIENT => {
                if !pixel_format.is_tight_native() {
                    bail!(
                        "Tight GRADIENT requires a tight-native format, got {}bpp depth {}",
                        pixel_format.bits_per_pixel,
                        pixel_format.depth
                    );
                }
                let data = Self::read_payload(stream, width * height * 3, stream_id, streams)
                    .await?;
                Self::decode_gradient(&data, rect, pixel_format, buffer)?;
            }
            _ => bail!("Tight: invalid filter type {}", filter),
        }

        tracing::debug!(
            target: "rfb_encodings::framing",
            "Tight decode end: bytes_consumed={}, buffer_after={}",
            buffer_before.saturating_sub(stream.available()),
            stream.available()
        );
        Ok(())
    }
}
