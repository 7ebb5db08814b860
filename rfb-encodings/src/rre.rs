//! RRE encoding - rise-and-run-length encoding.
//!
//! RRE (type 2) describes a rectangle as a background colour plus a list of
//! solid-colour sub-rectangles:
//!
//! ```text
//! +------------------+
//! | num_subrects     |  4 bytes (u32)
//! +------------------+
//! | background pixel |
//! +------------------+
//! | per sub-rect:    |
//! |   pixel          |
//! |   x, y, w, h     |  4 x u16, relative to the rectangle
//! +------------------+
//! ```
//!
//! Pixel representation on the wire:
//!
//! - 8-bit colour-mapped formats: the 1-byte palette index, verbatim.
//! - True-colour formats of at least 3 bytes with 8-bit channels: the
//!   colour's 3 significant bytes in B,G,R order, zero-padded out to
//!   `bytes_per_pixel`. Readers reverse the triple to recover RGB.
//!
//! Other formats cannot express their colours this way; the decoder rejects
//! them and the encoding side falls back to Raw (check
//! [`RreCodec::supports`] before encoding).

use crate::{
    grab_rect_pixels, Decoder, Encoder, MutablePixelBuffer, PixelBuffer, PixelFormat, Rectangle,
    RfbInStream, ZlibStreams, ENCODING_RRE,
};
use anyhow::{anyhow, bail, Context, Result};
use rfb_common::Rect;
use std::collections::HashMap;
use tokio::io::AsyncRead;

/// The RRE codec. Stateless.
#[derive(Default)]
pub struct RreCodec;

impl RreCodec {
    /// True when `format` has an RRE pixel representation.
    pub fn supports(format: &PixelFormat) -> bool {
        if format.is_indexed() {
            return format.bytes_per_pixel() == 1;
        }
        format.bytes_per_pixel() >= 3
            && format.red_max == 255
            && format.green_max == 255
            && format.blue_max == 255
    }

    /// Append one native pixel to `out` in its wire representation.
    fn write_wire_pixel(out: &mut Vec<u8>, native: &[u8], format: &PixelFormat) {
        if format.is_indexed() {
            out.push(native[0]);
            return;
        }
        let [r, g, b] = format.pack_rgb(native);
        out.push(b);
        out.push(g);
        out.push(r);
        for _ in 3..format.bytes_per_pixel() as usize {
            out.push(0);
        }
    }

    /// Read one wire pixel from the stream, returning it in native form.
    async fn read_wire_pixel<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
        format: &PixelFormat,
    ) -> Result<Vec<u8>> {
        let mut wire = vec![0u8; format.bytes_per_pixel() as usize];
        stream.read_bytes(&mut wire).await?;
        if format.is_indexed() {
            return Ok(wire);
        }
        Ok(format.unpack_rgb([wire[2], wire[1], wire[0]]))
    }
}

impl Encoder for RreCodec {
    fn encoding_type(&self) -> i32 {
        ENCODING_RRE
    }

    fn encode(
        &mut self,
        rect: &Rectangle,
        buffer: &dyn PixelBuffer,
        wire_format: &PixelFormat,
        _streams: &mut ZlibStreams,
    ) -> Result<Vec<u8>> {
        if !Self::supports(wire_format) {
            bail!(
                "RRE cannot represent {}bpp format (indexed or 8-bit channels required)",
                wire_format.bits_per_pixel
            );
        }

        let width = rect.width as usize;
        let height = rect.height as usize;
        let bpp = wire_format.bytes_per_pixel() as usize;
        let pixels = grab_rect_pixels(rect, buffer, wire_format)
            .context("failed to read framebuffer for RRE encode")?;

        // Most frequent colour becomes the background.
        let mut histogram: HashMap<&[u8], u32> = HashMap::new();
        for pixel in pixels.chunks_exact(bpp) {
            *histogram.entry(pixel).or_insert(0) += 1;
        }
        let background = histogram
            .iter()
            .max_by_key(|entry| *entry.1)
            .map(|(pixel, _)| pixel.to_vec())
            .ok_or_else(|| anyhow!("RRE encode of empty rectangle"))?;

        // Maximal horizontal runs of any other colour become sub-rects.
        let mut subrects: Vec<(Vec<u8>, u16, u16, u16)> = Vec::new();
        for y in 0..height {
            let row = &pixels[y * width * bpp..(y + 1) * width * bpp];
            let mut x = 0;
            while x < width {
                let pixel = &row[x * bpp..(x + 1) * bpp];
                if pixel == background.as_slice() {
                    x += 1;
                    continue;
                }
                let mut run = 1;
                while x + run < width && &row[(x + run) * bpp..(x + run + 1) * bpp] == pixel {
                    run += 1;
                }
                subrects.push((pixel.to_vec(), x as u16, y as u16, run as u16));
                x += run;
            }
        }

        let mut out = Vec::with_capacity(4 + bpp + subrects.len() * (bpp + 8));
        out.extend_from_slice(&(subrects.len() as u32).to_be_bytes());
        Self::write_wire_pixel(&mut out, &background, wire_format);
        for (pixel, x, y, run) in &subrects {
            Self::write_wire_pixel(&mut out, pixel, wire_format);
            out.extend_from_slice(&x.to_be_bytes());
            out.extend_from_slice(&y.to_be_bytes());
            out.extend_from_slice(&run.to_be_bytes());
            out.extend_from_slice(&1u16.to_be_bytes());
        }
        Ok(out)
    }
}

impl Decoder for RreCodec {
    fn encoding_type(&self) -> i32 {
        ENCODING_RRE
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        _streams: &mut ZlibStreams,
    ) -> Result<()> {
        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }

        if !Self::supports(pixel_format) {
            bail!(
                "RRE cannot represent {}bpp format (indexed or 8-bit channels required)",
                pixel_format.bits_per_pixel
            );
        }

        let num_subrects = stream
            .read_u32()
            .await
            .context("Failed to read RRE num_subrects")?;

        let bg_pixel = Self::read_wire_pixel(stream, pixel_format)
            .await
            .context("Failed to read RRE background pixel")?;

        let dest_rect = Rect::new(
            rect.x as i32,
            rect.y as i32,
            rect.width as u32,
            rect.height as u32,
        );
        buffer
            .fill_rect(dest_rect, &bg_pixel)
            .context("Failed to fill background in RRE decode")?;

        for i in 0..num_subrects {
            let pixel = Self::read_wire_pixel(stream, pixel_format)
                .await
                .with_context(|| format!("Failed to read pixel for RRE subrect {}", i))?;
            let x = stream
                .read_u16()
                .await
                .with_context(|| format!("Failed to read x for RRE subrect {}", i))?;
            let y = stream
                .read_u16()
                .await
                .with_context(|| format!("Failed to read y for RRE subrect {}", i))?;
            let width = stream
                .read_u16()
                .await
                .with_context(|| format!("Failed to read width for RRE subrect {}", i))?;
            let height = stream
                .read_u16()
                .await
                .with_context(|| format!("Failed to read height for RRE subrect {}", i))?;

            let right = x
                .checked_add(width)
                .ok_or_else(|| anyhow!("RRE subrect {} x+width overflows: {} + {}", i, x, width))?;
            let bottom = y.checked_add(height).ok_or_else(|| {
                anyhow!("RRE subrect {} y+height overflows: {} + {}", i, y, height)
            })?;

            if right > rect.width || bottom > rect.height {
                bail!(
                    "RRE subrect {} extends beyond rectangle: [{},{} {}x{}] vs {}x{}",
                    i,
                    x,
                    y,
                    width,
                    height,
                    rect.width,
                    rect.height
                );
            }

            if width == 0 || height == 0 {
                continue;
            }

            let subrect = Rect::new(
                rect.x as i32 + x as i32,
                rect.y as i32 + y as i32,
                width as u32,
                height as u32,
            );
            buffer.fill_rect(subrect, &pixel).with_context(|| {
                format!("Failed to fill RRE subrect {} at ({}, {})", i, x, y)
            })?;
        }

        Ok(())
    }
}
