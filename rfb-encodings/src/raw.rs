//! Raw encoding - uncompressed pixel data.
//!
//! Raw (type 0) transmits a rectangle as `width * height * bytes_per_pixel`
//! literal pixels in the negotiated format, row by row, no compression. It
//! is the mandatory baseline every peer accepts, the correctness oracle the
//! other codecs are tested against, and the fallback the encoder side
//! silently downgrades to when a cleverer encoding cannot represent a
//! rectangle.

use crate::{
    grab_rect_pixels, Decoder, Encoder, MutablePixelBuffer, PixelBuffer, PixelFormat, Rectangle,
    RfbInStream, ZlibStreams, ENCODING_RAW,
};
use anyhow::{Context, Result};
use rfb_common::Rect;
use tokio::io::AsyncRead;

/// The Raw codec. Stateless; one value serves any number of rectangles.
#[derive(Default)]
pub struct RawCodec;

impl Encoder for RawCodec {
    fn encoding_type(&self) -> i32 {
        ENCODING_RAW
    }

    fn encode(
        &mut self,
        rect: &Rectangle,
        buffer: &dyn PixelBuffer,
        wire_format: &PixelFormat,
        _streams: &mut ZlibStreams,
    ) -> Result<Vec<u8>> {
        if rect.width == 0 || rect.height == 0 {
            return Ok(Vec::new());
        }
        grab_rect_pixels(rect, buffer, wire_format)
            .context("failed to read framebuffer for raw encode")
    }
}

impl Decoder for RawCodec {
    fn encoding_type(&self) -> i32 {
        ENCODING_RAW
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        _streams: &mut ZlibStreams,
    ) -> Result<()> {
        let buffer_before = stream.available();
        tracing::debug!(
            target: "rfb_encodings::framing",
            "Raw decode start: rect=[{},{} {}x{}] buffer_before={}",
            rect.x, rect.y, rect.width, rect.height,
            buffer_before
        );

        let width = rect.width as usize;
        let height = rect.height as usize;

        if width == 0 || height == 0 {
            return Ok(());
        }

        let bytes_per_pixel = pixel_format.bytes_per_pixel() as usize;
        let total_bytes = width * height * bytes_per_pixel;

        let mut pixel_data = vec![0u8; total_bytes];
        stream
            .read_bytes(&mut pixel_data)
            .await
            .context("Failed to read raw pixel data from stream")?;

        let dest_rect = Rect::new(
            rect.x as i32,
            rect.y as i32,
            rect.width as u32,
            rect.height as u32,
        );

        // Stride equals width since the wire data is tightly packed.
        buffer
            .image_rect(dest_rect, &pixel_data, width)
            .context("Failed to write raw pixel data to buffer")?;

        tracing::debug!(
            target: "rfb_encodings::framing",
            "Raw decode end: bytes_consumed={}, buffer_after={}",
            buffer_before.saturating_sub(stream.available()),
            stream.available()
        );

        Ok(())
    }
}
