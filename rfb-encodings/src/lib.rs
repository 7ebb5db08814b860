//! RFB encodings: the codec set shared by the server and the viewer core.
//!
//! Each encoding is a `Codec` type implementing [`Encoder`] (framebuffer
//! rectangle to wire bytes) and [`Decoder`] (wire bytes back into a pixel
//! buffer). Three encodings are supported:
//!
//! - **Raw** (type 0): uncompressed pixels, the fallback every peer accepts.
//! - **RRE** (type 2): background colour plus solid sub-rectangles.
//! - **Tight** (type 7): zlib/palette/gradient compression, JPEG on decode.
//!
//! Tight keeps compression state alive across rectangles in [`ZlibStreams`],
//! which the connection owns and threads through every encode/decode call.
//! Streams are reset only when the wire says so (the control byte's low
//! nibble); tearing them down at any other time corrupts the dictionary and
//! garbles every subsequent rectangle.
//!
//! Pixel data crosses these APIs in the *negotiated* pixel format: decoders
//! write into a buffer created with the session's format, and encoders
//! translate from the framebuffer's format to the wire format when the two
//! differ.

mod raw;
mod rre;
mod streams;
mod tight;

pub use raw::RawCodec;
pub use rre::RreCodec;
pub use streams::ZlibStreams;
pub use tight::{TightCodec, TIGHT_MAX_WIDTH};

// Shared types re-exported so codec users need only this crate.
pub use rfb_pixelbuffer::{ManagedPixelBuffer, MutablePixelBuffer, PixelBuffer, PixelFormat};
pub use rfb_protocol::io::RfbInStream;
pub use rfb_protocol::messages::types::Rectangle;

pub use rfb_protocol::messages::types::{
    ENCODING_RAW, ENCODING_RRE, ENCODING_TIGHT, PSEUDO_ENCODING_DESKTOP_SIZE,
    PSEUDO_ENCODING_POINTER_POS, PSEUDO_ENCODING_RICH_CURSOR, PSEUDO_ENCODING_X11_CURSOR,
};

use anyhow::{bail, Result};
use rfb_common::Rect;
use tokio::io::AsyncRead;

/// Turns a framebuffer rectangle into the wire payload for one encoding.
///
/// `encode` reads pixels from `buffer` and produces the bytes that follow
/// the rectangle header on the wire, translated into `wire_format`. Encoders
/// are stateful (`&mut self`): Tight carries gradient row state and stream
/// bookkeeping between rectangles.
pub trait Encoder {
    /// The encoding type number sent in rectangle headers.
    fn encoding_type(&self) -> i32;

    /// Encode `rect` of `buffer` into wire bytes in `wire_format`.
    fn encode(
        &mut self,
        rect: &Rectangle,
        buffer: &dyn PixelBuffer,
        wire_format: &PixelFormat,
        streams: &mut ZlibStreams,
    ) -> Result<Vec<u8>>;
}

/// Decodes one encoding's wire payload into a pixel buffer.
///
/// The buffer must use the same pixel format as `pixel_format` (the
/// session's negotiated format); decoders write native pixels straight
/// through `image_rect`/`fill_rect` without a second translation step.
#[allow(async_fn_in_trait)]
pub trait Decoder {
    /// The encoding type number this decoder handles.
    fn encoding_type(&self) -> i32;

    /// Decode a single rectangle from the stream into the buffer.
    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        streams: &mut ZlibStreams,
    ) -> Result<()>;
}

/// Read `rect` out of `buffer` as tightly packed pixels in `wire_format`.
///
/// When the buffer already uses the wire format this is a row-by-row copy;
/// otherwise every pixel goes through an RGB888 round trip. Used by all
/// encoders as their pixel source.
pub(crate) fn grab_rect_pixels(
    rect: &Rectangle,
    buffer: &dyn PixelBuffer,
    wire_format: &PixelFormat,
) -> Result<Vec<u8>> {
    let width = rect.width as usize;
    let height = rect.height as usize;
    let src_rect = Rect::new(
        rect.x as i32,
        rect.y as i32,
        rect.width as u32,
        rect.height as u32,
    );

    let src_format = buffer.pixel_format().clone();
    let src_bpp = src_format.bytes_per_pixel() as usize;
    let mut stride = 0usize;
    let Some(src) = buffer.get_buffer(src_rect, &mut stride) else {
        bail!(
            "rectangle [{},{} {}x{}] is outside the framebuffer",
            rect.x,
            rect.y,
            rect.width,
            rect.height
        );
    };

    if src_format == *wire_format {
        let mut out = Vec::with_capacity(width * height * src_bpp);
        for row in 0..height {
            let start = row * stride * src_bpp;
            out.extend_from_slice(&src[start..start + width * src_bpp]);
        }
        return Ok(out);
    }

    let dst_bpp = wire_format.bytes_per_pixel() as usize;
    let mut out = Vec::with_capacity(width * height * dst_bpp);
    for row in 0..height {
        for col in 0..width {
            let start = (row * stride + col) * src_bpp;
            let rgb = src_format.to_rgb888(&src[start..start + src_bpp]);
            out.extend_from_slice(&wire_format.from_rgb888(rgb));
        }
    }
    Ok(out)
}
