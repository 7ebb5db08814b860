//! The server-to-client half of the protocol: one decoder loop that turns
//! framed messages into framebuffer writes and viewer events.
//!
//! [`UpdateDecoder`] is the mirror image of the server's update encoder.
//! It owns the per-connection codec state (the persistent zlib stream
//! slots) and is driven one message at a time; decoding is serialized, so
//! rectangle payloads land in the framebuffer in wire order.

use crate::errors::{Result, RfbClientError};
use rfb_common::{Point, Rect};
use rfb_encodings::{
    Decoder, ManagedPixelBuffer, RawCodec, RreCodec, TightCodec, ZlibStreams, ENCODING_RAW,
    ENCODING_RRE, ENCODING_TIGHT, PSEUDO_ENCODING_DESKTOP_SIZE, PSEUDO_ENCODING_POINTER_POS,
    PSEUDO_ENCODING_RICH_CURSOR, PSEUDO_ENCODING_X11_CURSOR,
};
use rfb_protocol::io::RfbInStream;
use rfb_protocol::messages::server::{ServerCutText, SetColorMapEntries};
use rfb_protocol::messages::types::{
    Rectangle, SMSG_BELL, SMSG_FRAMEBUFFER_UPDATE, SMSG_SERVER_CUT_TEXT,
    SMSG_SET_COLOR_MAP_ENTRIES,
};
use std::collections::VecDeque;
use tokio::io::AsyncRead;

/// A cursor glyph delivered by a cursor pseudo-rectangle, normalized to
/// RGBA8888 regardless of the wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorShape {
    pub hotspot: Point,
    pub width: u16,
    pub height: u16,
    /// `width * height * 4` bytes, row-major. Alpha is 0 or 255, from the
    /// wire bitmask.
    pub rgba: Vec<u8>,
}

/// What the decoder loop tells the embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// These framebuffer regions changed; repaint them.
    FramebufferUpdated { rects: Vec<Rect> },
    /// The server resized the desktop; the framebuffer already matches.
    DesktopResized { width: u16, height: u16 },
    /// The palette changed; indexed pixels now resolve differently.
    ColorMapChanged { first_color: u16, count: usize },
    Bell,
    CutText(String),
    PointerMoved(Point),
    CursorShape(CursorShape),
}

/// Decodes server messages into a framebuffer and an event queue.
#[derive(Default)]
pub struct UpdateDecoder {
    raw: RawCodec,
    rre: RreCodec,
    tight: TightCodec,
    streams: ZlibStreams,
}

impl UpdateDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and handle exactly one server message. Pushes zero or more
    /// events; a FramebufferUpdate can carry several pseudo-rectangles.
    pub async fn dispatch<R: AsyncRead + Unpin + Send>(
        &mut self,
        stream: &mut RfbInStream<R>,
        framebuffer: &mut ManagedPixelBuffer,
        events: &mut VecDeque<ServerEvent>,
    ) -> Result<()> {
        let message_type = stream.read_u8().await?;
        match message_type {
            SMSG_FRAMEBUFFER_UPDATE => {
                self.decode_update(stream, framebuffer, events).await
            }
            SMSG_SET_COLOR_MAP_ENTRIES => {
                let map = SetColorMapEntries::read_from(stream).await?;
                if framebuffer.format().is_indexed() {
                    let count = map.colors.len();
                    framebuffer.set_color_map(map.first_color, &map.colors);
                    events.push_back(ServerEvent::ColorMapChanged {
                        first_color: map.first_color,
                        count,
                    });
                } else {
                    tracing::warn!("ignoring colour map for a true-colour session");
                }
                Ok(())
            }
            SMSG_BELL => {
                events.push_back(ServerEvent::Bell);
                Ok(())
            }
            SMSG_SERVER_CUT_TEXT => {
                let cut = ServerCutText::read_from(stream).await?;
                events.push_back(ServerEvent::CutText(cut.text));
                Ok(())
            }
            other => Err(RfbClientError::ProtocolViolation(format!(
                "unknown server message type {}",
                other
            ))),
        }
    }

    /// One FramebufferUpdate: rectangle headers interleave with payloads,
    /// so headers are read one at a time, never as a batch.
    async fn decode_update<R: AsyncRead + Unpin + Send>(
        &mut self,
        stream: &mut RfbInStream<R>,
        framebuffer: &mut ManagedPixelBuffer,
        events: &mut VecDeque<ServerEvent>,
    ) -> Result<()> {
        stream.skip(1).await?; // padding
        let count = stream.read_u16().await?;
        tracing::debug!(count, "framebuffer update");

        let mut damaged = Vec::new();
        for _ in 0..count {
            let rect = Rectangle::read_from(stream).await?;
            match rect.encoding {
                ENCODING_RAW | ENCODING_RRE | ENCODING_TIGHT => {
                    let format = framebuffer.format().clone();
                    match rect.encoding {
                        ENCODING_RAW => {
                            self.raw
                                .decode(stream, &rect, &format, framebuffer, &mut self.streams)
                                .await
                        }
                        ENCODING_RRE => {
                            self.rre
                                .decode(stream, &rect, &format, framebuffer, &mut self.streams)
                                .await
                        }
                        _ => {
                            self.tight
                                .decode(stream, &rect, &format, framebuffer, &mut self.streams)
                                .await
                        }
                    }
                    .map_err(RfbClientError::compression)?;
                    damaged.push(to_common(&rect));
                }
                PSEUDO_ENCODING_DESKTOP_SIZE => {
                    framebuffer.resize(rect.width as u32, rect.height as u32);
                    events.push_back(ServerEvent::DesktopResized {
                        width: rect.width,
                        height: rect.height,
                    });
                }
                PSEUDO_ENCODING_POINTER_POS => {
                    events.push_back(ServerEvent::PointerMoved(Point::new(
                        rect.x as i32,
                        rect.y as i32,
                    )));
                }
                PSEUDO_ENCODING_RICH_CURSOR => {
                    let shape = self.decode_rich_cursor(stream, &rect, framebuffer).await?;
                    events.push_back(ServerEvent::CursorShape(shape));
                }
                PSEUDO_ENCODING_X11_CURSOR => {
                    let shape = decode_x11_cursor(stream, &rect).await?;
                    events.push_back(ServerEvent::CursorShape(shape));
                }
                other => return Err(RfbClientError::UnsupportedEncoding(other)),
            }
        }

        if !damaged.is_empty() {
            events.push_back(ServerEvent::FramebufferUpdated { rects: damaged });
        }
        Ok(())
    }

    async fn decode_rich_cursor<R: AsyncRead + Unpin + Send>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        framebuffer: &ManagedPixelBuffer,
    ) -> Result<CursorShape> {
        let format = framebuffer.format().clone();
        let bpp = format.bytes_per_pixel() as usize;
        let width = rect.width as usize;
        let height = rect.height as usize;

        let mut pixels = vec![0u8; width * height * bpp];
        stream.read_bytes(&mut pixels).await?;
        let mask_stride = width.div_ceil(8);
        let mut mask = vec![0u8; mask_stride * height];
        stream.read_bytes(&mut mask).await?;

        let mut rgba = Vec::with_capacity(width * height * 4);
        for y in 0..height {
            for x in 0..width {
                let i = y * width + x;
                let mut px = format.to_rgb888(&pixels[i * bpp..(i + 1) * bpp]);
                let opaque = mask[y * mask_stride + x / 8] & (0x80 >> (x % 8)) != 0;
                px[3] = if opaque { 255 } else { 0 };
                rgba.extend_from_slice(&px);
            }
        }
        Ok(CursorShape {
            hotspot: Point::new(rect.x as i32, rect.y as i32),
            width: rect.width,
            height: rect.height,
            rgba,
        })
    }
}

/// X11-style cursor: two RGB colours, a shape bitmap and an opacity mask.
async fn decode_x11_cursor<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    rect: &Rectangle,
) -> Result<CursorShape> {
    let mut fg = [0u8; 3];
    let mut bg = [0u8; 3];
    stream.read_bytes(&mut fg).await?;
    stream.read_bytes(&mut bg).await?;

    let width = rect.width as usize;
    let height = rect.height as usize;
    let stride = width.div_ceil(8);
    let mut bitmap = vec![0u8; stride * height];
    let mut mask = vec![0u8; stride * height];
    stream.read_bytes(&mut bitmap).await?;
    stream.read_bytes(&mut mask).await?;

    let mut rgba = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        for x in 0..width {
            let bit = 0x80 >> (x % 8);
            let set = bitmap[y * stride + x / 8] & bit != 0;
            let opaque = mask[y * stride + x / 8] & bit != 0;
            let colour = if set { fg } else { bg };
            rgba.extend_from_slice(&[colour[0], colour[1], colour[2], if opaque { 255 } else { 0 }]);
        }
    }
    Ok(CursorShape {
        hotspot: Point::new(rect.x as i32, rect.y as i32),
        width: rect.width,
        height: rect.height,
        rgba,
    })
}

fn to_common(rect: &Rectangle) -> Rect {
    Rect::new(
        rect.x as i32,
        rect.y as i32,
        rect.width as u32,
        rect.height as u32,
    )
}
