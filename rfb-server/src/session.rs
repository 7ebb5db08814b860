//! One client connection, from version exchange to teardown.
//!
//! [`ConnectionSession`] owns both halves of the transport and drives the
//! RFB state machine: version exchange, security negotiation, init
//! messages, then the main loop. The main loop multiplexes two sources
//! with `select!`: bytes arriving from the client (dispatched through the
//! extension table) and replies queued on the [`UpdateEncoder`] by driver
//! events. All writing happens here, on the session task; driver threads
//! only ever touch the queue.

use crate::auth::SecurityNegotiator;
use crate::driver::{
    DisplayDriver, DisplayEvent, DisplayEventListener, PointerShape, SubscriptionId,
};
use crate::errors::{Result, RfbServerError};
use crate::extensions::{ExtensionContext, ExtensionTable, SessionSettings};
use crate::update::{Reply, UpdateEncoder};
use parking_lot::Mutex;
use rfb_common::{Point, Rect};
use rfb_encodings::{
    Encoder, ManagedPixelBuffer, MutablePixelBuffer, PixelFormat, RawCodec, RreCodec, TightCodec,
    ZlibStreams, ENCODING_RAW, ENCODING_RRE, ENCODING_TIGHT, PSEUDO_ENCODING_DESKTOP_SIZE,
    PSEUDO_ENCODING_POINTER_POS, PSEUDO_ENCODING_RICH_CURSOR, TIGHT_MAX_WIDTH,
};
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use rfb_protocol::messages::client::{ClientInit, FramebufferUpdateRequest};
use rfb_protocol::messages::server::{
    Bell, FramebufferUpdate, ServerCutText, ServerInit, SetColorMapEntries,
};
use rfb_protocol::messages::types::{Rectangle, CMSG_FRAMEBUFFER_UPDATE_REQUEST};
use rfb_protocol::RfbVersion;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

/// How long the main loop parks waiting for queued replies before it
/// re-checks the socket.
const UPDATE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Where the session currently is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    VersionExchange,
    SecurityNegotiation,
    ClientInit,
    ServerInit,
    MainLoop,
    Closed,
    Failed,
}

/// Bridges driver events into the session's reply queue.
///
/// Runs on the driver's notification path, so it only mutates shared state
/// under short lock holds and never touches the wire.
struct SessionListener {
    encoder: Arc<UpdateEncoder>,
    settings: Arc<Mutex<SessionSettings>>,
}

impl DisplayEventListener for SessionListener {
    fn display_event(&self, event: &DisplayEvent) {
        match event {
            DisplayEvent::Damage {
                rect,
                important,
                preferred_encoding,
                ..
            } => {
                self.encoder.frame_update(*rect, *important, *preferred_encoding);
            }
            DisplayEvent::PointerMove(pos) => {
                let (soft, old_bounds, new_bounds) = {
                    let mut settings = self.settings.lock();
                    let old = settings.cursor_shape.bounds_at(settings.pointer);
                    let new = settings.cursor_shape.bounds_at(*pos);
                    settings.pointer = *pos;
                    (settings.soft_cursor(), old, new)
                };
                if soft {
                    // The cursor is painted into the framebuffer: repaint
                    // where it was and where it is now.
                    self.encoder.frame_update(old_bounds, false, None);
                    self.encoder.frame_update(new_bounds, false, None);
                } else {
                    self.encoder.pointer_position(*pos);
                }
            }
            DisplayEvent::PointerShapeChange(shape) => {
                let (soft, old_bounds, new_bounds) = {
                    let mut settings = self.settings.lock();
                    let old = settings.cursor_shape.bounds_at(settings.pointer);
                    let new = shape.bounds_at(settings.pointer);
                    settings.cursor_shape = shape.clone();
                    (settings.soft_cursor(), old, new)
                };
                if soft {
                    self.encoder.frame_update(old_bounds, false, None);
                    self.encoder.frame_update(new_bounds, false, None);
                } else {
                    self.encoder.pointer_shape(shape.clone());
                }
            }
            DisplayEvent::ScreenBounds(rect) => {
                self.encoder.resize_window(rect.width as u16, rect.height as u16);
            }
            DisplayEvent::WindowMoved { old, new }
            | DisplayEvent::WindowResized { old, new } => {
                self.encoder.frame_update(*old, false, None);
                self.encoder.frame_update(*new, false, None);
            }
            DisplayEvent::Update => {
                let desktop = self.encoder.desktop();
                self.encoder.frame_update(desktop, true, None);
            }
            DisplayEvent::Bell => self.encoder.bell(),
            DisplayEvent::CutText(text) => self.encoder.cut_text(text.clone()),
        }
    }
}

/// A single server-side RFB connection.
pub struct ConnectionSession<S> {
    instream: RfbInStream<ReadHalf<S>>,
    outstream: RfbOutStream<WriteHalf<S>>,
    driver: Arc<dyn DisplayDriver>,
    negotiator: SecurityNegotiator,
    extensions: ExtensionTable,
    encoder: Arc<UpdateEncoder>,
    settings: Arc<Mutex<SessionSettings>>,
    desktop_name: String,
    state: SessionState,
    subscription: Option<SubscriptionId>,
    first_request_seen: bool,
    zlib: ZlibStreams,
    raw: RawCodec,
    rre: RreCodec,
    tight: TightCodec,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> ConnectionSession<S> {
    pub fn new(
        transport: S,
        driver: Arc<dyn DisplayDriver>,
        negotiator: SecurityNegotiator,
        desktop_name: impl Into<String>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        let settings = Arc::new(Mutex::new(SessionSettings::new(
            driver.pixel_format(),
            driver.pointer_shape(),
            driver.pointer_position(),
        )));
        let encoder = Arc::new(UpdateEncoder::new(driver.width(), driver.height()));
        Self {
            instream: RfbInStream::new(read_half),
            outstream: RfbOutStream::new(write_half),
            driver,
            negotiator,
            extensions: ExtensionTable::with_core_messages(),
            encoder,
            settings,
            desktop_name: desktop_name.into(),
            state: SessionState::VersionExchange,
            subscription: None,
            first_request_seen: false,
            zlib: ZlibStreams::new(),
            raw: RawCodec,
            rre: RreCodec,
            tight: TightCodec::default(),
        }
    }

    /// Register a handler for a vendor message type before running.
    pub fn register_extension(&mut self, extension: Box<dyn crate::extensions::ProtocolExtension>) {
        self.extensions.register(extension);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the connection to completion. The driver subscription is torn
    /// down on every exit path.
    pub async fn run(mut self) -> Result<()> {
        let result = self.run_inner().await;
        if let Some(id) = self.subscription.take() {
            self.driver.unsubscribe(id);
        }
        // Flush anything buffered (the failure reason, typically) before
        // the transport drops.
        let _ = self.outstream.flush().await;
        self.state = match &result {
            Ok(()) => SessionState::Closed,
            Err(_) => SessionState::Failed,
        };
        if let Err(err) = &result {
            tracing::info!(error = %err, "session ended with error");
        }
        result
    }

    async fn run_inner(&mut self) -> Result<()> {
        let version = self.exchange_versions().await?;
        tracing::debug!(%version, "protocol version agreed");

        self.state = SessionState::SecurityNegotiation;
        let outcome = self
            .negotiator
            .negotiate(version, &mut self.instream, &mut self.outstream)
            .await?;
        self.negotiator
            .authenticator_mut(outcome.winner)
            .post_authentication(&mut self.instream, &mut self.outstream)
            .await?;

        self.state = SessionState::ClientInit;
        let client_init = ClientInit::read_from(&mut self.instream).await?;
        tracing::debug!(shared = client_init.shared, "client init received");

        self.state = SessionState::ServerInit;
        let server_init = ServerInit {
            framebuffer_width: self.driver.width(),
            framebuffer_height: self.driver.height(),
            pixel_format: (&self.settings.lock().pixel_format).into(),
            name: self.desktop_name.clone(),
        };
        server_init.write_to(&mut self.outstream);
        self.outstream.flush().await?;

        let listener = Arc::new(SessionListener {
            encoder: Arc::clone(&self.encoder),
            settings: Arc::clone(&self.settings),
        });
        self.subscription = Some(self.driver.subscribe(listener));

        self.state = SessionState::MainLoop;
        self.main_loop().await
    }

    async fn exchange_versions(&mut self) -> Result<RfbVersion> {
        self.outstream.write_bytes(&RfbVersion::V3_8.to_wire());
        self.outstream.flush().await?;

        let mut buf = [0u8; 12];
        self.instream.read_bytes(&mut buf).await?;
        let client_version = RfbVersion::parse(&buf)?;
        if client_version < RfbVersion::V3_3 {
            return Err(RfbServerError::ProtocolViolation(format!(
                "client version {} is older than 3.3",
                client_version
            )));
        }
        // 3.4 through 3.6 never shipped in the protocol; treat them as 3.3.
        Ok(if client_version >= RfbVersion::V3_8 {
            RfbVersion::V3_8
        } else if client_version >= RfbVersion::V3_7 {
            RfbVersion::V3_7
        } else {
            RfbVersion::V3_3
        })
    }

    async fn main_loop(&mut self) -> Result<()> {
        loop {
            let replies = self.encoder.pop_updates();
            if !replies.is_empty() {
                self.write_replies(replies).await?;
            }

            tokio::select! {
                filled = self.instream.fill() => {
                    if filled? == 0 {
                        tracing::debug!("client closed the connection");
                        return Ok(());
                    }
                    while self.instream.available() > 0 {
                        self.dispatch_message().await?;
                    }
                }
                _ = self.encoder.wait_for_updates(UPDATE_POLL_INTERVAL) => {}
            }
        }
    }

    /// Read and handle exactly one client message.
    async fn dispatch_message(&mut self) -> Result<()> {
        let message_type = self.instream.read_u8().await?;

        if message_type == CMSG_FRAMEBUFFER_UPDATE_REQUEST {
            let request = FramebufferUpdateRequest::read_from(&mut self.instream).await?;
            let first = !self.first_request_seen;
            self.first_request_seen = true;
            if request.incremental {
                self.encoder.set_ready();
            } else {
                self.encoder.non_incremental_request();
            }
            if first {
                self.push_initial_cursor();
            }
            return Ok(());
        }

        match self.extensions.get_mut(message_type) {
            Some(extension) => {
                let mut ctx = ExtensionContext {
                    input: &mut self.instream,
                    driver: self.driver.as_ref(),
                    encoder: &self.encoder,
                    settings: &self.settings,
                };
                extension.handle(&mut ctx).await
            }
            None => Err(RfbServerError::ProtocolViolation(format!(
                "unknown client message type {}",
                message_type
            ))),
        }
    }

    /// Make the client's cursor correct right after its first request:
    /// either repaint the glyph area or hand it the glyph and position.
    fn push_initial_cursor(&self) {
        let (soft, shape, pointer) = {
            let settings = self.settings.lock();
            (
                settings.soft_cursor(),
                settings.cursor_shape.clone(),
                settings.pointer,
            )
        };
        if soft {
            self.encoder.frame_update(shape.bounds_at(pointer), true, None);
        } else {
            self.encoder.pointer_shape(shape);
            self.encoder.pointer_position(pointer);
        }
    }

    async fn write_replies(&mut self, replies: Vec<Reply>) -> Result<()> {
        for reply in replies {
            match reply {
                Reply::Frame {
                    rect,
                    preferred_encoding,
                    ..
                } => self.write_frame(rect, preferred_encoding)?,
                Reply::PointerPosition(pos) => self.write_pointer_position(pos),
                Reply::PointerShape(shape) => self.write_pointer_shape(&shape),
                Reply::DesktopSize { width, height } => self.write_desktop_size(width, height),
                Reply::Bell => Bell.write_to(&mut self.outstream),
                Reply::CutText(text) => {
                    ServerCutText { text }.write_to(&mut self.outstream);
                }
                Reply::ColorMap {
                    first_color,
                    entries,
                } => {
                    SetColorMapEntries {
                        first_color,
                        colors: entries,
                    }
                    .write_to(&mut self.outstream);
                }
            }
        }
        self.outstream.flush().await?;
        Ok(())
    }

    fn write_frame(&mut self, rect: Rect, preferred_encoding: Option<i32>) -> Result<()> {
        let (wire_format, soft, pointer, shape, encodings, color_map_due) = {
            let settings = self.settings.lock();
            (
                settings.pixel_format.clone(),
                settings.soft_cursor(),
                settings.pointer,
                settings.cursor_shape.clone(),
                settings.encodings.clone(),
                settings.pixel_format.is_indexed() && !settings.color_map_sent,
            )
        };

        // Indexed clients need the palette before the first frame that
        // uses it.
        if color_map_due {
            SetColorMapEntries {
                first_color: 0,
                colors: wire_format.color_map().to_vec(),
            }
            .write_to(&mut self.outstream);
            self.settings.lock().color_map_sent = true;
        }

        let driver_format = self.driver.pixel_format();
        let pixels = self.driver.grab_area(rect);
        let mut buffer =
            ManagedPixelBuffer::new(rect.width, rect.height, driver_format.clone());
        let local = Rect::new(0, 0, rect.width, rect.height);
        buffer
            .image_rect(local, &pixels, rect.width as usize)
            .map_err(RfbServerError::compression)?;

        if soft {
            composite_cursor(&mut buffer, rect, &shape, pointer, &driver_format)
                .map_err(RfbServerError::compression)?;
        }

        let encoding = choose_encoding(&rect, &wire_format, preferred_encoding, &encodings);
        let wire_rect = Rectangle {
            x: 0,
            y: 0,
            width: rect.width as u16,
            height: rect.height as u16,
            encoding,
        };
        let payload = match encoding {
            ENCODING_TIGHT => self.tight.encode(&wire_rect, &buffer, &wire_format, &mut self.zlib),
            ENCODING_RRE => self.rre.encode(&wire_rect, &buffer, &wire_format, &mut self.zlib),
            _ => self.raw.encode(&wire_rect, &buffer, &wire_format, &mut self.zlib),
        }
        .map_err(RfbServerError::compression)?;

        tracing::debug!(
            x = rect.x,
            y = rect.y,
            width = rect.width,
            height = rect.height,
            encoding,
            payload_len = payload.len(),
            "sending framebuffer update"
        );
        let header = Rectangle {
            x: rect.x as u16,
            y: rect.y as u16,
            width: rect.width as u16,
            height: rect.height as u16,
            encoding,
        };
        FramebufferUpdate {
            rectangles: vec![header],
        }
        .write_to(&mut self.outstream);
        self.outstream.write_bytes(&payload);
        Ok(())
    }

    fn write_pointer_position(&mut self, pos: Point) {
        if !self.settings.lock().supports_encoding(PSEUDO_ENCODING_POINTER_POS) {
            return;
        }
        let header = Rectangle {
            x: pos.x.max(0) as u16,
            y: pos.y.max(0) as u16,
            width: 0,
            height: 0,
            encoding: PSEUDO_ENCODING_POINTER_POS,
        };
        FramebufferUpdate {
            rectangles: vec![header],
        }
        .write_to(&mut self.outstream);
    }

    fn write_pointer_shape(&mut self, shape: &PointerShape) {
        let wire_format = {
            let settings = self.settings.lock();
            if !settings.supports_encoding(PSEUDO_ENCODING_RICH_CURSOR) {
                return;
            }
            settings.pixel_format.clone()
        };

        let header = Rectangle {
            x: shape.hotspot.x.max(0) as u16,
            y: shape.hotspot.y.max(0) as u16,
            width: shape.width,
            height: shape.height,
            encoding: PSEUDO_ENCODING_RICH_CURSOR,
        };
        FramebufferUpdate {
            rectangles: vec![header],
        }
        .write_to(&mut self.outstream);

        // Glyph pixels in the client's format, then a 1bpp opacity mask,
        // MSB first, rows padded to whole bytes.
        let width = shape.width as usize;
        let height = shape.height as usize;
        for i in 0..width * height {
            let rgba = &shape.pixels[i * 4..i * 4 + 4];
            let native =
                wire_format.from_rgb888([rgba[0], rgba[1], rgba[2], rgba[3]]);
            self.outstream.write_bytes(&native);
        }
        let mask_stride = width.div_ceil(8);
        for y in 0..height {
            let mut row = vec![0u8; mask_stride];
            for x in 0..width {
                let alpha = shape.pixels[(y * width + x) * 4 + 3];
                if alpha >= 128 {
                    row[x / 8] |= 0x80 >> (x % 8);
                }
            }
            self.outstream.write_bytes(&row);
        }
    }

    fn write_desktop_size(&mut self, width: u16, height: u16) {
        if !self
            .settings
            .lock()
            .supports_encoding(PSEUDO_ENCODING_DESKTOP_SIZE)
        {
            return;
        }
        let header = Rectangle {
            x: 0,
            y: 0,
            width,
            height,
            encoding: PSEUDO_ENCODING_DESKTOP_SIZE,
        };
        FramebufferUpdate {
            rectangles: vec![header],
        }
        .write_to(&mut self.outstream);
    }
}

/// Pick the wire encoding for one frame: the damage source's preference if
/// the client listed it, else the client's first supported choice, else
/// Raw. RRE and Tight fall back to Raw when the format or geometry rules
/// them out.
fn choose_encoding(
    rect: &Rect,
    wire_format: &PixelFormat,
    preferred: Option<i32>,
    encodings: &[i32],
) -> i32 {
    const SUPPORTED: [i32; 3] = [ENCODING_TIGHT, ENCODING_RRE, ENCODING_RAW];

    let mut choice = preferred
        .filter(|e| encodings.contains(e) && SUPPORTED.contains(e))
        .or_else(|| encodings.iter().copied().find(|e| SUPPORTED.contains(e)))
        .unwrap_or(ENCODING_RAW);

    if choice == ENCODING_RRE && !RreCodec::supports(wire_format) {
        choice = ENCODING_RAW;
    }
    if choice == ENCODING_TIGHT && rect.width > TIGHT_MAX_WIDTH as u32 {
        choice = ENCODING_RAW;
    }
    choice
}

/// Paint the cursor glyph into a rect-local buffer. Only glyph pixels with
/// opaque alpha land; the rest keep the framebuffer contents.
fn composite_cursor(
    buffer: &mut ManagedPixelBuffer,
    rect: Rect,
    shape: &PointerShape,
    pointer: Point,
    format: &PixelFormat,
) -> anyhow::Result<()> {
    let bounds = shape.bounds_at(pointer);
    if !bounds.intersects(&rect) {
        return Ok(());
    }
    for gy in 0..shape.height as i32 {
        for gx in 0..shape.width as i32 {
            let sx = bounds.x + gx;
            let sy = bounds.y + gy;
            if !rect.contains_point(sx, sy) {
                continue;
            }
            let idx = ((gy * shape.width as i32 + gx) * 4) as usize;
            let rgba = &shape.pixels[idx..idx + 4];
            if rgba[3] < 128 {
                continue;
            }
            let native = format.from_rgb888([rgba[0], rgba[1], rgba[2], rgba[3]]);
            buffer.fill_rect(Rect::new(sx - rect.x, sy - rect.y, 1, 1), &native)?;
        }
    }
    Ok(())
}
