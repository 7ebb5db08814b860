//! Client-message dispatch through a pluggable extension table.
//!
//! Every client-to-server message type is handled by a [`ProtocolExtension`]
//! keyed on its message-type byte. The core messages ship as built-in
//! extensions registered by [`ExtensionTable::with_core_messages`]; embedders
//! add vendor messages by registering more. An extension owns its wire
//! framing completely: after the type byte the session hands it the input
//! stream and it must consume exactly its message body.

use crate::driver::{DisplayDriver, PointerShape};
use crate::errors::{Result, RfbServerError};
use crate::update::UpdateEncoder;
use async_trait::async_trait;
use parking_lot::Mutex;
use rfb_common::Point;
use rfb_pixelbuffer::PixelFormat;
use rfb_protocol::io::WireInput;
use rfb_protocol::messages::types::{
    CMSG_CLIENT_CUT_TEXT, CMSG_FILE_TRANSFER, CMSG_KEY_EVENT, CMSG_POINTER_EVENT,
    CMSG_SET_ENCODINGS, CMSG_SET_PIXEL_FORMAT, PSEUDO_ENCODING_POINTER_POS,
    PSEUDO_ENCODING_RICH_CURSOR, PSEUDO_ENCODING_X11_CURSOR,
};
use std::collections::HashMap;

/// Per-session negotiated state, shared between the message handlers and
/// the reply writer.
pub struct SessionSettings {
    /// Wire pixel format updates are encoded in.
    pub pixel_format: PixelFormat,
    /// Encodings the client listed, in its preference order.
    pub encodings: Vec<i32>,
    /// Cleared whenever the format changes to an indexed one; the writer
    /// sends SetColourMapEntries before the next frame and sets it.
    pub color_map_sent: bool,
    /// Last known pointer position, for soft-cursor damage.
    pub pointer: Point,
    /// Current cursor glyph.
    pub cursor_shape: PointerShape,
}

impl SessionSettings {
    pub fn new(pixel_format: PixelFormat, cursor_shape: PointerShape, pointer: Point) -> Self {
        Self {
            pixel_format,
            encodings: Vec::new(),
            color_map_sent: false,
            pointer,
            cursor_shape,
        }
    }

    pub fn supports_encoding(&self, encoding: i32) -> bool {
        self.encodings.contains(&encoding)
    }

    /// The cursor must be painted into the framebuffer unless the client
    /// can render it locally, which takes both a cursor-shape
    /// pseudo-encoding and PointerPos.
    pub fn soft_cursor(&self) -> bool {
        let shape = self.supports_encoding(PSEUDO_ENCODING_RICH_CURSOR)
            || self.supports_encoding(PSEUDO_ENCODING_X11_CURSOR);
        let pos = self.supports_encoding(PSEUDO_ENCODING_POINTER_POS);
        !(shape && pos)
    }
}

/// Everything an extension may touch while handling one message.
pub struct ExtensionContext<'a> {
    pub input: &'a mut dyn WireInput,
    pub driver: &'a dyn DisplayDriver,
    pub encoder: &'a UpdateEncoder,
    pub settings: &'a Mutex<SessionSettings>,
}

/// Handler for one client message type.
#[async_trait]
pub trait ProtocolExtension: Send {
    /// Message-type byte this extension claims.
    fn message_type(&self) -> u8;

    /// Consume the message body and act on it.
    async fn handle(&mut self, ctx: &mut ExtensionContext<'_>) -> Result<()>;
}

/// Registry mapping message-type bytes to handlers.
#[derive(Default)]
pub struct ExtensionTable {
    handlers: HashMap<u8, Box<dyn ProtocolExtension>>,
}

impl ExtensionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table pre-loaded with the standard client messages.
    pub fn with_core_messages() -> Self {
        let mut table = Self::new();
        table.register(Box::new(SetPixelFormatExt));
        table.register(Box::new(SetEncodingsExt));
        table.register(Box::new(KeyEventExt));
        table.register(Box::new(PointerEventExt));
        table.register(Box::new(ClientCutTextExt));
        table.register(Box::new(FileTransferExt));
        table
    }

    /// Register a handler, replacing any previous one for the same type.
    pub fn register(&mut self, extension: Box<dyn ProtocolExtension>) {
        self.handlers.insert(extension.message_type(), extension);
    }

    pub fn get_mut(&mut self, message_type: u8) -> Option<&mut Box<dyn ProtocolExtension>> {
        self.handlers.get_mut(&message_type)
    }
}

/// SetPixelFormat: replace the wire format and re-arm the colour map.
struct SetPixelFormatExt;

#[async_trait]
impl ProtocolExtension for SetPixelFormatExt {
    fn message_type(&self) -> u8 {
        CMSG_SET_PIXEL_FORMAT
    }

    async fn handle(&mut self, ctx: &mut ExtensionContext<'_>) -> Result<()> {
        ctx.input.skip(3).await?;
        let mut raw = [0u8; 16];
        ctx.input.read_bytes(&mut raw).await?;
        let wire = rfb_protocol::messages::types::PixelFormat::from_bytes(&raw)
            .map_err(|err| RfbServerError::ProtocolViolation(err.to_string()))?;
        let mut format = PixelFormat::from(wire);
        if format.is_indexed() {
            format.set_color_map(0, &ctx.driver.color_map());
        }
        tracing::debug!(
            bits_per_pixel = format.bits_per_pixel,
            true_color = format.true_color,
            "client set pixel format"
        );

        let mut settings = ctx.settings.lock();
        settings.pixel_format = format;
        settings.color_map_sent = false;
        Ok(())
    }
}

/// SetEncodings: remember the client's preference list verbatim.
struct SetEncodingsExt;

#[async_trait]
impl ProtocolExtension for SetEncodingsExt {
    fn message_type(&self) -> u8 {
        CMSG_SET_ENCODINGS
    }

    async fn handle(&mut self, ctx: &mut ExtensionContext<'_>) -> Result<()> {
        ctx.input.skip(1).await?;
        let count = ctx.input.read_u16().await? as usize;
        let mut encodings = Vec::with_capacity(count);
        for _ in 0..count {
            encodings.push(ctx.input.read_i32().await?);
        }
        tracing::debug!(?encodings, "client set encodings");
        ctx.settings.lock().encodings = encodings;
        Ok(())
    }
}

struct KeyEventExt;

#[async_trait]
impl ProtocolExtension for KeyEventExt {
    fn message_type(&self) -> u8 {
        CMSG_KEY_EVENT
    }

    async fn handle(&mut self, ctx: &mut ExtensionContext<'_>) -> Result<()> {
        let down = ctx.input.read_u8().await? != 0;
        ctx.input.skip(2).await?;
        let keysym = ctx.input.read_u32().await?;
        ctx.driver.key_event(keysym, down);
        Ok(())
    }
}

struct PointerEventExt;

#[async_trait]
impl ProtocolExtension for PointerEventExt {
    fn message_type(&self) -> u8 {
        CMSG_POINTER_EVENT
    }

    async fn handle(&mut self, ctx: &mut ExtensionContext<'_>) -> Result<()> {
        let buttons = ctx.input.read_u8().await?;
        let x = ctx.input.read_u16().await?;
        let y = ctx.input.read_u16().await?;
        ctx.driver.pointer_event(buttons, x, y);
        Ok(())
    }
}

struct ClientCutTextExt;

#[async_trait]
impl ProtocolExtension for ClientCutTextExt {
    fn message_type(&self) -> u8 {
        CMSG_CLIENT_CUT_TEXT
    }

    async fn handle(&mut self, ctx: &mut ExtensionContext<'_>) -> Result<()> {
        ctx.input.skip(3).await?;
        let text = ctx.input.read_string().await?;
        ctx.driver.cut_text(&text);
        Ok(())
    }
}

/// UltraVNC-style file transfer carrier. The body is opaque to the session
/// and handed to the driver whole.
struct FileTransferExt;

#[async_trait]
impl ProtocolExtension for FileTransferExt {
    fn message_type(&self) -> u8 {
        CMSG_FILE_TRANSFER
    }

    async fn handle(&mut self, ctx: &mut ExtensionContext<'_>) -> Result<()> {
        let content_type = ctx.input.read_u8().await?;
        let _param = ctx.input.read_u8().await?;
        let _size = ctx.input.read_u32().await?;
        let length = ctx.input.read_u32().await? as usize;
        if length > 64 * 1024 * 1024 {
            return Err(RfbServerError::ProtocolViolation(format!(
                "file transfer body of {} bytes exceeds limit",
                length
            )));
        }
        let mut body = vec![0u8; length];
        ctx.input.read_bytes(&mut body).await?;
        tracing::debug!(content_type, length, "file transfer message");
        ctx.driver.file_transfer(content_type, &body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::TestDriver;
    use rfb_protocol::io::RfbInStream;
    use std::io::Cursor;

    fn settings_for(driver: &TestDriver) -> Mutex<SessionSettings> {
        Mutex::new(SessionSettings::new(
            driver.pixel_format(),
            driver.pointer_shape(),
            driver.pointer_position(),
        ))
    }

    async fn dispatch(
        table: &mut ExtensionTable,
        message_type: u8,
        body: &[u8],
        driver: &TestDriver,
        encoder: &UpdateEncoder,
        settings: &Mutex<SessionSettings>,
    ) -> Result<()> {
        let mut input = RfbInStream::new(Cursor::new(body.to_vec()));
        let mut ctx = ExtensionContext {
            input: &mut input,
            driver,
            encoder,
            settings,
        };
        table
            .get_mut(message_type)
            .expect("handler registered")
            .handle(&mut ctx)
            .await
    }

    #[tokio::test]
    async fn set_encodings_records_preference_order() {
        let driver = TestDriver::new(100, 100);
        let encoder = UpdateEncoder::new(100, 100);
        let settings = settings_for(&driver);
        let mut table = ExtensionTable::with_core_messages();

        let mut body = vec![0, 0, 3];
        for enc in [7i32, 2, 0] {
            body.extend_from_slice(&enc.to_be_bytes());
        }
        dispatch(&mut table, CMSG_SET_ENCODINGS, &body, &driver, &encoder, &settings)
            .await
            .unwrap();

        assert_eq!(settings.lock().encodings, vec![7, 2, 0]);
    }

    #[tokio::test]
    async fn set_pixel_format_rearms_color_map() {
        let driver = TestDriver::new(100, 100);
        let encoder = UpdateEncoder::new(100, 100);
        let settings = settings_for(&driver);
        settings.lock().color_map_sent = true;
        let mut table = ExtensionTable::with_core_messages();

        // 3 pad bytes then a 16-byte rgb565 format.
        let body = [
            0, 0, 0, // padding
            16, 16, 0, 1, // bpp, depth, big endian, true colour
            0, 31, 0, 63, 0, 31, // maxima
            11, 5, 0, // shifts
            0, 0, 0, // padding
        ];
        dispatch(&mut table, CMSG_SET_PIXEL_FORMAT, &body, &driver, &encoder, &settings)
            .await
            .unwrap();

        let settings = settings.lock();
        assert_eq!(settings.pixel_format.bits_per_pixel, 16);
        assert_eq!(settings.pixel_format.red_max, 31);
        assert!(!settings.color_map_sent);
    }

    #[tokio::test]
    async fn degenerate_pixel_format_is_rejected() {
        let driver = TestDriver::new(100, 100);
        let encoder = UpdateEncoder::new(100, 100);
        let settings = settings_for(&driver);
        let mut table = ExtensionTable::with_core_messages();

        // Zero bits_per_pixel would divide the codecs by zero; the session
        // must fail the message, not install the format.
        let mut body = vec![0u8; 19];
        body[6] = 1; // true_color
        let result = dispatch(
            &mut table,
            CMSG_SET_PIXEL_FORMAT,
            &body,
            &driver,
            &encoder,
            &settings,
        )
        .await;

        assert!(matches!(result, Err(RfbServerError::ProtocolViolation(_))));
        assert_eq!(settings.lock().pixel_format.bits_per_pixel, 32);
    }

    #[tokio::test]
    async fn key_and_pointer_events_reach_the_driver() {
        let driver = TestDriver::new(100, 100);
        let encoder = UpdateEncoder::new(100, 100);
        let settings = settings_for(&driver);
        let mut table = ExtensionTable::with_core_messages();

        let mut key = vec![1, 0, 0];
        key.extend_from_slice(&0xFF0Du32.to_be_bytes());
        dispatch(&mut table, CMSG_KEY_EVENT, &key, &driver, &encoder, &settings)
            .await
            .unwrap();

        let pointer = [0x01, 0, 10, 0, 20];
        dispatch(&mut table, CMSG_POINTER_EVENT, &pointer, &driver, &encoder, &settings)
            .await
            .unwrap();

        assert_eq!(driver.keys.lock().as_slice(), &[(0xFF0D, true)]);
        assert_eq!(driver.pointer_events.lock().as_slice(), &[(1, 10, 20)]);
    }

    #[tokio::test]
    async fn cut_text_reaches_the_driver() {
        let driver = TestDriver::new(100, 100);
        let encoder = UpdateEncoder::new(100, 100);
        let settings = settings_for(&driver);
        let mut table = ExtensionTable::with_core_messages();

        let mut body = vec![0, 0, 0];
        body.extend_from_slice(&5u32.to_be_bytes());
        body.extend_from_slice(b"hello");
        dispatch(&mut table, CMSG_CLIENT_CUT_TEXT, &body, &driver, &encoder, &settings)
            .await
            .unwrap();

        assert_eq!(driver.cuts.lock().as_slice(), &["hello".to_string()]);
    }

    #[tokio::test]
    async fn custom_extension_replaces_a_builtin() {
        struct Swallow;

        #[async_trait]
        impl ProtocolExtension for Swallow {
            fn message_type(&self) -> u8 {
                CMSG_CLIENT_CUT_TEXT
            }

            async fn handle(&mut self, ctx: &mut ExtensionContext<'_>) -> Result<()> {
                ctx.input.skip(3).await?;
                let _ = ctx.input.read_string().await?;
                Ok(())
            }
        }

        let driver = TestDriver::new(100, 100);
        let encoder = UpdateEncoder::new(100, 100);
        let settings = settings_for(&driver);
        let mut table = ExtensionTable::with_core_messages();
        table.register(Box::new(Swallow));

        let mut body = vec![0, 0, 0];
        body.extend_from_slice(&3u32.to_be_bytes());
        body.extend_from_slice(b"abc");
        dispatch(&mut table, CMSG_CLIENT_CUT_TEXT, &body, &driver, &encoder, &settings)
            .await
            .unwrap();

        // Swallowed, never forwarded.
        assert!(driver.cuts.lock().is_empty());
    }

    #[test]
    fn soft_cursor_requires_both_pseudo_encodings() {
        let driver = TestDriver::new(100, 100);
        let mut settings = SessionSettings::new(
            driver.pixel_format(),
            driver.pointer_shape(),
            driver.pointer_position(),
        );
        assert!(settings.soft_cursor());

        settings.encodings = vec![PSEUDO_ENCODING_RICH_CURSOR];
        assert!(settings.soft_cursor());

        settings.encodings = vec![PSEUDO_ENCODING_RICH_CURSOR, PSEUDO_ENCODING_POINTER_POS];
        assert!(!settings.soft_cursor());
    }
}
