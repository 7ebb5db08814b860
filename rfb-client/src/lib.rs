//! Viewer core: the client side of the RFB protocol.
//!
//! [`ViewerSession`] wraps any `AsyncRead + AsyncWrite` transport, runs the
//! client handshake (version exchange, security, init messages) and then
//! serves as the single owner of the connection: it sends requests and
//! input, and pulls server messages through an [`UpdateDecoder`] into its
//! framebuffer. GUI layers, recorders and tests sit on top of
//! [`next_event`](ViewerSession::next_event) and the framebuffer accessor;
//! rendering is out of scope here.
//!
//! ```no_run
//! use rfb_client::{ServerEvent, ViewerSession};
//!
//! # async fn example() -> rfb_client::Result<()> {
//! let socket = tokio::net::TcpStream::connect("localhost:5900").await?;
//! let mut session = ViewerSession::connect(socket, true, None).await?;
//! session.set_encodings(&[7, 2, 0, -223, -239, -232]).await?;
//! session.request_update(false).await?;
//!
//! while let Some(event) = session.next_event().await? {
//!     if let ServerEvent::FramebufferUpdated { rects } = event {
//!         println!("{} rectangles changed", rects.len());
//!         session.request_update(true).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod errors;

pub use decoder::{CursorShape, ServerEvent, UpdateDecoder};
pub use errors::{Result, RfbClientError};
pub use rfb_protocol::handshake::ChallengeResponder;

use rfb_encodings::{ManagedPixelBuffer, PixelFormat};
use rfb_protocol::handshake;
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use rfb_protocol::messages::client::{
    ClientCutText, FramebufferUpdateRequest, KeyEvent, PointerEvent, SetEncodings,
};
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

/// One connected viewer.
pub struct ViewerSession<S> {
    instream: RfbInStream<ReadHalf<S>>,
    outstream: RfbOutStream<WriteHalf<S>>,
    decoder: UpdateDecoder,
    framebuffer: ManagedPixelBuffer,
    pending: VecDeque<ServerEvent>,
    name: String,
}

impl<S> std::fmt::Debug for ViewerSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerSession")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<S: AsyncRead + AsyncWrite + Send> ViewerSession<S> {
    /// Run the client handshake over `transport`.
    ///
    /// `responder` supplies the VNC-auth challenge response; without one
    /// only the `None` security type can succeed. The framebuffer is
    /// created in the server's native format at the server's size.
    pub async fn connect(
        transport: S,
        shared: bool,
        responder: Option<&dyn ChallengeResponder>,
    ) -> Result<Self> {
        let (read_half, write_half) = tokio::io::split(transport);
        let mut instream = RfbInStream::new(read_half);
        let mut outstream = RfbOutStream::new(write_half);

        let version = handshake::negotiate_version(&mut instream, &mut outstream).await?;
        tracing::debug!(%version, "protocol version agreed");
        handshake::negotiate_security(&mut instream, &mut outstream, version, responder)
            .await
            .map_err(|err| RfbClientError::AuthenticationFailure(err.to_string()))?;
        handshake::send_client_init(&mut outstream, shared).await?;
        // A ServerInit that fails validation (degenerate pixel format) is a
        // protocol fault by the server, not a transport failure.
        let server_init = handshake::recv_server_init(&mut instream)
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::InvalidData => {
                    RfbClientError::ProtocolViolation(err.to_string())
                }
                _ => RfbClientError::Transport(err),
            })?;
        tracing::info!(
            width = server_init.framebuffer_width,
            height = server_init.framebuffer_height,
            name = %server_init.name,
            "connected"
        );

        let format = PixelFormat::from(server_init.pixel_format);
        let framebuffer = ManagedPixelBuffer::new(
            server_init.framebuffer_width as u32,
            server_init.framebuffer_height as u32,
            format,
        );
        Ok(Self {
            instream,
            outstream,
            decoder: UpdateDecoder::new(),
            framebuffer,
            pending: VecDeque::new(),
            name: server_init.name,
        })
    }

    /// The desktop name from ServerInit.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The decoded screen. Pixels are in the session's negotiated format.
    pub fn framebuffer(&self) -> &ManagedPixelBuffer {
        &self.framebuffer
    }

    /// Advertise the encodings we can decode, most preferred first.
    pub async fn set_encodings(&mut self, encodings: &[i32]) -> Result<()> {
        SetEncodings {
            encodings: encodings.to_vec(),
        }
        .write_to(&mut self.outstream);
        self.outstream.flush().await?;
        Ok(())
    }

    /// Ask for the whole screen, incrementally or from scratch.
    pub async fn request_update(&mut self, incremental: bool) -> Result<()> {
        let (width, height) = (
            self.framebuffer.width() as u16,
            self.framebuffer.height() as u16,
        );
        FramebufferUpdateRequest {
            incremental,
            x: 0,
            y: 0,
            width,
            height,
        }
        .write_to(&mut self.outstream);
        self.outstream.flush().await?;
        Ok(())
    }

    pub async fn send_key(&mut self, keysym: u32, down: bool) -> Result<()> {
        KeyEvent { down, key: keysym }.write_to(&mut self.outstream);
        self.outstream.flush().await?;
        Ok(())
    }

    pub async fn send_pointer(&mut self, buttons: u8, x: u16, y: u16) -> Result<()> {
        PointerEvent {
            button_mask: buttons,
            x,
            y,
        }
        .write_to(&mut self.outstream);
        self.outstream.flush().await?;
        Ok(())
    }

    pub async fn send_cut_text(&mut self, text: &str) -> Result<()> {
        ClientCutText {
            text: text.to_string(),
        }
        .write_to(&mut self.outstream);
        self.outstream.flush().await?;
        Ok(())
    }

    /// The next viewer event, decoding server messages as needed.
    ///
    /// Returns `None` when the server closes the connection cleanly
    /// between messages.
    pub async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            // A clean close is only clean on a message boundary.
            if self.instream.available() == 0 && self.instream.fill().await? == 0 {
                return Ok(None);
            }
            self.decoder
                .dispatch(&mut self.instream, &mut self.framebuffer, &mut self.pending)
                .await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfb_common::Rect;
    use rfb_encodings::{PixelBuffer, ENCODING_RAW};
    use rfb_protocol::messages::server::ServerInit;
    use rfb_protocol::messages::types::{
        Rectangle, CMSG_FRAMEBUFFER_UPDATE_REQUEST, CMSG_SET_ENCODINGS, SECURITY_TYPE_NONE,
        SMSG_FRAMEBUFFER_UPDATE,
    };
    use rfb_protocol::RfbVersion;
    use tokio::io::DuplexStream;

    /// Scripted server: accepts the 3.8 handshake with the None type and
    /// then runs `script` over the established streams.
    async fn scripted_server<F, Fut>(transport: DuplexStream, script: F)
    where
        F: FnOnce(RfbInStream<ReadHalf<DuplexStream>>, RfbOutStream<WriteHalf<DuplexStream>>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let (read_half, write_half) = tokio::io::split(transport);
        let mut instream = RfbInStream::new(read_half);
        let mut outstream = RfbOutStream::new(write_half);

        outstream.write_bytes(&RfbVersion::V3_8.to_wire());
        outstream.flush().await.unwrap();
        let mut version = [0u8; 12];
        instream.read_bytes(&mut version).await.unwrap();

        outstream.write_u8(1);
        outstream.write_u8(SECURITY_TYPE_NONE);
        outstream.flush().await.unwrap();
        assert_eq!(instream.read_u8().await.unwrap(), SECURITY_TYPE_NONE);
        outstream.write_u32(0); // SecurityResult OK
        outstream.flush().await.unwrap();

        let _shared = instream.read_u8().await.unwrap();
        ServerInit {
            framebuffer_width: 4,
            framebuffer_height: 2,
            pixel_format: (&rfb_encodings::PixelFormat::rgb888()).into(),
            name: "scripted".to_string(),
        }
        .write_to(&mut outstream);
        outstream.flush().await.unwrap();

        script(instream, outstream).await;
    }

    #[tokio::test]
    async fn connect_and_decode_one_update() {
        let (client_end, server_end) = tokio::io::duplex(8192);
        let server = tokio::spawn(scripted_server(server_end, |mut inp, mut out| async move {
            // SetEncodings then a non-incremental request.
            assert_eq!(inp.read_u8().await.unwrap(), CMSG_SET_ENCODINGS);
            inp.skip(1).await.unwrap();
            let count = inp.read_u16().await.unwrap();
            for _ in 0..count {
                inp.read_i32().await.unwrap();
            }
            assert_eq!(
                inp.read_u8().await.unwrap(),
                CMSG_FRAMEBUFFER_UPDATE_REQUEST
            );
            inp.skip(9).await.unwrap();

            out.write_u8(SMSG_FRAMEBUFFER_UPDATE);
            out.write_u8(0);
            out.write_u16(1);
            Rectangle {
                x: 0,
                y: 0,
                width: 4,
                height: 2,
                encoding: ENCODING_RAW,
            }
            .write_to(&mut out);
            for _ in 0..8 {
                out.write_bytes(&[1, 2, 3, 0]);
            }
            out.flush().await.unwrap();
        }));

        let mut session = ViewerSession::connect(client_end, true, None).await.unwrap();
        assert_eq!(session.name(), "scripted");
        assert_eq!(session.framebuffer().dimensions(), (4, 2));

        session.set_encodings(&[ENCODING_RAW]).await.unwrap();
        session.request_update(false).await.unwrap();

        let event = session.next_event().await.unwrap().unwrap();
        assert_eq!(
            event,
            ServerEvent::FramebufferUpdated {
                rects: vec![Rect::new(0, 0, 4, 2)]
            }
        );
        let mut stride = 0;
        let data = session
            .framebuffer()
            .get_buffer(Rect::new(0, 0, 4, 2), &mut stride)
            .unwrap();
        assert_eq!(&data[..4], &[1, 2, 3, 0]);

        // Server script finished; the connection closes cleanly.
        server.await.unwrap();
        assert_eq!(session.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_server_init_is_a_protocol_violation() {
        let (client_end, server_end) = tokio::io::duplex(8192);
        let server = tokio::spawn(async move {
            let (read_half, write_half) = tokio::io::split(server_end);
            let mut instream = RfbInStream::new(read_half);
            let mut outstream = RfbOutStream::new(write_half);

            outstream.write_bytes(&RfbVersion::V3_8.to_wire());
            outstream.flush().await.unwrap();
            let mut version = [0u8; 12];
            instream.read_bytes(&mut version).await.unwrap();

            outstream.write_u8(1);
            outstream.write_u8(SECURITY_TYPE_NONE);
            outstream.flush().await.unwrap();
            assert_eq!(instream.read_u8().await.unwrap(), SECURITY_TYPE_NONE);
            outstream.write_u32(0); // SecurityResult OK
            outstream.flush().await.unwrap();

            let _shared = instream.read_u8().await.unwrap();
            // ServerInit declaring a true-colour format with red_max = 0;
            // the first to_rgb888 on such a format would be undefined.
            outstream.write_u16(4); // width
            outstream.write_u16(2); // height
            outstream.write_bytes(&[
                32, 24, 0, 1, // bits_per_pixel, depth, big_endian, true_color
                0, 0, 0, 255, 0, 255, // red_max = 0, green_max, blue_max
                16, 8, 0, // shifts
                0, 0, 0, // padding
            ]);
            outstream.write_string("hostile");
            outstream.flush().await.unwrap();
        });

        let err = ViewerSession::connect(client_end, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RfbClientError::ProtocolViolation(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn vnc_auth_uses_the_responder() {
        let (client_end, server_end) = tokio::io::duplex(8192);
        let server = tokio::spawn(async move {
            let (read_half, write_half) = tokio::io::split(server_end);
            let mut instream = RfbInStream::new(read_half);
            let mut outstream = RfbOutStream::new(write_half);

            outstream.write_bytes(&RfbVersion::V3_8.to_wire());
            outstream.flush().await.unwrap();
            let mut version = [0u8; 12];
            instream.read_bytes(&mut version).await.unwrap();

            outstream.write_u8(1);
            outstream.write_u8(2); // VNC auth only
            outstream.flush().await.unwrap();
            assert_eq!(instream.read_u8().await.unwrap(), 2);

            let challenge = [7u8; 16];
            outstream.write_bytes(&challenge);
            outstream.flush().await.unwrap();
            let mut response = [0u8; 16];
            instream.read_bytes(&mut response).await.unwrap();
            // The inverted challenge is the agreed "cipher" below.
            assert!(response.iter().all(|&b| b == !7u8));
            outstream.write_u32(1); // fail it anyway
            outstream.write_string("bad credentials");
            outstream.flush().await.unwrap();
        });

        let invert = |challenge: &[u8; 16]| {
            let mut out = *challenge;
            for byte in &mut out {
                *byte = !*byte;
            }
            out
        };
        let err = ViewerSession::connect(client_end, true, Some(&invert))
            .await
            .unwrap_err();
        assert!(matches!(err, RfbClientError::AuthenticationFailure(_)));
        server.await.unwrap();
    }
}
