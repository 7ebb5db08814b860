//! Buffered I/O streams for RFB protocol communication.
//!
//! This module provides efficient buffered reading and writing for the RFB protocol,
//! with type-safe methods for reading/writing primitive types in network byte order.
//!
//! # Examples
//!
//! ```no_run
//! use rfb_protocol::io::{RfbInStream, RfbOutStream};
//!
//! # async fn example<S>(socket: S) -> std::io::Result<()>
//! # where S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin {
//! let (reader, writer) = tokio::io::split(socket);
//!
//! // Reading from RFB stream
//! let mut input = RfbInStream::new(reader);
//! let message_type = input.read_u8().await?;
//! let width = input.read_u16().await?;
//! let height = input.read_u16().await?;
//!
//! // Writing to RFB stream
//! let mut output = RfbOutStream::new(writer);
//! output.write_u8(0); // FramebufferUpdate
//! output.write_u8(0); // padding
//! output.write_u16(1); // rectangle count
//! output.flush().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest u32-length-prefixed string accepted from the peer.
///
/// The strings carried this way (desktop names, cut text, failure reasons)
/// are small in practice; a larger length prefix is a hostile peer trying
/// to make us allocate, and is rejected before any payload byte is read.
pub const MAX_STRING_LEN: usize = 1 << 20;

/// Buffered input stream for reading RFB protocol data.
///
/// This stream provides efficient buffered reading with methods for reading
/// primitive types in network byte order (big-endian). Data is buffered
/// internally (default 8KB) to minimize system calls; methods like
/// `read_u16()` only perform I/O when the buffer needs refilling.
pub struct RfbInStream<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> RfbInStream<R> {
    /// Create a new input stream with default buffer size (8KB).
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, 8192)
    }

    /// Create a new input stream with specified buffer capacity.
    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Ensure at least `n` bytes are available in the buffer.
    ///
    /// Reads from the underlying reader until the buffer contains at least
    /// `n` bytes. Returns an error if EOF is reached before `n` bytes are
    /// available.
    async fn ensure_bytes(&mut self, n: usize) -> std::io::Result<()> {
        while self.buffer.len() < n {
            let bytes_read = self.reader.read_buf(&mut self.buffer).await?;
            if bytes_read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("expected {} bytes, got {}", n, self.buffer.len()),
                ));
            }
        }
        Ok(())
    }

    /// Perform one read from the underlying reader into the buffer.
    ///
    /// Returns the number of bytes read; 0 means the peer closed the
    /// connection. Unlike the typed readers this is cancellation-safe,
    /// which makes it usable inside `tokio::select!` to wait for
    /// "client sent something" without committing to a message parse.
    pub async fn fill(&mut self) -> std::io::Result<usize> {
        self.reader.read_buf(&mut self.buffer).await
    }

    /// Read a single byte (u8).
    pub async fn read_u8(&mut self) -> std::io::Result<u8> {
        self.ensure_bytes(1).await?;
        Ok(self.buffer.get_u8())
    }

    /// Read a 16-bit unsigned integer in network byte order (big-endian).
    pub async fn read_u16(&mut self) -> std::io::Result<u16> {
        self.ensure_bytes(2).await?;
        Ok(self.buffer.get_u16())
    }

    /// Read a 32-bit unsigned integer in network byte order (big-endian).
    pub async fn read_u32(&mut self) -> std::io::Result<u32> {
        self.ensure_bytes(4).await?;
        Ok(self.buffer.get_u32())
    }

    /// Read a 32-bit signed integer in network byte order (big-endian).
    pub async fn read_i32(&mut self) -> std::io::Result<i32> {
        self.ensure_bytes(4).await?;
        Ok(self.buffer.get_i32())
    }

    /// Read exactly `buf.len()` bytes into the provided buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if EOF is reached before the buffer is filled,
    /// or if an I/O error occurs.
    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.ensure_bytes(buf.len()).await?;
        self.buffer.copy_to_slice(buf);
        Ok(())
    }

    /// Read a u32-length-prefixed UTF-8 string (the RFB reason/text format).
    ///
    /// Invalid UTF-8 bytes are replaced rather than failing the connection;
    /// the strings carried this way (desktop names, cut text, failure
    /// reasons) are display-only. Lengths above [`MAX_STRING_LEN`] are
    /// rejected before allocating.
    pub async fn read_string(&mut self) -> std::io::Result<String> {
        let len = self.read_u32().await? as usize;
        if len > MAX_STRING_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("string of {} bytes exceeds limit", len),
            ));
        }
        let mut buf = vec![0u8; len];
        self.read_bytes(&mut buf).await?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read a Tight compact length: 1 to 3 bytes, 7 bits per byte
    /// little-endian-first, high bit as continuation flag.
    pub async fn read_compact_length(&mut self) -> std::io::Result<usize> {
        let b0 = self.read_u8().await?;
        let mut len = (b0 & 0x7f) as usize;
        if b0 & 0x80 != 0 {
            let b1 = self.read_u8().await?;
            len |= ((b1 & 0x7f) as usize) << 7;
            if b1 & 0x80 != 0 {
                let b2 = self.read_u8().await?;
                len |= (b2 as usize) << 14;
            }
        }
        Ok(len)
    }

    /// Skip `n` bytes in the stream.
    ///
    /// This is more efficient than reading and discarding data.
    pub async fn skip(&mut self, n: usize) -> std::io::Result<()> {
        self.ensure_bytes(n).await?;
        self.buffer.advance(n);
        Ok(())
    }

    /// Get the number of bytes currently available in the buffer.
    ///
    /// This indicates how many bytes can be read without performing I/O.
    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    /// Get a reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Get a mutable reference to the underlying reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consume the stream and return the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Buffered output stream for writing RFB protocol data.
///
/// This stream provides efficient buffered writing with methods for writing
/// primitive types in network byte order (big-endian). Data is buffered
/// internally and only written when [`flush()`](Self::flush) is called.
///
/// # Important: Flushing
///
/// You **must** call [`flush()`](Self::flush) to ensure buffered data is
/// actually sent over the network. Dropping the stream without flushing
/// will lose any buffered data.
pub struct RfbOutStream<W> {
    writer: W,
    buffer: BytesMut,
}

impl<W: AsyncWrite + Unpin> RfbOutStream<W> {
    /// Create a new output stream with default buffer size (8KB).
    pub fn new(writer: W) -> Self {
        Self::with_capacity(writer, 8192)
    }

    /// Create a new output stream with specified buffer capacity.
    pub fn with_capacity(writer: W, capacity: usize) -> Self {
        Self {
            writer,
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Write a single byte (u8).
    ///
    /// The byte is buffered and not sent until [`flush()`](Self::flush) is called.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    /// Write a 16-bit unsigned integer in network byte order (big-endian).
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.put_u16(value);
    }

    /// Write a 32-bit unsigned integer in network byte order (big-endian).
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.put_u32(value);
    }

    /// Write a 32-bit signed integer in network byte order (big-endian).
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.put_i32(value);
    }

    /// Write a byte slice to the buffer.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Write a u32-length-prefixed string (the RFB reason/text format).
    pub fn write_string(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.write_bytes(value.as_bytes());
    }

    /// Write a Tight compact length. Values up to 2^22 - 1 fit in the
    /// three-byte maximum this format allows.
    pub fn write_compact_length(&mut self, len: usize) {
        debug_assert!(len < 1 << 22);
        if len < 1 << 7 {
            self.write_u8(len as u8);
        } else if len < 1 << 14 {
            self.write_u8((len as u8 & 0x7f) | 0x80);
            self.write_u8((len >> 7) as u8);
        } else {
            self.write_u8((len as u8 & 0x7f) | 0x80);
            self.write_u8(((len >> 7) as u8 & 0x7f) | 0x80);
            self.write_u8((len >> 14) as u8);
        }
    }

    /// Flush all buffered data to the underlying writer.
    ///
    /// This writes all buffered data to the writer and ensures it is sent
    /// (by calling the writer's `flush()` method).
    pub async fn flush(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            self.writer.write_all(&self.buffer).await?;
            self.buffer.clear();
        }
        self.writer.flush().await
    }

    /// Get the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Get a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Get a mutable reference to the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Consume the stream and return the underlying writer.
    ///
    /// **Warning:** Any buffered data will be lost. Call [`flush()`](Self::flush)
    /// first if you need to send buffered data.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Object-safe reading facade over [`RfbInStream`].
///
/// Message handlers and authenticators are stored as trait objects, so
/// they cannot be generic over the transport type. They receive
/// `&mut dyn WireInput` instead and read through it.
#[async_trait]
pub trait WireInput: Send {
    async fn read_u8(&mut self) -> std::io::Result<u8>;
    async fn read_u16(&mut self) -> std::io::Result<u16>;
    async fn read_u32(&mut self) -> std::io::Result<u32>;
    async fn read_i32(&mut self) -> std::io::Result<i32>;
    async fn read_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()>;
    async fn read_string(&mut self) -> std::io::Result<String>;
    async fn skip(&mut self, n: usize) -> std::io::Result<()>;
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> WireInput for RfbInStream<R> {
    async fn read_u8(&mut self) -> std::io::Result<u8> {
        RfbInStream::read_u8(self).await
    }

    async fn read_u16(&mut self) -> std::io::Result<u16> {
        RfbInStream::read_u16(self).await
    }

    async fn read_u32(&mut self) -> std::io::Result<u32> {
        RfbInStream::read_u32(self).await
    }

    async fn read_i32(&mut self) -> std::io::Result<i32> {
        RfbInStream::read_i32(self).await
    }

    async fn read_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        RfbInStream::read_bytes(self, buf).await
    }

    async fn read_string(&mut self) -> std::io::Result<String> {
        RfbInStream::read_string(self).await
    }

    async fn skip(&mut self, n: usize) -> std::io::Result<()> {
        RfbInStream::skip(self, n).await
    }
}

/// Object-safe writing facade over [`RfbOutStream`].
#[async_trait]
pub trait WireOutput: Send {
    fn write_u8(&mut self, value: u8);
    fn write_u16(&mut self, value: u16);
    fn write_u32(&mut self, value: u32);
    fn write_i32(&mut self, value: i32);
    fn write_bytes(&mut self, data: &[u8]);
    fn write_string(&mut self, value: &str);
    async fn flush(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> WireOutput for RfbOutStream<W> {
    fn write_u8(&mut self, value: u8) {
        RfbOutStream::write_u8(self, value)
    }

    fn write_u16(&mut self, value: u16) {
        RfbOutStream::write_u16(self, value)
    }

    fn write_u32(&mut self, value: u32) {
        RfbOutStream::write_u32(self, value)
    }

    fn write_i32(&mut self, value: i32) {
        RfbOutStream::write_i32(self, value)
    }

    fn write_bytes(&mut self, data: &[u8]) {
        RfbOutStream::write_bytes(self, data)
    }

    fn write_string(&mut self, value: &str) {
        RfbOutStream::write_string(self, value)
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        RfbOutStream::flush(self).await
    }
}
