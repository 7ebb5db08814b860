//! Persistent zlib stream slots for the Tight encoding.
//!
//! Tight multiplexes up to four independent zlib streams over one
//! connection. Each stream's dictionary persists across rectangles, so a
//! rectangle's payload may only be intelligible as a continuation of
//! whatever the same stream carried earlier. The slots live for the whole
//! connection and are dropped with it; an explicit reset bit in the Tight
//! control byte is the only other thing that may discard stream state.

use anyhow::{bail, Context, Result};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};

/// The four zlib (de)compressor slots a connection owns.
///
/// Slots are created lazily on first use. Decompressors serve inbound Tight
/// rectangles; compressors serve outbound ones. A failure in either
/// direction leaves the dictionary out of sync with the peer, so callers
/// must treat any error here as fatal for the connection.
#[derive(Default)]
pub struct ZlibStreams {
    inflaters: [Option<Decompress>; 4],
    deflaters: [Option<Compress>; 4],
}

impl ZlibStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard stream `index` in both directions.
    ///
    /// Only called when the wire asks for it (a set bit in the low nibble
    /// of a Tight control byte). The next use starts a fresh dictionary.
    pub fn reset(&mut self, index: usize) {
        tracing::debug!("zlib stream {} reset", index);
        self.inflaters[index] = None;
        self.deflaters[index] = None;
    }

    /// Inflate `input` through stream `index`, expecting exactly
    /// `expected_len` bytes out.
    ///
    /// The payload may be a continuation of earlier rectangles on the same
    /// stream; the slot's dictionary carries over between calls.
    pub fn decompress(
        &mut self,
        index: usize,
        input: &[u8],
        expected_len: usize,
    ) -> Result<Vec<u8>> {
        let inflater = self.inflaters[index].get_or_insert_with(|| Decompress::new(true));

        let mut output = vec![0u8; expected_len];
        let start_out = inflater.total_out();

        inflater
            .decompress(input, &mut output, FlushDecompress::Sync)
            .with_context(|| {
                format!(
                    "zlib stream {}: inflate failed (in={}, expected_out={})",
                    index,
                    input.len(),
                    expected_len
                )
            })?;

        let produced = (inflater.total_out() - start_out) as usize;
        if produced != expected_len {
            bail!(
                "zlib stream {}: inflate produced {} bytes, expected {}",
                index,
                produced,
                expected_len
            );
        }
        Ok(output)
    }

    /// Deflate `input` through stream `index` with a sync flush, so the
    /// peer can fully inflate this rectangle without waiting for the next.
    pub fn compress(&mut self, index: usize, input: &[u8]) -> Result<Vec<u8>> {
        let deflater = self.deflaters[index]
            .get_or_insert_with(|| Compress::new(Compression::default(), true));

        let start_in = deflater.total_in();
        let mut output = Vec::with_capacity(input.len() / 2 + 64);
        loop {
            let consumed = (deflater.total_in() - start_in) as usize;
            deflater
                .compress_vec(&input[consumed..], &mut output, FlushCompress::Sync)
                .with_context(|| format!("zlib stream {}: deflate failed", index))?;

            let consumed = (deflater.total_in() - start_in) as usize;
            // Sync flush is complete once all input is in and the output
            // buffer did not fill to capacity.
            if consumed == input.len() && output.len() < output.capacity() {
                break;
            }
            output.reserve(256);
        }
        Ok(output)
    }
}
