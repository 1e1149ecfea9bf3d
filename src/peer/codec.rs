//! Newline framing for peer streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! peer that never terminates a line cannot make us buffer without bound.
//! The same codec frames the primary JSON-RPC channel (stdout) and the
//! diagnostic channel (stderr).
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use turn_pilot::peer::codec::LineCodec;
//!
//! let lines = FramedRead::new(child_stdout, LineCodec::new());
//! ```

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Default maximum line length: 16 MiB.
///
/// State snapshots and map summaries can be large, so the primary channel
/// gets a generous limit; the diagnostic channel is configured separately.
pub const MAX_LINE_BYTES: usize = 16 * 1_048_576;

/// Newline-delimited UTF-8 codec with a bounded line length.
///
/// # Decoder
///
/// An over-long line yields [`AppError::MalformedResponse`]`("line too
/// long: …")`; the rest of that line is discarded and decoding resumes at
/// the next newline. A line that is not valid UTF-8 is consumed and yields
/// [`AppError::MalformedResponse`] as well. Read failures on the underlying
/// stream surface as [`AppError::Io`].
///
/// # Encoder
///
/// Strings are written as `item\n`. The limit is a decoder-side concern.
///
/// # Skipping
///
/// A codec built with [`skipping`](Self::skipping) drops over-long and
/// non-UTF-8 lines silently instead of reporting them. The diagnostic
/// channel uses this: `FramedRead` ends the stream once after any decoder
/// error, which a drain would take for end-of-input.
#[derive(Debug)]
pub struct LineCodec {
    inner: LinesCodec,
    max_length: usize,
    skip_bad_lines: bool,
    skipped: u64,
}

impl LineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec that rejects lines longer than `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
            skip_bad_lines: false,
            skipped: 0,
        }
    }

    /// Like [`with_max_length`](Self::with_max_length), but over-long and
    /// non-UTF-8 lines are discarded and counted rather than returned as
    /// errors.
    #[must_use]
    pub fn skipping(max_length: usize) -> Self {
        Self {
            skip_bad_lines: true,
            ..Self::with_max_length(max_length)
        }
    }

    /// Lines discarded so far (skipping codecs only).
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Configured maximum line length.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn map_error(&self, err: LinesCodecError) -> AppError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => AppError::MalformedResponse(format!(
                "line too long: exceeded {} bytes",
                self.max_length
            )),
            LinesCodecError::Io(io_err) if io_err.kind() == io::ErrorKind::InvalidData => {
                AppError::MalformedResponse(format!("line is not valid UTF-8: {io_err}"))
            }
            LinesCodecError::Io(io_err) => AppError::from(io_err),
        }
    }
}

/// Errors that leave the decoder at the start of the next line.
fn is_line_error(err: &LinesCodecError) -> bool {
    match err {
        LinesCodecError::MaxLineLengthExceeded => true,
        LinesCodecError::Io(io_err) => io_err.kind() == io::ErrorKind::InvalidData,
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode(src) {
                Err(ref err) if self.skip_bad_lines && is_line_error(err) => {
                    self.skipped += 1;
                }
                other => return other.map_err(|err| self.map_error(err)),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode_eof(src) {
                Err(ref err) if self.skip_bad_lines && is_line_error(err) => {
                    self.skipped += 1;
                }
                other => return other.map_err(|err| self.map_error(err)),
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner.encode(item, dst).map_err(|err| self.map_error(err))
    }
}
