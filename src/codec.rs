//! Line codec for container stdout.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a fixed maximum line length
//! so a container that emits an unterminated or absurdly long line cannot
//! make the event task allocate unbounded memory. Lines are framed on `\n`
//! with a trailing `\r` stripped; the final unterminated line, if any, is
//! produced at EOF.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{DispatchError, Result};

/// Maximum output line length accepted by the codec: 64 KiB.
///
/// A line exceeding this limit causes [`OutputCodec::decode`] to return an
/// error; the session stops capturing output for the remainder of the run
/// but still terminates normally.
pub const MAX_LINE_BYTES: usize = 65_536;

/// Decoder for newline-delimited container stdout.
#[derive(Debug)]
pub struct OutputCodec(LinesCodec);

impl OutputCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for OutputCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for OutputCodec {
    type Item = String;
    type Error = DispatchError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

/// Map a [`LinesCodecError`] to a [`DispatchError`].
fn map_codec_error(e: LinesCodecError) -> DispatchError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            DispatchError::Io(format!("output line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => DispatchError::Io(io_err.to_string()),
    }
}
