//! Newline-delimited framing.
//!
//! Wire format: UTF-8 text, one message per `\n`-terminated frame. No
//! length prefix, no header, no version negotiation. A message containing
//! an embedded newline is not representable — [`encode_frame`] rejects it
//! instead of working around the format.

use tracing::warn;

use crate::error::EngineError;

/// The frame terminator.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Encode one message as a frame, appending the terminator.
pub fn encode_frame(text: &str) -> Result<Vec<u8>, EngineError> {
    if text.contains('\n') {
        return Err(EngineError::MessageNotRepresentable);
    }
    let mut frame = Vec::with_capacity(text.len() + 1);
    frame.extend_from_slice(text.as_bytes());
    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

/// Incremental frame decoder.
///
/// Buffers partial reads until a terminator is seen; one `push` can yield
/// zero, one, or several complete messages. A frame that is not valid
/// UTF-8 is dropped with a warning rather than tearing the connection
/// down.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns every message completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut messages = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == FRAME_DELIMITER) {
            let frame: Vec<u8> = self.buf.drain(..=pos).collect();
            let body = &frame[..frame.len() - 1];
            match std::str::from_utf8(body) {
                Ok(text) => messages.push(text.to_string()),
                Err(e) => warn!("dropping non-UTF-8 frame: {e}"),
            }
        }
        messages
    }

    /// Bytes buffered waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
