//! Event-stream framing for push envelopes.
//!
//! Each envelope travels as one event-stream record: a single `data:` line
//! holding the envelope JSON, terminated by a blank line. Decoding is
//! lenient about the framing (bare JSON, CRLF, multi-line `data:` fields,
//! comment lines) but strict about the envelope itself.

use bytes::{Bytes, BytesMut};
use serde::Serialize;

use crate::envelope::{EnvelopeKind, PushEnvelope};
use crate::errors::CodecError;

/// Serialize an envelope into one event-stream record.
pub fn encode_envelope<B: Serialize + ?Sized>(
    kind: EnvelopeKind,
    channel_id: &str,
    body: &B,
) -> Result<Bytes, CodecError> {
    let body = serde_json::to_value(body).map_err(|e| CodecError::Encode { reason: e.to_string() })?;
    encode_record(&PushEnvelope::new(kind, channel_id, body))
}

/// Serialize an already-built envelope into one event-stream record.
pub fn encode_record(envelope: &PushEnvelope) -> Result<Bytes, CodecError> {
    // serde_json escapes newlines inside strings, so the JSON fits on one line.
    let json = serde_json::to_string(envelope).map_err(|e| CodecError::Encode { reason: e.to_string() })?;
    Ok(Bytes::from(format!("data: {json}\n\n")))
}

/// Parse one frame into an envelope.
///
/// Accepts either a framed record (`data: {...}\n\n`) or the bare JSON.
/// Fails with [`CodecError::MalformedFrame`] on invalid JSON, a missing
/// field, or an unrecognized kind.
pub fn decode_envelope(frame: &[u8]) -> Result<PushEnvelope, CodecError> {
    let text = std::str::from_utf8(frame).map_err(|e| CodecError::malformed(format!("invalid utf-8: {e}")))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CodecError::malformed("empty frame"));
    }

    let json = if trimmed.starts_with('{') {
        trimmed.to_owned()
    } else {
        let mut buffer = SseFrameBuffer::new();
        buffer.push(trimmed.as_bytes());
        buffer
            .finish()
            .ok_or_else(|| CodecError::malformed("frame has no data field"))?
    };

    serde_json::from_str(&json).map_err(|e| CodecError::malformed(e.to_string()))
}

// ── Incremental reader ──────────────────────────────────────────────

/// Incremental event-stream parser.
///
/// Feed raw bytes with [`push`](Self::push) as they arrive and pull complete
/// `data` payloads with [`next_frame`](Self::next_frame). Chunk boundaries may
/// fall anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseFrameBuffer {
    buffer: BytesMut,
    data_lines: Vec<String>,
}

impl SseFrameBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete event payload, if one is buffered.
    pub fn next_frame(&mut self) -> Option<String> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            let mut line = &line[..pos];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if let Some(frame) = self.accept_line(&String::from_utf8_lossy(line)) {
                return Some(frame);
            }
        }
        None
    }

    /// Flush at end of stream: returns a final event whose terminating blank
    /// line never arrived.
    pub fn finish(&mut self) -> Option<String> {
        if let Some(frame) = self.next_frame() {
            return Some(frame);
        }
        if !self.buffer.is_empty() {
            let rest = self.buffer.split();
            let line = String::from_utf8_lossy(&rest);
            let _ = self.accept_line(line.trim_end_matches('\r'));
        }
        self.take_event()
    }

    fn accept_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_owned());
        }
        // event:, id:, retry: carry nothing this protocol uses
        None
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(data)
    }
}
