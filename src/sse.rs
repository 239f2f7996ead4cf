//! Incremental decoding of a server-sent event body.
//!
//! Bytes arrive in arbitrary chunks. The decoder keeps both the UTF-8 state and the
//! current partial line between calls, so neither a multi-byte character nor a line
//! split across two reads is lost. Only `data: ` lines carry payload; `event:`, `id:`,
//! comments and blank separators are ignored.

use crate::protocol::StreamEvent;
use thiserror::Error;

const DATA_PREFIX: &str = "data: ";

/// A `data: ` line whose payload was not valid JSON.
#[derive(Debug, Error)]
#[error("malformed stream event {line:?}: {source}")]
pub struct MalformedEvent {
    pub line: String,
    #[source]
    pub source: serde_json::Error,
}

pub type DataLine = Result<StreamEvent, MalformedEvent>;

#[derive(Debug, Default)]
pub struct SseDecoder {
    utf8: Utf8Decoder,
    line: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk and return the data lines it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DataLine> {
        self.utf8.decode(chunk, &mut self.line);

        let mut lines = Vec::new();
        while let Some(idx) = self.line.find('\n') {
            let raw: String = self.line.drain(..=idx).collect();
            if let Some(parsed) = parse_line(&raw[..idx]) {
                lines.push(parsed);
            }
        }
        lines
    }

    /// Flush whatever is left once the body has ended.
    pub fn finish(&mut self) -> Vec<DataLine> {
        self.utf8.finish(&mut self.line);
        let rest = std::mem::take(&mut self.line);
        parse_line(&rest).into_iter().collect()
    }
}

fn parse_line(line: &str) -> Option<DataLine> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return None;
    }

    let payload = line.strip_prefix(DATA_PREFIX)?;
    Some(
        serde_json::from_str(payload)
            .map(StreamEvent::new)
            .map_err(|source| MalformedEvent {
                line: line.to_string(),
                source,
            }),
    )
}

/// Streaming UTF-8 decoder. An incomplete trailing sequence is held for the next
/// chunk; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8], out: &mut String) {
        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    out.push_str(text);
                    start = self.pending.len();
                }
                Err(err) => {
                    let valid = start + err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..valid]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid + len;
                        }
                        None => {
                            start = valid;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
    }

    fn finish(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            out.push(char::REPLACEMENT_CHARACTER);
            self.pending.clear();
        }
    }
}
