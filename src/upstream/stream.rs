//! Upstream SSE stream reading
//!
//! The upstream streams newline-delimited `data: {json}` lines. A reader task
//! splits the byte stream into lines, parses each into a chunk, filters
//! not-yet-authoritative usage metadata, and publishes the chunks on a bounded
//! channel. The handler consumes the channel on its own worker; when the
//! upstream body ends the channel closes and the handler emits its terminal
//! marker.

use anyhow::Result;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::translate;

/// A single SSE line (and therefore one chunk) never exceeds this.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Backpressure bound between the reader task and the handler.
pub const CHANNEL_CAPACITY: usize = 256;

/// Spawn the reader task for an upstream streaming response.
///
/// The returned channel yields parsed chunks in upstream order; a read error
/// arrives as a final `Err` item. Dropping the receiver (client disconnect)
/// stops the reader at its next send.
pub fn spawn_reader(response: reqwest::Response) -> mpsc::Receiver<Result<Value>> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut assembler = LineAssembler::new();

        while let Some(piece) = body.next().await {
            match piece {
                Ok(bytes) => match assembler.push(&bytes) {
                    Ok(chunks) => {
                        for chunk in chunks {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return; // client went away
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                },
                Err(e) => {
                    let _ = tx
                        .send(Err(anyhow::Error::new(e).context("upstream body read failed")))
                        .await;
                    return;
                }
            }
        }

        // Trailing line without a newline still counts
        if let Some(chunk) = assembler.flush() {
            let _ = tx.send(Ok(chunk)).await;
        }
    });

    rx
}

/// Strip `usageMetadata` from chunks that do not carry a finish reason - the
/// intermediate counters are not authoritative, only the terminal chunk's are.
pub fn filter_usage_metadata(chunk: &mut Value) {
    if translate::upstream_finish_reason(chunk).is_some() {
        return;
    }
    translate::delete(chunk, "/usageMetadata");
    translate::delete(chunk, "/response/usageMetadata");
}

/// Splits the upstream byte stream into SSE lines and parses the chunks.
struct LineAssembler {
    buffer: Vec<u8>,
}

impl LineAssembler {
    fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(8 * 1024),
        }
    }

    /// Feed bytes, returning every complete chunk they finish.
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<Value>> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > MAX_LINE_BYTES {
            anyhow::bail!("upstream SSE line exceeds {} bytes", MAX_LINE_BYTES);
        }

        let mut chunks = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(chunk) = parse_line(&line) {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    fn flush(&mut self) -> Option<Value> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

/// Parse one SSE line into a filtered chunk.
///
/// Returns `None` for blank lines, `[DONE]` markers, `event:` lines, and
/// anything that is not valid JSON.
fn parse_line(line: &[u8]) -> Option<Value> {
    let line = std::str::from_utf8(line).ok()?.trim();
    let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if payload.is_empty() || payload == "[DONE]" || payload.starts_with("event:") {
        return None;
    }

    let mut chunk: Value = serde_json::from_str(payload).ok()?;
    filter_usage_metadata(&mut chunk);
    Some(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lines_split_across_pushes() {
        let mut assembler = LineAssembler::new();

        let chunks = assembler
            .push(b"data: {\"response\":{\"candidates\":[{\"content\":")
            .unwrap();
        assert!(chunks.is_empty());

        let chunks = assembler
            .push(b"{\"parts\":[{\"text\":\"hi\"}]}}]}}\ndata: {\"a\"")
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].pointer("/response/candidates/0/content/parts/0/text"),
            Some(&json!("hi"))
        );

        let chunks = assembler.push(b": 1}\n").unwrap();
        assert_eq!(chunks, vec![json!({ "a": 1 })]);
    }

    #[test]
    fn test_garbage_and_markers_are_discarded() {
        let mut assembler = LineAssembler::new();
        let chunks = assembler
            .push(b"\n: keepalive\ndata: [DONE]\ndata: not-json\ndata: {\"ok\":true}\n")
            .unwrap();
        assert_eq!(chunks, vec![json!({ "ok": true })]);
    }

    #[test]
    fn test_oversized_line_errors() {
        let mut assembler = LineAssembler::new();
        let big = vec![b'x'; MAX_LINE_BYTES + 1];
        assert!(assembler.push(&big).is_err());
    }

    #[test]
    fn test_flush_returns_trailing_chunk() {
        let mut assembler = LineAssembler::new();
        assembler.push(b"data: {\"tail\":true}").unwrap();
        assert_eq!(assembler.flush(), Some(json!({ "tail": true })));
        assert_eq!(assembler.flush(), None);
    }

    #[test]
    fn test_usage_stripped_without_finish_reason() {
        let mut chunk = json!({
            "response": {
                "candidates": [{ "content": { "parts": [{ "text": "hi" }] } }],
                "usageMetadata": { "promptTokenCount": 3 }
            }
        });
        filter_usage_metadata(&mut chunk);
        assert!(chunk.pointer("/response/usageMetadata").is_none());
    }

    #[test]
    fn test_usage_kept_on_terminal_chunk() {
        let mut chunk = json!({
            "response": {
                "candidates": [{ "finishReason": "STOP" }],
                "usageMetadata": { "promptTokenCount": 3 }
            }
        });
        filter_usage_metadata(&mut chunk);
        assert!(chunk.pointer("/response/usageMetadata").is_some());
    }
}
