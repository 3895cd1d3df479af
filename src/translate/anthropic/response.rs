//! Upstream → Anthropic response translation
//!
//! Drives the stream of upstream chunks into Anthropic's event-named SSE
//! (`message_start`, `content_block_start`, `content_block_delta`,
//! `content_block_stop`, `message_delta`, `message_stop`), and aggregates
//! buffered responses into a single message document.
//!
//! The state machine maintains a single open content block whose kind is
//! `text`, `thinking`, or `tool_use`. A part of a different kind closes the
//! current block and opens the next at the following index, so every
//! `content_block_start` pairs with a `content_block_stop` at the same index
//! and indices are contiguous from zero.
//!
//! Upstream `inlineData` parts have no Anthropic block type; they are dropped
//! with a debug log so the loss is at least observable.

use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::translate;

/// Kind of the currently open content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

/// Mutable per-stream state, passed by reference into every chunk visit.
#[derive(Debug)]
pub struct StreamState {
    /// Model echoed back in `message_start`.
    model: String,
    message_id: Option<String>,
    block: Option<BlockKind>,
    index: u32,
    has_first_response: bool,
    has_finish_reason: bool,
    has_tool_use: bool,
    has_content: bool,
    has_sent_final: bool,
    usage: Option<Value>,
    finish_reason: Option<String>,
}

impl StreamState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            message_id: None,
            block: None,
            index: 0,
            has_first_response: false,
            has_finish_reason: false,
            has_tool_use: false,
            has_content: false,
            has_sent_final: false,
            usage: None,
            finish_reason: None,
        }
    }
}

/// Translate one upstream chunk into zero or more SSE frames.
pub fn chunk_to_frames(chunk: &Value, state: &mut StreamState) -> Vec<String> {
    let mut frames = Vec::new();
    ensure_message_start(chunk, state, &mut frames);

    for part in translate::upstream_parts(chunk) {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            let thought = part.get("thought").and_then(Value::as_bool).unwrap_or(false);
            if thought {
                if state.block != Some(BlockKind::Thinking) {
                    open_block(state, BlockKind::Thinking, &mut frames);
                }
                emit_delta(state, json!({ "type": "thinking_delta", "thinking": text }), &mut frames);
            } else if !text.is_empty() || state.block == Some(BlockKind::Text) {
                if state.block != Some(BlockKind::Text) {
                    if text.is_empty() {
                        continue;
                    }
                    open_block(state, BlockKind::Text, &mut frames);
                }
                emit_delta(state, json!({ "type": "text_delta", "text": text }), &mut frames);
            }
        } else if let Some(call) = part.get("functionCall") {
            let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
            let block = json!({
                "type": "tool_use",
                "id": synthetic_tool_id(name),
                "name": name,
                "input": {}
            });
            open_block_with(state, BlockKind::ToolUse, block, &mut frames);
            state.has_tool_use = true;
            let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
            let partial = serde_json::to_string(&args).unwrap_or_else(|_| "{}".into());
            emit_delta(
                state,
                json!({ "type": "input_json_delta", "partial_json": partial }),
                &mut frames,
            );
        } else if part.get("inlineData").is_some() {
            tracing::debug!("dropping upstream image output (no Anthropic block type)");
        }

        if let Some(signature) = part.get("thoughtSignature").and_then(Value::as_str) {
            if !signature.is_empty() && state.block == Some(BlockKind::Thinking) {
                emit_delta(
                    state,
                    json!({ "type": "signature_delta", "signature": signature }),
                    &mut frames,
                );
            }
        }
    }

    if let Some(meta) = translate::upstream_usage(chunk) {
        state.usage = Some(meta.clone());
    }

    if let Some(reason) = translate::upstream_finish_reason(chunk) {
        state.finish_reason = Some(reason.to_string());
        state.has_finish_reason = true;
        emit_final(state, &mut frames);
    }

    frames
}

/// Emit the terminal events if the upstream ended without a finish reason.
/// Guarantees exactly one `message_stop` per stream.
pub fn finish_frames(state: &mut StreamState) -> Vec<String> {
    let mut frames = Vec::new();
    if !state.has_sent_final {
        if !state.has_finish_reason {
            tracing::debug!("upstream stream ended without a finish reason");
        }
        if !state.has_first_response {
            push_message_start(state, &mut frames);
        }
        emit_final(state, &mut frames);
    }
    frames
}

/// Aggregate a buffered (non-streaming) response into a message document.
///
/// Content blocks are grouped in kind order: thinking, then text, then tool
/// use.
pub fn aggregate(chunks: &[Value], model: &str) -> Value {
    let mut thinking = String::new();
    let mut text = String::new();
    let mut tool_uses: Vec<Value> = Vec::new();
    let mut finish_reason: Option<String> = None;
    let mut usage: Option<Value> = None;
    let mut response_id = None;

    for chunk in chunks {
        if response_id.is_none() {
            response_id = translate::upstream_response(chunk)
                .get("responseId")
                .and_then(Value::as_str)
                .map(String::from);
        }
        for part in translate::upstream_parts(chunk) {
            if let Some(fragment) = part.get("text").and_then(Value::as_str) {
                let thought = part.get("thought").and_then(Value::as_bool).unwrap_or(false);
                if thought {
                    thinking.push_str(fragment);
                } else {
                    text.push_str(fragment);
                }
            } else if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                tool_uses.push(json!({
                    "type": "tool_use",
                    "id": synthetic_tool_id(name),
                    "name": name,
                    "input": call.get("args").cloned().unwrap_or_else(|| json!({}))
                }));
            } else if part.get("inlineData").is_some() {
                tracing::debug!("dropping upstream image output (no Anthropic block type)");
            }
        }
        if let Some(reason) = translate::upstream_finish_reason(chunk) {
            finish_reason = Some(reason.to_string());
        }
        if let Some(meta) = translate::upstream_usage(chunk) {
            usage = Some(meta.clone());
        }
    }

    let mut content: Vec<Value> = Vec::new();
    if !thinking.is_empty() {
        content.push(json!({ "type": "thinking", "thinking": thinking }));
    }
    if !text.is_empty() {
        content.push(json!({ "type": "text", "text": text }));
    }
    let has_tool_use = !tool_uses.is_empty();
    content.extend(tool_uses);

    json!({
        "id": response_id
            .map(|id| format!("msg_{}", id))
            .unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4().simple())),
        "type": "message",
        "role": "assistant",
        "content": content,
        "model": model,
        "stop_reason": map_stop_reason(finish_reason.as_deref(), has_tool_use),
        "stop_sequence": null,
        "usage": map_usage(usage.as_ref())
    })
}

// ============================================================================
// Event assembly
// ============================================================================

fn ensure_message_start(chunk: &Value, state: &mut StreamState, frames: &mut Vec<String>) {
    if state.has_first_response {
        return;
    }
    state.message_id = translate::upstream_response(chunk)
        .get("responseId")
        .and_then(Value::as_str)
        .map(|id| format!("msg_{}", id));
    push_message_start(state, frames);
}

fn push_message_start(state: &mut StreamState, frames: &mut Vec<String>) {
    let id = state
        .message_id
        .clone()
        .unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4().simple()));
    frames.push(format_event(
        "message_start",
        &json!({
            "type": "message_start",
            "message": {
                "id": id,
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": state.model,
                "stop_reason": null,
                "stop_sequence": null,
                "usage": { "input_tokens": 0, "output_tokens": 0 }
            }
        }),
    ));
    state.has_first_response = true;
}

/// Open a block of the given kind, closing the current one first.
fn open_block(state: &mut StreamState, kind: BlockKind, frames: &mut Vec<String>) {
    let payload = match kind {
        BlockKind::Text => json!({ "type": "text", "text": "" }),
        BlockKind::Thinking => json!({ "type": "thinking", "thinking": "" }),
        BlockKind::ToolUse => unreachable!("tool_use blocks carry ids; use open_block_with"),
    };
    open_block_with(state, kind, payload, frames);
}

fn open_block_with(state: &mut StreamState, kind: BlockKind, block: Value, frames: &mut Vec<String>) {
    if state.block.is_some() {
        close_block(state, frames);
        state.index += 1;
    }
    frames.push(format_event(
        "content_block_start",
        &json!({
            "type": "content_block_start",
            "index": state.index,
            "content_block": block
        }),
    ));
    state.block = Some(kind);
}

fn close_block(state: &mut StreamState, frames: &mut Vec<String>) {
    frames.push(format_event(
        "content_block_stop",
        &json!({ "type": "content_block_stop", "index": state.index }),
    ));
    state.block = None;
}

fn emit_delta(state: &mut StreamState, delta: Value, frames: &mut Vec<String>) {
    frames.push(format_event(
        "content_block_delta",
        &json!({
            "type": "content_block_delta",
            "index": state.index,
            "delta": delta
        }),
    ));
    state.has_content = true;
}

/// Emit the closing sequence: stop for the open block (only when content was
/// produced, so empty assistant messages stay empty), `message_delta` with the
/// mapped stop reason, then `message_stop`.
fn emit_final(state: &mut StreamState, frames: &mut Vec<String>) {
    if state.has_content && state.block.is_some() {
        close_block(state, frames);
    }

    let stop_reason = map_stop_reason(state.finish_reason.as_deref(), state.has_tool_use);
    frames.push(format_event(
        "message_delta",
        &json!({
            "type": "message_delta",
            "delta": { "stop_reason": stop_reason, "stop_sequence": null },
            "usage": map_usage(state.usage.as_ref())
        }),
    ));
    frames.push(format_event(
        "message_stop",
        &json!({ "type": "message_stop" }),
    ));
    state.has_sent_final = true;
}

/// Map the upstream finish reason to an Anthropic stop reason. Any tool call
/// in the stream wins over whatever the upstream said.
fn map_stop_reason(finish_reason: Option<&str>, has_tool_use: bool) -> String {
    if has_tool_use {
        return "tool_use".to_string();
    }
    match finish_reason {
        Some("MAX_TOKENS") => "max_tokens".to_string(),
        Some("STOP") | Some("UNKNOWN") | Some("FINISH_REASON_UNSPECIFIED") | None => {
            "end_turn".to_string()
        }
        Some(_) => "end_turn".to_string(),
    }
}

fn map_usage(meta: Option<&Value>) -> Value {
    let prompt = meta
        .and_then(|m| m.get("promptTokenCount"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let candidates = meta
        .and_then(|m| m.get("candidatesTokenCount"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let thoughts = meta
        .and_then(|m| m.get("thoughtsTokenCount"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    json!({ "input_tokens": prompt, "output_tokens": candidates + thoughts })
}

fn synthetic_tool_id(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    format!("{}-{}", name, nanos)
}

fn format_event(event: &str, data: &Value) -> String {
    format!("event: {}\ndata: {}\n\n", event, data)
}
