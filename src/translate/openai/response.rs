//! Upstream → OpenAI response translation
//!
//! Drives the stream of upstream chunks into `chat.completion.chunk` SSE
//! frames, and aggregates buffered responses into a single `chat.completion`
//! document.
//!
//! # Chunk contract
//!
//! - `id` is copied from the upstream `responseId` and carried across chunks.
//! - `created` comes from `createTime` on the first chunk and is reused.
//! - Each emitted chunk sets exactly one of `delta.content`,
//!   `delta.reasoning_content`, `delta.tool_calls`, `delta.images`.
//! - Text parts flagged `thought: true` route to `reasoning_content` unless
//!   the `thinking_as_content` toggle folds them into `content`.
//! - The terminal chunk carries the lowercased finish reason (overridden to
//!   `tool_calls` when any tool call appeared) and the assembled usage block.
//! - `data: [DONE]` terminates the stream exactly once.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::translate;

/// Process-wide discriminator for synthetic tool-call ids.
static TOOL_CALL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mutable per-stream state, passed by reference into every chunk visit.
///
/// Carries no buffers or channels - the executor owns the plumbing, this
/// records only what later chunks need to know about earlier ones.
#[derive(Debug)]
pub struct StreamState {
    /// Model echoed back to the client (the id it asked for, not the alias).
    model: String,
    /// Fold `thought: true` text into plain content for clients that cannot
    /// render a separate reasoning channel.
    thinking_as_content: bool,
    response_id: Option<String>,
    created: Option<i64>,
    next_tool_index: u64,
    sent_role: bool,
    saw_tool_call: bool,
}

impl StreamState {
    pub fn new(model: impl Into<String>, thinking_as_content: bool) -> Self {
        Self {
            model: model.into(),
            thinking_as_content,
            response_id: None,
            created: None,
            next_tool_index: 0,
            sent_role: false,
            saw_tool_call: false,
        }
    }
}

/// Translate one upstream chunk into zero or more SSE frames.
pub fn chunk_to_frames(chunk: &Value, state: &mut StreamState) -> Vec<String> {
    absorb_identity(chunk, state);

    let mut frames = Vec::new();

    for part in translate::upstream_parts(chunk) {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if text.is_empty() {
                continue;
            }
            let thought = part.get("thought").and_then(Value::as_bool).unwrap_or(false);
            let delta = if thought && !state.thinking_as_content {
                delta_with(state, "reasoning_content", json!(text))
            } else {
                delta_with(state, "content", json!(text))
            };
            frames.push(frame(state, delta, None, None));
        } else if let Some(call) = part.get("functionCall") {
            let index = state.next_tool_index;
            state.next_tool_index += 1;
            state.saw_tool_call = true;

            let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
            let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
            let tool_call = json!([{
                "index": index,
                "id": synthetic_tool_id(name),
                "type": "function",
                "function": {
                    "name": name,
                    "arguments": serde_json::to_string(&args).unwrap_or_else(|_| "{}".into())
                }
            }]);
            let delta = delta_with(state, "tool_calls", tool_call);
            frames.push(frame(state, delta, None, None));
        } else if let Some(inline) = part.get("inlineData") {
            let mime = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
            let images = json!([{
                "image_url": { "url": format!("data:{};base64,{}", mime, data) }
            }]);
            let delta = delta_with(state, "images", images);
            frames.push(frame(state, delta, None, None));
        }
    }

    if let Some(reason) = translate::upstream_finish_reason(chunk) {
        let finish = if state.saw_tool_call {
            "tool_calls".to_string()
        } else {
            reason.to_lowercase()
        };
        let usage = translate::upstream_usage(chunk).map(map_usage);
        let delta = empty_delta(state);
        frames.push(frame(state, delta, Some(finish), usage));
    }

    frames
}

/// Emit the stream terminator. Called exactly once, after the channel drains.
pub fn finish_frames(_state: &mut StreamState) -> Vec<String> {
    vec!["data: [DONE]\n\n".to_string()]
}

/// Aggregate a buffered (non-streaming) response into a `chat.completion`.
pub fn aggregate(chunks: &[Value], model: &str, thinking_as_content: bool) -> Value {
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    let mut finish_reason = "stop".to_string();
    let mut usage = json!({ "prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0 });
    let mut response_id = None;
    let mut created = None;

    for chunk in chunks {
        if response_id.is_none() {
            response_id = translate::upstream_response(chunk)
                .get("responseId")
                .and_then(Value::as_str)
                .map(String::from);
        }
        if created.is_none() {
            created = translate::upstream_response(chunk)
                .get("createTime")
                .and_then(Value::as_str)
                .and_then(parse_create_time);
        }

        for part in translate::upstream_parts(chunk) {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                let thought = part.get("thought").and_then(Value::as_bool).unwrap_or(false);
                if thought && !thinking_as_content {
                    reasoning.push_str(text);
                } else {
                    content.push_str(text);
                }
            } else if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(json!({
                    "id": synthetic_tool_id(name),
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": serde_json::to_string(&args).unwrap_or_else(|_| "{}".into())
                    }
                }));
            }
        }

        if let Some(reason) = translate::upstream_finish_reason(chunk) {
            finish_reason = reason.to_lowercase();
        }
        if let Some(meta) = translate::upstream_usage(chunk) {
            usage = map_usage(meta);
        }
    }

    if !tool_calls.is_empty() {
        finish_reason = "tool_calls".to_string();
    }

    let mut message = json!({
        "role": "assistant",
        "content": if content.is_empty() { Value::Null } else { json!(content) }
    });
    if !reasoning.is_empty() {
        message["reasoning_content"] = json!(reasoning);
    }
    if !tool_calls.is_empty() {
        message["tool_calls"] = json!(tool_calls);
    }

    json!({
        "id": response_id.unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())),
        "object": "chat.completion",
        "created": created.unwrap_or_else(now_secs),
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason
        }],
        "usage": usage
    })
}

/// Assemble the OpenAI usage block from upstream `usageMetadata`.
///
/// Thought tokens are billed as prompt-side tokens by the upstream, so they
/// fold into `prompt_tokens` and surface separately under
/// `completion_tokens_details`.
pub fn map_usage(meta: &Value) -> Value {
    let prompt = meta.get("promptTokenCount").and_then(Value::as_i64).unwrap_or(0);
    let thoughts = meta.get("thoughtsTokenCount").and_then(Value::as_i64);
    let candidates = meta
        .get("candidatesTokenCount")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let total = meta.get("totalTokenCount").and_then(Value::as_i64).unwrap_or(0);

    let mut usage = json!({
        "prompt_tokens": prompt + thoughts.unwrap_or(0),
        "completion_tokens": candidates,
        "total_tokens": total
    });
    if let Some(thoughts) = thoughts {
        usage["completion_tokens_details"] = json!({ "reasoning_tokens": thoughts });
    }
    usage
}

// ============================================================================
// Frame assembly
// ============================================================================

fn absorb_identity(chunk: &Value, state: &mut StreamState) {
    let response = translate::upstream_response(chunk);
    if state.response_id.is_none() {
        state.response_id = response
            .get("responseId")
            .and_then(Value::as_str)
            .map(String::from);
    }
    if state.created.is_none() {
        state.created = response
            .get("createTime")
            .and_then(Value::as_str)
            .and_then(parse_create_time)
            .or_else(|| Some(now_secs()));
    }
}

/// A delta with exactly one field set; the others stay null per the chunk
/// contract. The assistant role rides on the first emitted delta only.
fn delta_with(state: &mut StreamState, field: &str, value: Value) -> Value {
    let mut delta = empty_delta(state);
    delta[field] = value;
    delta
}

fn empty_delta(state: &mut StreamState) -> Value {
    let mut delta = json!({
        "content": null,
        "reasoning_content": null,
        "tool_calls": null,
        "images": null
    });
    if !state.sent_role {
        delta["role"] = json!("assistant");
        state.sent_role = true;
    }
    delta
}

fn frame(
    state: &StreamState,
    delta: Value,
    finish_reason: Option<String>,
    usage: Option<Value>,
) -> String {
    let chunk = json!({
        "id": state
            .response_id
            .clone()
            .unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())),
        "object": "chat.completion.chunk",
        "created": state.created.unwrap_or_else(now_secs),
        "model": state.model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason
        }],
        "usage": usage
    });
    format!("data: {}\n\n", chunk)
}

fn synthetic_tool_id(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let counter = TOOL_CALL_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", name, nanos, counter)
}

fn parse_create_time(raw: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp())
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
