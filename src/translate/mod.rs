//! Dialect translation - bidirectional conversion between client APIs and the
//! upstream envelope
//!
//! Three JSON schemas meet here: OpenAI Chat Completions, Anthropic Messages,
//! and the upstream's Gemini-style envelope
//! (`{ model, project, request: { contents, generationConfig, ... } }`).
//!
//! Payloads are never materialized into typed models. The upstream envelope
//! nests deeply, the client schemas move fast, and most fields pass through
//! untouched - so converters mutate `serde_json::Value` documents through the
//! pointer-addressed helpers below and only lift out the handful of fields
//! they actually rewrite.
//!
//! # Module map
//!
//! - [`openai`] - Chat Completions/Responses ↔ upstream
//! - [`anthropic`] - Messages ↔ upstream
//! - [`thinking`] - reasoning-budget mapping, injection, and clamping

pub mod anthropic;
pub mod openai;
pub mod thinking;

use serde_json::Value;

/// Placeholder signature attached to replayed function calls. The upstream
/// validates that model-authored tool calls carry a thought signature; client
/// dialects have no equivalent field, so history is replayed with this marker.
pub const THOUGHT_SIGNATURE_PLACEHOLDER: &str = "skip_thought_signature_validator";

/// Safety categories injected into every outgoing request, all set to
/// BLOCK_NONE - the proxy never filters on top of what the client asked for.
pub const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

// ============================================================================
// Pointer-addressed access
// ============================================================================

/// Read a value by JSON pointer (`/request/generationConfig/temperature`).
pub fn get<'a>(doc: &'a Value, pointer: &str) -> Option<&'a Value> {
    doc.pointer(pointer)
}

/// Write a value by JSON pointer, creating intermediate objects as needed.
///
/// Only object segments are created on the way down; writing through an array
/// index that does not exist is a no-op (the converters never need it).
pub fn set(doc: &mut Value, pointer: &str, value: Value) {
    let Some(path) = pointer.strip_prefix('/') else {
        return;
    };

    let mut current = doc;
    let segments: Vec<&str> = path.split('/').collect();

    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;

        if last {
            match current {
                Value::Object(map) => {
                    map.insert(segment.to_string(), value);
                }
                Value::Array(items) => {
                    if let Ok(idx) = segment.parse::<usize>() {
                        if idx < items.len() {
                            items[idx] = value;
                        } else if idx == items.len() {
                            items.push(value);
                        }
                    }
                }
                _ => {}
            }
            return;
        }

        current = match current {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new())),
            Value::Array(items) => match segment.parse::<usize>() {
                Ok(idx) if idx < items.len() => &mut items[idx],
                _ => return,
            },
            _ => return,
        };
    }
}

/// Remove a value by JSON pointer. Missing paths are a no-op.
pub fn delete(doc: &mut Value, pointer: &str) {
    let Some((parent_ptr, key)) = pointer.rsplit_once('/') else {
        return;
    };

    let parent = if parent_ptr.is_empty() {
        Some(doc)
    } else {
        doc.pointer_mut(parent_ptr)
    };

    match parent {
        Some(Value::Object(map)) => {
            map.remove(key);
        }
        Some(Value::Array(items)) => {
            if let Ok(idx) = key.parse::<usize>() {
                if idx < items.len() {
                    items.remove(idx);
                }
            }
        }
        _ => {}
    }
}

// ============================================================================
// Shared envelope helpers
// ============================================================================

/// Start an upstream envelope for the given model with an empty contents list.
pub fn empty_envelope(model: &str) -> Value {
    serde_json::json!({
        "model": model,
        "request": {
            "contents": []
        }
    })
}

/// Inject the default safety settings unless the envelope already carries one.
pub fn inject_safety_settings(envelope: &mut Value) {
    if get(envelope, "/request/safetySettings").is_some() {
        return;
    }
    let settings: Vec<Value> = SAFETY_CATEGORIES
        .iter()
        .map(|category| {
            serde_json::json!({
                "category": category,
                "threshold": "BLOCK_NONE"
            })
        })
        .collect();
    set(envelope, "/request/safetySettings", Value::Array(settings));
}

// ============================================================================
// Upstream chunk probes
// ============================================================================
//
// Stream chunks arrive either bare or wrapped in a `response` envelope; every
// accessor below tolerates both so the state machines never care.

/// Unwrap the `response` envelope if present.
pub fn upstream_response(chunk: &Value) -> &Value {
    chunk.get("response").unwrap_or(chunk)
}

/// The first candidate of a chunk, when any.
pub fn upstream_candidate(chunk: &Value) -> Option<&Value> {
    upstream_response(chunk).pointer("/candidates/0")
}

/// Content parts of the first candidate.
pub fn upstream_parts(chunk: &Value) -> &[Value] {
    upstream_candidate(chunk)
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Finish reason of the first candidate - present only on the terminal chunk.
pub fn upstream_finish_reason(chunk: &Value) -> Option<&str> {
    upstream_candidate(chunk)
        .and_then(|c| c.get("finishReason"))
        .and_then(Value::as_str)
}

/// Usage metadata, wherever the chunk put it.
pub fn upstream_usage(chunk: &Value) -> Option<&Value> {
    upstream_response(chunk).get("usageMetadata")
}

/// Parse a `data:<mime>;base64,<payload>` URL into its mime type and payload.
///
/// Returns `None` for non-data URLs - the upstream only accepts inline bytes,
/// so remote image URLs cannot be forwarded.
pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime = header.split(';').next().unwrap_or("image/png").to_string();
    Some((mime, data.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut doc = json!({});
        set(
            &mut doc,
            "/request/generationConfig/thinkingConfig/thinkingBudget",
            json!(8192),
        );
        assert_eq!(
            doc.pointer("/request/generationConfig/thinkingConfig/thinkingBudget"),
            Some(&json!(8192))
        );
    }

    #[test]
    fn test_set_overwrites_existing() {
        let mut doc = json!({"request": {"model": "a"}});
        set(&mut doc, "/request/model", json!("b"));
        assert_eq!(doc["request"]["model"], "b");
    }

    #[test]
    fn test_delete_removes_leaf_and_ignores_missing() {
        let mut doc = json!({"request": {"generationConfig": {"topK": 5}}});
        delete(&mut doc, "/request/generationConfig/topK");
        assert_eq!(doc["request"]["generationConfig"], json!({}));

        // Missing path is a no-op
        delete(&mut doc, "/request/nope/deeper");
        assert!(doc.get("request").is_some());
    }

    #[test]
    fn test_safety_settings_injected_once() {
        let mut envelope = empty_envelope("gemini-3-flash");
        inject_safety_settings(&mut envelope);
        let settings = envelope
            .pointer("/request/safetySettings")
            .and_then(Value::as_array)
            .unwrap();
        assert_eq!(settings.len(), 4);
        for entry in settings {
            assert_eq!(entry["threshold"], "BLOCK_NONE");
        }

        // Re-injecting does not duplicate
        inject_safety_settings(&mut envelope);
        assert_eq!(
            envelope
                .pointer("/request/safetySettings")
                .and_then(Value::as_array)
                .unwrap()
                .len(),
            4
        );
    }

    #[test]
    fn test_parse_data_url() {
        let (mime, data) = parse_data_url("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(data, "aGVsbG8=");

        assert!(parse_data_url("https://example.com/cat.png").is_none());
    }
}
