//! Anthropic → upstream request translation
//!
//! Converts Messages API requests into the upstream envelope.
//!
//! # Key differences
//!
//! | Anthropic                          | Upstream                                |
//! |------------------------------------|-----------------------------------------|
//! | top-level `system`                 | `request.systemInstruction`             |
//! | `content[].type: "tool_use"`       | `parts[].functionCall`                  |
//! | `content[].type: "tool_result"`    | user-role `functionResponse` parts      |
//! | `content[].type: "image"`          | `parts[].inlineData`                    |
//! | `tools[].input_schema`             | `tools[0].functionDeclarations[]`       |
//! | `thinking.budget_tokens`           | `generationConfig.thinkingConfig`       |
//!
//! Anthropic already carries tool results inside user messages, so no
//! two-pass rebinding is needed - only an id→name map so each
//! `functionResponse` can name the function it answers.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::registry::{ModelRegistry, DEFAULT_MODEL};
use crate::translate::{self, openai::request::scrub_schemas_for_claude, thinking};

/// Translate an Anthropic Messages body into an upstream envelope.
pub fn to_upstream(body: &Value, registry: &ModelRegistry) -> Result<Value> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_MODEL)
        .to_string();

    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .context("request has no messages array")?;

    let mut envelope = translate::empty_envelope(&model);

    let tool_names = collect_tool_use_names(messages);

    let mut contents: Vec<Value> = Vec::new();
    for message in messages {
        let role = match message.get("role").and_then(Value::as_str) {
            Some("assistant") => "model",
            _ => "user",
        };
        let parts = message_parts(message.get("content"), &tool_names);
        if !parts.is_empty() {
            contents.push(json!({ "role": role, "parts": parts }));
        }
    }
    translate::set(&mut envelope, "/request/contents", Value::Array(contents));

    // Top-level system prompt (string or text-block array)
    let system_texts = system_fragments(body.get("system"));
    if !system_texts.is_empty() {
        let parts: Vec<Value> = system_texts
            .into_iter()
            .map(|text| json!({ "text": text }))
            .collect();
        translate::set(
            &mut envelope,
            "/request/systemInstruction",
            json!({ "parts": parts }),
        );
    }

    // Tool declarations
    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        let declarations: Vec<Value> = tools.iter().filter_map(function_declaration).collect();
        if !declarations.is_empty() {
            translate::set(
                &mut envelope,
                "/request/tools",
                json!([{ "functionDeclarations": declarations }]),
            );
        }
    }

    // Sampling parameters
    for (field, pointer) in [
        ("temperature", "/request/generationConfig/temperature"),
        ("top_p", "/request/generationConfig/topP"),
        ("top_k", "/request/generationConfig/topK"),
        ("max_tokens", "/request/generationConfig/maxOutputTokens"),
    ] {
        if let Some(value) = body.get(field).filter(|v| v.is_number()) {
            translate::set(&mut envelope, pointer, value.clone());
        }
    }

    // Thinking budget: enabled carries an explicit budget, disabled maps to
    // zero (honored only on zero-capable models, like the OpenAI `none`)
    let requested = match body.pointer("/thinking/type").and_then(Value::as_str) {
        Some("enabled") => body
            .pointer("/thinking/budget_tokens")
            .and_then(Value::as_i64),
        Some("disabled") => Some(0),
        _ => None,
    };
    thinking::apply_thinking(&mut envelope, requested, registry.descriptor(&model));

    if registry.is_claude_family(&model) {
        if let Some(tools) = envelope.pointer_mut("/request/tools") {
            scrub_schemas_for_claude(tools);
        }
    }

    translate::inject_safety_settings(&mut envelope);

    Ok(envelope)
}

/// Flatten the top-level `system` field (string or text-block array).
fn system_fragments(system: Option<&Value>) -> Vec<String> {
    match system {
        Some(Value::String(text)) if !text.is_empty() => vec![text.clone()],
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// Map every `tool_use` block id to its function name.
fn collect_tool_use_names(messages: &[Value]) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for message in messages {
        let Some(blocks) = message.get("content").and_then(Value::as_array) else {
            continue;
        };
        for block in blocks {
            if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                continue;
            }
            let id = block.get("id").and_then(Value::as_str);
            let name = block.get("name").and_then(Value::as_str);
            if let (Some(id), Some(name)) = (id, name) {
                names.insert(id.to_string(), name.to_string());
            }
        }
    }
    names
}

/// Convert message content (string or block array) into upstream parts.
fn message_parts(content: Option<&Value>, tool_names: &HashMap<String, String>) -> Vec<Value> {
    let blocks = match content {
        Some(Value::String(text)) if !text.is_empty() => {
            return vec![json!({ "text": text })];
        }
        Some(Value::Array(blocks)) => blocks,
        _ => return Vec::new(),
    };

    let mut parts = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    parts.push(json!({ "text": text }));
                }
            }
            Some("image") => {
                if let Some(part) = image_part(block) {
                    parts.push(part);
                }
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                let args = block.get("input").cloned().unwrap_or_else(|| json!({}));
                parts.push(json!({
                    "functionCall": { "id": id, "name": name, "args": args },
                    "thoughtSignature": translate::THOUGHT_SIGNATURE_PLACEHOLDER
                }));
            }
            Some("tool_result") => {
                let id = block
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let name = tool_names.get(id).cloned().unwrap_or_default();
                let result = tool_result_text(block.get("content"));
                parts.push(json!({
                    "functionResponse": {
                        "id": id,
                        "name": name,
                        "response": { "result": result }
                    }
                }));
            }
            // Replayed thinking blocks carry no information the upstream
            // wants back; the signature placeholder on tool calls covers
            // validation.
            Some("thinking") | Some("redacted_thinking") => {}
            _ => {}
        }
    }
    parts
}

/// Flatten a `tool_result` content field (string or text blocks) into text.
fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Convert an Anthropic base64 image block into an `inlineData` part.
fn image_part(block: &Value) -> Option<Value> {
    let source = block.get("source")?;
    if source.get("type").and_then(Value::as_str) != Some("base64") {
        tracing::warn!("dropping non-base64 image source (upstream requires inline bytes)");
        return None;
    }
    let media_type = source
        .get("media_type")
        .and_then(Value::as_str)
        .unwrap_or("image/png");
    let data = source.get("data").and_then(Value::as_str)?;
    Some(json!({
        "inlineData": { "mime_type": media_type, "data": data }
    }))
}

/// Convert an Anthropic tool definition into an upstream function declaration.
fn function_declaration(tool: &Value) -> Option<Value> {
    let name = tool.get("name").and_then(Value::as_str)?;
    let mut declaration = json!({
        "name": name,
        "parametersJsonSchema": tool
            .get("input_schema")
            .cloned()
            .unwrap_or_else(|| json!({ "type": "object", "properties": {} }))
    });
    if let Some(description) = tool.get("description").and_then(Value::as_str) {
        declaration["description"] = json!(description);
    }
    Some(declaration)
}
