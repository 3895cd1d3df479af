//! OpenAI → upstream request translation
//!
//! Converts Chat Completions requests into the upstream envelope.
//!
//! # Key differences
//!
//! | OpenAI                               | Upstream                                   |
//! |--------------------------------------|--------------------------------------------|
//! | `messages[].role: "system"`          | `request.systemInstruction`                |
//! | `messages[].role: "assistant"`       | `contents[].role: "model"`                 |
//! | `tool_calls[]`                       | `parts[].functionCall`                     |
//! | `role: "tool"` + `tool_call_id`      | user-role content of `functionResponse`    |
//! | `tools[].function.parameters`        | `tools[0].functionDeclarations[]`          |
//! | `temperature`/`top_p`/`max_tokens`   | `request.generationConfig.*`               |
//! | `reasoning_effort`                   | `generationConfig.thinkingConfig`          |
//!
//! OpenAI flattens tool results into standalone `tool` messages that point
//! back at an assistant `tool_calls[].id`, so translation runs two passes:
//! the first builds an id→name map from every assistant tool call, the second
//! binds each tool result to its parent call by name. Consecutive tool
//! results pack into a single user turn with parallel `functionResponse`
//! parts, which is how the upstream expects parallel calls to be answered.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::registry::{ModelRegistry, DEFAULT_MODEL};
use crate::translate::{self, thinking};

/// Translate an OpenAI Chat Completions body into an upstream envelope.
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

    // Pass 1: id → name for every tool call the assistant has issued
    let call_names = collect_tool_call_names(messages);

    // Pass 2: build contents, packing consecutive tool results into one turn
    let mut contents: Vec<Value> = Vec::new();
    let mut system_parts: Vec<Value> = Vec::new();
    let mut pending_results: Vec<Value> = Vec::new();

    for message in messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("user");

        if role != "tool" && !pending_results.is_empty() {
            contents.push(json!({ "role": "user", "parts": pending_results }));
            pending_results = Vec::new();
        }

        match role {
            "system" | "developer" => {
                for text in text_fragments(message.get("content")) {
                    system_parts.push(json!({ "text": text }));
                }
            }
            "assistant" => {
                let mut parts: Vec<Value> = Vec::new();
                parts.extend(content_parts(message.get("content")));
                if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
                    for call in tool_calls {
                        if let Some(part) = function_call_part(call) {
                            parts.push(part);
                        }
                    }
                }
                if !parts.is_empty() {
                    contents.push(json!({ "role": "model", "parts": parts }));
                }
            }
            "tool" => {
                let id = message
                    .get("tool_call_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let name = call_names.get(id).cloned().unwrap_or_default();
                let result = text_fragments(message.get("content")).join("\n");
                pending_results.push(json!({
                    "functionResponse": {
                        "id": id,
                        "name": name,
                        "response": { "result": result }
                    }
                }));
            }
            _ => {
                let parts = content_parts(message.get("content"));
                if !parts.is_empty() {
                    contents.push(json!({ "role": "user", "parts": parts }));
                }
            }
        }
    }

    if !pending_results.is_empty() {
        contents.push(json!({ "role": "user", "parts": pending_results }));
    }

    translate::set(&mut envelope, "/request/contents", Value::Array(contents));

    if !system_parts.is_empty() {
        translate::set(
            &mut envelope,
            "/request/systemInstruction",
            json!({ "parts": system_parts }),
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
    copy_number(body, "temperature", &mut envelope, "/request/generationConfig/temperature");
    copy_number(body, "top_p", &mut envelope, "/request/generationConfig/topP");
    copy_number(body, "top_k", &mut envelope, "/request/generationConfig/topK");
    let max_tokens = body
        .get("max_tokens")
        .or_else(|| body.get("max_completion_tokens"))
        .and_then(Value::as_i64);
    if let Some(max_tokens) = max_tokens {
        translate::set(
            &mut envelope,
            "/request/generationConfig/maxOutputTokens",
            json!(max_tokens),
        );
    }

    // Thinking budget from reasoning_effort, then model defaults and clamping
    let requested = body
        .get("reasoning_effort")
        .and_then(Value::as_str)
        .and_then(thinking::effort_to_budget);
    thinking::apply_thinking(&mut envelope, requested, registry.descriptor(&model));

    if registry.is_claude_family(&model) {
        if let Some(tools) = envelope.pointer_mut("/request/tools") {
            scrub_schemas_for_claude(tools);
        }
    }

    translate::inject_safety_settings(&mut envelope);

    Ok(envelope)
}

/// First pass: map assistant `tool_calls[].id` to the function name so tool
/// results can be bound to the right parent call.
fn collect_tool_call_names(messages: &[Value]) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for message in messages {
        if message.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
            continue;
        };
        for call in calls {
            let id = call.get("id").and_then(Value::as_str);
            let name = call.pointer("/function/name").and_then(Value::as_str);
            if let (Some(id), Some(name)) = (id, name) {
                names.insert(id.to_string(), name.to_string());
            }
        }
    }
    names
}

/// Convert message content (string or part array) into upstream parts.
fn content_parts(content: Option<&Value>) -> Vec<Value> {
    match content {
        Some(Value::String(text)) if !text.is_empty() => {
            vec![json!({ "text": text })]
        }
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| match part.get("type").and_then(Value::as_str) {
                Some("text") => part
                    .get("text")
                    .and_then(Value::as_str)
                    .map(|text| json!({ "text": text })),
                Some("image_url") => part
                    .pointer("/image_url/url")
                    .and_then(Value::as_str)
                    .and_then(inline_data_part),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Flatten message content into its text fragments only.
fn text_fragments(content: Option<&Value>) -> Vec<String> {
    match content {
        Some(Value::String(text)) => vec![text.clone()],
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// Convert a data URL into an `inlineData` part. Remote URLs cannot be
/// forwarded (the upstream wants inline bytes) and are dropped with a warning.
fn inline_data_part(url: &str) -> Option<Value> {
    match translate::parse_data_url(url) {
        Some((mime, data)) => Some(json!({
            "inlineData": { "mime_type": mime, "data": data }
        })),
        None => {
            tracing::warn!("dropping non-data image URL (upstream requires inline bytes)");
            None
        }
    }
}

/// Convert an assistant tool call into a `functionCall` part.
///
/// Arguments arrive as a JSON-encoded string; unparseable arguments degrade
/// to an empty object rather than failing the whole request.
fn function_call_part(call: &Value) -> Option<Value> {
    let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
    let name = call.pointer("/function/name").and_then(Value::as_str)?;
    let args: Value = call
        .pointer("/function/arguments")
        .and_then(Value::as_str)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_else(|| json!({}));

    Some(json!({
        "functionCall": { "id": id, "name": name, "args": args },
        "thoughtSignature": translate::THOUGHT_SIGNATURE_PLACEHOLDER
    }))
}

/// Convert an OpenAI tool definition into an upstream function declaration.
fn function_declaration(tool: &Value) -> Option<Value> {
    if tool.get("type").and_then(Value::as_str) != Some("function") {
        return None;
    }
    let function = tool.get("function")?;
    let name = function.get("name").and_then(Value::as_str)?;

    let mut declaration = json!({
        "name": name,
        "parametersJsonSchema": function
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| json!({ "type": "object", "properties": {} }))
    });
    if let Some(description) = function.get("description").and_then(Value::as_str) {
        declaration["description"] = json!(description);
    }
    Some(declaration)
}

fn copy_number(body: &Value, field: &str, envelope: &mut Value, pointer: &str) {
    if let Some(value) = body.get(field).filter(|v| v.is_number()) {
        translate::set(envelope, pointer, value.clone());
    }
}

// ============================================================================
// Claude-family schema scrubbing
// ============================================================================

/// Keywords the Claude-family schema dialect rejects.
const STRIPPED_KEYWORDS: [&str; 9] = [
    "$schema",
    "$ref",
    "$defs",
    "minItems",
    "maxItems",
    "minLength",
    "maxLength",
    "exclusiveMinimum",
    "exclusiveMaximum",
];

/// Rewrite tool declarations for Claude-family targets: rename
/// `parametersJsonSchema` to `parameters`, strip unsupported schema keywords,
/// and collapse every `anyOf` to its first alternative.
pub(crate) fn scrub_schemas_for_claude(node: &mut Value) {
    match node {
        Value::Object(map) => {
            if let Some(schema) = map.remove("parametersJsonSchema") {
                map.insert("parameters".to_string(), schema);
            }
            for keyword in STRIPPED_KEYWORDS {
                map.remove(keyword);
            }
            if let Some(any_of) = map.remove("anyOf") {
                if let Value::Array(mut arms) = any_of {
                    if !arms.is_empty() {
                        let first = arms.swap_remove(0);
                        if let Value::Object(first) = first {
                            for (key, value) in first {
                                map.entry(key).or_insert(value);
                            }
                        }
                    }
                }
            }
            for value in map.values_mut() {
                scrub_schemas_for_claude(value);
            }
        }
        Value::Array(items) => {
            for item in items {
                scrub_schemas_for_claude(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModelRegistry {
        ModelRegistry::new()
    }

    #[test]
    fn test_simple_text_request() {
        let body = json!({
            "model": "gemini-3-flash",
            "messages": [{ "role": "user", "content": "hi" }]
        });

        let envelope = to_upstream(&body, &registry()).unwrap();

        assert_eq!(envelope["model"], "gemini-3-flash");
        assert_eq!(
            envelope.pointer("/request/contents").unwrap(),
            &json!([{ "role": "user", "parts": [{ "text": "hi" }] }])
        );
        // Flash default budget injected and within bounds
        assert_eq!(
            envelope
                .pointer("/request/generationConfig/thinkingConfig/thinkingBudget")
                .unwrap(),
            &json!(512)
        );
        // Four BLOCK_NONE safety categories always present
        let settings = envelope
            .pointer("/request/safetySettings")
            .and_then(Value::as_array)
            .unwrap();
        assert_eq!(settings.len(), 4);
    }

    #[test]
    fn test_system_message_becomes_instruction() {
        let body = json!({
            "model": "gemini-3-pro-preview",
            "messages": [
                { "role": "system", "content": "You are helpful" },
                { "role": "user", "content": "Hello" }
            ]
        });

        let envelope = to_upstream(&body, &registry()).unwrap();

        assert_eq!(
            envelope.pointer("/request/systemInstruction/parts/0/text").unwrap(),
            "You are helpful"
        );
        let contents = envelope
            .pointer("/request/contents")
            .and_then(Value::as_array)
            .unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["role"], "user");
    }

    #[test]
    fn test_sampling_parameters_mapped() {
        let body = json!({
            "model": "gemini-3-pro-preview",
            "messages": [{ "role": "user", "content": "Hi" }],
            "temperature": 0.7,
            "top_p": 0.9,
            "max_tokens": 2048
        });

        let envelope = to_upstream(&body, &registry()).unwrap();
        let config = envelope.pointer("/request/generationConfig").unwrap();
        assert_eq!(config["temperature"], 0.7);
        assert_eq!(config["topP"], 0.9);
        assert_eq!(config["maxOutputTokens"], 2048);
    }

    #[test]
    fn test_tool_result_bound_by_two_pass() {
        let body = json!({
            "model": "gemini-3-pro-preview",
            "messages": [
                { "role": "user", "content": "What's the weather?" },
                {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_123",
                        "type": "function",
                        "function": { "name": "get_weather", "arguments": "{\"city\":\"London\"}" }
                    }]
                },
                { "role": "tool", "tool_call_id": "call_123", "content": "Sunny, 22C" }
            ]
        });

        let envelope = to_upstream(&body, &registry()).unwrap();
        let contents = envelope
            .pointer("/request/contents")
            .and_then(Value::as_array)
            .unwrap();

        let call = &contents[1];
        assert_eq!(call["role"], "model");
        assert_eq!(call["parts"][0]["functionCall"]["id"], "call_123");
        assert_eq!(call["parts"][0]["functionCall"]["name"], "get_weather");
        assert_eq!(call["parts"][0]["functionCall"]["args"]["city"], "London");
        assert_eq!(
            call["parts"][0]["thoughtSignature"],
            crate::translate::THOUGHT_SIGNATURE_PLACEHOLDER
        );

        // Result binds to the parent call by name, in a user-role turn
        let result = &contents[2];
        assert_eq!(result["role"], "user");
        let response = &result["parts"][0]["functionResponse"];
        assert_eq!(response["id"], "call_123");
        assert_eq!(response["name"], "get_weather");
        assert_eq!(response["response"]["result"], "Sunny, 22C");
    }

    #[test]
    fn test_parallel_tool_results_pack_into_one_turn() {
        let body = json!({
            "model": "gemini-3-pro-preview",
            "messages": [
                { "role": "user", "content": "check both" },
                {
                    "role": "assistant",
                    "tool_calls": [
                        { "id": "c1", "type": "function", "function": { "name": "a", "arguments": "{}" } },
                        { "id": "c2", "type": "function", "function": { "name": "b", "arguments": "{}" } }
                    ]
                },
                { "role": "tool", "tool_call_id": "c1", "content": "one" },
                { "role": "tool", "tool_call_id": "c2", "content": "two" }
            ]
        });

        let envelope = to_upstream(&body, &registry()).unwrap();
        let contents = envelope
            .pointer("/request/contents")
            .and_then(Value::as_array)
            .unwrap();

        // user, model(tool calls), single user turn with both responses
        assert_eq!(contents.len(), 3);
        let parts = contents[2]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["functionResponse"]["name"], "a");
        assert_eq!(parts[1]["functionResponse"]["name"], "b");
    }

    #[test]
    fn test_image_data_url_becomes_inline_data() {
        let body = json!({
            "model": "gemini-3-pro-preview",
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": "what is this?" },
                    { "type": "image_url", "image_url": { "url": "data:image/png;base64,aGVsbG8=" } }
                ]
            }]
        });

        let envelope = to_upstream(&body, &registry()).unwrap();
        let parts = envelope
            .pointer("/request/contents/0/parts")
            .and_then(Value::as_array)
            .unwrap();
        assert_eq!(parts[0]["text"], "what is this?");
        assert_eq!(parts[1]["inlineData"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "aGVsbG8=");
    }

    #[test]
    fn test_tools_become_function_declarations() {
        let body = json!({
            "model": "gemini-3-pro-preview",
            "messages": [{ "role": "user", "content": "hi" }],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "search",
                    "description": "Search the web",
                    "parameters": { "type": "object", "properties": { "q": { "type": "string" } } }
                }
            }]
        });

        let envelope = to_upstream(&body, &registry()).unwrap();
        let declaration = envelope
            .pointer("/request/tools/0/functionDeclarations/0")
            .unwrap();
        assert_eq!(declaration["name"], "search");
        assert_eq!(declaration["description"], "Search the web");
        assert_eq!(
            declaration["parametersJsonSchema"]["properties"]["q"]["type"],
            "string"
        );
    }

    #[test]
    fn test_claude_target_scrubs_schemas() {
        let body = json!({
            "model": "claude-sonnet-4-5",
            "messages": [{ "role": "user", "content": "hi" }],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "lookup",
                    "parameters": {
                        "$schema": "http://json-schema.org/draft-07/schema#",
                        "type": "object",
                        "properties": {
                            "tags": { "type": "array", "minItems": 1, "maxItems": 5 },
                            "mode": { "anyOf": [{ "type": "string" }, { "type": "integer" }] }
                        }
                    }
                }
            }]
        });

        let envelope = to_upstream(&body, &registry()).unwrap();
        let declaration = envelope
            .pointer("/request/tools/0/functionDeclarations/0")
            .unwrap();

        // Renamed key, stripped keywords, collapsed anyOf
        assert!(declaration.get("parametersJsonSchema").is_none());
        let schema = &declaration["parameters"];
        assert!(schema.get("$schema").is_none());
        assert!(schema["properties"]["tags"].get("minItems").is_none());
        assert_eq!(schema["properties"]["mode"]["type"], "string");
    }

    #[test]
    fn test_reasoning_effort_medium() {
        let body = json!({
            "model": "gemini-3-pro-preview",
            "messages": [{ "role": "user", "content": "hi" }],
            "reasoning_effort": "medium"
        });

        let envelope = to_upstream(&body, &registry()).unwrap();
        assert_eq!(
            envelope
                .pointer("/request/generationConfig/thinkingConfig/thinkingBudget")
                .unwrap(),
            &json!(8192)
        );
    }

    #[test]
    fn test_missing_model_uses_default() {
        let body = json!({ "messages": [{ "role": "user", "content": "hi" }] });
        let envelope = to_upstream(&body, &registry()).unwrap();
        assert_eq!(envelope["model"], DEFAULT_MODEL);
    }

    #[test]
    fn test_missing_messages_is_an_error() {
        let body = json!({ "model": "gemini-3-flash" });
        assert!(to_upstream(&body, &registry()).is_err());
    }
}
