//! Client endpoint handlers
//!
//! `/v1/chat/completions` and `/v1/responses` speak the OpenAI dialect,
//! `/v1/messages` the Anthropic dialect; all three share one execution path:
//! translate the body, acquire a credential, dispatch upstream, then run the
//! chunk stream through the dialect's state machine (streaming) or aggregator
//! (buffered).
//!
//! The Responses surface is the OpenAI translator with the request shape
//! normalized first - `input`/`instructions` become `messages`,
//! `max_output_tokens` becomes `max_tokens`, `reasoning.effort` becomes
//! `reasoning_effort`.

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Value};
use std::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

use crate::registry::DEFAULT_MODEL;
use crate::translate::{anthropic, openai};
use crate::upstream::stream::{spawn_reader, CHANNEL_CAPACITY};

use super::error::ApiError;
use super::middleware::ClientKey;
use super::AppState;

/// Fixed creation stamp for the model catalog (the registry is static).
const MODEL_CREATED_AT: i64 = 1_764_547_200;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Dialect {
    OpenAi,
    Anthropic,
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// OpenAI-compatible model list, filtered by the calling key's allow-list.
pub async fn list_models(
    State(state): State<AppState>,
    key: Option<Extension<ClientKey>>,
) -> Result<Json<Value>, ApiError> {
    let allow_list = match key {
        Some(Extension(ClientKey(key))) => state
            .keystore
            .get(&key)
            .await
            .and_then(|record| record.model_allow_list()),
        None => None,
    };

    let data: Vec<Value> = state
        .registry
        .list()
        .into_iter()
        .filter(|descriptor| {
            allow_list
                .as_ref()
                .map(|allowed| allowed.iter().any(|id| id == &descriptor.id))
                .unwrap_or(true)
        })
        .map(|descriptor| {
            json!({
                "id": descriptor.id,
                "object": "model",
                "created": MODEL_CREATED_AT,
                "owned_by": descriptor.owned_by
            })
        })
        .collect();

    Ok(Json(json!({ "object": "list", "data": data })))
}

pub async fn chat_completions(
    State(state): State<AppState>,
    req: Request,
) -> Result<Response, ApiError> {
    let meta = RequestMeta::capture(&req);
    let body = read_json_body(req).await?;
    run(state, body, Dialect::OpenAi, meta).await
}

pub async fn responses(
    State(state): State<AppState>,
    req: Request,
) -> Result<Response, ApiError> {
    let meta = RequestMeta::capture(&req);
    let body = read_json_body(req).await?;
    run(state, normalize_responses_request(&body), Dialect::OpenAi, meta).await
}

pub async fn messages(
    State(state): State<AppState>,
    req: Request,
) -> Result<Response, ApiError> {
    let meta = RequestMeta::capture(&req);
    let body = read_json_body(req).await?;
    run(state, body, Dialect::Anthropic, meta).await
}

/// Method and path, captured before the body extractor consumes the request,
/// so the per-request log line can name what was actually called.
struct RequestMeta {
    method: axum::http::Method,
    path: String,
}

impl RequestMeta {
    fn capture(req: &Request) -> Self {
        Self {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
        }
    }
}

async fn read_json_body(req: Request) -> Result<Value, ApiError> {
    let bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("cannot read request body: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::InvalidRequest(format!("malformed JSON body: {e}")))
}

/// The shared execution path behind all three POST endpoints.
async fn run(
    state: AppState,
    body: Value,
    dialect: Dialect,
    meta: RequestMeta,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_MODEL)
        .to_string();
    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let mut envelope = match dialect {
        Dialect::OpenAi => openai::request::to_upstream(&body, &state.registry),
        Dialect::Anthropic => anthropic::request::to_upstream(&body, &state.registry),
    }
    .map_err(|e| ApiError::InvalidRequest(format!("{e:#}")))?;

    let credential = state
        .credentials
        .acquire()
        .await
        .map_err(|e| ApiError::Authentication(format!("{e:#}")))?;

    state.executor.finish_envelope(&mut envelope, &credential);

    let response = state
        .executor
        .execute(&envelope, &credential, stream)
        .await
        .map_err(|e| ApiError::Api(format!("{e:#}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            method = %meta.method,
            path = %meta.path,
            status = status.as_u16(),
            %model,
            account = %credential.email,
            "upstream rejected request"
        );
        if body.is_empty() {
            return Err(ApiError::Api(format!("upstream returned {status}")));
        }
        return Err(ApiError::UpstreamPassthrough {
            status: status.as_u16(),
            body,
        });
    }

    tracing::info!(
        method = %meta.method,
        path = %meta.path,
        %model,
        account = %credential.email,
        status = status.as_u16(),
        stream,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "proxied request"
    );

    if stream {
        stream_response(state, response, dialect, model)
    } else {
        buffered_response(state, response, dialect, &model).await
    }
}

/// Pump upstream chunks through the dialect's state machine into an SSE body.
fn stream_response(
    state: AppState,
    response: reqwest::Response,
    dialect: Dialect,
    model: String,
) -> Result<Response, ApiError> {
    let mut reader = spawn_reader(response);
    let (out_tx, out_rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(
        CHANNEL_CAPACITY,
    );

    let thinking_as_content = state.config.thinking_as_content;
    tokio::spawn(async move {
        let mut openai_state =
            openai::response::StreamState::new(model.as_str(), thinking_as_content);
        let mut anthropic_state = anthropic::response::StreamState::new(model.as_str());

        while let Some(item) = reader.recv().await {
            let frames = match item {
                Ok(chunk) => match dialect {
                    Dialect::OpenAi => {
                        openai::response::chunk_to_frames(&chunk, &mut openai_state)
                    }
                    Dialect::Anthropic => {
                        anthropic::response::chunk_to_frames(&chunk, &mut anthropic_state)
                    }
                },
                Err(e) => {
                    // Headers are long gone; log, surface an error frame, and
                    // close out the stream with its terminal marker.
                    tracing::error!("upstream stream failed mid-flight: {e:#}");
                    vec![error_frame(dialect, &format!("{e:#}"))]
                }
            };
            for frame in frames {
                if out_tx.send(Ok(Bytes::from(frame))).await.is_err() {
                    return; // client disconnected
                }
            }
        }

        let frames = match dialect {
            Dialect::OpenAi => openai::response::finish_frames(&mut openai_state),
            Dialect::Anthropic => anthropic::response::finish_frames(&mut anthropic_state),
        };
        for frame in frames {
            if out_tx.send(Ok(Bytes::from(frame))).await.is_err() {
                return;
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ReceiverStream::new(out_rx)))
        .map_err(|e| ApiError::Internal(format!("cannot build streaming response: {e}")))
}

fn error_frame(dialect: Dialect, message: &str) -> String {
    match dialect {
        Dialect::OpenAi => format!(
            "data: {}\n\n",
            json!({ "error": { "message": message, "type": "api_error" } })
        ),
        Dialect::Anthropic => format!(
            "event: error\ndata: {}\n\n",
            json!({ "type": "error", "error": { "type": "api_error", "message": message } })
        ),
    }
}

/// Aggregate a non-streaming upstream response into one client document.
async fn buffered_response(
    state: AppState,
    response: reqwest::Response,
    dialect: Dialect,
    model: &str,
) -> Result<Response, ApiError> {
    let payload: Value = response
        .json()
        .await
        .map_err(|e| ApiError::Api(format!("invalid upstream response body: {e}")))?;

    // generateContent answers with a single document; tolerate an array of
    // chunks as some deployments batch them.
    let chunks: Vec<Value> = match payload {
        Value::Array(items) => items,
        single => vec![single],
    };

    let document = match dialect {
        Dialect::OpenAi => {
            openai::response::aggregate(&chunks, model, state.config.thinking_as_content)
        }
        Dialect::Anthropic => anthropic::response::aggregate(&chunks, model),
    };

    Ok(Json(document).into_response())
}

/// Rewrite a Responses API request into the Chat Completions shape so the
/// OpenAI translator can take it from there.
fn normalize_responses_request(body: &Value) -> Value {
    let mut messages: Vec<Value> = Vec::new();

    if let Some(instructions) = body.get("instructions").and_then(Value::as_str) {
        messages.push(json!({ "role": "system", "content": instructions }));
    }

    match body.get("input") {
        Some(Value::String(text)) => {
            messages.push(json!({ "role": "user", "content": text }));
        }
        Some(Value::Array(items)) => {
            for item in items {
                let role = item.get("role").and_then(Value::as_str).unwrap_or("user");
                let content = match item.get("content") {
                    Some(Value::String(text)) => json!(text),
                    Some(Value::Array(parts)) => {
                        let text: Vec<&str> = parts
                            .iter()
                            .filter(|part| {
                                matches!(
                                    part.get("type").and_then(Value::as_str),
                                    Some("input_text") | Some("output_text") | Some("text")
                                )
                            })
                            .filter_map(|part| part.get("text").and_then(Value::as_str))
                            .collect();
                        json!(text.join("\n"))
                    }
                    _ => json!(""),
                };
                messages.push(json!({ "role": role, "content": content }));
            }
        }
        _ => {}
    }

    let mut chat = json!({ "messages": messages });
    if let Some(model) = body.get("model") {
        chat["model"] = model.clone();
    }
    for field in ["temperature", "top_p", "stream"] {
        if let Some(value) = body.get(field) {
            chat[field] = value.clone();
        }
    }
    if let Some(max_output) = body.get("max_output_tokens") {
        chat["max_tokens"] = max_output.clone();
    }
    if let Some(effort) = body.pointer("/reasoning/effort") {
        chat["reasoning_effort"] = effort.clone();
    }
    // Responses flattens the function shape; fold it back for the translator
    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        let converted: Vec<Value> = tools
            .iter()
            .filter(|tool| tool.get("type").and_then(Value::as_str) == Some("function"))
            .filter_map(|tool| {
                let name = tool.get("name").and_then(Value::as_str)?;
                let mut function = json!({ "name": name });
                if let Some(description) = tool.get("description") {
                    function["description"] = description.clone();
                }
                if let Some(parameters) = tool.get("parameters") {
                    function["parameters"] = parameters.clone();
                }
                Some(json!({ "type": "function", "function": function }))
            })
            .collect();
        if !converted.is_empty() {
            chat["tools"] = json!(converted);
        }
    }

    chat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_responses_string_input() {
        let body = json!({
            "model": "gemini-3-flash",
            "input": "hello",
            "instructions": "be brief",
            "max_output_tokens": 512,
            "reasoning": { "effort": "low" },
            "stream": true
        });

        let chat = normalize_responses_request(&body);
        assert_eq!(chat["model"], "gemini-3-flash");
        assert_eq!(chat["messages"][0]["role"], "system");
        assert_eq!(chat["messages"][0]["content"], "be brief");
        assert_eq!(chat["messages"][1]["role"], "user");
        assert_eq!(chat["messages"][1]["content"], "hello");
        assert_eq!(chat["max_tokens"], 512);
        assert_eq!(chat["reasoning_effort"], "low");
        assert_eq!(chat["stream"], true);
    }

    #[test]
    fn test_normalize_responses_item_input() {
        let body = json!({
            "input": [
                { "role": "user", "content": [{ "type": "input_text", "text": "first" }] },
                { "role": "assistant", "content": [{ "type": "output_text", "text": "second" }] }
            ]
        });

        let chat = normalize_responses_request(&body);
        let messages = chat["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], "first");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"], "second");
    }

    #[test]
    fn test_normalize_responses_flat_tools() {
        let body = json!({
            "input": "hi",
            "tools": [{
                "type": "function",
                "name": "search",
                "description": "Search",
                "parameters": { "type": "object" }
            }]
        });

        let chat = normalize_responses_request(&body);
        assert_eq!(chat["tools"][0]["function"]["name"], "search");
        assert_eq!(chat["tools"][0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_error_frames_per_dialect() {
        let openai_frame = error_frame(Dialect::OpenAi, "boom");
        assert!(openai_frame.starts_with("data: "));
        assert!(openai_frame.contains("api_error"));

        let anthropic_frame = error_frame(Dialect::Anthropic, "boom");
        assert!(anthropic_frame.starts_with("event: error\n"));
        assert!(anthropic_frame.contains("boom"));
    }
}
