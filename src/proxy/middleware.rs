//! Ingress middleware - admission control for the client surfaces
//!
//! Three layers run in order in front of every `/v1` endpoint:
//!
//! 1. **API-key validation** - bearer token or `x-api-key`, checked against
//!    the statically configured keys and the key store. With no keys
//!    configured anywhere the layer is a no-op (open proxy on a trusted
//!    network).
//! 2. **Rate limiting** - per-key token bucket, falling back to the client IP
//!    for keyless requests.
//! 3. **Model access** - POST bodies only; a key with a non-empty allow-list
//!    may only name models on it. The body is buffered for inspection and
//!    restored for the handler.
//!
//! The admin surface has its own guard comparing the bearer token to the
//! configured master secret.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use std::net::SocketAddr;

use super::error::ApiError;
use super::AppState;

/// The validated API key, stashed in request extensions for the layers and
/// handlers behind the validation layer.
#[derive(Debug, Clone)]
pub struct ClientKey(pub String);

/// Extract the client key from `Authorization: Bearer …` or `x-api-key`.
pub fn extract_client_key(headers: &HeaderMap) -> Option<String> {
    if let Some(bearer) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
    {
        return Some(bearer.to_string());
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Layer 1: API-key validation.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = extract_client_key(req.headers());

    let no_keys_configured =
        state.config.api_keys.is_empty() && state.keystore.is_empty().await;
    if no_keys_configured {
        if let Some(key) = key {
            req.extensions_mut().insert(ClientKey(key));
        }
        return Ok(next.run(req).await);
    }

    let Some(key) = key else {
        return Err(ApiError::Authentication("missing API key".to_string()));
    };

    let valid = state.config.api_keys.iter().any(|k| k == &key)
        || state.keystore.validate(&key).await;
    if !valid {
        return Err(ApiError::Authentication("invalid API key".to_string()));
    }

    req.extensions_mut().insert(ClientKey(key));
    Ok(next.run(req).await)
}

/// Layer 2: keyed rate limiting.
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (bucket_key, limit) = match req.extensions().get::<ClientKey>() {
        Some(ClientKey(key)) => {
            let per_key = state
                .keystore
                .get(key)
                .await
                .and_then(|record| record.effective_rate_limit());
            (key.clone(), per_key.unwrap_or(state.config.rate_limit))
        }
        None => {
            let ip = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            (ip, state.config.rate_limit)
        }
    };

    if !state.limiter.check(&bucket_key, limit) {
        return Err(ApiError::RateLimit(format!(
            "rate limit of {limit} requests per minute exceeded"
        )));
    }

    Ok(next.run(req).await)
}

/// Layer 3: model-access enforcement.
///
/// Buffers the POST body to read its `model` field, then restores it so the
/// handler sees the request untouched. No upstream call happens for a denied
/// model - this layer sits in front of the translator.
pub async fn enforce_model_access(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if req.method() != axum::http::Method::POST {
        return Ok(next.run(req).await);
    }

    let allow_list = match req.extensions().get::<ClientKey>() {
        Some(ClientKey(key)) => state
            .keystore
            .get(key)
            .await
            .and_then(|record| record.model_allow_list()),
        None => None,
    };
    let Some(allow_list) = allow_list else {
        return Ok(next.run(req).await);
    };

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("cannot read request body: {e}")))?;

    // Malformed JSON and absent model fields pass; the handler owns those
    // errors and the default model respectively.
    if let Ok(body_json) = serde_json::from_slice::<Value>(&bytes) {
        if let Some(model) = body_json.get("model").and_then(Value::as_str) {
            if !allow_list.iter().any(|allowed| allowed == model) {
                return Err(ApiError::Permission(format!(
                    "model '{model}' is not allowed for this API key"
                )));
            }
        }
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(req).await)
}

/// Admin guard: bearer token must equal the configured master secret.
pub async fn require_master_secret(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(secret) = state
        .config
        .master_secret
        .as_deref()
        .filter(|s| !s.is_empty())
    else {
        return Err(ApiError::Configuration(
            "master_secret is not configured".to_string(),
        ));
    };

    let presented = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    if presented != Some(secret) {
        return Err(ApiError::Authentication(
            "invalid master secret".to_string(),
        ));
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    #[test]
    fn test_bearer_wins_over_x_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer tok-1".parse().unwrap());
        headers.insert("x-api-key", "tok-2".parse().unwrap());
        assert_eq!(extract_client_key(&headers).as_deref(), Some("tok-1"));
    }

    #[test]
    fn test_x_api_key_alone() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "tok-2".parse().unwrap());
        assert_eq!(extract_client_key(&headers).as_deref(), Some("tok-2"));
    }

    #[test]
    fn test_no_key_headers() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_key(&headers), None);

        // A non-bearer Authorization header does not count
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic dXNlcg==".parse().unwrap());
        assert_eq!(extract_client_key(&headers), None);
    }
}
