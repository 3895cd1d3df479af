//! Admin surface - API key management and the admin model listing
//!
//! All routes here sit behind the master-secret guard. Key mutations persist
//! through the key store, which rolls back in memory when the disk write
//! fails; that failure surfaces as a 500.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use super::error::ApiError;
use super::AppState;

/// GET /admin/keys
pub async fn list_keys(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.keystore.list().await)
}

/// POST /admin/keys
pub async fn create_key(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = body.map(|Json(v)| v).unwrap_or_else(|| json!({}));

    let note = body.get("note").and_then(Value::as_str).map(String::from);
    let rate_limit = body
        .get("rate_limit")
        .and_then(Value::as_u64)
        .map(|limit| limit as u32);
    let allowed_models = string_list(body.get("allowed_models"));

    let record = state
        .keystore
        .generate(note, rate_limit, allowed_models)
        .await
        .map_err(|e| ApiError::Internal(format!("cannot persist key: {e:#}")))?;

    tracing::info!(key = %record.key, "issued API key");
    Ok(Json(record))
}

/// PUT /admin/keys/:key
///
/// A field present in the body is updated (null clears it); an absent field
/// keeps its value.
pub async fn update_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let note = body
        .get("note")
        .map(|value| value.as_str().map(String::from));
    let rate_limit = body
        .get("rate_limit")
        .map(|value| value.as_u64().map(|limit| limit as u32));
    let allowed_models = body.get("allowed_models").map(|value| string_list(Some(value)));

    let updated = state
        .keystore
        .update(&key, note, rate_limit, allowed_models)
        .await
        .map_err(|e| ApiError::Internal(format!("cannot persist key: {e:#}")))?;

    match updated {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound(format!("unknown API key '{key}'"))),
    }
}

/// DELETE /admin/keys/:key
pub async fn revoke_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state
        .keystore
        .revoke(&key)
        .await
        .map_err(|e| ApiError::Internal(format!("cannot persist key store: {e:#}")))?;

    if !removed {
        return Err(ApiError::NotFound(format!("unknown API key '{key}'")));
    }
    tracing::info!(%key, "revoked API key");
    Ok(Json(json!({ "revoked": key })))
}

/// GET /admin/models - the catalog with display names and capability bounds.
pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let models: Vec<Value> = state
        .registry
        .list()
        .into_iter()
        .map(|descriptor| {
            json!({
                "id": descriptor.id,
                "display_name": descriptor.display_name,
                "owned_by": descriptor.owned_by,
                "max_output_tokens": descriptor.max_output_tokens,
                "thinking": descriptor.thinking
            })
        })
        .collect();
    Json(json!({ "models": models }))
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value.and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_list_extraction() {
        let value = json!(["a", "b", 3]);
        assert_eq!(
            string_list(Some(&value)),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(string_list(Some(&json!(null))), None);
        assert_eq!(string_list(None), None);
    }
}
