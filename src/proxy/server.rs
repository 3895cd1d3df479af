//! Server setup - router construction, CORS, bind and serve

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::auth::CredentialManager;
use crate::config::Config;
use crate::keystore::KeyStore;
use crate::registry::ModelRegistry;
use crate::upstream::Executor;

use super::rate_limit::RateLimiter;
use super::{admin, handlers, middleware, AppState};

/// Build the shared state from loaded components.
pub fn build_state(
    config: Config,
    credentials: CredentialManager,
    keystore: KeyStore,
) -> Result<AppState> {
    let registry = Arc::new(ModelRegistry::new());
    let executor = Executor::new(config.proxy_url.as_deref(), registry.clone())?;

    Ok(AppState {
        config: Arc::new(config),
        registry,
        credentials: Arc::new(credentials),
        keystore: Arc::new(keystore),
        limiter: Arc::new(RateLimiter::new()),
        executor: Arc::new(executor),
    })
}

/// Assemble the full router: health, client surfaces, admin surface, CORS.
pub fn build_router(state: AppState) -> Router {
    // Any origin is allowed, mirrored back so credentialed requests work.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    // Layer order on client routes (outermost first at runtime): api key →
    // rate limit → model access → handler.
    let client_routes = Router::new()
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/responses", post(handlers::responses))
        .route("/v1/messages", post(handlers::messages))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::enforce_model_access,
        ))
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(from_fn_with_state(state.clone(), middleware::require_api_key));

    let admin_routes = Router::new()
        .route("/admin/keys", get(admin::list_keys).post(admin::create_key))
        .route(
            "/admin/keys/:key",
            put(admin::update_key).delete(admin::revoke_key),
        )
        .route("/admin/models", get(admin::list_models))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::require_master_secret,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(client_routes)
        .merge(admin_routes)
        .layer(cors)
        .layer(axum::middleware::from_fn(preflight_no_content))
        .with_state(state)
}

/// Preflights answer 204: the CORS layer replies 200 with empty body, map it.
async fn preflight_no_content(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let preflight = req.method() == axum::http::Method::OPTIONS;
    let mut response = next.run(req).await;
    if preflight && response.status() == axum::http::StatusCode::OK {
        *response.status_mut() = axum::http::StatusCode::NO_CONTENT;
    }
    response
}

/// Bind and serve until ctrl-c. A bind failure propagates to a non-zero exit.
pub async fn serve(state: AppState) -> Result<()> {
    let bind_addr = state.config.bind_addr();
    let app = build_router(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("cannot bind to {bind_addr}"))?;

    tracing::info!("listening on {bind_addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await
    .context("server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use tower::ServiceExt;

    struct TestEnv {
        dir: PathBuf,
    }

    impl Drop for TestEnv {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    async fn test_state(configure: impl FnOnce(&mut Config)) -> (AppState, TestEnv) {
        let dir = std::env::temp_dir().join(format!("agproxy-srv-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut config = Config::default();
        config.data_dir = dir.join("data");
        config.credentials_dir = dir.join("creds");
        std::fs::create_dir_all(&config.credentials_dir).unwrap();
        configure(&mut config);

        let credentials = CredentialManager::init(
            &config.credentials_dir,
            &config.pool_path(),
            None,
        )
        .unwrap();
        let keystore = KeyStore::load(&config.keystore_path()).unwrap();
        let state = build_state(config, credentials, keystore).unwrap();
        (state, TestEnv { dir })
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, bearer: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let (state, _env) = test_state(|_| {}).await;
        let app = build_router(state);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_model_access_denied_before_upstream() {
        let (state, _env) = test_state(|_| {}).await;
        let key = state
            .keystore
            .generate(None, None, Some(vec!["gemini-2.5-flash".to_string()]))
            .await
            .unwrap()
            .key;
        let app = build_router(state);

        let response = app
            .oneshot(post(
                "/v1/chat/completions",
                Some(&key),
                json!({
                    "model": "gemini-3-flash",
                    "messages": [{ "role": "user", "content": "hi" }]
                }),
            ))
            .await
            .unwrap();

        // Denied at the gate: 403 and no upstream dispatch happened (there
        // are no credentials in this environment to dispatch with)
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["error"]["type"], "permission_error");
    }

    #[tokio::test]
    async fn test_allow_listed_model_passes_gate() {
        let (state, _env) = test_state(|_| {}).await;
        let key = state
            .keystore
            .generate(None, None, Some(vec!["gemini-2.5-flash".to_string()]))
            .await
            .unwrap()
            .key;
        let app = build_router(state);

        let response = app
            .oneshot(post(
                "/v1/chat/completions",
                Some(&key),
                json!({
                    "model": "gemini-2.5-flash",
                    "messages": [{ "role": "user", "content": "hi" }]
                }),
            ))
            .await
            .unwrap();

        // Past the gate; fails on credential acquisition instead of 403
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await["error"]["type"],
            "authentication_error"
        );
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_when_keys_exist() {
        let (state, _env) = test_state(|config| {
            config.api_keys = vec!["static-key".to_string()];
        })
        .await;
        let app = build_router(state);

        let response = app
            .oneshot(post(
                "/v1/chat/completions",
                Some("wrong-key"),
                json!({ "messages": [] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_open_access_without_any_keys() {
        let (state, _env) = test_state(|_| {}).await;
        let app = build_router(state);

        // No keys anywhere: validation is a no-op and the request proceeds
        // until it needs a credential
        let response = app
            .oneshot(post(
                "/v1/messages",
                None,
                json!({ "messages": [{ "role": "user", "content": "hi" }] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await["error"]["type"],
            "authentication_error"
        );
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_request() {
        let (state, _env) = test_state(|_| {}).await;
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::post("/v1/chat/completions")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"]["type"],
            "invalid_request_error"
        );
    }

    #[tokio::test]
    async fn test_admin_without_secret_is_configuration_error() {
        let (state, _env) = test_state(|_| {}).await;
        let app = build_router(state);

        let response = app
            .oneshot(Request::get("/admin/keys").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(response).await["error"]["type"],
            "configuration_error"
        );
    }

    #[tokio::test]
    async fn test_admin_key_lifecycle() {
        let (state, _env) = test_state(|config| {
            config.master_secret = Some("s3cret".to_string());
        })
        .await;
        let app = build_router(state.clone());

        // Wrong secret
        let response = app
            .clone()
            .oneshot(
                Request::get("/admin/keys")
                    .header("authorization", "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Create
        let response = app
            .clone()
            .oneshot(
                Request::post("/admin/keys")
                    .header("authorization", "Bearer s3cret")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({ "note": "ci", "rate_limit": 10 }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        let key = created["key"].as_str().unwrap().to_string();
        assert_eq!(created["note"], "ci");

        // Update
        let response = app
            .clone()
            .oneshot(
                Request::put(format!("/admin/keys/{key}"))
                    .header("authorization", "Bearer s3cret")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({ "allowed_models": ["gemini-3-flash"] }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["allowed_models"][0],
            "gemini-3-flash"
        );

        // Revoke, then revoke again → 404
        let revoke = |key: String| {
            Request::delete(format!("/admin/keys/{key}"))
                .header("authorization", "Bearer s3cret")
                .body(Body::empty())
                .unwrap()
        };
        let response = app.clone().oneshot(revoke(key.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.clone().oneshot(revoke(key)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_models_list_filtered_by_allow_list() {
        let (state, _env) = test_state(|_| {}).await;
        let key = state
            .keystore
            .generate(None, None, Some(vec!["gemini-3-flash".to_string()]))
            .await
            .unwrap()
            .key;
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::get("/v1/models")
                    .header("authorization", format!("Bearer {key}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["id"], "gemini-3-flash");
    }

    #[tokio::test]
    async fn test_global_rate_limit_returns_429() {
        let (state, _env) = test_state(|config| {
            config.rate_limit = 1;
        })
        .await;
        let app = build_router(state);

        let first = app
            .clone()
            .oneshot(post("/v1/messages", None, json!({ "messages": [] })))
            .await
            .unwrap();
        // First request passes the limiter (fails later on translation)
        assert_ne!(first.status(), StatusCode::TOO_MANY_REQUESTS);

        let second = app
            .clone()
            .oneshot(post("/v1/messages", None, json!({ "messages": [] })))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            body_json(second).await["error"]["type"],
            "rate_limit_error"
        );
    }
}
