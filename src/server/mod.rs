// HTTP server: application state, router, auth/CORS middleware, health
// endpoints, and the startup/background model cache loader.

pub mod claude;
pub mod openai;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tracing::{info, warn};

use crate::auth::TokenManager;
use crate::client::HttpClient;
use crate::config::{Config, APP_VERSION};
use crate::error::{error_response, ErrorType};
use crate::model::{ModelCache, ModelInfo, ModelResolver};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub token_manager: Arc<TokenManager>,
    pub http: Arc<HttpClient>,
    pub model_cache: Arc<ModelCache>,
    pub resolver: Arc<ModelResolver>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, String> {
        let config = Arc::new(config);
        let token_manager = Arc::new(TokenManager::new(&config));
        let http = Arc::new(
            HttpClient::new(&config, token_manager.clone())
                .map_err(|e| format!("failed to build HTTP client: {}", e))?,
        );
        let model_cache = Arc::new(ModelCache::new(
            std::time::Duration::from_secs(config.model_cache_ttl),
            config.max_input_tokens,
            config.hidden_models.clone(),
        ));
        let resolver = Arc::new(ModelResolver::new(
            model_cache.clone(),
            config.model_aliases.clone(),
            config.hidden_from_list.clone(),
        ));
        Ok(Self {
            config,
            token_manager,
            http,
            model_cache,
            resolver,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route("/v1/models", get(openai::handle_list_models))
        .route("/v1/chat/completions", post(openai::handle_chat_completions))
        .route("/v1/messages", post(claude::handle_messages))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

/// Short per-request id for log correlation.
pub fn new_trace_id() -> String {
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": APP_VERSION
    }))
}

/// Every non-health endpoint requires the proxy key, either as
/// `Bearer <key>` or the bare key.
pub async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path();
    if path == "/" || path == "/health" {
        return next.run(req).await;
    }

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let value = match auth_header {
        Some(v) => v,
        None => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                ErrorType::InvalidRequestError,
                "Missing Authorization header",
            );
        }
    };

    let api_key = value.strip_prefix("Bearer ").unwrap_or(value);
    if api_key != state.config.proxy_api_key {
        return error_response(
            StatusCode::UNAUTHORIZED,
            ErrorType::InvalidRequestError,
            "Invalid API key",
        );
    }

    next.run(req).await
}

pub async fn cors_middleware(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return (
            StatusCode::NO_CONTENT,
            [
                ("Access-Control-Allow-Origin", "*"),
                ("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS"),
                (
                    "Access-Control-Allow-Headers",
                    "Origin, Content-Type, Authorization, X-Requested-With, Accept",
                ),
            ],
        )
            .into_response();
    }

    let mut response = next.run(req).await;
    response.headers_mut().insert(
        "Access-Control-Allow-Origin",
        header::HeaderValue::from_static("*"),
    );
    response
}

/// Fetch the model list from the upstream and repopulate the cache. Every
/// discovered id is also registered as a self-hidden entry so it shows up
/// in /v1/models.
pub async fn load_models(state: &AppState) -> Result<usize, String> {
    let api_host = state.token_manager.api_host().await;
    let mut url = format!("{}/ListAvailableModels?origin=AI_EDITOR", api_host);
    if let Some(arn) = state.token_manager.profile_arn().await {
        url.push_str(&format!("&profileArn={}", arn));
    }

    let response = state.http.get(&url).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("model list request failed with status {}", status.as_u16()));
    }

    #[derive(serde::Deserialize)]
    struct ModelListResponse {
        models: Vec<ModelInfo>,
    }

    let list: ModelListResponse = response
        .json()
        .await
        .map_err(|e| format!("failed to parse model list: {}", e))?;

    let count = list.models.len();
    state.model_cache.update(list.models).await;
    for id in state.model_cache.get_all_model_ids().await {
        state.model_cache.add_hidden_model(&id, &id).await;
    }

    info!("Loaded {} models from Kiro API", count);
    Ok(count)
}

/// Populate the cache at startup, falling back to the built-in list when
/// the upstream fetch fails.
pub async fn load_models_with_fallback(state: &AppState) {
    match load_models(state).await {
        Ok(_) => {}
        Err(e) => {
            warn!("Failed to fetch models from Kiro API: {}", e);
            warn!("Using fallback model list");
            state.model_cache.seed_fallback(&state.config.fallback_models).await;
        }
    }
}

/// Kick off a background refresh when the cache has gone stale. Never
/// blocks the caller.
pub fn maybe_refresh_models(state: &AppState) {
    let state = state.clone();
    tokio::spawn(async move {
        if state.model_cache.is_stale().await {
            if let Err(e) = load_models(&state).await {
                warn!("Background model refresh failed: {}", e);
            }
        }
    });
}
