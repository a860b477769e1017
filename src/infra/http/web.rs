use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, Uri, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    application::{
        generate::{GenerateError, GeneratedMedia, GenerationClient},
        proxy::{ProxiedResponse, ProxyError, ProxyTarget, RenderProxy},
        share::{ShareError, ShareStore, is_valid_id},
    },
    config::{GenerationSettings, WebSettings},
    infra::{assets::StaticAssets, error::InfraError},
};

use super::{
    error::{ErrorBody, error_response},
    health,
    middleware::{log_responses, set_request_context},
};

#[derive(Clone)]
pub struct WebState {
    pub proxy: Arc<RenderProxy>,
    pub shares: Arc<ShareStore>,
    pub generation: Arc<GenerationClient>,
    pub assets: Arc<StaticAssets>,
}

impl WebState {
    pub fn new(web: &WebSettings, generation: &GenerationSettings) -> Result<Self, InfraError> {
        Ok(Self {
            proxy: Arc::new(RenderProxy::new(web.render_service_url.clone())?),
            shares: Arc::new(ShareStore::new(web.share_dir.clone())?),
            generation: Arc::new(GenerationClient::new(generation.clone())?),
            assets: Arc::new(StaticAssets::new(web.static_dir.clone())),
        })
    }
}

/// Routes of the web service: proxies, sharing, generation and the SPA fallback.
pub fn build_web_router(state: WebState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/manim-proxy", post(proxy_manim))
        .route("/api/asy-proxy", post(proxy_asy))
        .route("/api/share", post(create_share))
        .route("/s/{id}", get(show_share))
        .route("/api/gen-text", post(generate_text))
        .route("/api/gen-image", post(generate_image))
        .route("/api/gen-video", post(generate_video))
        .fallback(serve_static)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
        .with_state(state)
}

async fn proxy_manim(
    State(state): State<WebState>,
    body: Bytes,
) -> Result<ProxiedResponse, ProxyError> {
    state.proxy.forward(ProxyTarget::Manim, body).await
}

async fn proxy_asy(
    State(state): State<WebState>,
    body: Bytes,
) -> Result<ProxiedResponse, ProxyError> {
    state.proxy.forward(ProxyTarget::Asymptote, body).await
}

#[derive(Debug, Serialize)]
struct ShareCreated {
    id: String,
    url: String,
}

async fn create_share(
    State(state): State<WebState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ShareCreated>, ShareError> {
    let Json(snapshot) = payload.map_err(|_| ShareError::InvalidPayload)?;
    let id = state.shares.save(&snapshot).await?;
    Ok(Json(ShareCreated {
        url: format!("/s/{id}"),
        id,
    }))
}

/// `/s/<id>.json` returns the snapshot; `/s/<id>` boots the app which then fetches it.
async fn show_share(
    State(state): State<WebState>,
    Path(id): Path<String>,
) -> Result<Response, ShareError> {
    if let Some(id) = id.strip_suffix(".json") {
        let bytes = state.shares.load(id).await?;
        return Ok((
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            bytes,
        )
            .into_response());
    }

    if !is_valid_id(&id) {
        return Err(ShareError::InvalidId(id));
    }
    Ok(state.assets.index().await)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PromptPayload {
    prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct GeneratedText {
    text: String,
}

fn prompt_of(payload: Result<Json<PromptPayload>, JsonRejection>) -> Result<Option<String>, GenerateError> {
    payload
        .map(|Json(payload)| payload.prompt)
        .map_err(|rejection| GenerateError::Validation(rejection.body_text()))
}

async fn generate_text(
    State(state): State<WebState>,
    payload: Result<Json<PromptPayload>, JsonRejection>,
) -> Result<Json<GeneratedText>, GenerateError> {
    let prompt = prompt_of(payload)?;
    let text = state.generation.generate_text(prompt.as_deref()).await?;
    Ok(Json(GeneratedText { text }))
}

async fn generate_image(
    State(state): State<WebState>,
    payload: Result<Json<PromptPayload>, JsonRejection>,
) -> Result<GeneratedMedia, GenerateError> {
    let prompt = prompt_of(payload)?;
    state.generation.generate_image(prompt.as_deref()).await
}

async fn generate_video(
    State(state): State<WebState>,
    payload: Result<Json<PromptPayload>, JsonRejection>,
) -> Result<GeneratedMedia, GenerateError> {
    let prompt = prompt_of(payload)?;
    state.generation.generate_video(prompt.as_deref()).await
}

async fn serve_static(State(state): State<WebState>, uri: Uri) -> Response {
    state.assets.serve(uri.path()).await
}

fn binary_response(content_type: &str, bytes: Bytes) -> Response {
    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let mut response = Response::new(Body::from(bytes));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    response
}

impl IntoResponse for ProxiedResponse {
    fn into_response(self) -> Response {
        binary_response(&self.content_type, self.body)
    }
}

impl IntoResponse for GeneratedMedia {
    fn into_response(self) -> Response {
        binary_response(&self.content_type, self.bytes)
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ProxyError::NotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::new("MANIM_SERVICE_URL not configured"),
            ),
            ProxyError::Unreachable(err) => (
                StatusCode::BAD_GATEWAY,
                ErrorBody {
                    detail: Some(err.to_string()),
                    ..ErrorBody::new("Render service unreachable")
                },
            ),
            ProxyError::Upstream { status, body } => (
                StatusCode::BAD_GATEWAY,
                ErrorBody {
                    status: Some(*status),
                    upstream: Some(body.clone()),
                    ..ErrorBody::new("Render service error")
                },
            ),
        };
        error_response("infra::http::web::proxy", status, body, &self)
    }
}

impl IntoResponse for ShareError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ShareError::InvalidPayload => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new("Share payload must be a JSON object"),
            ),
            ShareError::InvalidId(_) | ShareError::NotFound(_) => {
                (StatusCode::NOT_FOUND, ErrorBody::new("Share not found"))
            }
            ShareError::Encode(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    detail: Some(err.to_string()),
                    ..ErrorBody::new("Share storage failed")
                },
            ),
            ShareError::Io(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    detail: Some(err.to_string()),
                    ..ErrorBody::new("Share storage failed")
                },
            ),
        };
        error_response("infra::http::web::share", status, body, &self)
    }
}

impl IntoResponse for GenerateError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            GenerateError::MissingApiKey => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::new("GEMINI_API_KEY not configured"),
            ),
            GenerateError::Validation(message) => {
                (StatusCode::BAD_REQUEST, ErrorBody::new(message.clone()))
            }
            GenerateError::Transport(err) => (
                StatusCode::BAD_GATEWAY,
                ErrorBody {
                    detail: Some(err.to_string()),
                    ..ErrorBody::new("Generation API unreachable")
                },
            ),
            GenerateError::Upstream { status, body } => (
                StatusCode::BAD_GATEWAY,
                ErrorBody {
                    status: Some(*status),
                    upstream: Some(body.clone()),
                    ..ErrorBody::new("Generation API error")
                },
            ),
            GenerateError::Malformed(detail) => (
                StatusCode::BAD_GATEWAY,
                ErrorBody {
                    detail: Some(detail.clone()),
                    ..ErrorBody::new("Unexpected generation API response")
                },
            ),
            GenerateError::OperationFailed { error, .. } => (
                StatusCode::BAD_GATEWAY,
                ErrorBody {
                    upstream: Some(error.clone()),
                    ..ErrorBody::new("Video generation failed")
                },
            ),
            GenerateError::TimedOut(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorBody::new("Video generation timed out"),
            ),
        };
        error_response("infra::http::web::generate", status, body, &self)
    }
}
