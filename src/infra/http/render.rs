use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::{
    application::render::{AnimationRenderer, RenderError, RenderedArtifact, VectorRenderer},
    config::RenderSettings,
    domain::render::{AnimationPayload, AnimationRequest, VectorPayload, VectorRequest},
};

use super::{
    error::{ErrorBody, MissingTools, error_response},
    health,
    middleware::{log_responses, set_request_context},
};

const SOURCE: &str = "infra::http::render";

#[derive(Clone)]
pub struct RenderState {
    pub animation: Arc<AnimationRenderer>,
    pub vector: Arc<VectorRenderer>,
}

impl RenderState {
    pub fn new(settings: &RenderSettings) -> Self {
        Self {
            animation: Arc::new(AnimationRenderer::new(settings.clone())),
            vector: Arc::new(VectorRenderer::new(settings.clone())),
        }
    }
}

/// Routes of the render service: `/health`, `/render` and `/asy`.
pub fn build_render_router(state: RenderState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/render", post(render_animation))
        .route("/asy", post(render_vector))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
        .with_state(state)
}

async fn render_animation(
    State(state): State<RenderState>,
    payload: Result<Json<AnimationPayload>, JsonRejection>,
) -> Result<RenderedArtifact, RenderError> {
    let Json(payload) = payload.map_err(|rejection| RenderError::Validation(rejection.body_text()))?;
    let request = AnimationRequest::try_from(payload)?;
    state.animation.render(&request).await
}

async fn render_vector(
    State(state): State<RenderState>,
    payload: Result<Json<VectorPayload>, JsonRejection>,
) -> Result<RenderedArtifact, RenderError> {
    let Json(payload) = payload.map_err(|rejection| RenderError::Validation(rejection.body_text()))?;
    let request = VectorRequest::try_from(payload)?;
    state.vector.render(&request).await
}

impl IntoResponse for RenderedArtifact {
    fn into_response(self) -> Response {
        let len = self.bytes.len();
        let mut response = Response::new(Body::from(self.bytes));

        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.content_type),
        );
        if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
            headers.insert(header::CONTENT_LENGTH, value);
        }
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

        response
    }
}

impl IntoResponse for RenderError {
    fn into_response(self) -> Response {
        let hints: Vec<String> = self.hints().into_iter().map(str::to_owned).collect();
        let (status, body) = match &self {
            RenderError::Validation(message) => {
                (StatusCode::BAD_REQUEST, ErrorBody::new(message.clone()))
            }
            RenderError::LatexMissing { latex, dvisvgm } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    missing: Some(MissingTools {
                        latex: *latex,
                        dvisvgm: *dvisvgm,
                    }),
                    hints,
                    ..ErrorBody::new("LaTeX toolchain not found")
                },
            ),
            RenderError::AsymptoteMissing => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    hints,
                    ..ErrorBody::new("Asymptote not found")
                },
            ),
            RenderError::ToolFailed {
                code,
                stdout,
                stderr,
                ..
            } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    code: *code,
                    stdout: Some(stdout.clone()),
                    stderr: Some(stderr.clone()),
                    ..ErrorBody::new("Render failed")
                },
            ),
            RenderError::Spawn { source, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    detail: Some(source.to_string()),
                    ..ErrorBody::new("Failed to start renderer")
                },
            ),
            RenderError::ArtifactNotFound { stdout, stderr, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    stdout: Some(stdout.clone()),
                    stderr: Some(stderr.clone()),
                    ..ErrorBody::new("Output file not found")
                },
            ),
            RenderError::Workspace(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    detail: Some(err.to_string()),
                    ..ErrorBody::new("Workspace I/O failed")
                },
            ),
        };

        error_response(SOURCE, status, body, &self)
    }
}
