//! HTTP surface of both services.

mod error;
mod middleware;
mod render;
mod web;

use axum::Json;
use serde::Serialize;

pub use error::{ErrorBody, MissingTools};
pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use render::{RenderState, build_render_router};
pub use web::{WebState, build_web_router};

#[derive(Debug, Serialize)]
struct HealthBody {
    ok: bool,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { ok: true })
}
