use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;

use crate::application::error::ErrorReport;

/// JSON body shared by every error response. Only populated fields are serialised.
#[derive(Debug, Default, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<MissingTools>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<Value>,
}

/// Which TeX binaries were found; `false` marks the absent one.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MissingTools {
    pub latex: bool,
    pub dvisvgm: bool,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Self::default()
        }
    }
}

/// Build the JSON response and attach a report for the logging middleware.
pub(crate) fn error_response(
    source: &'static str,
    status: StatusCode,
    body: ErrorBody,
    error: &dyn StdError,
) -> Response {
    let mut response = (status, Json(body)).into_response();
    ErrorReport::from_error(source, status, error).attach(&mut response);
    response
}
