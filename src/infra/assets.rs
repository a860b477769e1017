//! Serving the single-page app from a directory on disk.

use std::{io, path::PathBuf};

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use mime_guess::MimeGuess;
use tracing::warn;

use crate::application::error::ErrorReport;

const INDEX_FILE: &str = "index.html";
const SOURCE: &str = "infra::assets::serve";

#[derive(Debug, Clone)]
pub struct StaticAssets {
    root: PathBuf,
}

impl StaticAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Serve `path` (as taken from the request URI); `/` maps to `index.html`.
    pub async fn serve(&self, path: &str) -> Response {
        let trimmed = path.trim_start_matches('/');
        let candidate = if trimmed.is_empty() { INDEX_FILE } else { trimmed };
        self.serve_file(candidate).await
    }

    pub async fn index(&self) -> Response {
        self.serve_file(INDEX_FILE).await
    }

    async fn serve_file(&self, candidate: &str) -> Response {
        match self.resolve(candidate).await {
            Ok(Some(asset)) => asset.into_response(),
            Ok(None) => not_found_response(),
            Err(err) => {
                warn!(
                    target = "infra::assets",
                    path = candidate,
                    error = %err,
                    "Failed to read static asset"
                );
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                let mut response = status.into_response();
                ErrorReport::from_error(SOURCE, status, &err).attach(&mut response);
                response
            }
        }
    }

    async fn resolve(&self, candidate: &str) -> io::Result<Option<Asset>> {
        if candidate.is_empty() || candidate.ends_with('/') || candidate.contains("..") {
            return Ok(None);
        }

        let path = self.root.join(candidate);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        }

        let contents = tokio::fs::read(&path).await?;
        Ok(Some(Asset {
            contents: Bytes::from(contents),
            mime: mime_guess::from_path(candidate),
            revalidate: candidate == INDEX_FILE,
        }))
    }
}

fn not_found_response() -> Response {
    let mut response = StatusCode::NOT_FOUND.into_response();
    ErrorReport::from_message(SOURCE, StatusCode::NOT_FOUND, "Static asset not found")
        .attach(&mut response);
    response
}

struct Asset {
    contents: Bytes,
    mime: MimeGuess,
    revalidate: bool,
}

impl IntoResponse for Asset {
    fn into_response(self) -> Response {
        let mime = self.mime.first_or_octet_stream();
        let len = self.contents.len();
        let mut response = Response::new(Body::from(self.contents));

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
            headers.insert(header::CONTENT_LENGTH, value);
        }
        headers.insert(
            header::CACHE_CONTROL,
            if self.revalidate {
                HeaderValue::from_static("no-cache")
            } else {
                HeaderValue::from_static("public, max-age=3600")
            },
        );

        response
    }
}
