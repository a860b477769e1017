//! Relaying render requests from the web service to the render service.

use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::infra::{error::InfraError, telemetry::PROXY_TOTAL};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Render-service endpoint a proxied request is forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyTarget {
    Manim,
    Asymptote,
}

impl ProxyTarget {
    pub fn path(self) -> &'static str {
        match self {
            ProxyTarget::Manim => "render",
            ProxyTarget::Asymptote => "asy",
        }
    }
}

/// Upstream reply relayed to the caller as-is.
#[derive(Debug, Clone)]
pub struct ProxiedResponse {
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("MANIM_SERVICE_URL not configured")]
    NotConfigured,
    #[error("render service unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("render service responded with status {status}")]
    Upstream { status: u16, body: Value },
}

impl ProxyError {
    fn outcome(&self) -> &'static str {
        match self {
            ProxyError::NotConfigured => "not_configured",
            ProxyError::Unreachable(_) => "unreachable",
            ProxyError::Upstream { .. } => "upstream_error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderProxy {
    client: reqwest::Client,
    base_url: Option<Url>,
}

impl RenderProxy {
    pub fn new(base_url: Option<Url>) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self { client, base_url })
    }

    /// POST `body` to the configured render service and relay its reply.
    pub async fn forward(
        &self,
        target: ProxyTarget,
        body: Bytes,
    ) -> Result<ProxiedResponse, ProxyError> {
        let result = self.forward_inner(target, body).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.outcome(),
        };
        counter!(PROXY_TOTAL, "target" => target.path(), "outcome" => outcome).increment(1);

        match &result {
            Ok(response) => info!(
                target = "application::proxy",
                op = "forward",
                upstream = target.path(),
                result = outcome,
                bytes = response.body.len(),
                "Relayed render response"
            ),
            Err(err) => warn!(
                target = "application::proxy",
                op = "forward",
                upstream = target.path(),
                result = outcome,
                error = %err,
                "Render proxy request failed"
            ),
        }
        result
    }

    async fn forward_inner(
        &self,
        target: ProxyTarget,
        body: Bytes,
    ) -> Result<ProxiedResponse, ProxyError> {
        let base = self.base_url.as_ref().ok_or(ProxyError::NotConfigured)?;

        let response = self
            .client
            .post(endpoint_url(base, target.path()))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(ProxyError::Unreachable)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_owned();
        let bytes = response.bytes().await.map_err(ProxyError::Unreachable)?;

        if !status.is_success() {
            return Err(ProxyError::Upstream {
                status: status.as_u16(),
                body: parse_upstream_body(&bytes),
            });
        }

        Ok(ProxiedResponse {
            content_type,
            body: bytes,
        })
    }
}

/// `{base}/{path}` with exactly one slash between them.
pub(crate) fn endpoint_url(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

/// Upstream error body as JSON when it parses, otherwise as text.
pub(crate) fn parse_upstream_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
