//! Relaying prompts to the Gemini family of generative APIs.

use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{config::GenerationSettings, infra::error::InfraError};

use super::proxy::parse_upstream_body;

const API_KEY_HEADER: &str = "x-goog-api-key";
const DEFAULT_IMAGE_TYPE: &str = "image/png";
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("GEMINI_API_KEY not configured")]
    MissingApiKey,
    #[error("{0}")]
    Validation(String),
    #[error("generation API request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("generation API responded with status {status}")]
    Upstream { status: u16, body: Value },
    #[error("unexpected generation API response: {0}")]
    Malformed(String),
    #[error("video operation `{operation}` failed")]
    OperationFailed { operation: String, error: Value },
    #[error("video generation timed out after {0:?}")]
    TimedOut(Duration),
}

/// Binary media returned by an image or video model.
#[derive(Debug, Clone)]
pub struct GeneratedMedia {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct GenerationClient {
    client: reqwest::Client,
    settings: GenerationSettings,
}

impl GenerationClient {
    pub fn new(settings: GenerationSettings) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self { client, settings })
    }

    pub async fn generate_text(&self, prompt: Option<&str>) -> Result<String, GenerateError> {
        let key = self.api_key()?;
        let prompt = require_prompt(prompt)?;

        let payload = self
            .post_json(
                self.model_url(&self.settings.text_model, "generateContent"),
                key,
                &json!({ "contents": [{ "parts": [{ "text": prompt }] }] }),
            )
            .await?;

        let text = extract_text(&payload)
            .ok_or_else(|| GenerateError::Malformed("no text candidates".to_owned()))?;
        info!(
            target = "application::generate",
            op = "generate_text",
            result = "success",
            chars = text.len(),
            "Generated text"
        );
        Ok(text)
    }

    pub async fn generate_image(&self, prompt: Option<&str>) -> Result<GeneratedMedia, GenerateError> {
        let key = self.api_key()?;
        let prompt = require_prompt(prompt)?;

        let payload = self
            .post_json(
                self.model_url(&self.settings.image_model, "predict"),
                key,
                &json!({
                    "instances": [{ "prompt": prompt }],
                    "parameters": { "sampleCount": 1 }
                }),
            )
            .await?;

        let media = decode_prediction(&payload)?;
        info!(
            target = "application::generate",
            op = "generate_image",
            result = "success",
            bytes = media.bytes.len(),
            "Generated image"
        );
        Ok(media)
    }

    /// Start a long-running video operation, poll it until done, then download the clip.
    ///
    /// Polling stops as soon as this future is dropped; the remote operation keeps running.
    pub async fn generate_video(&self, prompt: Option<&str>) -> Result<GeneratedMedia, GenerateError> {
        let key = self.api_key()?;
        let prompt = require_prompt(prompt)?;
        let started_at = Instant::now();

        let operation = self
            .post_json(
                self.model_url(&self.settings.video_model, "predictLongRunning"),
                key,
                &json!({ "instances": [{ "prompt": prompt }] }),
            )
            .await?;
        let name = operation
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| GenerateError::Malformed("operation has no name".to_owned()))?
            .to_owned();

        let finished = self.await_operation(key, &name).await?;
        if let Some(error) = finished.get("error") {
            return Err(GenerateError::OperationFailed {
                operation: name,
                error: error.clone(),
            });
        }

        let uri = finished
            .pointer("/response/generateVideoResponse/generatedSamples/0/video/uri")
            .and_then(Value::as_str)
            .ok_or_else(|| GenerateError::Malformed("operation finished without a video".to_owned()))?;

        let bytes = self.download(uri, key).await?;
        info!(
            target = "application::generate",
            op = "generate_video",
            result = "success",
            operation = %name,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            bytes = bytes.len(),
            "Generated video"
        );
        Ok(GeneratedMedia {
            bytes,
            content_type: VIDEO_CONTENT_TYPE.to_owned(),
        })
    }

    async fn await_operation(&self, key: &str, name: &str) -> Result<Value, GenerateError> {
        let deadline = self.settings.poll_timeout;
        match tokio::time::timeout(deadline, self.poll_operation(key, name)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    target = "application::generate",
                    op = "generate_video",
                    result = "timeout",
                    operation = %name,
                    timeout_ms = deadline.as_millis() as u64,
                    "Video operation did not finish in time"
                );
                Err(GenerateError::TimedOut(deadline))
            }
        }
    }

    /// Fixed-interval polling with no backoff.
    async fn poll_operation(&self, key: &str, name: &str) -> Result<Value, GenerateError> {
        let url = format!("{}/v1beta/{name}", self.base());
        loop {
            tokio::time::sleep(self.settings.poll_interval).await;
            let response = self
                .client
                .get(&url)
                .header(API_KEY_HEADER, key)
                .send()
                .await
                .map_err(GenerateError::Transport)?;
            let status = read_json(response).await?;
            if status.get("done").and_then(Value::as_bool) == Some(true) {
                return Ok(status);
            }
            debug!(
                target = "application::generate",
                operation = %name,
                "Video operation still running"
            );
        }
    }

    async fn download(&self, uri: &str, key: &str) -> Result<Bytes, GenerateError> {
        let response = self
            .client
            .get(uri)
            .header(API_KEY_HEADER, key)
            .send()
            .await
            .map_err(GenerateError::Transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(GenerateError::Transport)?;
        if !status.is_success() {
            return Err(GenerateError::Upstream {
                status: status.as_u16(),
                body: parse_upstream_body(&bytes),
            });
        }
        Ok(bytes)
    }

    async fn post_json(&self, url: String, key: &str, body: &Value) -> Result<Value, GenerateError> {
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, key)
            .json(body)
            .send()
            .await
            .map_err(GenerateError::Transport)?;
        read_json(response).await
    }

    fn api_key(&self) -> Result<&str, GenerateError> {
        self.settings
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(GenerateError::MissingApiKey)
    }

    fn base(&self) -> &str {
        self.settings.base_url.as_str().trim_end_matches('/')
    }

    fn model_url(&self, model: &str, action: &str) -> String {
        format!("{}/v1beta/models/{model}:{action}", self.base())
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, GenerateError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(GenerateError::Transport)?;
    if !status.is_success() {
        return Err(GenerateError::Upstream {
            status: status.as_u16(),
            body: parse_upstream_body(&bytes),
        });
    }
    serde_json::from_slice(&bytes).map_err(|err| GenerateError::Malformed(err.to_string()))
}

fn require_prompt(prompt: Option<&str>) -> Result<&str, GenerateError> {
    prompt
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
        .ok_or_else(|| GenerateError::Validation("Missing `prompt` string".to_owned()))
}

fn extract_text(payload: &Value) -> Option<String> {
    let parts = payload
        .pointer("/candidates/0/content/parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() { None } else { Some(text) }
}

fn decode_prediction(payload: &Value) -> Result<GeneratedMedia, GenerateError> {
    let prediction = payload
        .pointer("/predictions/0")
        .ok_or_else(|| GenerateError::Malformed("no predictions".to_owned()))?;
    let encoded = prediction
        .get("bytesBase64Encoded")
        .and_then(Value::as_str)
        .ok_or_else(|| GenerateError::Malformed("prediction carries no image".to_owned()))?;
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|err| GenerateError::Malformed(format!("invalid base64 image: {err}")))?;
    let content_type = prediction
        .get("mimeType")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_IMAGE_TYPE)
        .to_owned();
    Ok(GeneratedMedia {
        bytes: Bytes::from(bytes),
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_parts_are_concatenated() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Circle(" }, { "text": "radius=2)" }] }
            }]
        });
        assert_eq!(extract_text(&payload).as_deref(), Some("Circle(radius=2)"));
        assert_eq!(extract_text(&json!({ "candidates": [] })), None);
    }

    #[test]
    fn prediction_is_decoded_with_its_mime_type() {
        let payload = json!({
            "predictions": [{ "bytesBase64Encoded": STANDARD.encode(b"\x89PNG"), "mimeType": "image/jpeg" }]
        });
        let media = decode_prediction(&payload).expect("decoded");
        assert_eq!(media.bytes.as_ref(), b"\x89PNG");
        assert_eq!(media.content_type, "image/jpeg");

        let untyped = json!({ "predictions": [{ "bytesBase64Encoded": STANDARD.encode(b"img") }] });
        assert_eq!(
            decode_prediction(&untyped).expect("decoded").content_type,
            DEFAULT_IMAGE_TYPE
        );
    }

    #[test]
    fn corrupt_base64_is_malformed() {
        let payload = json!({ "predictions": [{ "bytesBase64Encoded": "@@not base64@@" }] });
        assert!(matches!(
            decode_prediction(&payload),
            Err(GenerateError::Malformed(_))
        ));
    }

    #[test]
    fn blank_prompts_are_rejected() {
        assert!(matches!(require_prompt(None), Err(GenerateError::Validation(_))));
        assert!(matches!(
            require_prompt(Some("   ")),
            Err(GenerateError::Validation(_))
        ));
        assert_eq!(require_prompt(Some(" a circle ")).expect("prompt"), "a circle");
    }
}
