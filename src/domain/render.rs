//! Render request payloads and their validated forms.

use std::{fmt, str::FromStr};

use serde::Deserialize;

use super::error::DomainError;

pub const DEFAULT_SCENE: &str = "GeneratedScene";

/// Body of `POST /render` as submitted by the client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnimationPayload {
    pub code: Option<String>,
    pub scene: Option<String>,
    pub format: Option<String>,
    pub quality: Option<String>,
}

/// Body of `POST /asy` as submitted by the client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VectorPayload {
    pub code: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnimationFormat {
    #[default]
    Mp4,
    Gif,
}

impl AnimationFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AnimationFormat::Mp4 => "mp4",
            AnimationFormat::Gif => "gif",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            AnimationFormat::Mp4 => "video/mp4",
            AnimationFormat::Gif => "image/gif",
        }
    }
}

impl FromStr for AnimationFormat {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "mp4" => Ok(AnimationFormat::Mp4),
            "gif" => Ok(AnimationFormat::Gif),
            other => Err(DomainError::validation(format!(
                "Unsupported format `{other}`; expected one of: mp4, gif"
            ))),
        }
    }
}

/// Manim quality presets, passed to the CLI as `-ql`, `-qm`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    #[default]
    Low,
    Medium,
    High,
    Production,
    FourK,
}

impl Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Low => "ql",
            Quality::Medium => "qm",
            Quality::High => "qh",
            Quality::Production => "qp",
            Quality::FourK => "qk",
        }
    }

    pub fn cli_flag(self) -> String {
        format!("-{}", self.as_str())
    }
}

impl FromStr for Quality {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ql" => Ok(Quality::Low),
            "qm" => Ok(Quality::Medium),
            "qh" => Ok(Quality::High),
            "qp" => Ok(Quality::Production),
            "qk" => Ok(Quality::FourK),
            other => Err(DomainError::validation(format!(
                "Unsupported quality `{other}`; expected one of: ql, qm, qh, qp, qk"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorFormat {
    #[default]
    Png,
    Svg,
}

impl VectorFormat {
    pub fn extension(self) -> &'static str {
        match self {
            VectorFormat::Png => "png",
            VectorFormat::Svg => "svg",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            VectorFormat::Png => "image/png",
            VectorFormat::Svg => "image/svg+xml",
        }
    }
}

impl FromStr for VectorFormat {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "png" => Ok(VectorFormat::Png),
            "svg" => Ok(VectorFormat::Svg),
            other => Err(DomainError::validation(format!(
                "Unsupported format `{other}`; expected one of: png, svg"
            ))),
        }
    }
}

impl fmt::Display for AnimationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl fmt::Display for VectorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A validated Manim render request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationRequest {
    pub source: String,
    pub scene: String,
    pub format: AnimationFormat,
    pub quality: Quality,
}

impl AnimationRequest {
    /// Whether the source calls `Tex(...)` or `MathTex(...)`, which need a LaTeX toolchain.
    pub fn uses_tex(&self) -> bool {
        references_tex(&self.source)
    }
}

impl TryFrom<AnimationPayload> for AnimationRequest {
    type Error = DomainError;

    fn try_from(payload: AnimationPayload) -> Result<Self, Self::Error> {
        let source = require_source(payload.code)?;

        let scene = match payload.scene {
            Some(scene) => {
                let scene = scene.trim().to_string();
                if !is_identifier(&scene) {
                    return Err(DomainError::validation(format!(
                        "Invalid scene name `{scene}`; expected a Python class name"
                    )));
                }
                scene
            }
            None => DEFAULT_SCENE.to_string(),
        };

        let format = payload
            .format
            .as_deref()
            .map(AnimationFormat::from_str)
            .transpose()?
            .unwrap_or_default();
        let quality = payload
            .quality
            .as_deref()
            .map(Quality::from_str)
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            source,
            scene,
            format,
            quality,
        })
    }
}

/// A validated Asymptote render request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorRequest {
    pub source: String,
    pub format: VectorFormat,
}

impl TryFrom<VectorPayload> for VectorRequest {
    type Error = DomainError;

    fn try_from(payload: VectorPayload) -> Result<Self, Self::Error> {
        let source = require_source(payload.code)?;
        let format = payload
            .format
            .as_deref()
            .map(VectorFormat::from_str)
            .transpose()?
            .unwrap_or_default();

        Ok(Self { source, format })
    }
}

fn require_source(code: Option<String>) -> Result<String, DomainError> {
    match code {
        Some(code) if !code.trim().is_empty() => Ok(code),
        Some(_) => Err(DomainError::validation("Field `code` must not be empty")),
        None => Err(DomainError::validation("Missing `code` string")),
    }
}

fn references_tex(source: &str) -> bool {
    source
        .match_indices("Tex")
        .any(|(idx, token)| source[idx + token.len()..].trim_start().starts_with('('))
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
