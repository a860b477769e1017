//! Rendering user-submitted scene sources with external command-line tools.

mod artifact;
mod asymptote;
mod manim;
mod probe;
mod process;
mod workspace;

use std::{io, time::Instant};

use bytes::Bytes;
use metrics::{counter, histogram};
use thiserror::Error;

use crate::{
    domain::error::DomainError,
    infra::telemetry::{RENDER_MS, RENDER_TOTAL},
};

pub use artifact::{find_named, find_output};
pub use asymptote::VectorRenderer;
pub use manim::AnimationRenderer;
pub use probe::CommandProber;
pub use process::{CapturedOutput, Invocation, ProcessEnv, ProcessOutcome, ProcessRunner};
pub use workspace::Workspace;

/// Encoded media produced by a successful render.
#[derive(Debug, Clone)]
pub struct RenderedArtifact {
    pub bytes: Bytes,
    pub content_type: &'static str,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{0}")]
    Validation(String),
    #[error("LaTeX toolchain not found")]
    LatexMissing { latex: bool, dvisvgm: bool },
    #[error("Asymptote not found")]
    AsymptoteMissing,
    #[error("{tool} failed with {}", exit_description(.code))]
    ToolFailed {
        tool: &'static str,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{tool} finished without producing `{expected}`")]
    ArtifactNotFound {
        tool: &'static str,
        expected: String,
        stdout: String,
        stderr: String,
    },
    #[error("render workspace i/o failed: {0}")]
    Workspace(#[source] io::Error),
}

impl From<DomainError> for RenderError {
    fn from(error: DomainError) -> Self {
        Self::Validation(error.to_string())
    }
}

impl RenderError {
    /// Stable label used for metrics and log fields.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid",
            Self::LatexMissing { .. } | Self::AsymptoteMissing => "toolchain_missing",
            Self::ToolFailed { .. } => "tool_failed",
            Self::Spawn { .. } => "spawn_failed",
            Self::ArtifactNotFound { .. } => "artifact_missing",
            Self::Workspace(_) => "workspace_error",
        }
    }

    /// Remediation text shown to users when a toolchain is missing.
    pub fn hints(&self) -> Vec<&'static str> {
        match self {
            Self::LatexMissing { latex, dvisvgm } => {
                let mut hints = Vec::new();
                if !latex {
                    hints.push(
                        "Install a TeX distribution providing `latex` (e.g. texlive-latex-base) \
                         or point TEXBIN at its bin directory.",
                    );
                }
                if !dvisvgm {
                    hints.push(
                        "Install `dvisvgm` (e.g. the dvisvgm package) so TeX output can be \
                         converted to SVG.",
                    );
                }
                hints.push("Alternatively, replace Tex/MathTex objects with Text.");
                hints
            }
            Self::AsymptoteMissing => vec![
                "Install Asymptote (e.g. the asymptote package) or set ASY_BIN to its path.",
                "Install xvfb-run if Asymptote needs a display to render.",
            ],
            _ => Vec::new(),
        }
    }

    pub(crate) fn from_outcome(
        tool: &'static str,
        outcome: ProcessOutcome,
    ) -> Result<CapturedOutput, Self> {
        match outcome {
            ProcessOutcome::Success(output) => Ok(output),
            ProcessOutcome::Exited { code, output } => Err(Self::ToolFailed {
                tool,
                code,
                stdout: output.stdout_lossy(),
                stderr: output.stderr_lossy(),
            }),
            ProcessOutcome::SpawnFailed(source) => Err(Self::Spawn { tool, source }),
        }
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_owned(),
    }
}

/// Record metrics for one finished render attempt.
pub(crate) fn record_render(
    kind: &'static str,
    started_at: Instant,
    result: &Result<RenderedArtifact, RenderError>,
) {
    let outcome = match result {
        Ok(_) => "success",
        Err(err) => err.outcome(),
    };
    counter!(RENDER_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
    histogram!(RENDER_MS, "kind" => kind).record(started_at.elapsed().as_secs_f64() * 1000.0);
}
