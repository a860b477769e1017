use std::time::Instant;

use bytes::Bytes;
use tracing::{info, warn};

use crate::{config::RenderSettings, domain::render::VectorRequest};

use super::{
    CommandProber, Invocation, ProcessEnv, ProcessRunner, RenderError, RenderedArtifact,
    Workspace, find_output, record_render,
};

const TOOL: &str = "asy";
const WORKSPACE_PREFIX: &str = "asy-";
const SOURCE_FILE: &str = "scene.asy";
const OUTPUT_STEM: &str = "out";

/// Renders Asymptote sources to PNG or SVG, under a virtual display when one is available.
#[derive(Debug, Clone)]
pub struct VectorRenderer {
    settings: RenderSettings,
    runner: ProcessRunner,
    prober: CommandProber,
}

impl VectorRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        let env = ProcessEnv::with_prepended_dir(settings.tex_bin.as_deref());
        Self {
            runner: ProcessRunner::new(env.clone()),
            prober: CommandProber::new(env),
            settings,
        }
    }

    pub async fn render(&self, request: &VectorRequest) -> Result<RenderedArtifact, RenderError> {
        let started_at = Instant::now();
        let result = self.render_checked(request).await;
        record_render(TOOL, started_at, &result);

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        match &result {
            Ok(artifact) => info!(
                target = "application::render::asy",
                op = "render_vector",
                result = "success",
                format = request.format.extension(),
                elapsed_ms,
                bytes = artifact.bytes.len(),
                "Rendered Asymptote figure"
            ),
            Err(err) => warn!(
                target = "application::render::asy",
                op = "render_vector",
                result = err.outcome(),
                elapsed_ms,
                error = %err,
                "Asymptote render failed"
            ),
        }

        result
    }

    async fn render_checked(&self, request: &VectorRequest) -> Result<RenderedArtifact, RenderError> {
        if !self
            .prober
            .is_available(&self.settings.asy_bin, &["-version"])
            .await
        {
            return Err(RenderError::AsymptoteMissing);
        }
        let invocation = self.invocation(request).await;

        let workspace = Workspace::acquire(&self.settings.scratch_dir, WORKSPACE_PREFIX)
            .await
            .map_err(RenderError::Workspace)?;
        let result = self.render_in(&workspace, &invocation, request).await;
        workspace.release().await;
        result
    }

    async fn render_in(
        &self,
        workspace: &Workspace,
        invocation: &Invocation,
        request: &VectorRequest,
    ) -> Result<RenderedArtifact, RenderError> {
        workspace
            .write_source(SOURCE_FILE, &request.source)
            .await
            .map_err(RenderError::Workspace)?;

        let outcome = self.runner.run(invocation, workspace.path()).await;
        let output = RenderError::from_outcome(TOOL, outcome)?;

        let ext = request.format.extension();
        let Some(path) = find_output(workspace.path(), OUTPUT_STEM, ext).await else {
            return Err(RenderError::ArtifactNotFound {
                tool: TOOL,
                expected: format!("{OUTPUT_STEM}.{ext}"),
                stdout: output.stdout_lossy(),
                stderr: output.stderr_lossy(),
            });
        };

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(RenderError::Workspace)?;
        Ok(RenderedArtifact {
            bytes: Bytes::from(bytes),
            content_type: request.format.content_type(),
        })
    }

    async fn invocation(&self, request: &VectorRequest) -> Invocation {
        let direct = Invocation::new(self.settings.asy_bin.clone()).args([
            "-noV",
            "-f",
            request.format.extension(),
            "-o",
            OUTPUT_STEM,
            SOURCE_FILE,
        ]);

        if self
            .prober
            .is_available(&self.settings.xvfb_bin, &["--help"])
            .await
        {
            direct.wrapped_in(self.settings.xvfb_bin.clone(), ["-a"])
        } else {
            direct
        }
    }
}
