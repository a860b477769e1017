use std::time::Instant;

use bytes::Bytes;
use tracing::{info, warn};

use crate::{config::RenderSettings, domain::render::AnimationRequest};

use super::{
    CommandProber, Invocation, ProcessEnv, ProcessRunner, RenderError, RenderedArtifact,
    Workspace, find_named, record_render,
};

const TOOL: &str = "manim";
const WORKSPACE_PREFIX: &str = "manim-";
const SOURCE_FILE: &str = "scene.py";
const MEDIA_DIR: &str = "media";
const OUTPUT_STEM: &str = "output";

/// Renders Manim scenes to MP4 or GIF.
#[derive(Debug, Clone)]
pub struct AnimationRenderer {
    settings: RenderSettings,
    runner: ProcessRunner,
    prober: CommandProber,
}

impl AnimationRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        let env = ProcessEnv::with_prepended_dir(settings.tex_bin.as_deref());
        Self {
            runner: ProcessRunner::new(env.clone()),
            prober: CommandProber::new(env),
            settings,
        }
    }

    pub async fn render(&self, request: &AnimationRequest) -> Result<RenderedArtifact, RenderError> {
        let started_at = Instant::now();
        let result = self.render_checked(request).await;
        record_render(TOOL, started_at, &result);

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        match &result {
            Ok(artifact) => info!(
                target = "application::render::manim",
                op = "render_animation",
                result = "success",
                scene = %request.scene,
                format = request.format.extension(),
                quality = request.quality.as_str(),
                elapsed_ms,
                bytes = artifact.bytes.len(),
                "Rendered animation"
            ),
            Err(err) => warn!(
                target = "application::render::manim",
                op = "render_animation",
                result = err.outcome(),
                scene = %request.scene,
                elapsed_ms,
                error = %err,
                "Animation render failed"
            ),
        }

        result
    }

    async fn render_checked(&self, request: &AnimationRequest) -> Result<RenderedArtifact, RenderError> {
        if request.uses_tex() {
            self.ensure_tex().await?;
        }

        let workspace = Workspace::acquire(&self.settings.scratch_dir, WORKSPACE_PREFIX)
            .await
            .map_err(RenderError::Workspace)?;
        let result = self.render_in(&workspace, request).await;
        workspace.release().await;
        result
    }

    async fn ensure_tex(&self) -> Result<(), RenderError> {
        let (latex, dvisvgm) = tokio::join!(
            self.prober
                .is_available(&self.settings.latex_bin, &["--version"]),
            self.prober
                .is_available(&self.settings.dvisvgm_bin, &["--version"]),
        );
        if latex && dvisvgm {
            Ok(())
        } else {
            Err(RenderError::LatexMissing { latex, dvisvgm })
        }
    }

    async fn render_in(
        &self,
        workspace: &Workspace,
        request: &AnimationRequest,
    ) -> Result<RenderedArtifact, RenderError> {
        workspace
            .write_source(SOURCE_FILE, &request.source)
            .await
            .map_err(RenderError::Workspace)?;

        let invocation = self.invocation().await.args(scene_args(request));
        let outcome = self.runner.run(&invocation, workspace.path()).await;
        let output = RenderError::from_outcome(TOOL, outcome)?;

        let expected = format!("{OUTPUT_STEM}.{}", request.format.extension());
        let Some(path) = find_named(workspace.path(), &expected).await else {
            return Err(RenderError::ArtifactNotFound {
                tool: TOOL,
                expected,
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

    /// Explicit binary, then the project virtualenv, then `python -m manim`.
    async fn invocation(&self) -> Invocation {
        if let Some(bin) = &self.settings.manim_bin {
            return Invocation::new(bin.clone());
        }

        let venv_manim = self.settings.venv_dir.join("bin").join("manim");
        if tokio::fs::try_exists(&venv_manim).await.unwrap_or(false) {
            return Invocation::new(venv_manim);
        }

        Invocation::new(self.settings.python_bin.clone()).args(["-m", "manim"])
    }
}

fn scene_args(request: &AnimationRequest) -> Vec<String> {
    vec![
        request.quality.cli_flag(),
        "--format".to_owned(),
        request.format.extension().to_owned(),
        "--media_dir".to_owned(),
        MEDIA_DIR.to_owned(),
        "-o".to_owned(),
        OUTPUT_STEM.to_owned(),
        SOURCE_FILE.to_owned(),
        request.scene.clone(),
    ]
}
