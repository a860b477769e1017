//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::NonZeroU64,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{
    CliArgs, Command, RenderArgs, RenderOverrides, ServerOverrides, WebArgs, WebOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "mathcanvas";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_BODY_BYTES: u64 = 2 * 1024 * 1024;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
pub const DEFAULT_PYTHON_BIN: &str = "python3";
pub const DEFAULT_VENV_DIR: &str = ".venv";
pub const DEFAULT_ASY_BIN: &str = "asy";
pub const DEFAULT_XVFB_BIN: &str = "xvfb-run";
pub const DEFAULT_LATEX_BIN: &str = "latex";
pub const DEFAULT_DVISVGM_BIN: &str = "dvisvgm";
const DEFAULT_STATIC_DIR: &str = "public";
const DEFAULT_SHARE_DIR: &str = "shares";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "imagen-3.0-generate-002";
pub const DEFAULT_VIDEO_MODEL: &str = "veo-2.0-generate-001";
const DEFAULT_VIDEO_POLL_INTERVAL_SECS: u64 = 8;
const DEFAULT_VIDEO_POLL_TIMEOUT_SECS: u64 = 300;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub web: WebSettings,
    pub generation: GenerationSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub max_body_bytes: NonZeroU64,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// External toolchain locations used by the render service.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub scratch_dir: PathBuf,
    pub manim_bin: Option<PathBuf>,
    pub python_bin: PathBuf,
    pub venv_dir: PathBuf,
    pub asy_bin: PathBuf,
    pub xvfb_bin: PathBuf,
    pub latex_bin: PathBuf,
    pub dvisvgm_bin: PathBuf,
    pub tex_bin: Option<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
            manim_bin: None,
            python_bin: PathBuf::from(DEFAULT_PYTHON_BIN),
            venv_dir: PathBuf::from(DEFAULT_VENV_DIR),
            asy_bin: PathBuf::from(DEFAULT_ASY_BIN),
            xvfb_bin: PathBuf::from(DEFAULT_XVFB_BIN),
            latex_bin: PathBuf::from(DEFAULT_LATEX_BIN),
            dvisvgm_bin: PathBuf::from(DEFAULT_DVISVGM_BIN),
            tex_bin: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebSettings {
    pub static_dir: PathBuf,
    pub share_dir: PathBuf,
    pub render_service_url: Option<Url>,
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub api_key: Option<String>,
    pub base_url: Url,
    pub text_model: String,
    pub image_model: String,
    pub video_model: String,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("MATHCANVAS").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Render(args) => {
            raw.apply_server_overrides(&args.server);
            raw.apply_render_overrides(&args.render);
        }
        Command::Web(args) => {
            raw.apply_server_overrides(&args.server);
            raw.apply_web_overrides(&args.web);
        }
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    web: RawWebSettings,
    generation: RawGenerationSettings,
}

impl RawSettings {
    fn apply_server_overrides(&mut self, overrides: &ServerOverrides) {
        if let Some(host) = overrides.host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
        }
        if let Some(limit) = overrides.max_body_bytes {
            self.server.max_body_bytes = Some(limit);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(path) = overrides.manim_bin.as_ref() {
            self.render.manim_bin = Some(path.clone());
        }
        if let Some(path) = overrides.python_bin.as_ref() {
            self.render.python_bin = Some(path.clone());
        }
        if let Some(path) = overrides.venv_dir.as_ref() {
            self.render.venv_dir = Some(path.clone());
        }
        if let Some(path) = overrides.asy_bin.as_ref() {
            self.render.asy_bin = Some(path.clone());
        }
        if let Some(path) = overrides.xvfb_bin.as_ref() {
            self.render.xvfb_bin = Some(path.clone());
        }
        if let Some(path) = overrides.tex_bin.as_ref() {
            self.render.tex_bin = Some(path.clone());
        }
        if let Some(path) = overrides.scratch_dir.as_ref() {
            self.render.scratch_dir = Some(path.clone());
        }
    }

    fn apply_web_overrides(&mut self, overrides: &WebOverrides) {
        if let Some(url) = overrides.render_service_url.as_ref() {
            self.web.render_service_url = Some(url.clone());
        }
        if let Some(key) = overrides.gemini_api_key.as_ref() {
            self.generation.api_key = Some(key.clone());
        }
        if let Some(dir) = overrides.share_dir.as_ref() {
            self.web.share_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.static_dir.as_ref() {
            self.web.static_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            render,
            web,
            generation,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            render: build_render_settings(render)?,
            web: build_web_settings(web)?,
            generation: build_generation_settings(generation)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let max_body_value = server.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    let max_body_bytes = NonZeroU64::new(max_body_value)
        .ok_or_else(|| LoadError::invalid("server.max_body_bytes", "must be greater than zero"))?;
    usize::try_from(max_body_value).map_err(|_| {
        LoadError::invalid(
            "server.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        max_body_bytes,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let defaults = RenderSettings::default();

    Ok(RenderSettings {
        scratch_dir: non_empty_path(render.scratch_dir).unwrap_or(defaults.scratch_dir),
        manim_bin: non_empty_path(render.manim_bin),
        python_bin: non_empty_path(render.python_bin).unwrap_or(defaults.python_bin),
        venv_dir: non_empty_path(render.venv_dir).unwrap_or(defaults.venv_dir),
        asy_bin: non_empty_path(render.asy_bin).unwrap_or(defaults.asy_bin),
        xvfb_bin: non_empty_path(render.xvfb_bin).unwrap_or(defaults.xvfb_bin),
        latex_bin: non_empty_path(render.latex_bin).unwrap_or(defaults.latex_bin),
        dvisvgm_bin: non_empty_path(render.dvisvgm_bin).unwrap_or(defaults.dvisvgm_bin),
        tex_bin: non_empty_path(render.tex_bin),
    })
}

fn build_web_settings(web: RawWebSettings) -> Result<WebSettings, LoadError> {
    let render_service_url = web
        .render_service_url
        .and_then(|value| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .map(|value| parse_http_url(&value, "web.render_service_url"))
        .transpose()?;

    Ok(WebSettings {
        static_dir: non_empty_path(web.static_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR)),
        share_dir: non_empty_path(web.share_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SHARE_DIR)),
        render_service_url,
    })
}

fn build_generation_settings(
    generation: RawGenerationSettings,
) -> Result<GenerationSettings, LoadError> {
    let api_key = generation.api_key.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let base_url = parse_http_url(
        generation
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_GEMINI_BASE_URL),
        "generation.base_url",
    )?;

    let poll_interval_secs = generation
        .video_poll_interval_seconds
        .unwrap_or(DEFAULT_VIDEO_POLL_INTERVAL_SECS);
    if poll_interval_secs == 0 {
        return Err(LoadError::invalid(
            "generation.video_poll_interval_seconds",
            "must be greater than zero",
        ));
    }
    let poll_timeout_secs = generation
        .video_poll_timeout_seconds
        .unwrap_or(DEFAULT_VIDEO_POLL_TIMEOUT_SECS);
    if poll_timeout_secs < poll_interval_secs {
        return Err(LoadError::invalid(
            "generation.video_poll_timeout_seconds",
            "must not be shorter than the poll interval",
        ));
    }

    Ok(GenerationSettings {
        api_key,
        base_url,
        text_model: generation
            .text_model
            .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
        image_model: generation
            .image_model
            .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
        video_model: generation
            .video_model
            .unwrap_or_else(|| DEFAULT_VIDEO_MODEL.to_string()),
        poll_interval: Duration::from_secs(poll_interval_secs),
        poll_timeout: Duration::from_secs(poll_timeout_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    max_body_bytes: Option<u64>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    scratch_dir: Option<PathBuf>,
    manim_bin: Option<PathBuf>,
    python_bin: Option<PathBuf>,
    venv_dir: Option<PathBuf>,
    asy_bin: Option<PathBuf>,
    xvfb_bin: Option<PathBuf>,
    latex_bin: Option<PathBuf>,
    dvisvgm_bin: Option<PathBuf>,
    tex_bin: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWebSettings {
    static_dir: Option<PathBuf>,
    share_dir: Option<PathBuf>,
    render_service_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGenerationSettings {
    api_key: Option<String>,
    base_url: Option<String>,
    text_model: Option<String>,
    image_model: Option<String>,
    video_model: Option<String>,
    video_poll_interval_seconds: Option<u64>,
    video_poll_timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value)
        .map_err(|err| LoadError::invalid(key, format!("invalid URL `{value}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(LoadError::invalid(
            key,
            format!("unsupported URL scheme `{other}`"),
        )),
    }
}

fn non_empty_path(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|value| !value.as_os_str().is_empty())
}

#[cfg(test)]
mod tests;
