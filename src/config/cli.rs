use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the mathcanvas binary.
#[derive(Debug, Parser)]
#[command(
    name = "mathcanvas",
    version,
    about = "Render service and web proxy for the math animation playground"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "MATHCANVAS_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the render service (Manim and Asymptote endpoints).
    Render(Box<RenderArgs>),
    /// Run the web service (static app, shares, generation and render proxies).
    Web(Box<WebArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub server: ServerOverrides,

    #[command(flatten)]
    pub render: RenderOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WebArgs {
    #[command(flatten)]
    pub server: ServerOverrides,

    #[command(flatten)]
    pub web: WebOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServerOverrides {
    /// Override the listener host.
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Override the listener port.
    #[arg(long = "port", env = "PORT", value_name = "PORT")]
    pub port: Option<u16>,

    /// Override the maximum accepted request body size in bytes.
    #[arg(long = "max-body-bytes", value_name = "BYTES")]
    pub max_body_bytes: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Explicit Manim executable; takes precedence over the virtualenv and `python -m manim`.
    #[arg(long = "manim-bin", env = "MANIM_BIN", value_name = "PATH")]
    pub manim_bin: Option<PathBuf>,

    /// Python interpreter used for `python -m manim`.
    #[arg(long = "python-bin", env = "PYTHON_BIN", value_name = "PATH")]
    pub python_bin: Option<PathBuf>,

    /// Virtualenv directory probed for a bundled `bin/manim`.
    #[arg(long = "venv-dir", value_name = "PATH")]
    pub venv_dir: Option<PathBuf>,

    /// Asymptote compiler executable.
    #[arg(long = "asy-bin", env = "ASY_BIN", value_name = "PATH")]
    pub asy_bin: Option<PathBuf>,

    /// Virtual display wrapper used for headless Asymptote renders.
    #[arg(long = "xvfb-bin", env = "XVFB_BIN", value_name = "PATH")]
    pub xvfb_bin: Option<PathBuf>,

    /// Directory holding `latex` and `dvisvgm`, searched before `PATH`.
    #[arg(long = "tex-bin", env = "TEXBIN", value_name = "DIR")]
    pub tex_bin: Option<PathBuf>,

    /// Directory in which per-request scratch workspaces are created.
    #[arg(long = "scratch-dir", value_name = "DIR")]
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WebOverrides {
    /// Base URL of the render service used by the proxy endpoints.
    #[arg(long = "render-service-url", env = "MANIM_SERVICE_URL", value_name = "URL")]
    pub render_service_url: Option<String>,

    /// API key for the generative-AI endpoints.
    #[arg(
        long = "gemini-api-key",
        env = "GEMINI_API_KEY",
        value_name = "KEY",
        hide_env_values = true
    )]
    pub gemini_api_key: Option<String>,

    /// Directory where shared snapshots are stored.
    #[arg(long = "share-dir", env = "SHARE_DIR", value_name = "DIR")]
    pub share_dir: Option<PathBuf>,

    /// Directory holding the single-page app.
    #[arg(long = "static-dir", value_name = "DIR")]
    pub static_dir: Option<PathBuf>,
}
