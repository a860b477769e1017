use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

pub const RENDER_TOTAL: &str = "mathcanvas_render_total";
pub const RENDER_MS: &str = "mathcanvas_render_ms";
pub const PROXY_TOTAL: &str = "mathcanvas_proxy_total";

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            RENDER_TOTAL,
            Unit::Count,
            "Render requests by tool kind and outcome."
        );
        describe_histogram!(
            RENDER_MS,
            Unit::Milliseconds,
            "Wall-clock time of render attempts, workspace setup to cleanup."
        );
        describe_counter!(
            PROXY_TOTAL,
            Unit::Count,
            "Requests relayed to the render service by target and outcome."
        );
    });
}
