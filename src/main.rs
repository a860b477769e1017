use std::{future::IntoFuture, process, time::Duration};

use axum::Router;
use mathcanvas::{
    application::error::AppError,
    config::{self, Command, ServerSettings, Settings},
    infra::{
        error::InfraError,
        http::{self, RenderState, WebState},
        telemetry,
    },
};
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        Command::Render(_) => run_render(settings).await,
        Command::Web(_) => run_web(settings).await,
    }
}

async fn run_render(settings: Settings) -> Result<(), AppError> {
    info!(
        target = "mathcanvas::render",
        scratch_dir = %settings.render.scratch_dir.display(),
        tex_bin = settings
            .render
            .tex_bin
            .as_ref()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default(),
        "Starting render service"
    );
    let router = http::build_render_router(
        RenderState::new(&settings.render),
        body_limit(&settings.server),
    );
    serve(&settings.server, router, "render").await
}

async fn run_web(settings: Settings) -> Result<(), AppError> {
    if settings.web.render_service_url.is_none() {
        warn!(
            target = "mathcanvas::web",
            "MANIM_SERVICE_URL is not set; render proxy requests will fail"
        );
    }
    if settings.generation.api_key.is_none() {
        warn!(
            target = "mathcanvas::web",
            "GEMINI_API_KEY is not set; generation requests will fail"
        );
    }

    let state = WebState::new(&settings.web, &settings.generation)?;
    let router = http::build_web_router(state, body_limit(&settings.server));
    serve(&settings.server, router, "web").await
}

fn body_limit(server: &ServerSettings) -> usize {
    usize::try_from(server.max_body_bytes.get()).unwrap_or(usize::MAX)
}

async fn serve(server: &ServerSettings, router: Router, service: &'static str) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "mathcanvas::serve",
        service,
        addr = %server.addr,
        "Listening"
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server_future = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .into_future();
    let grace = server.graceful_shutdown;
    let drain_deadline = async move {
        let _ = shutdown_rx.wait_for(|requested| *requested).await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server_future => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = drain_deadline => {
            warn!(
                target = "mathcanvas::serve",
                service,
                grace_ms = duration_ms(grace),
                "In-flight requests did not finish before the shutdown deadline"
            );
        }
    }

    info!(target = "mathcanvas::serve", service, "Stopped");
    Ok(())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "mathcanvas::serve", error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(target = "mathcanvas::serve", error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!(target = "mathcanvas::serve", "Shutdown signal received");
}
