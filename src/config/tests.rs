use super::*;
use std::path::Path;

use serial_test::serial;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServerOverrides {
        port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_server_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_cover_every_toolchain_binary() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.server.max_body_bytes.get(), DEFAULT_MAX_BODY_BYTES);
    assert_eq!(settings.render.python_bin, PathBuf::from("python3"));
    assert_eq!(settings.render.asy_bin, PathBuf::from("asy"));
    assert_eq!(settings.render.xvfb_bin, PathBuf::from("xvfb-run"));
    assert!(settings.render.manim_bin.is_none());
    assert!(settings.render.tex_bin.is_none());
    assert!(settings.web.render_service_url.is_none());
    assert!(settings.generation.api_key.is_none());
    assert_eq!(settings.generation.poll_interval, Duration::from_secs(8));
    assert_eq!(settings.generation.poll_timeout, Duration::from_secs(300));
}

#[test]
fn empty_values_fall_back_to_defaults() {
    let mut raw = RawSettings::default();
    raw.render.manim_bin = Some(PathBuf::new());
    raw.render.asy_bin = Some(PathBuf::new());
    raw.web.render_service_url = Some("   ".to_string());
    raw.generation.api_key = Some(String::new());

    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(settings.render.manim_bin.is_none());
    assert_eq!(settings.render.asy_bin, PathBuf::from(DEFAULT_ASY_BIN));
    assert!(settings.web.render_service_url.is_none());
    assert!(settings.generation.api_key.is_none());
}

#[test]
fn render_service_url_must_be_http() {
    let mut raw = RawSettings::default();
    raw.web.render_service_url = Some("ftp://renderer".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid scheme");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "web.render_service_url",
            ..
        }
    ));
}

#[test]
fn poll_timeout_shorter_than_interval_is_rejected() {
    let mut raw = RawSettings::default();
    raw.generation.video_poll_interval_seconds = Some(10);
    raw.generation.video_poll_timeout_seconds = Some(5);

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServerOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_server_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
#[serial]
fn parse_render_arguments() {
    let args = CliArgs::parse_from([
        "mathcanvas",
        "render",
        "--port",
        "9000",
        "--manim-bin",
        "/opt/manim/bin/manim",
        "--tex-bin",
        "/usr/local/texlive/bin",
    ]);

    match args.command {
        Command::Render(render) => {
            assert_eq!(render.server.port, Some(9000));
            assert_eq!(
                render.render.manim_bin.as_deref(),
                Some(Path::new("/opt/manim/bin/manim"))
            );
            assert_eq!(
                render.render.tex_bin.as_deref(),
                Some(Path::new("/usr/local/texlive/bin"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
#[serial]
fn parse_web_arguments() {
    let args = CliArgs::parse_from([
        "mathcanvas",
        "web",
        "--render-service-url",
        "http://renderer:8000",
        "--share-dir",
        "/var/lib/shares",
    ]);

    match args.command {
        Command::Web(web) => {
            let mut raw = RawSettings::default();
            raw.apply_server_overrides(&web.server);
            raw.apply_web_overrides(&web.web);
            let settings = Settings::from_raw(raw).expect("valid settings");
            assert_eq!(
                settings
                    .web
                    .render_service_url
                    .as_ref()
                    .map(|url| url.as_str()),
                Some("http://renderer:8000/")
            );
            assert_eq!(settings.web.share_dir, PathBuf::from("/var/lib/shares"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
#[serial]
fn flat_environment_variables_feed_cli_overrides() {
    // SAFETY: serialised with the other environment-mutating tests.
    unsafe {
        std::env::set_var("MANIM_BIN", "/env/manim");
        std::env::set_var("ASY_BIN", "/env/asy");
        std::env::set_var("PORT", "7070");
    }

    let args = CliArgs::parse_from(["mathcanvas", "render"]);

    unsafe {
        std::env::remove_var("MANIM_BIN");
        std::env::remove_var("ASY_BIN");
        std::env::remove_var("PORT");
    }

    match args.command {
        Command::Render(render) => {
            assert_eq!(render.server.port, Some(7070));
            assert_eq!(
                render.render.manim_bin.as_deref(),
                Some(Path::new("/env/manim"))
            );
            assert_eq!(render.render.asy_bin.as_deref(), Some(Path::new("/env/asy")));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
#[serial]
fn prefixed_environment_is_layered_below_cli() {
    unsafe {
        std::env::set_var("MATHCANVAS__RENDER__ASY_BIN", "/layered/asy");
        std::env::set_var("MATHCANVAS__RENDER__PYTHON_BIN", "/layered/python");
    }

    let args = CliArgs::parse_from(["mathcanvas", "render", "--asy-bin", "/cli/asy"]);
    let result = load(&args);

    unsafe {
        std::env::remove_var("MATHCANVAS__RENDER__ASY_BIN");
        std::env::remove_var("MATHCANVAS__RENDER__PYTHON_BIN");
    }

    let settings = result.expect("valid settings");
    assert_eq!(settings.render.asy_bin, PathBuf::from("/cli/asy"));
    assert_eq!(settings.render.python_bin, PathBuf::from("/layered/python"));
}
