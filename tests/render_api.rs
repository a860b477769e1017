#![cfg(unix)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use mathcanvas::{
    config::RenderSettings,
    infra::http::{RenderState, build_render_router},
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const BODY_LIMIT: usize = 2 * 1024 * 1024;

const FAKE_MANIM: &str = r#"
fmt=mp4
while [ $# -gt 0 ]; do
  case "$1" in
    --format) fmt="$2"; shift ;;
  esac
  shift
done
mkdir -p media/videos/scene/480p15
printf 'fake-%s' "$fmt" > "media/videos/scene/480p15/output.$fmt"
echo "File ready"
"#;

const FAKE_ASY: &str = r#"
fmt=png
while [ $# -gt 0 ]; do
  case "$1" in
    -version) exit 0 ;;
    -f) fmt="$2"; shift ;;
  esac
  shift
done
printf 'asy-%s' "$fmt" > "out.$fmt"
"#;

struct Harness {
    bin: TempDir,
    scratch: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            bin: TempDir::new().expect("bin dir"),
            scratch: TempDir::new().expect("scratch dir"),
        }
    }

    fn tool(&self, name: &str, body: &str) -> PathBuf {
        let path = self.bin.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write fake tool");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod fake tool");
        path
    }

    fn missing(&self, name: &str) -> PathBuf {
        self.bin.path().join(name)
    }

    fn marker(&self, name: &str) -> PathBuf {
        self.bin.path().join(name)
    }

    fn settings(&self) -> RenderSettings {
        RenderSettings {
            scratch_dir: self.scratch.path().to_path_buf(),
            manim_bin: Some(self.tool("manim", FAKE_MANIM)),
            latex_bin: self.tool("latex", "exit 0"),
            dvisvgm_bin: self.tool("dvisvgm", "exit 0"),
            asy_bin: self.tool("asy", FAKE_ASY),
            xvfb_bin: self.missing("xvfb-run"),
            ..RenderSettings::default()
        }
    }

    fn router(&self, settings: RenderSettings) -> Router {
        build_render_router(RenderState::new(&settings), BODY_LIMIT)
    }

    fn scratch_is_empty(&self) -> bool {
        fs::read_dir(self.scratch.path())
            .expect("list scratch dir")
            .next()
            .is_none()
    }
}

async fn post(router: Router, path: &str, body: impl Into<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .expect("request");
    let response = router.oneshot(request).await.expect("router response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    (status, headers, bytes)
}

async fn post_json(router: Router, path: &str, body: Value) -> (StatusCode, HeaderMap, Bytes) {
    post(router, path, body.to_string()).await
}

fn json_body(bytes: &Bytes) -> Value {
    serde_json::from_slice(bytes).expect("json body")
}

fn spawn_marker_script(marker: &Path) -> String {
    format!("touch '{}'\nexit 0\n", marker.display())
}

#[tokio::test]
async fn health_reports_ok() {
    let harness = Harness::new();
    let router = harness.router(harness.settings());
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request");
    let response = router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    assert_eq!(json_body(&bytes), json!({"ok": true}));
}

#[tokio::test]
async fn successful_render_returns_video_and_cleans_up() {
    let harness = Harness::new();
    let router = harness.router(harness.settings());

    let (status, headers, body) = post_json(
        router,
        "/render",
        json!({"code": "from manim import *\nclass GeneratedScene(Scene): pass\n"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert_eq!(body.as_ref(), b"fake-mp4");
    assert!(headers.contains_key("x-request-id"));
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn gif_format_is_honoured() {
    let harness = Harness::new();
    let router = harness.router(harness.settings());

    let (status, headers, body) = post_json(
        router,
        "/render",
        json!({"code": "class Intro(Scene): pass", "scene": "Intro", "format": "gif", "quality": "qh"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/gif");
    assert_eq!(body.as_ref(), b"fake-gif");
}

#[tokio::test]
async fn empty_code_is_rejected_before_any_work() {
    let harness = Harness::new();
    let marker = harness.marker("spawned");
    let settings = RenderSettings {
        manim_bin: Some(harness.tool("manim-marker", &spawn_marker_script(&marker))),
        ..harness.settings()
    };

    let (status, _, body) = post_json(harness.router(settings.clone()), "/render", json!({"code": ""})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json_body(&body)["error"].as_str().is_some());

    let (status, _, body) = post_json(harness.router(settings.clone()), "/render", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["error"], "Missing `code` string");

    let (status, _, _) = post(harness.router(settings), "/render", "not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(!marker.exists(), "renderer must not be spawned");
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn unsupported_options_are_rejected() {
    let harness = Harness::new();

    let (status, _, _) = post_json(
        harness.router(harness.settings()),
        "/render",
        json!({"code": "x", "format": "webm"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = post_json(
        harness.router(harness.settings()),
        "/render",
        json!({"code": "x", "scene": "1; rm -rf /"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = post_json(
        harness.router(harness.settings()),
        "/asy",
        json!({"code": "draw(unitcircle);", "format": "pdf"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tex_usage_without_latex_is_unprocessable() {
    let harness = Harness::new();
    let marker = harness.marker("spawned");
    let settings = RenderSettings {
        manim_bin: Some(harness.tool("manim-marker", &spawn_marker_script(&marker))),
        latex_bin: harness.missing("latex-absent"),
        ..harness.settings()
    };

    let (status, _, body) = post_json(
        harness.router(settings),
        "/render",
        json!({"code": "class S(Scene):\n    def construct(self):\n        self.add(MathTex (r'e^{i\\pi}'))\n", "scene": "S"}),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(&body);
    assert_eq!(body["error"], "LaTeX toolchain not found");
    assert_eq!(body["missing"]["latex"], false);
    assert_eq!(body["missing"]["dvisvgm"], true);
    assert!(!body["hints"].as_array().expect("hints").is_empty());
    assert!(!marker.exists(), "renderer must not be spawned");
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn tex_usage_with_toolchain_renders() {
    let harness = Harness::new();
    let (status, _, _) = post_json(
        harness.router(harness.settings()),
        "/render",
        json!({"code": "Tex('hello')"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn tool_failure_returns_captured_streams() {
    let harness = Harness::new();
    let settings = RenderSettings {
        manim_bin: Some(harness.tool(
            "manim-broken",
            "echo 'Manim Community v0.18'\necho \"NameError: name 'Circel' is not defined\" >&2\nexit 1\n",
        )),
        ..harness.settings()
    };

    let (status, _, body) = post_json(harness.router(settings), "/render", json!({"code": "Circel()"})).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(&body);
    assert_eq!(body["error"], "Render failed");
    assert_eq!(body["code"], 1);
    assert!(body["stdout"].as_str().expect("stdout").contains("Manim Community"));
    assert!(body["stderr"].as_str().expect("stderr").contains("NameError"));
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn missing_artifact_is_a_server_error() {
    let harness = Harness::new();
    let settings = RenderSettings {
        manim_bin: Some(harness.tool("manim-silent", "echo 'nothing to do'\nexit 0\n")),
        ..harness.settings()
    };

    let (status, _, body) = post_json(harness.router(settings), "/render", json!({"code": "pass"})).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(&body);
    assert_eq!(body["error"], "Output file not found");
    assert_eq!(body["stdout"], "nothing to do\n");
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn unstartable_renderer_is_a_server_error() {
    let harness = Harness::new();
    let settings = RenderSettings {
        manim_bin: Some(harness.missing("manim-not-installed")),
        ..harness.settings()
    };

    let (status, _, body) = post_json(harness.router(settings), "/render", json!({"code": "pass"})).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(&body);
    assert_eq!(body["error"], "Failed to start renderer");
    assert!(body["detail"].as_str().is_some());
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn asymptote_absent_is_unprocessable() {
    let harness = Harness::new();
    let settings = RenderSettings {
        asy_bin: harness.missing("asy-absent"),
        ..harness.settings()
    };

    let (status, _, body) = post_json(
        harness.router(settings),
        "/asy",
        json!({"code": "draw(unitcircle);"}),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(&body);
    assert_eq!(body["error"], "Asymptote not found");
    assert!(!body["hints"].as_array().expect("hints").is_empty());
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn asymptote_renders_png_directly() {
    let harness = Harness::new();
    let (status, headers, body) = post_json(
        harness.router(harness.settings()),
        "/asy",
        json!({"code": "draw(unitcircle);"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert_eq!(body.as_ref(), b"asy-png");
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn asymptote_runs_under_display_wrapper_when_available() {
    let harness = Harness::new();
    let marker = harness.marker("wrapped");
    let wrapper = format!(
        "case \"$1\" in --help) exit 0 ;; esac\n[ \"$1\" = \"-a\" ] && shift\ntouch '{}'\nexec \"$@\"\n",
        marker.display()
    );
    let settings = RenderSettings {
        xvfb_bin: harness.tool("xvfb-run", &wrapper),
        ..harness.settings()
    };

    let (status, headers, body) = post_json(
        harness.router(settings),
        "/asy",
        json!({"code": "draw(unitcircle);", "format": "svg"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/svg+xml");
    assert_eq!(body.as_ref(), b"asy-svg");
    assert!(marker.exists(), "asy should run through the wrapper");
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn numbered_asymptote_pages_are_found() {
    let harness = Harness::new();
    let settings = RenderSettings {
        asy_bin: harness.tool(
            "asy-pages",
            "[ \"$1\" = \"-version\" ] && exit 0\nprintf page0 > out-0.svg\nprintf page1 > out-1.svg\n",
        ),
        ..harness.settings()
    };

    let (status, _, body) = post_json(
        harness.router(settings),
        "/asy",
        json!({"code": "newpage();", "format": "svg"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"page0");
}

#[tokio::test]
async fn asymptote_failure_returns_streams_and_cleans_up() {
    let harness = Harness::new();
    let settings = RenderSettings {
        asy_bin: harness.tool(
            "asy-broken",
            "[ \"$1\" = \"-version\" ] && exit 0\necho 'scene.asy: 1.5: syntax error' >&2\nexit 1\n",
        ),
        ..harness.settings()
    };

    let (status, _, body) = post_json(
        harness.router(settings),
        "/asy",
        json!({"code": "draw(unitcircle"}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(&body);
    assert_eq!(body["error"], "Render failed");
    assert_eq!(body["code"], 1);
    assert!(body["stderr"].as_str().expect("stderr").contains("syntax error"));
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn asymptote_without_output_cleans_up() {
    let harness = Harness::new();
    let settings = RenderSettings {
        asy_bin: harness.tool("asy-silent", "[ \"$1\" = \"-version\" ] && exit 0\necho done\n"),
        ..harness.settings()
    };

    let (status, _, body) = post_json(
        harness.router(settings),
        "/asy",
        json!({"code": "draw(unitcircle);"}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(&body)["error"], "Output file not found");
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn unstartable_display_wrapper_cleans_up() {
    let harness = Harness::new();
    // Passes its availability check, then disappears before the render spawns it.
    let settings = RenderSettings {
        xvfb_bin: harness.tool("xvfb-run", "case \"$1\" in --help) rm -f \"$0\"; exit 0 ;; esac\n"),
        ..harness.settings()
    };

    let (status, _, body) = post_json(
        harness.router(settings),
        "/asy",
        json!({"code": "draw(unitcircle);"}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(&body);
    assert_eq!(body["error"], "Failed to start renderer");
    assert!(body["detail"].as_str().is_some());
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn cancelled_wrapped_render_stops_the_wrapped_tool() {
    let harness = Harness::new();
    let finished = harness.marker("asy-finished");
    let settings = RenderSettings {
        xvfb_bin: harness.tool(
            "xvfb-run",
            "case \"$1\" in --help) exit 0 ;; esac\n[ \"$1\" = \"-a\" ] && shift\n\"$@\"\nexit $?\n",
        ),
        asy_bin: harness.tool(
            "asy-slow",
            &format!(
                "[ \"$1\" = \"-version\" ] && exit 0\nsleep 1\ntouch '{}'\nprintf late > out.png\n",
                finished.display()
            ),
        ),
        ..harness.settings()
    };

    let pending = tokio::time::timeout(
        Duration::from_millis(300),
        post_json(harness.router(settings), "/asy", json!({"code": "draw(unitcircle);"})),
    )
    .await;
    assert!(pending.is_err(), "render should still be running");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!finished.exists(), "wrapped tool outlived the cancelled request");
    assert!(harness.scratch_is_empty());
}
