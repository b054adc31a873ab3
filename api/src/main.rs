mod capture;
mod render;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use capture::FrameSource;
use kernel_lab_common::config::{Config, PipelineConfig, RenderConfig};
use kernel_lab_common::frame::CapturedFrame;
use kernel_lab_filter::{FilterError, FilterPipeline};
use render::RenderError;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    source: FrameSource,
    pipeline: PipelineConfig,
    render: RenderConfig,
    /// Requests served so far; offsets the configured seed.
    requests: AtomicU64,
}

#[derive(Debug, thiserror::Error)]
enum PageError {
    #[error("filtering failed: {0}")]
    Filter(#[from] FilterError),
    #[error("rendering failed: {0}")]
    Render(#[from] RenderError),
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET / — capture one frame, filter it with every kernel, render the gallery.
async fn index(State(state): State<Arc<AppState>>) -> Response {
    let start = Instant::now();
    let frame = match state.source.capture().await {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, source = %state.source.describe(), "frame capture failed");
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };

    let request = state.requests.fetch_add(1, Ordering::Relaxed);
    let pipeline = state.pipeline.clone();
    let render_config = state.render.clone();
    let result = tokio::task::spawn_blocking(move || {
        filter_and_render(&frame, &pipeline, request, &render_config)
    })
    .await;

    match result {
        Ok(Ok(html)) => {
            info!(
                request,
                bytes = html.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "served filter gallery"
            );
            Html(html).into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "failed to build filter gallery");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /health
async fn health() -> &'static str {
    "ok"
}

/// CPU-bound part of a request: convolutions plus JPEG/base64 encoding.
fn filter_and_render(
    frame: &CapturedFrame,
    pipeline: &PipelineConfig,
    request: u64,
    render_config: &RenderConfig,
) -> Result<String, PageError> {
    let results = FilterPipeline::from_config(pipeline, request).run(&frame.pixels)?;
    Ok(render::render_page(&results, frame, render_config)?)
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let source = match FrameSource::from_config(&config.camera) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "invalid camera configuration");
            std::process::exit(1);
        }
    };

    info!(
        camera_mode = config.camera.mode,
        camera = %source.describe(),
        parallel = config.pipeline.parallel,
        seeded = config.pipeline.seed.is_some(),
        "starting kernel-lab API"
    );

    let state = Arc::new(AppState {
        source,
        pipeline: config.pipeline.clone(),
        render: config.render.clone(),
        requests: AtomicU64::new(0),
    });

    let addr = config.listen_addr();
    info!(addr, "kernel-lab API server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app(state)).await {
        error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use image::{GrayImage, ImageFormat, Luma};
    use kernel_lab_common::config::CameraConfig;
    use std::io::Cursor;
    use tower::ServiceExt;

    fn state_for(path: PathBuf) -> Arc<AppState> {
        let camera = CameraConfig {
            mode: "file".into(),
            path: Some(path),
            ..CameraConfig::default()
        };
        Arc::new(AppState {
            source: FrameSource::from_config(&camera).unwrap(),
            pipeline: PipelineConfig {
                parallel: true,
                seed: Some(1),
            },
            render: RenderConfig::default(),
            requests: AtomicU64::new(0),
        })
    }

    fn random_card(body: &str) -> &str {
        let start = body.find("<h3>Random</h3>").unwrap();
        let end = body[start..].find("</div>").unwrap();
        &body[start..start + end]
    }

    fn write_png(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("kernel-lab-{name}-{}.png", std::process::id()));
        let img = GrayImage::from_fn(12, 9, |x, y| Luma([((x * 20 + y * 7) % 256) as u8]));
        let mut encoded = Cursor::new(Vec::new());
        img.write_to(&mut encoded, ImageFormat::Png).unwrap();
        std::fs::write(&path, encoded.into_inner()).unwrap();
        path
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn index_renders_every_kernel() {
        let path = write_png("index");
        let (status, body) = get_body(app(state_for(path.clone())), "/").await;
        std::fs::remove_file(&path).ok();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.matches("<h3>").count(), 6);
        assert!(body.contains("<h3>Identity</h3>"));
        assert!(body.contains("<h3>Random</h3>"));
        assert!(body.contains("12x9 frame from"));
    }

    #[tokio::test]
    async fn seeded_requests_get_a_fresh_random_kernel() {
        let path = write_png("seeded");
        let state = state_for(path.clone());
        let (_, first) = get_body(app(state.clone()), "/").await;
        let (_, second) = get_body(app(state.clone()), "/").await;
        let (_, replayed) = get_body(app(state_for(path.clone())), "/").await;
        std::fs::remove_file(&path).ok();

        assert_eq!(state.requests.load(Ordering::Relaxed), 2);
        assert_ne!(random_card(&first), random_card(&second));
        assert_eq!(random_card(&first), random_card(&replayed));
    }

    #[tokio::test]
    async fn capture_failure_is_service_unavailable() {
        let state = state_for(PathBuf::from("/nonexistent/kernel-lab-frame.png"));
        let (status, body) = get_body(app(state), "/").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.starts_with("cannot open camera"));
    }

    #[tokio::test]
    async fn health_is_ok() {
        let state = state_for(PathBuf::from("/nonexistent/kernel-lab-frame.png"));
        let (status, body) = get_body(app(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[test]
    fn empty_frame_is_a_filter_error() {
        let frame = CapturedFrame::new(
            kernel_lab_common::frame::PixelBuffer::from_vec(0, 0, Vec::new()).unwrap(),
            0,
            "test",
        );
        let err = filter_and_render(&frame, &PipelineConfig::default(), 0, &RenderConfig::default())
            .unwrap_err();
        assert!(matches!(err, PageError::Filter(FilterError::EmptyBuffer { .. })));
    }
}
