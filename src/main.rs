// HTTP entry point: page upload, marked image serving, monitoring

use bubble_translator::{
    core::{types::*, Config, PipelineError},
    orchestration::BubblePipeline,
    utils::{load_image_from_memory_async, save_image_async, Metrics},
};

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pipeline: Arc<BubblePipeline>,
    metrics: Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_filter()))
        .init();

    info!("=== BUBBLE TRANSLATOR ===");

    tokio::fs::create_dir_all(config.upload_dir())
        .await
        .with_context(|| format!("Failed to create upload dir {}", config.upload_dir()))?;
    tokio::fs::create_dir_all(config.output_dir())
        .await
        .with_context(|| format!("Failed to create output dir {}", config.output_dir()))?;

    // Model loading and the blocking HTTP clients stay off the async workers
    let pipeline_config = config.clone();
    let pipeline = tokio::task::spawn_blocking(move || BubblePipeline::from_config(&pipeline_config))
        .await
        .context("Pipeline initialization task panicked")??;

    let state = AppState {
        config: config.clone(),
        pipeline: Arc::new(pipeline),
        metrics: Metrics::new(),
    };

    let router = app(state);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /                - Root endpoint");
    info!("  GET  /health          - Health check");
    info!("  GET  /metrics         - Prometheus metrics");
    info!("  GET  /stats           - Detailed statistics");
    info!("  POST /upload          - Translate a page (multipart: file, language)");
    info!("  GET  /outputs/<file>  - Marked pages");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

/// Routes and layers around the shared state
fn app(state: AppState) -> Router {
    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let output_dir = state.config.output_dir().to_string();
    let body_limit = state.config.max_upload_bytes();

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/upload", post(upload_page))
        .nest_service("/outputs", ServeDir::new(output_dir))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn root() -> &'static str {
    "Speech Bubble Translator - POST a page to /upload"
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "context_llm": state.config.context_model(),
        "bubble_labels": state.pipeline.labels_enabled(),
        "languages": LanguagePair::ALL.iter().map(|p| p.code()).collect::<Vec<_>>(),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let snapshot = state.metrics.snapshot();
    serde_json::to_value(snapshot).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })
}

#[derive(Debug, Serialize)]
struct BubbleResponse {
    bubble_id: usize,
    text: String,
    translated_text: String,
    context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<TranslationSource>,
    bbox: [f32; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&RegionResult> for BubbleResponse {
    fn from(region: &RegionResult) -> Self {
        Self {
            bubble_id: region.id,
            text: region.original_text.clone(),
            translated_text: region.translated_text.clone(),
            context: region.context.clone(),
            source: region.source,
            bbox: [region.bbox.x1, region.bbox.y1, region.bbox.x2, region.bbox.y2],
            error: region.error.as_ref().map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    message: String,
    filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    marked_image: Option<String>,
    bubbles: Vec<BubbleResponse>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

/// Upload a page and translate every speech bubble on it
///
/// # Request Format:
/// - multipart/form-data
/// - Field "file": the page image (PNG/JPEG/WebP)
/// - Field "language": one of zh-en, ja-en, ko-en
///
/// # Response:
/// - UploadResponse JSON, bubbles in reading (consolidated) order
async fn upload_page(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let start_time = Instant::now();

    info!("Received upload request");

    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut language = String::new();

    // Parse multipart form
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Read error: {}", e)))?;
                upload = Some((filename, data.to_vec()));
            }
            "language" => {
                language = field
                    .text()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Read error: {}", e)))?;
            }
            _ => {}
        }
    }

    let Some((original_name, data)) = upload else {
        return Err(api_error(StatusCode::BAD_REQUEST, "No file provided"));
    };
    if original_name.trim().is_empty() || data.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No selected file"));
    }

    if let Err(e) = language.parse::<LanguagePair>() {
        return Err(api_error(StatusCode::BAD_REQUEST, e.to_string()));
    }

    let filename = stored_filename(&original_name);
    let upload_path = Path::new(state.config.upload_dir()).join(&filename);
    tokio::fs::write(&upload_path, &data).await.map_err(|e| {
        error!("Failed to save upload {}: {}", upload_path.display(), e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save upload")
    })?;

    let image = load_image_from_memory_async(&data)
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid image: {:#}", e)))?;

    // The pipeline blocks on the detector, tesseract and HTTP collaborators
    let pipeline = state.pipeline.clone();
    let outcome = tokio::task::spawn_blocking(move || pipeline.process(&image, &language))
        .await
        .map_err(|e| {
            error!("Pipeline task panicked: {:?}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Processing task failed")
        })?;

    let page = match outcome {
        Ok(PageOutcome::Translated(page)) => page,
        Ok(PageOutcome::NoDetections) => {
            state.metrics.record_no_detections(start_time.elapsed());
            return Ok(Json(UploadResponse {
                message: "No speech bubbles detected.".to_string(),
                filename,
                marked_image: None,
                bubbles: Vec::new(),
            }));
        }
        Err(e) => {
            state.metrics.record_page_failure();
            error!("Pipeline failed at {} stage: {}", e.stage(), e);
            let status = match e {
                PipelineError::Configuration(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            return Err((
                status,
                Json(serde_json::json!({ "error": e.to_string(), "stage": e.stage() })),
            ));
        }
    };

    state.metrics.record_page(&page);

    let marked_name = format!("marked_{}", filename);
    let marked_path: PathBuf = Path::new(state.config.output_dir()).join(&marked_name);
    let bubbles: Vec<BubbleResponse> = page.regions.iter().map(BubbleResponse::from).collect();

    save_image_async(DynamicImage::ImageRgb8(page.annotated), marked_path)
        .await
        .map_err(|e| {
            error!("Failed to save marked image: {:#}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save marked image")
        })?;

    if page.regions.iter().any(|r| r.error.is_some()) {
        warn!("{} bubble(s) failed on {}", bubbles.iter().filter(|b| b.error.is_some()).count(), filename);
    }

    info!(
        "Request completed in {:.2}s: {} bubble(s)",
        start_time.elapsed().as_secs_f64(),
        bubbles.len()
    );

    Ok(Json(UploadResponse {
        message: "Processing complete".to_string(),
        filename,
        marked_image: Some(format!("outputs/{}", marked_name)),
        bubbles,
    }))
}

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// Name an upload is stored under: a per-request prefix plus the sanitized
/// client name, so concurrent uploads of `page.png` never share a file.
fn stored_filename(original: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let seq = UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}_{}", millis, seq, sanitize_filename(original))
}

fn clean_part(part: &str) -> String {
    part.chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '-') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect()
}

/// Reduce an uploaded filename to a safe basename.
///
/// Keeps ASCII letters, digits, `_` and `-` in the stem and extension;
/// whitespace becomes `_`. A stem with nothing left becomes `upload`. Names
/// the image crate cannot infer a format from get a `.png` suffix so the
/// marked copy can be written.
fn sanitize_filename(name: &str) -> String {
    let basename = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, extension) = basename.rsplit_once('.').unwrap_or((basename, ""));

    let stem = clean_part(stem);
    let stem = if stem.is_empty() { "upload".to_string() } else { stem };
    let extension = clean_part(extension);

    let cleaned = if extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, extension)
    };

    if ImageFormat::from_path(&cleaned).is_ok() {
        cleaned
    } else {
        format!("{}.png", cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use bubble_translator::core::errors::{DetectionError, DetectionResult, OcrResult};
    use bubble_translator::services::ocr::PreprocessSettings;
    use bubble_translator::services::{
        BubbleDetector, MachineTranslator, TextExtractor, TextRecognizer, TranslationOrchestrator,
    };
    use bubble_translator::orchestration::PipelineSettings;
    use image::{GrayImage, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use tower::ServiceExt;

    const BOUNDARY: &str = "bubble-test-boundary";

    /// Detector with a 64x64 input; a 64x64 page maps onto it unchanged
    struct StaticDetector {
        boxes: Vec<[f32; 4]>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl BubbleDetector for StaticDetector {
        fn input_size(&self) -> (u32, u32) {
            (64, 64)
        }

        fn detect(&self, _image: &RgbImage) -> DetectionResult<Vec<Detection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DetectionError::InvalidOutput("truncated output".into()));
            }
            Ok(self
                .boxes
                .iter()
                .map(|&[x1, y1, x2, y2]| Detection {
                    bbox: BoundingBox::new(x1, y1, x2, y2).with_confidence(0.9),
                    class_id: 0,
                })
                .collect())
        }
    }

    struct FixedRecognizer;

    impl TextRecognizer for FixedRecognizer {
        fn recognize(&self, _image: &GrayImage, _language: &str, _mode: LayoutMode) -> OcrResult<String> {
            Ok("你好".to_string())
        }
    }

    struct TaggingMachine;

    impl MachineTranslator for TaggingMachine {
        fn translate(
            &self,
            text: &str,
            pair: LanguagePair,
        ) -> Result<String, bubble_translator::TranslationError> {
            Ok(format!("{}:{}", pair.source_code(), text))
        }
    }

    struct TestServer {
        app: Router,
        detector: Arc<StaticDetector>,
        _dirs: (tempfile::TempDir, tempfile::TempDir),
    }

    fn test_server(boxes: &[[f32; 4]], fail: bool) -> TestServer {
        let uploads = tempfile::tempdir().unwrap();
        let outputs = tempfile::tempdir().unwrap();
        let upload_dir = uploads.path().to_string_lossy().into_owned();
        let output_dir = outputs.path().to_string_lossy().into_owned();
        let config = Config::from_lookup(move |name| match name {
            "UPLOAD_DIR" => Some(upload_dir.clone()),
            "OUTPUT_DIR" => Some(output_dir.clone()),
            _ => None,
        })
        .unwrap();

        let detector = Arc::new(StaticDetector {
            boxes: boxes.to_vec(),
            fail,
            calls: AtomicUsize::new(0),
        });
        let extractor = TextExtractor::new(
            Arc::new(FixedRecognizer),
            PreprocessSettings {
                min_dimension: 32,
                ..PreprocessSettings::default()
            },
            false,
        );
        let pipeline = BubblePipeline::new(
            PipelineSettings::default(),
            detector.clone(),
            extractor,
            TranslationOrchestrator::new(Arc::new(TaggingMachine), None),
        );

        let state = AppState {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            metrics: Metrics::new(),
        };

        TestServer {
            app: app(state),
            detector,
            _dirs: (uploads, outputs),
        }
    }

    fn page_png() -> Vec<u8> {
        let page = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([255, 255, 255])));
        let mut bytes = Vec::new();
        page.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        bytes
    }

    fn upload_request(file: Option<(&str, &[u8])>, language: Option<&str>) -> Request<Body> {
        let mut body = Vec::new();
        if let Some(language) = language {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"language\"\r\n\r\n{language}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((filename, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_upload_translates_each_bubble() {
        let server = test_server(&[[8.0, 8.0, 40.0, 40.0]], false);
        let png = page_png();

        let (status, json) = send(
            server.app.clone(),
            upload_request(Some(("page 1.png", &png)), Some("zh-en")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Processing complete");
        assert!(json["filename"].as_str().unwrap().ends_with("_page_1.png"));
        assert!(json["marked_image"].as_str().unwrap().starts_with("outputs/marked_"));

        let bubbles = json["bubbles"].as_array().unwrap();
        assert_eq!(bubbles.len(), 1);
        assert_eq!(bubbles[0]["bubble_id"], 1);
        assert_eq!(bubbles[0]["text"], "你好");
        assert_eq!(bubbles[0]["translated_text"], "zh:你好");
        assert_eq!(bubbles[0]["context"], "Context not available.");
        assert_eq!(bubbles[0]["source"], "fallback-mt");
        assert_eq!(bubbles[0]["bbox"], serde_json::json!([8.0, 8.0, 40.0, 40.0]));
    }

    #[tokio::test]
    async fn test_upload_without_file_is_bad_request() {
        let server = test_server(&[], false);

        let (status, json) = send(server.app.clone(), upload_request(None, Some("zh-en"))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No file provided");
        assert_eq!(server.detector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upload_with_unsupported_language_is_bad_request() {
        let server = test_server(&[[8.0, 8.0, 40.0, 40.0]], false);
        let png = page_png();

        let (status, json) = send(
            server.app.clone(),
            upload_request(Some(("page.png", &png)), Some("fr-en")),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("fr-en"));
        assert_eq!(server.detector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upload_with_no_bubbles() {
        let server = test_server(&[], false);
        let png = page_png();

        let (status, json) = send(
            server.app.clone(),
            upload_request(Some(("page.png", &png)), Some("ja-en")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "No speech bubbles detected.");
        assert_eq!(json["bubbles"], serde_json::json!([]));
        assert!(json.get("marked_image").is_none());
    }

    #[tokio::test]
    async fn test_detector_failure_names_stage() {
        let server = test_server(&[], true);
        let png = page_png();

        let (status, json) = send(
            server.app.clone(),
            upload_request(Some(("page.png", &png)), Some("ko-en")),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["stage"], "detection");
        assert!(json["error"].as_str().unwrap().starts_with("Detection stage failed"));
    }

    #[tokio::test]
    async fn test_health_reports_label_font() {
        let server = test_server(&[], false);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let (status, json) = send(server.app.clone(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["bubble_labels"], false);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("page 01.png"), "page_01.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd.png");
        assert_eq!(sanitize_filename("C:\\scans\\chapter1.JPG"), "chapter1.JPG");
        assert_eq!(sanitize_filename("ページ.png"), "upload.png");
        assert_eq!(sanitize_filename("..."), "upload.png");
        assert_eq!(sanitize_filename("page"), "page.png");
    }

    #[test]
    fn test_stored_filenames_are_unique() {
        let first = stored_filename("page.png");
        let second = stored_filename("page.png");
        assert_ne!(first, second);
        assert!(first.ends_with("_page.png"));
    }
}
