// Error types for the bubble translation pipeline
//
// One thiserror enum per concern. Request-level errors (geometry, detection,
// model loading, configuration) abort a page; region-level errors (OCR,
// translation) are recorded on the region and processing continues.

use thiserror::Error;

/// Letterbox / coordinate transform errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Cannot letterbox an empty image ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("Letterbox ratio must be positive and finite, got {0}")]
    InvalidRatio(f32),
}

/// Model / collaborator initialization errors
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("Detector model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Failed to create ONNX session for {path}: {source}")]
    Session {
        path: String,
        #[source]
        source: ort::Error,
    },

    #[error("Inference backend '{0}' is not available in this build")]
    BackendUnavailable(String),

    #[error("Unknown inference backend '{0}'. Valid options: TENSORRT, CUDA, OPENVINO, DIRECTML, COREML, CPU, AUTO")]
    UnknownBackend(String),

    #[error("OCR engine unavailable: {0}")]
    OcrEngine(#[from] OcrError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Detector inference errors
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("ONNX inference failed: {0}")]
    Inference(#[from] ort::Error),

    #[error("Detector input rejected: {0}")]
    InvalidInput(String),

    #[error("Unexpected detector output: {0}")]
    InvalidOutput(String),
}

/// OCR engine errors. "No text found" is not an error.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine '{binary}' could not be started: {source}")]
    EngineUnavailable {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OCR language pack '{language}' is not installed")]
    LanguageUnavailable { language: String },

    #[error("OCR engine exited with status {status}: {stderr}")]
    EngineFailed { status: i32, stderr: String },

    #[error("Region is empty after clipping to the image")]
    EmptyRegion,

    #[error("OCR I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode region for OCR: {0}")]
    Image(#[from] image::ImageError),
}

/// Translation collaborator errors (machine translation and context LLM)
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Translation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Translation API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid translation response: {0}")]
    InvalidResponse(String),
}

/// Context response could not be split into translation and context
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResponseParseError {
    #[error("response has no \"Translation\" marker")]
    MissingTranslationMarker,

    #[error("response has no \"Context\" marker after the translation")]
    MissingContextMarker,

    #[error("response has an empty translation")]
    EmptyTranslation,
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unsupported language pair '{0}' (expected one of: zh-en, ja-en, ko-en)")]
    UnsupportedLanguagePair(String),

    #[error("Invalid detection config: {0}")]
    InvalidDetectionConfig(String),

    #[error("Invalid OCR config: {0}")]
    InvalidOcrConfig(String),

    #[error("Invalid translation config: {0}")]
    InvalidTranslationConfig(String),

    #[error("Confidence threshold must be in [0.0, 1.0], got {0}")]
    InvalidConfidenceThreshold(f32),

    #[error("IoU threshold must be in [0.0, 1.0], got {0}")]
    InvalidIoUThreshold(f32),

    #[error("Overlap threshold must be in [0, 100] percent, got {0}")]
    InvalidOverlapThreshold(f32),

    #[error("Environment variable {name} has an invalid value '{value}'")]
    EnvVarError { name: String, value: String },
}

/// Page-level errors. Display names the stage that failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration stage failed: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Geometry stage failed: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Detection stage failed: {0}")]
    Detection(#[from] DetectionError),

    #[error("Model loading failed: {0}")]
    ModelLoad(#[from] ModelLoadError),
}

impl PipelineError {
    /// Short stage name for responses and metrics
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Geometry(_) => "geometry",
            PipelineError::Detection(_) => "detection",
            PipelineError::ModelLoad(_) => "model_load",
        }
    }
}

// Convenience type aliases for Results
pub type GeometryResult<T> = Result<T, GeometryError>;
pub type DetectionResult<T> = Result<T, DetectionError>;
pub type OcrResult<T> = Result<T, OcrError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
