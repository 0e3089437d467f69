use crate::core::errors::ConfigError;
use image::Rgb;
use std::env;
use std::str::FromStr;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
    pub upload_dir: String,
    pub output_dir: String,
    pub max_upload_mb: usize,
}

/// Detection configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub model_path: String,
    pub inference_backend: Option<String>,
    /// Square letterbox target fed to the detector
    pub input_size: u32,
    pub pad_color: [u8; 3],
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Consolidation threshold, percent of the smaller box
    pub overlap_threshold: f32,
}

/// OCR configuration
#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub tesseract_path: String,
    /// Regions whose narrower side is below this get upscaled
    pub min_dimension: u32,
    pub enhance_factor: f32,
    pub binarize_threshold: u8,
    pub try_multiple_modes: bool,
}

/// Translation collaborators configuration
#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub mt_endpoint: String,
    pub mt_api_key: Option<String>,
    pub ollama_url: String,
    /// Unset disables the context path entirely
    pub ollama_model: Option<String>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub detection: DetectionConfig,
    pub ocr: OcrConfig,
    pub translation: TranslationConfig,
}

/// Parse an optional variable, falling back to `default` when unset.
/// A set but unparsable value is an error rather than a silent default.
fn parse_or<T, F>(get: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::EnvVarError {
                name: name.to_string(),
                value: raw,
            })
        }
        _ => Ok(default),
    }
}

fn string_or<F>(get: &F, name: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    get(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn optional_string<F>(get: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    get(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_with(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build and validate a config from an arbitrary variable lookup
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::load_with(get)?;
        config.validate()?;
        Ok(config)
    }

    fn load_with<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Parse log level
        let log_level = get("LOG_LEVEL")
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        Ok(Self {
            server: ServerConfig {
                port: parse_or(&get, "SERVER_PORT", 5000)?,
                host: string_or(&get, "SERVER_HOST", "0.0.0.0"),
                log_level,
                upload_dir: string_or(&get, "UPLOAD_DIR", "uploads"),
                output_dir: string_or(&get, "OUTPUT_DIR", "outputs"),
                max_upload_mb: parse_or(&get, "MAX_UPLOAD_MB", 50)?,
            },
            detection: DetectionConfig {
                model_path: string_or(&get, "DETECTOR_MODEL_PATH", "models/bubble_detector.onnx"),
                inference_backend: optional_string(&get, "INFERENCE_BACKEND")
                    .map(|s| s.to_uppercase()),
                input_size: parse_or(&get, "DETECTOR_INPUT_SIZE", 1280)?,
                pad_color: [114, 114, 114],
                confidence_threshold: parse_or(&get, "CONFIDENCE_THRESHOLD", 0.25)?,
                iou_threshold: parse_or(&get, "IOU_THRESHOLD", 0.45)?,
                overlap_threshold: parse_or(&get, "OVERLAP_THRESHOLD", 40.0)?,
            },
            ocr: OcrConfig {
                tesseract_path: string_or(&get, "TESSERACT_PATH", "tesseract"),
                min_dimension: parse_or(&get, "OCR_MIN_DIMENSION", 500)?,
                enhance_factor: parse_or(&get, "OCR_ENHANCE_FACTOR", 2.0)?,
                binarize_threshold: parse_or(&get, "OCR_BINARIZE_THRESHOLD", 128)?,
                try_multiple_modes: parse_or(&get, "OCR_TRY_MULTIPLE_MODES", true)?,
            },
            translation: TranslationConfig {
                mt_endpoint: string_or(&get, "MT_ENDPOINT", "http://localhost:5001"),
                mt_api_key: optional_string(&get, "MT_API_KEY"),
                ollama_url: string_or(&get, "OLLAMA_URL", "http://localhost:11434"),
                ollama_model: optional_string(&get, "OLLAMA_MODEL"),
                timeout_seconds: parse_or(&get, "API_TIMEOUT_SECONDS", 60)?,
                max_retries: parse_or(&get, "MAX_RETRIES", 3)?,
            },
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // Validate detection thresholds
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                self.detection.confidence_threshold,
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.iou_threshold) {
            return Err(ConfigError::InvalidIoUThreshold(
                self.detection.iou_threshold,
            ));
        }

        if !(0.0..=100.0).contains(&self.detection.overlap_threshold) {
            return Err(ConfigError::InvalidOverlapThreshold(
                self.detection.overlap_threshold,
            ));
        }

        // Validate detector input size
        if !(320..=4096).contains(&self.detection.input_size) || self.detection.input_size % 32 != 0 {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "input_size must be a multiple of 32 between 320 and 4096, got {}",
                self.detection.input_size
            )));
        }

        // Validate OCR preprocessing
        if self.ocr.min_dimension == 0 {
            return Err(ConfigError::InvalidOcrConfig(
                "min_dimension must be > 0".to_string(),
            ));
        }

        if !(self.ocr.enhance_factor > 0.0 && self.ocr.enhance_factor.is_finite()) {
            return Err(ConfigError::InvalidOcrConfig(format!(
                "enhance_factor must be a positive number, got {}",
                self.ocr.enhance_factor
            )));
        }

        // Validate translation endpoints
        for (name, url) in [
            ("MT_ENDPOINT", &self.translation.mt_endpoint),
            ("OLLAMA_URL", &self.translation.ollama_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidTranslationConfig(format!(
                    "{} must be an http(s) URL, got '{}'",
                    name, url
                )));
            }
        }

        if self.translation.timeout_seconds == 0 {
            return Err(ConfigError::InvalidTranslationConfig(
                "API_TIMEOUT_SECONDS must be > 0".to_string(),
            ));
        }

        if self.server.max_upload_mb == 0 {
            return Err(ConfigError::EnvVarError {
                name: "MAX_UPLOAD_MB".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn upload_dir(&self) -> &str {
        &self.server.upload_dir
    }

    pub fn output_dir(&self) -> &str {
        &self.server.output_dir
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_mb * 1024 * 1024
    }

    pub fn input_size(&self) -> u32 {
        self.detection.input_size
    }

    pub fn pad_color(&self) -> Rgb<u8> {
        Rgb(self.detection.pad_color)
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.detection.confidence_threshold
    }

    pub fn iou_threshold(&self) -> f32 {
        self.detection.iou_threshold
    }

    pub fn overlap_threshold(&self) -> f32 {
        self.detection.overlap_threshold
    }

    pub fn context_model(&self) -> Option<&str> {
        self.translation.ollama_model.as_deref()
    }

    /// Filter directive for tracing_subscriber's EnvFilter
    pub fn log_filter(&self) -> String {
        format!(
            "bubble_translator={},ort=off",
            match self.log_level() {
                Level::TRACE => "trace",
                Level::DEBUG => "debug",
                Level::INFO => "info",
                Level::WARN => "warn",
                Level::ERROR => "error",
            }
        )
    }
}

// Note: No Default implementation because loading can fail.
// Tests build configs through Config::from_lookup.
