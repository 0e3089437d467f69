// Shared types for the page pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::core::errors::ConfigError;

/// Axis-aligned box in pixel coordinates.
///
/// Valid boxes have `x1 < x2` and `y1 < y2`, but degenerate boxes are still
/// representable so they can flow through consolidation untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    /// Axis-aligned union. The result carries no confidence.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.x1.min(other.x1),
            self.y1.min(other.y1),
            self.x2.max(other.x2),
            self.y2.max(other.y2),
        )
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.x1 >= self.x1 && other.y1 >= self.y1 && other.x2 <= self.x2 && other.y2 <= self.y2
    }

    /// Integer corners, truncated like the pixel crop that consumes them
    pub fn to_pixels(&self) -> [i32; 4] {
        [
            self.x1 as i32,
            self.y1 as i32,
            self.x2 as i32,
            self.y2 as i32,
        ]
    }
}

/// Raw detector output in detector (letterboxed) space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: usize,
}

/// One or more detections merged into a single region
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConsolidatedRegion {
    pub bbox: BoundingBox,
    pub merged_count: usize,
}

/// Supported source→English pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LanguagePair {
    #[serde(rename = "zh-en")]
    ZhEn,
    #[serde(rename = "ja-en")]
    JaEn,
    #[serde(rename = "ko-en")]
    KoEn,
}

/// OCR language used when a pair code is not recognized
pub const FALLBACK_OCR_LANGUAGE: &str = "eng";

impl LanguagePair {
    pub const ALL: [LanguagePair; 3] = [LanguagePair::ZhEn, LanguagePair::JaEn, LanguagePair::KoEn];

    pub fn code(&self) -> &'static str {
        match self {
            LanguagePair::ZhEn => "zh-en",
            LanguagePair::JaEn => "ja-en",
            LanguagePair::KoEn => "ko-en",
        }
    }

    /// Tesseract language pack for the source side
    pub fn ocr_language(&self) -> &'static str {
        match self {
            LanguagePair::ZhEn => "chi_sim",
            LanguagePair::JaEn => "jpn",
            LanguagePair::KoEn => "kor",
        }
    }

    /// ISO code of the source language for the MT service
    pub fn source_code(&self) -> &'static str {
        match self {
            LanguagePair::ZhEn => "zh",
            LanguagePair::JaEn => "ja",
            LanguagePair::KoEn => "ko",
        }
    }

    pub fn target_code(&self) -> &'static str {
        "en"
    }

    /// Human-readable source language, used in LLM prompts
    pub fn source_language(&self) -> &'static str {
        match self {
            LanguagePair::ZhEn => "Chinese",
            LanguagePair::JaEn => "Japanese",
            LanguagePair::KoEn => "Korean",
        }
    }
}

impl FromStr for LanguagePair {
    type Err = ConfigError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let normalized = code.trim().to_ascii_lowercase();
        LanguagePair::ALL
            .into_iter()
            .find(|pair| pair.code() == normalized)
            .ok_or_else(|| ConfigError::UnsupportedLanguagePair(code.to_string()))
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// OCR language for a pair code; unknown codes get the generic fallback
pub fn ocr_language_for(code: &str) -> &'static str {
    code.parse::<LanguagePair>()
        .map(|pair| pair.ocr_language())
        .unwrap_or(FALLBACK_OCR_LANGUAGE)
}

/// Tesseract page segmentation ("layout analysis") modes used by the extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    /// Whatever the engine does when no mode is given
    Default,
    /// Assume a single uniform block of text
    SingleBlock,
    /// Fully automatic page segmentation
    Auto,
    /// Assume a single column of text of variable sizes
    SingleColumn,
}

impl LayoutMode {
    /// Tesseract `--psm` value, `None` leaves the engine default
    pub fn psm(&self) -> Option<u32> {
        match self {
            LayoutMode::Default => None,
            LayoutMode::SingleBlock => Some(6),
            LayoutMode::Auto => Some(3),
            LayoutMode::SingleColumn => Some(4),
        }
    }
}

/// Text pulled out of one region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub language: String,
    /// Mode that produced `text`, or the last mode tried when every mode came back empty
    pub mode: LayoutMode,
    pub attempts: usize,
}

impl ExtractedText {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Which translation path produced the text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranslationSource {
    #[serde(rename = "llm")]
    Llm,
    #[serde(rename = "fallback-mt")]
    FallbackMt,
}

impl TranslationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationSource::Llm => "llm",
            TranslationSource::FallbackMt => "fallback-mt",
        }
    }
}

pub const CONTEXT_NOT_AVAILABLE: &str = "Context not available.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationResult {
    pub translated_text: String,
    pub context: Option<String>,
    pub source: TranslationSource,
}

impl TranslationResult {
    pub fn context_or_default(&self) -> &str {
        match self.context.as_deref() {
            Some(context) if !context.trim().is_empty() => context,
            _ => CONTEXT_NOT_AVAILABLE,
        }
    }
}

/// Pipeline stage a region failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionStage {
    Ocr,
    Translation,
}

/// Per-region failure flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionError {
    pub region_id: usize,
    pub stage: RegionStage,
    pub message: String,
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self.stage {
            RegionStage::Ocr => "OCR",
            RegionStage::Translation => "Translation",
        };
        write!(f, "{} failed for region {}: {}", stage, self.region_id, self.message)
    }
}

/// Final per-region output, in consolidated order
#[derive(Debug, Clone, Serialize)]
pub struct RegionResult {
    /// 1-based position in consolidated order
    pub id: usize,
    pub bbox: BoundingBox,
    pub original_text: String,
    pub translated_text: String,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<TranslationSource>,
    pub ocr_language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_mode: Option<LayoutMode>,
    /// Set when the context path failed and the fallback produced the text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RegionError>,
}

/// Stage timings for one page
#[derive(Debug, Clone, Default)]
pub struct PageTimings {
    pub detection: Duration,
    pub consolidation: Duration,
    pub ocr: Duration,
    pub translation: Duration,
    pub total: Duration,
}

/// A processed page
#[derive(Debug, Clone)]
pub struct PageTranslation {
    pub width: u32,
    pub height: u32,
    pub language: LanguagePair,
    /// Detections before consolidation
    pub detections: usize,
    pub regions: Vec<RegionResult>,
    /// Copy of the page with every region outlined and numbered
    pub annotated: image::RgbImage,
    pub timings: PageTimings,
}

impl PageTranslation {
    pub fn failed_regions(&self) -> usize {
        self.regions.iter().filter(|r| r.error.is_some()).count()
    }
}

/// Result of running the pipeline on one page
#[derive(Debug, Clone)]
pub enum PageOutcome {
    /// The detector found nothing; not an error
    NoDetections,
    Translated(PageTranslation),
}
