pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    ConfigError, DetectionError, GeometryError, ModelLoadError, OcrError, PipelineError,
    ResponseParseError, TranslationError,
};
pub use types::{
    BoundingBox, ConsolidatedRegion, Detection, ExtractedText, LanguagePair, LayoutMode,
    PageOutcome, PageTranslation, RegionResult, TranslationResult, TranslationSource,
};
