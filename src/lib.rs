// Library exports for the speech-bubble translation pipeline

// Core modules
pub mod core;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use self::core::{
    config::Config,
    errors::{
        ConfigError, DetectionError, GeometryError, ModelLoadError, OcrError, PipelineError,
        ResponseParseError, TranslationError,
    },
    types::{
        BoundingBox, ConsolidatedRegion, Detection, ExtractedText, LanguagePair, LayoutMode,
        PageOutcome, PageTranslation, RegionResult, TranslationResult, TranslationSource,
    },
};

pub use orchestration::{BubblePipeline, PipelineSettings};

pub use services::{
    BubbleDetector, ContextProvider, HttpMachineTranslator, MachineTranslator,
    OllamaContextClient, OnnxBubbleDetector, TesseractCli, TextExtractor, TextRecognizer,
    TranslationOrchestrator, TranslationOutcome,
};

pub use utils::{Annotator, Metrics, load_image_from_memory_async};
