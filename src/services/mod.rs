pub mod detection;
pub mod ocr;
pub mod onnx_builder; // Shared ONNX session builder with execution provider fallback
pub mod translation;

// Re-export commonly used services
pub use detection::{BubbleDetector, OnnxBubbleDetector};
pub use ocr::{TesseractCli, TextExtractor, TextRecognizer};
pub use translation::{
    ContextProvider, HttpMachineTranslator, MachineTranslator, OllamaContextClient,
    TranslationOrchestrator, TranslationOutcome,
};
