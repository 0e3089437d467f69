// Text extraction for bubble crops: preprocessing plus a layout-mode sweep

pub mod preprocess;
pub mod tesseract;

pub use preprocess::{prepare_for_ocr, PreprocessSettings};
pub use tesseract::TesseractCli;

use image::{DynamicImage, GenericImageView, GrayImage};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::core::config::OcrConfig;
use crate::core::errors::OcrResult;
use crate::core::types::{ExtractedText, LayoutMode};

/// An OCR engine that reads one preprocessed image in one layout mode.
///
/// Empty output means "nothing found" and is not an error.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &GrayImage, language: &str, mode: LayoutMode) -> OcrResult<String>;
}

/// Modes retried, in order, when the default mode finds nothing
pub const FALLBACK_MODES: [LayoutMode; 3] = [
    LayoutMode::SingleBlock,
    LayoutMode::Auto,
    LayoutMode::SingleColumn,
];

/// Crops narrower than this on either side are read as empty text
pub const MIN_CROP_SIDE: u32 = 4;

/// Preprocesses a crop and runs the recognizer until some mode yields text
#[derive(Clone)]
pub struct TextExtractor {
    recognizer: Arc<dyn TextRecognizer>,
    settings: PreprocessSettings,
    try_multiple_modes: bool,
}

impl TextExtractor {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        settings: PreprocessSettings,
        try_multiple_modes: bool,
    ) -> Self {
        Self {
            recognizer,
            settings,
            try_multiple_modes,
        }
    }

    pub fn from_config(recognizer: Arc<dyn TextRecognizer>, config: &OcrConfig) -> Self {
        Self::new(recognizer, PreprocessSettings::from(config), config.try_multiple_modes)
    }

    /// Extract text from a bubble crop.
    ///
    /// Tries the default layout mode, then each of [`FALLBACK_MODES`] while the
    /// result is blank. Returns the first non-blank text trimmed, or empty text
    /// when every mode comes back blank. Engine failures abort the sweep.
    /// Slivers under [`MIN_CROP_SIDE`] are not sent to the engine.
    pub fn extract(&self, region: &DynamicImage, language: &str) -> OcrResult<ExtractedText> {
        let (width, height) = region.dimensions();
        if width < MIN_CROP_SIDE || height < MIN_CROP_SIDE {
            debug!("Skipping {}x{} crop, too small for OCR", width, height);
            return Ok(ExtractedText {
                text: String::new(),
                language: language.to_string(),
                mode: LayoutMode::Default,
                attempts: 0,
            });
        }

        let prepared = prepare_for_ocr(region, &self.settings);
        trace!(
            "Prepared OCR input {}x{} (lang={})",
            prepared.width(),
            prepared.height(),
            language
        );

        let fallbacks: &[LayoutMode] = if self.try_multiple_modes {
            &FALLBACK_MODES
        } else {
            &[]
        };

        let mut attempts = 0;
        let mut last_mode = LayoutMode::Default;

        for mode in std::iter::once(LayoutMode::Default).chain(fallbacks.iter().copied()) {
            attempts += 1;
            last_mode = mode;

            let raw = self.recognizer.recognize(&prepared, language, mode)?;
            let text = raw.trim();
            if !text.is_empty() {
                debug!(
                    "OCR found {} chars with {:?} after {} attempt(s)",
                    text.chars().count(),
                    mode,
                    attempts
                );
                return Ok(ExtractedText {
                    text: text.to_string(),
                    language: language.to_string(),
                    mode,
                    attempts,
                });
            }

            trace!("OCR mode {:?} returned no text", mode);
        }

        debug!("OCR found no text after {} attempt(s)", attempts);
        Ok(ExtractedText {
            text: String::new(),
            language: language.to_string(),
            mode: last_mode,
            attempts,
        })
    }
}
