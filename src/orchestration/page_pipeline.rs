// Page pipeline: letterbox → detect → invert → consolidate → per-region OCR and translation

use image::{DynamicImage, GenericImageView, Rgb};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{ModelLoadError, OcrError, OcrResult, PipelineResult};
use crate::core::types::{
    BoundingBox, ConsolidatedRegion, ExtractedText, LanguagePair, PageOutcome, PageTimings,
    PageTranslation, RegionError, RegionResult, RegionStage,
};
use crate::services::detection::{
    consolidate, letterbox, BubbleDetector, OnnxBubbleDetector, DEFAULT_OVERLAP_THRESHOLD,
    DEFAULT_PAD_COLOR,
};
use crate::services::ocr::{TesseractCli, TextExtractor};
use crate::services::translation::{TranslationOrchestrator, TranslationOutcome};
use crate::utils::annotate::Annotator;
use crate::utils::image_ops::crop_region;

/// Page-level knobs that are not owned by a collaborator
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub pad_color: Rgb<u8>,
    /// Consolidation threshold, percent of the smaller box
    pub overlap_threshold: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pad_color: DEFAULT_PAD_COLOR,
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
        }
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            pad_color: config.pad_color(),
            overlap_threshold: config.overlap_threshold(),
        }
    }
}

/// Drives one page through detection, OCR and translation.
///
/// Holds only immutable collaborators, so one instance serves every request.
/// Regions are processed one at a time in consolidated order.
#[derive(Clone)]
pub struct BubblePipeline {
    settings: PipelineSettings,
    detector: Arc<dyn BubbleDetector>,
    extractor: TextExtractor,
    translator: TranslationOrchestrator,
    annotator: Annotator,
}

impl BubblePipeline {
    pub fn new(
        settings: PipelineSettings,
        detector: Arc<dyn BubbleDetector>,
        extractor: TextExtractor,
        translator: TranslationOrchestrator,
    ) -> Self {
        Self {
            settings,
            detector,
            extractor,
            translator,
            annotator: Annotator::default(),
        }
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    /// Load the ONNX detector, locate tesseract and build the HTTP clients
    pub fn from_config(config: &Config) -> Result<Self, ModelLoadError> {
        info!("Initializing pipeline...");

        let detector = OnnxBubbleDetector::new(&config.detection)?;
        let recognizer = TesseractCli::new(config.ocr.tesseract_path.clone())?;
        let extractor = TextExtractor::from_config(Arc::new(recognizer), &config.ocr);
        let translator = TranslationOrchestrator::from_config(&config.translation)?;

        info!(
            "✓ Ready (detector: {}, overlap threshold: {}%, context LLM: {})",
            detector.device_type(),
            config.overlap_threshold(),
            config.context_model().unwrap_or("disabled")
        );

        Ok(Self::new(
            PipelineSettings::from(config),
            Arc::new(detector),
            extractor,
            translator,
        )
        .with_annotator(Annotator::with_system_font()))
    }

    /// Whether marked pages carry `Bubble N` labels
    pub fn labels_enabled(&self) -> bool {
        self.annotator.has_font()
    }

    /// Detected bubbles in original image coordinates, detector order, before consolidation
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn detect_boxes(&self, image: &DynamicImage) -> PipelineResult<Vec<BoundingBox>> {
        let (input_width, input_height) = self.detector.input_size();
        let (letterboxed, transform) =
            letterbox(image, input_width, input_height, self.settings.pad_color)?;

        let detections = self.detector.detect(&letterboxed)?;

        let boxes = detections
            .iter()
            .map(|detection| transform.invert(&detection.bbox))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Detected {} bubble(s) (ratio={:.4}, pad=({}, {}))",
            boxes.len(),
            transform.ratio,
            transform.pad_x,
            transform.pad_y
        );
        Ok(boxes)
    }

    /// Detect and consolidate, in consolidated order
    pub fn detect_regions(&self, image: &DynamicImage) -> PipelineResult<Vec<ConsolidatedRegion>> {
        let boxes = self.detect_boxes(image)?;
        Ok(consolidate(&boxes, self.settings.overlap_threshold))
    }

    /// Crop one region (clipped to the page) and read its text
    pub fn extract_region(
        &self,
        image: &DynamicImage,
        region: &BoundingBox,
        ocr_language: &str,
    ) -> OcrResult<ExtractedText> {
        let crop = crop_region(image, region).ok_or(OcrError::EmptyRegion)?;
        self.extractor.extract(&crop, ocr_language)
    }

    /// Run the whole page.
    ///
    /// An unsupported pair code fails before the detector is called. Detector
    /// and geometry failures abort the page; OCR and translation failures are
    /// recorded on the affected region and the remaining regions carry on.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn process(&self, image: &DynamicImage, language_pair: &str) -> PipelineResult<PageOutcome> {
        let pair: LanguagePair = language_pair.parse()?;
        let ocr_language = pair.ocr_language();

        let total_start = Instant::now();
        let mut timings = PageTimings::default();

        let stage_start = Instant::now();
        let boxes = self.detect_boxes(image)?;
        timings.detection = stage_start.elapsed();

        if boxes.is_empty() {
            info!("No speech bubbles detected");
            return Ok(PageOutcome::NoDetections);
        }

        let stage_start = Instant::now();
        let regions = consolidate(&boxes, self.settings.overlap_threshold);
        timings.consolidation = stage_start.elapsed();

        info!(
            "Consolidated {} detection(s) into {} region(s)",
            boxes.len(),
            regions.len()
        );

        let mut results = Vec::with_capacity(regions.len());
        for (index, region) in regions.iter().enumerate() {
            let id = index + 1;

            let stage_start = Instant::now();
            let extracted = self.extract_region(image, &region.bbox, ocr_language);
            timings.ocr += stage_start.elapsed();

            let extracted = match extracted {
                Ok(extracted) => extracted,
                Err(e) => {
                    let error = RegionError {
                        region_id: id,
                        stage: RegionStage::Ocr,
                        message: e.to_string(),
                    };
                    warn!("{}", error);
                    results.push(RegionResult {
                        id,
                        bbox: region.bbox,
                        original_text: String::new(),
                        translated_text: String::new(),
                        context: String::new(),
                        source: None,
                        ocr_language: ocr_language.to_string(),
                        ocr_mode: None,
                        degraded_reason: None,
                        error: Some(error),
                    });
                    continue;
                }
            };

            let stage_start = Instant::now();
            let outcome = self.translator.translate(&extracted.text, pair);
            timings.translation += stage_start.elapsed();

            results.push(region_result(id, region, extracted, outcome));
        }

        let bboxes: Vec<BoundingBox> = regions.iter().map(|r| r.bbox).collect();
        let annotated = self.annotator.annotate(&image.to_rgb8(), &bboxes);

        timings.total = total_start.elapsed();

        let (width, height) = image.dimensions();
        let page = PageTranslation {
            width,
            height,
            language: pair,
            detections: boxes.len(),
            regions: results,
            annotated,
            timings,
        };

        info!(
            "Page done: {} region(s), {} failed, {:.2}s",
            page.regions.len(),
            page.failed_regions(),
            page.timings.total.as_secs_f64()
        );
        Ok(PageOutcome::Translated(page))
    }
}

fn region_result(
    id: usize,
    region: &ConsolidatedRegion,
    extracted: ExtractedText,
    outcome: TranslationOutcome,
) -> RegionResult {
    let mut result = RegionResult {
        id,
        bbox: region.bbox,
        original_text: extracted.text,
        translated_text: String::new(),
        context: String::new(),
        source: None,
        ocr_language: extracted.language,
        ocr_mode: Some(extracted.mode),
        degraded_reason: None,
        error: None,
    };

    match outcome {
        TranslationOutcome::Completed(translation) => {
            result.context = translation.context_or_default().to_string();
            result.translated_text = translation.translated_text;
            result.source = Some(translation.source);
        }
        TranslationOutcome::Degraded {
            result: translation,
            reason,
        } => {
            result.context = translation.context_or_default().to_string();
            result.translated_text = translation.translated_text;
            result.source = Some(translation.source);
            result.degraded_reason = Some(reason);
        }
        TranslationOutcome::Failed(e) => {
            let error = RegionError {
                region_id: id,
                stage: RegionStage::Translation,
                message: e.to_string(),
            };
            warn!("{}", error);
            result.error = Some(error);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::TranslationError;
    use crate::core::types::{LayoutMode, TranslationResult, TranslationSource};

    fn extracted(text: &str) -> ExtractedText {
        ExtractedText {
            text: text.to_string(),
            language: "jpn".to_string(),
            mode: LayoutMode::SingleBlock,
            attempts: 2,
        }
    }

    fn region() -> ConsolidatedRegion {
        ConsolidatedRegion {
            bbox: BoundingBox::new(1.0, 2.0, 30.0, 40.0),
            merged_count: 1,
        }
    }

    #[test]
    fn test_completed_region_fills_context_default() {
        let outcome = TranslationOutcome::Completed(TranslationResult {
            translated_text: "Hello".into(),
            context: None,
            source: TranslationSource::FallbackMt,
        });

        let result = region_result(3, &region(), extracted("こんにちは"), outcome);
        assert_eq!(result.id, 3);
        assert_eq!(result.original_text, "こんにちは");
        assert_eq!(result.translated_text, "Hello");
        assert_eq!(result.context, "Context not available.");
        assert_eq!(result.source, Some(TranslationSource::FallbackMt));
        assert_eq!(result.ocr_mode, Some(LayoutMode::SingleBlock));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_degraded_region_keeps_reason() {
        let outcome = TranslationOutcome::Degraded {
            result: TranslationResult {
                translated_text: "Hello".into(),
                context: None,
                source: TranslationSource::FallbackMt,
            },
            reason: "context request failed".into(),
        };

        let result = region_result(1, &region(), extracted("こんにちは"), outcome);
        assert_eq!(result.degraded_reason.as_deref(), Some("context request failed"));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_failed_translation_is_flagged_on_region() {
        let outcome = TranslationOutcome::Failed(TranslationError::Api {
            status: 400,
            body: "bad".into(),
        });

        let result = region_result(2, &region(), extracted("こんにちは"), outcome);
        assert_eq!(result.original_text, "こんにちは");
        assert!(result.translated_text.is_empty());
        assert!(result.source.is_none());

        let error = result.error.unwrap();
        assert_eq!(error.stage, RegionStage::Translation);
        assert_eq!(error.region_id, 2);
        assert!(error.to_string().starts_with("Translation failed for region 2"));
    }

    #[test]
    fn test_default_settings() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.pad_color, Rgb([114, 114, 114]));
        assert_eq!(settings.overlap_threshold, 40.0);
    }
}
