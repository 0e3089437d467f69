pub mod consolidate;
pub mod letterbox;

pub use consolidate::{consolidate, overlap_percent, DEFAULT_OVERLAP_THRESHOLD};
pub use letterbox::{invert, letterbox, LetterboxTransform, DEFAULT_PAD_COLOR};

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, trace};

use crate::core::config::DetectionConfig;
use crate::core::errors::{DetectionError, DetectionResult, ModelLoadError};
use crate::core::types::{BoundingBox, Detection};
use crate::services::onnx_builder;

/// Upper bound on boxes kept after NMS
pub const MAX_DETECTIONS: usize = 1000;

/// Speech-bubble detector working in its own (letterboxed) coordinate space.
///
/// Callers must hand `detect` an image of exactly `input_size()`; boxes come
/// back in that same space.
pub trait BubbleDetector: Send + Sync {
    fn input_size(&self) -> (u32, u32);

    fn detect(&self, image: &RgbImage) -> DetectionResult<Vec<Detection>>;
}

/// YOLOv5-style ONNX bubble detector
pub struct OnnxBubbleDetector {
    // Session::run needs &mut, so inference is serialized per process
    session: Mutex<Session>,
    device_type: String,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl std::fmt::Debug for OnnxBubbleDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxBubbleDetector")
            .field("device_type", &self.device_type)
            .field("input_width", &self.input_width)
            .field("input_height", &self.input_height)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("iou_threshold", &self.iou_threshold)
            .finish_non_exhaustive()
    }
}

impl OnnxBubbleDetector {
    pub fn new(config: &DetectionConfig) -> Result<Self, ModelLoadError> {
        let (device_type, session) = onnx_builder::build_session(
            Path::new(&config.model_path),
            "bubble detector",
            config.inference_backend.as_deref(),
        )?;

        info!(
            "✓ Detection: {} ({}x{} input)",
            device_type, config.input_size, config.input_size
        );

        Ok(Self {
            session: Mutex::new(session),
            device_type,
            input_width: config.input_size,
            input_height: config.input_size,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
        })
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Run the model and copy the raw output out of the session
    fn infer(&self, tensor: Array4<f32>) -> DetectionResult<(Vec<usize>, Vec<f32>)> {
        let images_value = Value::from_array(tensor)?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs!["images" => images_value])?;

        // Exports name the head "output0" (newer) or "output"; otherwise take the first output
        let (shape, data) = if let Some(output) = outputs.get("output0") {
            output.try_extract_tensor::<f32>()?
        } else if let Some(output) = outputs.get("output") {
            output.try_extract_tensor::<f32>()?
        } else {
            let first_key = outputs
                .keys()
                .next()
                .ok_or_else(|| DetectionError::InvalidOutput("model produced no outputs".to_string()))?;
            outputs[first_key].try_extract_tensor::<f32>()?
        };

        let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
        let data: Vec<f32> = data.to_vec();
        Ok((dims, data))
    }
}

impl BubbleDetector for OnnxBubbleDetector {
    fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    fn detect(&self, image: &RgbImage) -> DetectionResult<Vec<Detection>> {
        if image.dimensions() != (self.input_width, self.input_height) {
            return Err(DetectionError::InvalidInput(format!(
                "expected {}x{} image, got {}x{}",
                self.input_width,
                self.input_height,
                image.width(),
                image.height()
            )));
        }

        let start = Instant::now();
        let tensor = to_input_tensor(image);

        debug!("Running ONNX inference on {}...", self.device_type);
        let (dims, data) = self.infer(tensor)?;
        debug!(
            "✓ Inference completed in {:.2}ms, output shape {:?}",
            start.elapsed().as_secs_f64() * 1000.0,
            dims
        );

        let candidates = decode_yolo_output(&dims, &data, self.confidence_threshold)?;
        let kept = nms(candidates, self.iou_threshold, MAX_DETECTIONS);

        debug!(
            "✓ Detection completed in {:.2}ms: {} boxes",
            start.elapsed().as_secs_f64() * 1000.0,
            kept.len()
        );
        Ok(kept)
    }
}

/// NCHW float tensor, RGB scaled to [0, 1]
pub fn to_input_tensor(image: &RgbImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut array = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        array[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        array[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        array[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }

    array
}

/// Decode a `[1, N, 5 + C]` YOLOv5 head into scored xyxy boxes.
///
/// Each row is `cx, cy, w, h, objectness, class scores...`. The score is
/// objectness times the best class score (objectness alone for single-output
/// heads without class columns). Rows below `confidence_threshold` are dropped.
pub fn decode_yolo_output(
    shape: &[usize],
    data: &[f32],
    confidence_threshold: f32,
) -> DetectionResult<Vec<Detection>> {
    let (rows, stride) = match shape {
        [1, rows, stride] if *stride >= 5 => (*rows, *stride),
        _ => {
            return Err(DetectionError::InvalidOutput(format!(
                "expected [1, N, 5 + classes], got {:?}",
                shape
            )))
        }
    };

    if data.len() != rows * stride {
        return Err(DetectionError::InvalidOutput(format!(
            "shape {:?} needs {} values, got {}",
            shape,
            rows * stride,
            data.len()
        )));
    }

    let mut detections = Vec::new();
    for row in data.chunks_exact(stride) {
        let objectness = row[4];
        let (class_id, class_score) = row[5..]
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, 1.0f32), |best, (i, score)| {
                if i == 0 || score > best.1 {
                    (i, score)
                } else {
                    best
                }
            });

        // NaN scores fail this comparison and are dropped
        let score = objectness * class_score;
        if !(score >= confidence_threshold) {
            continue;
        }

        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
            continue;
        }
        let bbox = BoundingBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
            .with_confidence(score);

        trace!(
            "Candidate: [{:.1}, {:.1}, {:.1}, {:.1}] class={} score={:.3}",
            bbox.x1, bbox.y1, bbox.x2, bbox.y2, class_id, score
        );
        detections.push(Detection { bbox, class_id });
    }

    debug!(
        "Decoded {} candidates above confidence threshold {:.2} from {} rows",
        detections.len(),
        confidence_threshold,
        rows
    );
    Ok(detections)
}

pub fn calculate_iou(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    let x1 = box1.x1.max(box2.x1);
    let y1 = box1.y1.max(box2.y1);
    let x2 = box1.x2.min(box2.x2);
    let y2 = box1.y2.min(box2.y2);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = box1.area() + box2.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Per-class greedy NMS, highest confidence first, at most `max_detections` kept
pub fn nms(detections: Vec<Detection>, iou_threshold: f32, max_detections: usize) -> Vec<Detection> {
    if detections.is_empty() {
        debug!("NMS: No detections to filter");
        return vec![];
    }

    trace!(
        "NMS: Processing {} detections with IoU threshold={}",
        detections.len(),
        iou_threshold
    );

    let mut sorted = detections;
    sorted.sort_by(|a, b| {
        let a = a.bbox.confidence.unwrap_or(0.0);
        let b = b.bbox.confidence.unwrap_or(0.0);
        b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; sorted.len()];
    let mut suppressed_count = 0;

    for i in 0..sorted.len() {
        if suppressed[i] {
            continue;
        }
        if keep.len() == max_detections {
            break;
        }

        keep.push(sorted[i]);

        for j in (i + 1)..sorted.len() {
            if !suppressed[j] && sorted[j].class_id == sorted[i].class_id {
                let iou = calculate_iou(&sorted[i].bbox, &sorted[j].bbox);
                if iou > iou_threshold {
                    suppressed[j] = true;
                    suppressed_count += 1;
                    trace!("NMS: Suppressed detection {} (IoU={:.3} with detection {})", j, iou, i);
                }
            }
        }
    }

    debug!(
        "NMS: Kept {}/{} detections (suppressed {})",
        keep.len(),
        sorted.len(),
        suppressed_count
    );
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, conf: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x1, y1, x2, y2).with_confidence(conf),
            class_id: 0,
        }
    }

    #[test]
    fn test_decode_converts_center_format() {
        // Two rows, one class: second row scores 0.5 * 0.2 = 0.1 and is dropped
        let data = [
            100.0, 50.0, 40.0, 20.0, 0.9, 1.0, //
            10.0, 10.0, 4.0, 4.0, 0.5, 0.2,
        ];
        let detections = decode_yolo_output(&[1, 2, 6], &data, 0.25).unwrap();

        assert_eq!(detections.len(), 1);
        let bbox = detections[0].bbox;
        assert_eq!((bbox.x1, bbox.y1, bbox.x2, bbox.y2), (80.0, 40.0, 120.0, 60.0));
        assert!((bbox.confidence.unwrap() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_picks_best_class() {
        let data = [50.0, 50.0, 10.0, 10.0, 0.8, 0.1, 0.7, 0.3];
        let detections = decode_yolo_output(&[1, 1, 8], &data, 0.25).unwrap();

        assert_eq!(detections[0].class_id, 1);
        assert!((detections[0].bbox.confidence.unwrap() - 0.56).abs() < 1e-6);
    }

    #[test]
    fn test_decode_objectness_only_head() {
        let data = [50.0, 50.0, 10.0, 10.0, 0.6];
        let detections = decode_yolo_output(&[1, 1, 5], &data, 0.25).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 0);
    }

    #[test]
    fn test_decode_drops_non_finite_rows() {
        let data = [
            10.0, 10.0, 4.0, 4.0, f32::NAN, 1.0, //
            10.0, 10.0, 4.0, 4.0, 0.9, f32::NAN, //
            f32::NAN, 10.0, 4.0, 4.0, 0.9, 1.0, //
            20.0, 20.0, 4.0, f32::INFINITY, 0.9, 1.0, //
            30.0, 30.0, 4.0, 4.0, 0.9, 1.0,
        ];
        let detections = decode_yolo_output(&[1, 5, 6], &data, 0.25).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox.x1, 28.0);
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        assert!(decode_yolo_output(&[1, 2], &[0.0; 2], 0.25).is_err());
        assert!(decode_yolo_output(&[1, 1, 4], &[0.0; 4], 0.25).is_err());
        assert!(decode_yolo_output(&[1, 2, 6], &[0.0; 6], 0.25).is_err());
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((calculate_iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(calculate_iou(&a, &BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
        assert_eq!(calculate_iou(&a, &a), 1.0);
    }

    #[test]
    fn test_nms_suppresses_overlaps_and_sorts() {
        let detections = vec![
            det(0.0, 0.0, 100.0, 100.0, 0.6),
            det(2.0, 2.0, 102.0, 102.0, 0.9),
            det(300.0, 300.0, 400.0, 400.0, 0.7),
        ];
        let kept = nms(detections, 0.45, MAX_DETECTIONS);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].bbox.confidence, Some(0.9));
        assert_eq!(kept[1].bbox.confidence, Some(0.7));
    }

    #[test]
    fn test_nms_keeps_other_classes() {
        let mut other = det(0.0, 0.0, 100.0, 100.0, 0.5);
        other.class_id = 1;
        let kept = nms(vec![det(0.0, 0.0, 100.0, 100.0, 0.9), other], 0.45, MAX_DETECTIONS);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_nms_respects_max_detections() {
        let detections = (0..10)
            .map(|i| det(i as f32 * 50.0, 0.0, i as f32 * 50.0 + 10.0, 10.0, 0.5))
            .collect();
        assert_eq!(nms(detections, 0.45, 3).len(), 3);
        assert!(nms(vec![], 0.45, 3).is_empty());
    }

    #[test]
    fn test_input_tensor_layout() {
        let mut image = RgbImage::from_pixel(4, 2, Rgb([0, 0, 0]));
        image.put_pixel(3, 1, Rgb([255, 51, 0]));

        let tensor = to_input_tensor(&image);
        assert_eq!(tensor.shape(), &[1, 3, 2, 4]);
        assert_eq!(tensor[[0, 0, 1, 3]], 1.0);
        assert!((tensor[[0, 1, 1, 3]] - 0.2).abs() < 1e-6);
        assert_eq!(tensor[[0, 2, 1, 3]], 0.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
    }
}
