// Letterbox resize for the detector and the inverse coordinate transform

use image::{imageops, DynamicImage, GenericImageView, Rgb, RgbImage};
use tracing::trace;

use crate::core::errors::{GeometryError, GeometryResult};
use crate::core::types::BoundingBox;

/// Gray used by YOLO-family detectors for padding
pub const DEFAULT_PAD_COLOR: Rgb<u8> = Rgb([114, 114, 114]);

/// Scale and padding applied by [`letterbox`], needed to map detector
/// coordinates back onto the original image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    pub ratio: f32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub target_width: u32,
    pub target_height: u32,
}

impl LetterboxTransform {
    /// Map a detector-space box back to original image space
    pub fn invert(&self, bbox: &BoundingBox) -> GeometryResult<BoundingBox> {
        invert(bbox, self.ratio, self.pad_x, self.pad_y)
    }

    /// Map an original-space box into detector space
    pub fn forward(&self, bbox: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x1: bbox.x1 * self.ratio + self.pad_x as f32,
            y1: bbox.y1 * self.ratio + self.pad_y as f32,
            x2: bbox.x2 * self.ratio + self.pad_x as f32,
            y2: bbox.y2 * self.ratio + self.pad_y as f32,
            confidence: bbox.confidence,
        }
    }
}

/// Resize `image` to fit a `target_width` x `target_height` canvas without
/// distorting it, padding the rest with `pad_color`.
///
/// `ratio = min(Th/H, Tw/W)`, so small images are scaled up. Padding is
/// `(T - resized) / 2` with integer division: when the slack is odd the extra
/// pixel of padding ends up on the right/bottom edge.
pub fn letterbox(
    image: &DynamicImage,
    target_width: u32,
    target_height: u32,
    pad_color: Rgb<u8>,
) -> GeometryResult<(RgbImage, LetterboxTransform)> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || target_width == 0 || target_height == 0 {
        return Err(GeometryError::EmptyImage { width, height });
    }

    let ratio = (target_height as f32 / height as f32).min(target_width as f32 / width as f32);
    if !(ratio > 0.0 && ratio.is_finite()) {
        return Err(GeometryError::InvalidRatio(ratio));
    }

    let resized_width = ((width as f32 * ratio).round() as u32).clamp(1, target_width);
    let resized_height = ((height as f32 * ratio).round() as u32).clamp(1, target_height);

    let pad_x = (target_width - resized_width) / 2;
    let pad_y = (target_height - resized_height) / 2;

    trace!(
        "Letterbox {}x{} -> {}x{} (ratio={:.4}, resized={}x{}, pad=({}, {}))",
        width, height, target_width, target_height, ratio, resized_width, resized_height, pad_x, pad_y
    );

    let resized = if resized_width == width && resized_height == height {
        image.to_rgb8()
    } else {
        image
            .resize_exact(resized_width, resized_height, imageops::FilterType::Triangle)
            .to_rgb8()
    };

    let mut canvas = RgbImage::from_pixel(target_width, target_height, pad_color);
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    Ok((
        canvas,
        LetterboxTransform {
            ratio,
            pad_x,
            pad_y,
            target_width,
            target_height,
        },
    ))
}

/// `x' = (x - pad_x) / ratio`, `y' = (y - pad_y) / ratio` for both corners.
pub fn invert(bbox: &BoundingBox, ratio: f32, pad_x: u32, pad_y: u32) -> GeometryResult<BoundingBox> {
    if !(ratio > 0.0 && ratio.is_finite()) {
        return Err(GeometryError::InvalidRatio(ratio));
    }

    let pad_x = pad_x as f32;
    let pad_y = pad_y as f32;

    Ok(BoundingBox {
        x1: (bbox.x1 - pad_x) / ratio,
        y1: (bbox.y1 - pad_y) / ratio,
        x2: (bbox.x2 - pad_x) / ratio,
        y2: (bbox.y2 - pad_y) / ratio,
        confidence: bbox.confidence,
    })
}
