// Marked page rendering: every region outlined and numbered

use ab_glyph::FontVec;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::image_ops::clamp_to_image;
use crate::core::types::BoundingBox;

const OUTLINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const SYSTEM_FONT_PATHS: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Draws region outlines and `Bubble {n}` labels.
///
/// Labels need a font; without one only the outlines are drawn.
#[derive(Clone)]
pub struct Annotator {
    font: Option<Arc<FontVec>>,
    font_scale: f32,
    thickness: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            font_scale: 24.0,
            thickness: 2,
        }
    }
}

impl Annotator {
    pub fn with_font_path(font_path: &Path) -> anyhow::Result<Self> {
        let font_data = std::fs::read(font_path)?;
        let font = FontVec::try_from_vec(font_data)
            .map_err(|_| anyhow::anyhow!("Failed to parse font file: {}", font_path.display()))?;

        Ok(Self {
            font: Some(Arc::new(font)),
            ..Self::default()
        })
    }

    /// Use the first readable font from the usual system locations
    pub fn with_system_font() -> Self {
        for path in SYSTEM_FONT_PATHS {
            if let Ok(annotator) = Self::with_font_path(Path::new(path)) {
                info!("Loaded label font: {}", path);
                return annotator;
            }
        }

        warn!(
            "No label font found in {:?}; marked pages will carry outlines without Bubble N labels",
            SYSTEM_FONT_PATHS
        );
        Self::default()
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Copy of `image` with region `i` outlined and labelled `Bubble {i + 1}`
    pub fn annotate(&self, image: &RgbImage, regions: &[BoundingBox]) -> RgbImage {
        let mut marked = image.clone();
        let (width, height) = marked.dimensions();

        for (index, bbox) in regions.iter().enumerate() {
            let Some((x, y, w, h)) = clamp_to_image(bbox, width, height) else {
                continue;
            };

            for t in 0..self.thickness {
                // Grow inward so the outline stays on the canvas
                if w <= 2 * t || h <= 2 * t {
                    break;
                }
                let rect = Rect::at((x + t) as i32, (y + t) as i32).of_size(w - 2 * t, h - 2 * t);
                draw_hollow_rect_mut(&mut marked, rect, OUTLINE_COLOR);
            }

            if let Some(font) = &self.font {
                let label = format!("Bubble {}", index + 1);
                let label_y = (y as f32 - self.font_scale - 2.0).max(0.0) as i32;
                draw_text_mut(
                    &mut marked,
                    OUTLINE_COLOR,
                    x as i32,
                    label_y,
                    self.font_scale,
                    &**font,
                    &label,
                );
            }
        }

        marked
    }
}
