// Image cleanup applied to every bubble crop before OCR
//
// upscale -> grayscale -> contrast -> sharpness -> binarize

use image::{imageops::FilterType, DynamicImage, GenericImageView, GrayImage, Luma};
use imageproc::filter::filter3x3;
use tracing::trace;

use crate::core::config::OcrConfig;

/// Tunables for [`prepare_for_ocr`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessSettings {
    /// Crops whose narrower side is below this are upscaled to it
    pub min_dimension: u32,
    /// Contrast and sharpness multiplier
    pub enhance_factor: f32,
    /// Luminance below this becomes black, the rest white
    pub binarize_threshold: u8,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            min_dimension: 500,
            enhance_factor: 2.0,
            binarize_threshold: 128,
        }
    }
}

impl From<&OcrConfig> for PreprocessSettings {
    fn from(config: &OcrConfig) -> Self {
        Self {
            min_dimension: config.min_dimension,
            enhance_factor: config.enhance_factor,
            binarize_threshold: config.binarize_threshold,
        }
    }
}

/// Full preprocessing chain. Deterministic for a given input and settings.
pub fn prepare_for_ocr(image: &DynamicImage, settings: &PreprocessSettings) -> GrayImage {
    let upscaled = upscale_to_min_dimension(image, settings.min_dimension);
    let gray = upscaled.to_luma8();
    let contrasted = enhance_contrast(&gray, settings.enhance_factor);
    let sharpened = enhance_sharpness(&contrasted, settings.enhance_factor);
    binarize(&sharpened, settings.binarize_threshold)
}

/// Upscaling never makes either side longer than this
pub const MAX_UPSCALED_SIDE: u32 = 4096;

/// Upscale with Lanczos3 so the narrower side equals `min_dimension`.
///
/// When that would push the longer side past [`MAX_UPSCALED_SIDE`] the scale
/// is reduced so the longer side lands on the cap instead. Images already
/// large enough are returned unchanged.
pub fn upscale_to_min_dimension(image: &DynamicImage, min_dimension: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let narrow = width.min(height);
    let long = width.max(height);
    if narrow == 0 || narrow >= min_dimension || long >= MAX_UPSCALED_SIDE {
        return image.clone();
    }

    let scale = min_dimension as f32 / narrow as f32;
    let long_scaled = (long as f32 * scale).round() as u32;
    let (new_narrow, new_long) = if long_scaled > MAX_UPSCALED_SIDE {
        let capped = MAX_UPSCALED_SIDE as f32 / long as f32;
        (((narrow as f32 * capped).round() as u32).max(1), MAX_UPSCALED_SIDE)
    } else {
        (min_dimension, long_scaled.max(min_dimension))
    };

    let (new_width, new_height) = if width <= height {
        (new_narrow, new_long)
    } else {
        (new_long, new_narrow)
    };

    trace!(
        "Upscaling OCR crop {}x{} -> {}x{}",
        width,
        height,
        new_width,
        new_height
    );
    image.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

/// Mean luminance, rounded to the nearest level
fn mean_luminance(image: &GrayImage) -> f32 {
    let count = image.width() as u64 * image.height() as u64;
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = image.pixels().map(|p| p[0] as u64).sum();
    (sum as f64 / count as f64 + 0.5).floor() as f32
}

fn blend(degenerate: f32, value: f32, factor: f32) -> u8 {
    (degenerate + factor * (value - degenerate)).clamp(0.0, 255.0) as u8
}

/// Push every pixel away from the mean luminance by `factor`
pub fn enhance_contrast(image: &GrayImage, factor: f32) -> GrayImage {
    let mean = mean_luminance(image);
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        pixel[0] = blend(mean, pixel[0] as f32, factor);
    }
    output
}

/// 3x3 smoothing kernel, weight 5 in the center and 1 around it
const SMOOTH_KERNEL: [u32; 9] = [1, 1, 1, 1, 5, 1, 1, 1, 1];
const SMOOTH_SCALE: u32 = 13;

/// Smoothed copy; the one-pixel border is copied unfiltered
fn smooth(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut output = image.clone();
    if width < 3 || height < 3 {
        return output;
    }

    let sums = filter3x3::<Luma<u8>, u32, u32>(image, &SMOOTH_KERNEL);
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let sum = sums.get_pixel(x, y)[0];
            // Round to nearest; sum / 13 never lands on a half
            let value = ((2 * sum + SMOOTH_SCALE) / (2 * SMOOTH_SCALE)).min(255) as u8;
            output.put_pixel(x, y, Luma([value]));
        }
    }
    output
}

/// Extrapolate away from a smoothed copy by `factor`
pub fn enhance_sharpness(image: &GrayImage, factor: f32) -> GrayImage {
    let degenerate = smooth(image);
    let mut output = image.clone();
    for (pixel, smoothed) in output.pixels_mut().zip(degenerate.pixels()) {
        pixel[0] = blend(smoothed[0] as f32, pixel[0] as f32, factor);
    }
    output
}

pub fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        pixel[0] = if pixel[0] < threshold { 0 } else { 255 };
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_small_crop_is_upscaled_to_min_dimension() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(100, 250));
        let upscaled = upscale_to_min_dimension(&image, 500);
        assert_eq!(upscaled.dimensions(), (500, 1250));

        let wide = DynamicImage::ImageRgb8(RgbImage::new(300, 120));
        assert_eq!(upscale_to_min_dimension(&wide, 500).dimensions(), (1250, 500));
    }

    #[test]
    fn test_sliver_crop_upscale_is_capped() {
        let sliver = DynamicImage::ImageRgb8(RgbImage::new(1, 400));
        let upscaled = upscale_to_min_dimension(&sliver, 500);
        assert_eq!(upscaled.dimensions(), (10, MAX_UPSCALED_SIDE));

        let strip = DynamicImage::ImageRgb8(RgbImage::new(3000, 2));
        let (width, height) = upscale_to_min_dimension(&strip, 500).dimensions();
        assert_eq!(width, MAX_UPSCALED_SIDE);
        assert!(height <= MAX_UPSCALED_SIDE);

        // Already at the cap on the long side: left alone
        let tall = DynamicImage::ImageRgb8(RgbImage::new(20, MAX_UPSCALED_SIDE));
        assert_eq!(upscale_to_min_dimension(&tall, 500).dimensions(), (20, MAX_UPSCALED_SIDE));
    }

    #[test]
    fn test_large_crop_is_untouched() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(600, 500));
        assert_eq!(upscale_to_min_dimension(&image, 500).dimensions(), (600, 500));
    }

    #[test]
    fn test_contrast_moves_away_from_mean() {
        // Mean of 100 and 150 is 125
        let mut image = GrayImage::new(2, 1);
        image.put_pixel(0, 0, Luma([100]));
        image.put_pixel(1, 0, Luma([150]));

        let enhanced = enhance_contrast(&image, 2.0);
        assert_eq!(enhanced.get_pixel(0, 0)[0], 75);
        assert_eq!(enhanced.get_pixel(1, 0)[0], 175);

        // Factor 1 is the identity
        assert_eq!(enhance_contrast(&image, 1.0), image);
    }

    #[test]
    fn test_contrast_clamps() {
        let mut image = GrayImage::new(2, 1);
        image.put_pixel(0, 0, Luma([0]));
        image.put_pixel(1, 0, Luma([255]));

        let enhanced = enhance_contrast(&image, 3.0);
        assert_eq!(enhanced.get_pixel(0, 0)[0], 0);
        assert_eq!(enhanced.get_pixel(1, 0)[0], 255);
    }

    #[test]
    fn test_sharpness_keeps_flat_regions_and_borders() {
        let flat = GrayImage::from_pixel(5, 5, Luma([90]));
        assert_eq!(enhance_sharpness(&flat, 2.0), flat);

        // Bright center dot: smoothed center is (5*200 + 8*0)/13 ~ 77, so the
        // sharpened center overshoots to white. Border pixels stay as they were.
        let mut dot = GrayImage::from_pixel(3, 3, Luma([0]));
        dot.put_pixel(1, 1, Luma([200]));
        let sharpened = enhance_sharpness(&dot, 2.0);
        assert_eq!(sharpened.get_pixel(1, 1)[0], 255);
        assert_eq!(sharpened.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_smooth_matches_weighted_mean() {
        // Center: (5*130 + 8*13) / 13 = 58; the border is copied as is
        let mut image = GrayImage::from_pixel(3, 3, Luma([13]));
        image.put_pixel(1, 1, Luma([130]));
        let smoothed = smooth(&image);
        assert_eq!(smoothed.get_pixel(1, 1)[0], 58);
        assert_eq!(smoothed.get_pixel(0, 1)[0], 13);

        // (5*200 + 8*250) / 13 = 230.77 rounds up
        let mut bright = GrayImage::from_pixel(3, 3, Luma([250]));
        bright.put_pixel(1, 1, Luma([200]));
        assert_eq!(smooth(&bright).get_pixel(1, 1)[0], 231);
    }

    #[test]
    fn test_binarize_threshold_boundary() {
        let mut image = GrayImage::new(3, 1);
        image.put_pixel(0, 0, Luma([127]));
        image.put_pixel(1, 0, Luma([128]));
        image.put_pixel(2, 0, Luma([250]));

        let binary = binarize(&image, 128);
        assert_eq!(binary.get_pixel(0, 0)[0], 0);
        assert_eq!(binary.get_pixel(1, 0)[0], 255);
        assert_eq!(binary.get_pixel(2, 0)[0], 255);
    }

    #[test]
    fn test_prepare_is_deterministic_and_binary() {
        let mut crop = RgbImage::from_pixel(40, 20, Rgb([240, 240, 240]));
        for x in 10..30 {
            crop.put_pixel(x, 10, Rgb([20, 20, 20]));
        }
        let crop = DynamicImage::ImageRgb8(crop);
        let settings = PreprocessSettings::default();

        let first = prepare_for_ocr(&crop, &settings);
        let second = prepare_for_ocr(&crop, &settings);

        assert_eq!(first, second);
        assert_eq!(first.dimensions(), (1000, 500));
        assert!(first.pixels().all(|p| p[0] == 0 || p[0] == 255));
        assert!(first.pixels().any(|p| p[0] == 0));
        assert!(first.pixels().any(|p| p[0] == 255));
    }
}
