use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use std::path::PathBuf;

use crate::core::types::BoundingBox;

/// Pixel rectangle `(x, y, width, height)` of `bbox` clipped to a
/// `width` x `height` image. Coordinates are truncated toward zero.
/// Returns `None` when nothing of the box lies inside the image.
pub fn clamp_to_image(bbox: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let [x1, y1, x2, y2] = bbox.to_pixels();
    let x1 = x1.clamp(0, width as i32) as u32;
    let y1 = y1.clamp(0, height as i32) as u32;
    let x2 = x2.clamp(0, width as i32) as u32;
    let y2 = y2.clamp(0, height as i32) as u32;

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1, y1, x2 - x1, y2 - y1))
}

/// Crop `bbox` out of `img`, clipped to its bounds
pub fn crop_region(img: &DynamicImage, bbox: &BoundingBox) -> Option<DynamicImage> {
    let (width, height) = img.dimensions();
    clamp_to_image(bbox, width, height).map(|(x, y, w, h)| img.crop_imm(x, y, w, h))
}

/// Asynchronously load an image from bytes using spawn_blocking.
///
/// Image decoding is CPU-intensive, especially for large pages.
pub async fn load_image_from_memory_async(bytes: &[u8]) -> Result<DynamicImage> {
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes).context("Failed to load image from memory")
    })
    .await
    .context("Failed to spawn blocking task for image loading")?
}

/// Asynchronously save an image, format chosen from the file extension
pub async fn save_image_async(img: DynamicImage, path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        img.save(&path)
            .with_context(|| format!("Failed to save image to {}", path.display()))
    })
    .await
    .context("Failed to spawn blocking task for image saving")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    #[test]
    fn test_crop_is_clamped_to_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(100, 80));

        let bbox = BoundingBox::new(-20.0, 10.7, 150.0, 60.2);
        assert_eq!(clamp_to_image(&bbox, 100, 80), Some((0, 10, 100, 50)));

        let cropped = crop_region(&img, &bbox).unwrap();
        assert_eq!(cropped.dimensions(), (100, 50));
    }

    #[test]
    fn test_crop_outside_image_is_none() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(100, 80));
        assert!(crop_region(&img, &BoundingBox::new(120.0, 0.0, 200.0, 50.0)).is_none());
        assert!(crop_region(&img, &BoundingBox::new(10.0, 10.0, 10.5, 50.0)).is_none());
    }

    #[tokio::test]
    async fn test_load_image_async() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([255, 0, 0, 255])));
        let mut png_bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png).unwrap();

        let loaded = load_image_from_memory_async(&png_bytes).await.unwrap();
        assert_eq!(loaded.dimensions(), (1, 1));

        assert!(load_image_from_memory_async(b"not an image").await.is_err());
    }

    #[tokio::test]
    async fn test_save_image_async() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marked_page.png");
        let img = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));

        save_image_async(img, path.clone()).await.unwrap();
        assert!(path.exists());
    }
}
