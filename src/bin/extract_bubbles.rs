//! Crop every detected bubble of every page in a directory and OCR it
//! Run with: cargo run --release --bin extract_bubbles -- <input_dir> <crop_dir> <text_dir> [zh-en|ja-en|ko-en]
//!
//! Writes `{image}_bubble_{i}.png` and `{image}_bubble_{i}.txt` per detection.
//! Nothing is translated.

use anyhow::{bail, Context, Result};
use bubble_translator::core::types::ocr_language_for;
use bubble_translator::utils::crop_region;
use bubble_translator::{BubblePipeline, Config};
use image::ImageFormat;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn main() -> Result<()> {
    let config = Config::new().context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(config.log_filter())
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        bail!("usage: {} <input_dir> <crop_dir> <text_dir> [language_pair]", args[0]);
    }
    let input_dir = Path::new(&args[1]);
    let crop_dir = Path::new(&args[2]);
    let text_dir = Path::new(&args[3]);
    let ocr_language = ocr_language_for(args.get(4).map(String::as_str).unwrap_or("zh-en"));

    fs::create_dir_all(crop_dir)?;
    fs::create_dir_all(text_dir)?;

    let pipeline = BubblePipeline::from_config(&config)?;

    let mut pages: Vec<PathBuf> = fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read {}", input_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && ImageFormat::from_path(path).is_ok())
        .collect();
    pages.sort();

    info!("Extracting bubbles from {} page(s) (lang={})", pages.len(), ocr_language);

    let mut total = 0;
    for page_path in &pages {
        let name = page_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("page");

        let image = match image::open(page_path) {
            Ok(image) => image,
            Err(e) => {
                warn!("Skipping {}: {}", page_path.display(), e);
                continue;
            }
        };

        let boxes = pipeline.detect_boxes(&image)?;
        info!("{}: {} bubble(s)", name, boxes.len());

        for (i, bbox) in boxes.iter().enumerate() {
            let Some(crop) = crop_region(&image, bbox) else {
                warn!("{} bubble {} lies outside the page, skipped", name, i);
                continue;
            };
            crop.save(crop_dir.join(format!("{}_bubble_{}.png", name, i)))?;

            let text = match pipeline.extract_region(&image, bbox, ocr_language) {
                Ok(extracted) => extracted.text,
                Err(e) => {
                    warn!("{} bubble {}: {}", name, i, e);
                    String::new()
                }
            };
            fs::write(text_dir.join(format!("{}_bubble_{}.txt", name, i)), text)?;
            total += 1;
        }
    }

    println!("Extracted {} bubble(s) from {} page(s)", total, pages.len());
    Ok(())
}
