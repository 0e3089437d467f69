//! Translate every speech bubble on one page and save the marked copy
//! Run with: cargo run --release --bin translate_page -- <image_path> [zh-en|ja-en|ko-en]

use anyhow::{Context, Result};
use bubble_translator::{BubblePipeline, Config, PageOutcome};
use std::path::Path;
use tracing::info;

fn main() -> Result<()> {
    let config = Config::new().context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(config.log_filter())
        .with_target(false)
        .init();

    // Get image path and language from args
    let args: Vec<String> = std::env::args().collect();
    let image_path = args.get(1).cloned().unwrap_or_else(|| "demo.png".to_string());
    let language = args.get(2).cloned().unwrap_or_else(|| "zh-en".to_string());

    if !Path::new(&image_path).exists() {
        eprintln!("Image not found: {}", image_path);
        std::process::exit(1);
    }

    info!("Loading image: {}", image_path);
    let image = image::open(&image_path).with_context(|| format!("Failed to open {}", image_path))?;
    info!("Image dimensions: {}x{}", image.width(), image.height());

    let pipeline = BubblePipeline::from_config(&config)?;

    println!("Detecting speech bubbles...");
    let page = match pipeline.process(&image, &language)? {
        PageOutcome::NoDetections => {
            println!("No speech bubbles detected.");
            return Ok(());
        }
        PageOutcome::Translated(page) => page,
    };

    for region in &page.regions {
        println!("\n=== Bubble {} ===", region.id);
        if let Some(error) = &region.error {
            println!("Error: {}", error);
        }
        println!("Extracted text: {}", region.original_text);
        println!("Translated text: {}", region.translated_text);
        if let Some(source) = region.source {
            println!("Context ({}): {}", source.as_str(), region.context);
        }
    }

    println!("\nFinal Translated Texts:");
    for region in &page.regions {
        println!("Bubble {}: {}", region.id, region.translated_text);
    }

    let file_name = Path::new(&image_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("page.png");
    std::fs::create_dir_all(config.output_dir())?;
    let marked_path = Path::new(config.output_dir()).join(format!("marked_{}", file_name));
    page.annotated
        .save(&marked_path)
        .with_context(|| format!("Failed to save {}", marked_path.display()))?;
    println!("\nMarked image: {}", marked_path.display());

    Ok(())
}
