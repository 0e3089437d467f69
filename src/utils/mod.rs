pub mod annotate;
pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use annotate::Annotator;
pub use image_ops::{
    clamp_to_image,
    crop_region,
    load_image_from_memory_async,
    save_image_async,
};
pub use metrics::{Metrics, MetricsSnapshot};
