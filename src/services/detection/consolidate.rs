// Merging of overlapping detections into speech-bubble regions

use tracing::{debug, trace};

use crate::core::types::{BoundingBox, ConsolidatedRegion};

/// Percent of the smaller box that must be covered before two boxes merge
pub const DEFAULT_OVERLAP_THRESHOLD: f32 = 40.0;

/// Intersection area as a percentage of the smaller box's area.
///
/// Returns 0 when the boxes do not intersect on either axis or when either
/// box has zero area.
pub fn overlap_percent(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let smaller = a.area().min(b.area());
    if smaller <= 0.0 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    intersection / smaller * 100.0
}

/// Greedy single-pass consolidation.
///
/// Each box is compared against the accumulated regions in order. The first
/// region whose overlap with the box is strictly above `threshold` is replaced
/// by their union and the scan stops; otherwise the box is appended as a new
/// region.
///
/// Output order is first-appearance order. Because a box only merges into the
/// first match, two accumulated regions that both overlap a later box stay
/// separate, and a grown union is never re-checked against the regions after
/// it. Results therefore depend on input order.
pub fn consolidate(boxes: &[BoundingBox], threshold: f32) -> Vec<ConsolidatedRegion> {
    let mut regions: Vec<ConsolidatedRegion> = Vec::with_capacity(boxes.len());

    for bbox in boxes {
        let target = regions
            .iter()
            .position(|region| overlap_percent(&region.bbox, bbox) > threshold);

        match target {
            Some(index) => {
                let region = &mut regions[index];
                trace!(
                    "Merging box {:?} into region {} ({:.1}% overlap)",
                    bbox,
                    index,
                    overlap_percent(&region.bbox, bbox)
                );
                region.bbox = region.bbox.union(bbox);
                region.merged_count += 1;
            }
            None => regions.push(ConsolidatedRegion {
                bbox: *bbox,
                merged_count: 1,
            }),
        }
    }

    debug!(
        "Consolidated {} boxes into {} regions (threshold {:.1}%)",
        boxes.len(),
        regions.len(),
        threshold
    );

    regions
}
