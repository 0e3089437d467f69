use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::types::{PageTranslation, RegionStage, TranslationSource};

/// Durations kept per stage; averages and percentiles cover this window
pub const DURATION_WINDOW: usize = 1024;

/// Server-level metrics collector.
///
/// Counts pages, regions and translation paths, and keeps the most recent
/// [`DURATION_WINDOW`] durations per stage. Cheap to clone; the pipeline
/// never reads it.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Page Metrics
    pages_processed: AtomicUsize,
    pages_without_detections: AtomicUsize,
    pages_failed: AtomicUsize,

    // Region Metrics
    regions_processed: AtomicUsize,
    ocr_failures: AtomicUsize,
    translations_llm: AtomicUsize,
    translations_fallback: AtomicUsize,
    translations_degraded: AtomicUsize,
    translation_failures: AtomicUsize,

    // Stage Metrics
    detection_duration_ms: RwLock<VecDeque<u64>>,
    consolidation_duration_ms: RwLock<VecDeque<u64>>,
    ocr_duration_ms: RwLock<VecDeque<u64>>,
    translation_duration_ms: RwLock<VecDeque<u64>>,
    total_duration_ms: RwLock<VecDeque<u64>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                pages_processed: AtomicUsize::new(0),
                pages_without_detections: AtomicUsize::new(0),
                pages_failed: AtomicUsize::new(0),
                regions_processed: AtomicUsize::new(0),
                ocr_failures: AtomicUsize::new(0),
                translations_llm: AtomicUsize::new(0),
                translations_fallback: AtomicUsize::new(0),
                translations_degraded: AtomicUsize::new(0),
                translation_failures: AtomicUsize::new(0),
                detection_duration_ms: RwLock::new(VecDeque::with_capacity(DURATION_WINDOW)),
                consolidation_duration_ms: RwLock::new(VecDeque::with_capacity(DURATION_WINDOW)),
                ocr_duration_ms: RwLock::new(VecDeque::with_capacity(DURATION_WINDOW)),
                translation_duration_ms: RwLock::new(VecDeque::with_capacity(DURATION_WINDOW)),
                total_duration_ms: RwLock::new(VecDeque::with_capacity(DURATION_WINDOW)),
                start_time: Instant::now(),
            }),
        }
    }

    /// Record a translated page: its regions, their outcomes and the stage timings
    pub fn record_page(&self, page: &PageTranslation) {
        let inner = &self.inner;
        inner.pages_processed.fetch_add(1, Ordering::Relaxed);
        inner
            .regions_processed
            .fetch_add(page.regions.len(), Ordering::Relaxed);

        for region in &page.regions {
            match region.error.as_ref().map(|e| e.stage) {
                Some(RegionStage::Ocr) => {
                    inner.ocr_failures.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Some(RegionStage::Translation) => {
                    inner.translation_failures.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                None => {}
            }

            match region.source {
                Some(TranslationSource::Llm) => {
                    inner.translations_llm.fetch_add(1, Ordering::Relaxed);
                }
                Some(TranslationSource::FallbackMt) => {
                    inner.translations_fallback.fetch_add(1, Ordering::Relaxed);
                }
                None => {}
            }
            if region.degraded_reason.is_some() {
                inner.translations_degraded.fetch_add(1, Ordering::Relaxed);
            }
        }

        let timings = &page.timings;
        push_ms(&inner.detection_duration_ms, timings.detection);
        push_ms(&inner.consolidation_duration_ms, timings.consolidation);
        push_ms(&inner.ocr_duration_ms, timings.ocr);
        push_ms(&inner.translation_duration_ms, timings.translation);
        push_ms(&inner.total_duration_ms, timings.total);
    }

    pub fn record_no_detections(&self, duration: Duration) {
        self.inner.pages_processed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .pages_without_detections
            .fetch_add(1, Ordering::Relaxed);
        push_ms(&self.inner.total_duration_ms, duration);
    }

    pub fn record_page_failure(&self) {
        self.inner.pages_failed.fetch_add(1, Ordering::Relaxed);
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;

        let total_durations = inner.total_duration_ms.read();
        let page_latency_avg = avg(&total_durations);
        let page_latency_p50 = percentile(&total_durations, 0.5);
        let page_latency_p95 = percentile(&total_durations, 0.95);
        let page_latency_p99 = percentile(&total_durations, 0.99);
        drop(total_durations);

        let llm = inner.translations_llm.load(Ordering::Relaxed);
        let fallback = inner.translations_fallback.load(Ordering::Relaxed);
        let llm_rate = if llm + fallback > 0 {
            llm as f64 / (llm + fallback) as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            pages_processed: inner.pages_processed.load(Ordering::Relaxed),
            pages_without_detections: inner.pages_without_detections.load(Ordering::Relaxed),
            pages_failed: inner.pages_failed.load(Ordering::Relaxed),
            regions_processed: inner.regions_processed.load(Ordering::Relaxed),
            ocr_failures: inner.ocr_failures.load(Ordering::Relaxed),
            translations_llm: llm,
            translations_fallback: fallback,
            translations_degraded: inner.translations_degraded.load(Ordering::Relaxed),
            translation_failures: inner.translation_failures.load(Ordering::Relaxed),
            llm_translation_rate: llm_rate,
            detection_avg_ms: avg(&inner.detection_duration_ms.read()),
            consolidation_avg_ms: avg(&inner.consolidation_duration_ms.read()),
            ocr_avg_ms: avg(&inner.ocr_duration_ms.read()),
            translation_avg_ms: avg(&inner.translation_duration_ms.read()),
            page_latency_avg_ms: page_latency_avg,
            page_latency_p50_ms: page_latency_p50,
            page_latency_p95_ms: page_latency_p95,
            page_latency_p99_ms: page_latency_p99,
            uptime_seconds: inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP pages_processed_total Pages run through the pipeline
# TYPE pages_processed_total counter
pages_processed_total {{}} {}

# HELP pages_without_detections_total Pages where no speech bubble was detected
# TYPE pages_without_detections_total counter
pages_without_detections_total {{}} {}

# HELP pages_failed_total Pages aborted by a pipeline-level error
# TYPE pages_failed_total counter
pages_failed_total {{}} {}

# HELP regions_processed_total Consolidated regions processed
# TYPE regions_processed_total counter
regions_processed_total {{}} {}

# HELP region_failures_total Regions that failed, by stage
# TYPE region_failures_total counter
region_failures_total {{stage="ocr"}} {}
region_failures_total {{stage="translation"}} {}

# HELP translations_total Successful region translations, by source
# TYPE translations_total counter
translations_total {{source="llm"}} {}
translations_total {{source="fallback-mt"}} {}

# HELP translations_degraded_total Regions where the context path failed and MT stepped in
# TYPE translations_degraded_total counter
translations_degraded_total {{}} {}

# HELP stage_avg_duration_ms Average stage duration in milliseconds
# TYPE stage_avg_duration_ms gauge
stage_avg_duration_ms {{stage="detection"}} {}
stage_avg_duration_ms {{stage="consolidation"}} {}
stage_avg_duration_ms {{stage="ocr"}} {}
stage_avg_duration_ms {{stage="translation"}} {}

# HELP page_latency_avg_ms Average page latency in milliseconds
# TYPE page_latency_avg_ms gauge
page_latency_avg_ms {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            snapshot.pages_processed,
            snapshot.pages_without_detections,
            snapshot.pages_failed,
            snapshot.regions_processed,
            snapshot.ocr_failures,
            snapshot.translation_failures,
            snapshot.translations_llm,
            snapshot.translations_fallback,
            snapshot.translations_degraded,
            snapshot.detection_avg_ms,
            snapshot.consolidation_avg_ms,
            snapshot.ocr_avg_ms,
            snapshot.translation_avg_ms,
            snapshot.page_latency_avg_ms,
            snapshot.uptime_seconds,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub pages_processed: usize,
    pub pages_without_detections: usize,
    pub pages_failed: usize,
    pub regions_processed: usize,
    pub ocr_failures: usize,
    pub translations_llm: usize,
    pub translations_fallback: usize,
    pub translations_degraded: usize,
    pub translation_failures: usize,
    pub llm_translation_rate: f64,
    pub detection_avg_ms: u64,
    pub consolidation_avg_ms: u64,
    pub ocr_avg_ms: u64,
    pub translation_avg_ms: u64,
    pub page_latency_avg_ms: u64,
    pub page_latency_p50_ms: u64,
    pub page_latency_p95_ms: u64,
    pub page_latency_p99_ms: u64,
    pub uptime_seconds: u64,
}

fn push_ms(values: &RwLock<VecDeque<u64>>, duration: Duration) {
    let mut values = values.write();
    if values.len() == DURATION_WINDOW {
        values.pop_front();
    }
    values.push_back(duration.as_millis() as u64);
}

fn percentile(values: &VecDeque<u64>, p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted: Vec<u64> = values.iter().copied().collect();
    sorted.sort_unstable();
    let idx = ((sorted.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &VecDeque<u64>) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
