// src/pipeline/metrics.rs
//
// Counters for the continuous detection loop. Shared between the
// acquisition thread and the processing loop; every field is atomic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub frames_acquired: Arc<AtomicU64>,
    pub frames_processed: Arc<AtomicU64>,
    pub frames_skipped: Arc<AtomicU64>,
    pub frames_skipped_busy: Arc<AtomicU64>,
    pub frames_overwritten: Arc<AtomicU64>,
    pub detection_failures: Arc<AtomicU64>,
    pub detection_time_us: Arc<AtomicU64>,
    pub last_detection_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_acquired: Arc::new(AtomicU64::new(0)),
            frames_processed: Arc::new(AtomicU64::new(0)),
            frames_skipped: Arc::new(AtomicU64::new(0)),
            frames_skipped_busy: Arc::new(AtomicU64::new(0)),
            frames_overwritten: Arc::new(AtomicU64::new(0)),
            detection_failures: Arc::new(AtomicU64::new(0)),
            detection_time_us: Arc::new(AtomicU64::new(0)),
            last_detection_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set(&self, counter: &AtomicU64, value: u64) {
        counter.store(value, Ordering::Relaxed);
    }

    /// Count one finished detection and its duration.
    pub fn record_detection(&self, duration_us: u64) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.detection_time_us.fetch_add(duration_us, Ordering::Relaxed);
        self.last_detection_us.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let processed = self.frames_processed.load(Ordering::Relaxed);
        let total_us = self.detection_time_us.load(Ordering::Relaxed);
        MetricsSummary {
            frames_acquired: self.frames_acquired.load(Ordering::Relaxed),
            frames_processed: processed,
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            frames_skipped_busy: self.frames_skipped_busy.load(Ordering::Relaxed),
            frames_overwritten: self.frames_overwritten.load(Ordering::Relaxed),
            detection_failures: self.detection_failures.load(Ordering::Relaxed),
            fps: self.fps(),
            avg_detection_us: if processed > 0 { total_us / processed } else { 0 },
            last_detection_us: self.last_detection_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_acquired: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub frames_skipped_busy: u64,
    pub frames_overwritten: u64,
    pub detection_failures: u64,
    pub fps: f64,
    pub avg_detection_us: u64,
    pub last_detection_us: u64,
    pub elapsed_secs: f64,
}
