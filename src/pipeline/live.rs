// src/pipeline/live.rs
//
// Continuous (webcam-like) detection.
//
//   acquisition thread:  source.next_frame() → LatestFrameSlot (newest wins)
//   processing loop:     slot.take() → frame_skip → InferenceGate → detect
//                        → renderer → sink
//
// The acquisition thread never waits on detection. Frames that arrive while
// the previous one is unread are overwritten and counted, never queued.

use super::metrics::{MetricsSummary, PipelineMetrics};
use crate::detector::{Detection, GrassDetector};
use crate::frame_buffer::{InferenceGate, LatestFrameSlot};
use crate::interface::{FrameSource, OverlayRenderer};
use crate::types::{Config, DetectionMethod, Mode};
use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub method: DetectionMethod,
    pub mode: Mode,
    /// Process every Nth frame taken from the slot.
    pub frame_skip: u32,
    /// Sleep of the processing loop when the slot is empty.
    pub idle_wait: Duration,
}

impl LiveSettings {
    /// Configured method in realtime mode.
    pub fn from_config(config: &Config) -> Self {
        Self {
            method: config.detection.default_method,
            mode: Mode::Realtime,
            frame_skip: config.realtime.frame_skip.max(1),
            idle_wait: Duration::from_millis(2),
        }
    }
}

/// One processed frame handed to the sink.
pub struct LiveFrame {
    pub frame_id: u64,
    pub detection: Detection,
    pub rendered: RgbImage,
}

pub struct LiveDetectionLoop<'d> {
    detector: &'d GrassDetector,
    settings: LiveSettings,
    slot: Arc<LatestFrameSlot<RgbImage>>,
    gate: InferenceGate,
    metrics: PipelineMetrics,
    stop: Arc<AtomicBool>,
}

impl<'d> LiveDetectionLoop<'d> {
    pub fn new(detector: &'d GrassDetector, settings: LiveSettings) -> Self {
        Self {
            detector,
            settings,
            slot: Arc::new(LatestFrameSlot::new()),
            gate: InferenceGate::new(),
            metrics: PipelineMetrics::new(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the flag ends `run` after the current frame.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Detect on one frame unless a detection is already in flight, in which
    /// case the frame is dropped and `None` returned. Safe to call from
    /// several request handlers at once.
    pub fn process_frame(&self, image: &RgbImage) -> Option<Result<Detection>> {
        let Some(_permit) = self.gate.try_acquire() else {
            self.metrics.inc(&self.metrics.frames_skipped_busy);
            debug!("⏭️ Detection in flight, frame dropped");
            return None;
        };
        let start = Instant::now();
        let result = self.detector.detect(image, self.settings.method, Some(self.settings.mode));
        match &result {
            Ok(_) => self.metrics.record_detection(start.elapsed().as_micros() as u64),
            Err(_) => self.metrics.inc(&self.metrics.detection_failures),
        }
        Some(result)
    }

    /// Run until the source is exhausted or the stop flag is set.
    ///
    /// # Arguments
    /// * `source` - Moved onto the acquisition thread
    /// * `renderer` - Annotates each processed frame
    /// * `sink` - Receives every processed frame
    pub fn run(
        &self,
        source: Box<dyn FrameSource>,
        renderer: &mut dyn OverlayRenderer,
        mut sink: impl FnMut(LiveFrame),
    ) -> Result<MetricsSummary> {
        info!(
            "🎥 Live detection: method={} mode={} frame_skip={}",
            self.settings.method.as_str(),
            self.settings.mode.as_str(),
            self.settings.frame_skip
        );

        let exhausted = Arc::new(AtomicBool::new(false));
        let acquisition = spawn_acquisition(
            source,
            Arc::clone(&self.slot),
            self.metrics.clone(),
            Arc::clone(&self.stop),
            Arc::clone(&exhausted),
        );

        let mut taken: u64 = 0;
        while !self.stop.load(Ordering::Relaxed) {
            let frame = match self.slot.take() {
                Some(f) => f,
                None if exhausted.load(Ordering::Acquire) => match self.slot.take() {
                    Some(f) => f,
                    None => break,
                },
                None => {
                    thread::sleep(self.settings.idle_wait);
                    continue;
                }
            };

            taken += 1;
            if taken % self.settings.frame_skip as u64 != 0 {
                self.metrics.inc(&self.metrics.frames_skipped);
                continue;
            }

            let detection = match self.process_frame(&frame.frame) {
                Some(Ok(d)) => d,
                Some(Err(e)) => {
                    warn!("⚠️ Frame {} detection failed: {:#}", frame.frame_id, e);
                    continue;
                }
                None => continue,
            };
            let rendered = match renderer.render(&frame.frame, &detection.mask, &detection.stats) {
                Ok(r) => r,
                Err(e) => {
                    warn!("⚠️ Frame {} render failed: {:#}", frame.frame_id, e);
                    continue;
                }
            };
            sink(LiveFrame {
                frame_id: frame.frame_id,
                detection,
                rendered,
            });
        }

        self.stop.store(true, Ordering::Relaxed);
        acquisition
            .join()
            .map_err(|_| anyhow!("acquisition thread panicked"))?;
        self.metrics
            .set(&self.metrics.frames_overwritten, self.slot.overwritten());

        let summary = self.metrics.summary();
        info!(
            "✓ Live detection stopped: {} acquired, {} processed, {} skipped, {} overwritten, avg {:.1}ms",
            summary.frames_acquired,
            summary.frames_processed,
            summary.frames_skipped,
            summary.frames_overwritten,
            summary.avg_detection_us as f64 / 1000.0
        );
        Ok(summary)
    }
}

fn spawn_acquisition(
    mut source: Box<dyn FrameSource>,
    slot: Arc<LatestFrameSlot<RgbImage>>,
    metrics: PipelineMetrics,
    stop: Arc<AtomicBool>,
    exhausted: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    slot.publish(frame);
                    metrics.inc(&metrics.frames_acquired);
                }
                Ok(None) => {
                    debug!("📭 Frame source exhausted");
                    break;
                }
                Err(e) => warn!("⚠️ Frame acquisition failed: {:#}", e),
            }
        }
        exhausted.store(true, Ordering::Release);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::Mask;
    use crate::types::DetectionStats;
    use image::Rgb;

    struct Frames {
        remaining: Option<usize>,
    }

    impl FrameSource for Frames {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            if let Some(n) = self.remaining.as_mut() {
                if *n == 0 {
                    return Ok(None);
                }
                *n -= 1;
            }
            Ok(Some(RgbImage::from_fn(32, 24, |x, _| {
                if x < 16 {
                    Rgb([34, 139, 34])
                } else {
                    Rgb([128, 128, 128])
                }
            })))
        }
    }

    struct Passthrough;

    impl OverlayRenderer for Passthrough {
        fn render(&mut self, image: &RgbImage, _mask: &Mask, _stats: &DetectionStats) -> Result<RgbImage> {
            Ok(image.clone())
        }
    }

    fn settings(frame_skip: u32) -> LiveSettings {
        LiveSettings {
            method: DetectionMethod::Color,
            mode: Mode::Realtime,
            frame_skip,
            idle_wait: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_every_frame_is_accounted_for() {
        let detector = GrassDetector::new(Config::default()).unwrap();
        let live = LiveDetectionLoop::new(&detector, settings(1));
        let mut delivered = 0u64;
        let summary = live
            .run(Box::new(Frames { remaining: Some(20) }), &mut Passthrough, |f| {
                assert_eq!(f.rendered.dimensions(), (32, 24));
                delivered += 1;
            })
            .unwrap();
        assert_eq!(summary.frames_acquired, 20);
        assert_eq!(summary.frames_processed, delivered);
        assert!(delivered >= 1);
        assert_eq!(summary.frames_processed + summary.frames_overwritten, 20);
    }

    #[test]
    fn test_frame_skip_drops_frames() {
        let detector = GrassDetector::new(Config::default()).unwrap();
        let live = LiveDetectionLoop::new(&detector, settings(3));
        let summary = live
            .run(Box::new(Frames { remaining: Some(30) }), &mut Passthrough, |_| {})
            .unwrap();
        assert_eq!(
            summary.frames_processed + summary.frames_skipped + summary.frames_overwritten,
            30
        );
        assert!(summary.frames_skipped >= summary.frames_processed);
    }

    #[test]
    fn test_stop_flag_ends_endless_source() {
        let detector = GrassDetector::new(Config::default()).unwrap();
        let live = LiveDetectionLoop::new(&detector, settings(1));
        let stop = live.stop_handle();
        let mut seen = 0;
        let summary = live
            .run(Box::new(Frames { remaining: None }), &mut Passthrough, |_| {
                seen += 1;
                if seen == 3 {
                    stop.store(true, Ordering::Relaxed);
                }
            })
            .unwrap();
        assert_eq!(summary.frames_processed, 3);
    }

    #[test]
    fn test_process_frame_skips_when_busy() {
        let detector = GrassDetector::new(Config::default()).unwrap();
        let live = LiveDetectionLoop::new(&detector, settings(1));
        let image = RgbImage::from_pixel(16, 16, Rgb([34, 139, 34]));
        let permit = live.gate.try_acquire();
        assert!(live.process_frame(&image).is_none());
        drop(permit);
        assert!(live.process_frame(&image).unwrap().is_ok());
        assert_eq!(live.metrics().summary().frames_skipped_busy, 1);
    }
}
