// src/main.rs
//
// Batch grass detection over a directory of images.
//
//   grass-detection [config.yaml]
//
// Every image under io.input_dir is detected with the configured method and
// mode; a mask PNG and a JSON report per image land in io.output_dir.

use anyhow::{Context, Result};
use grass_detection::report::DetectionReport;
use grass_detection::{Config, GrassDetector, Mask};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Default)]
struct BatchStats {
    processed: usize,
    failed: usize,
    timed_out: usize,
    coverage_sum: f64,
    coverage_max: f64,
    confidence_sum: f64,
    fallbacks: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("grass_detection={},ort=warn", config.logging.level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🌱 Grass Detection Starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Method: {}, mode: {}, max size: {}x{}",
        config.detection.default_method.as_str(),
        config.detection.mode.as_str(),
        config.detection.max_width,
        config.detection.max_height
    );

    let images = find_image_files(&config.io.input_dir);
    if images.is_empty() {
        error!("No images found in {}", config.io.input_dir);
        return Ok(());
    }
    info!("Found {} image(s) to process", images.len());

    let output_dir = PathBuf::from(&config.io.output_dir);
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let timeout = Duration::from_millis(config.io.detection_timeout_ms);
    let save_masks = config.io.save_masks;
    let detector = Arc::new(GrassDetector::new(config)?);
    let mut batch = BatchStats::default();

    for (idx, path) in images.iter().enumerate() {
        info!("========================================");
        info!("Processing image {}/{}: {}", idx + 1, images.len(), path.display());

        let task = {
            let detector = Arc::clone(&detector);
            let path = path.clone();
            tokio::task::spawn_blocking(move || detect_file(&detector, &path))
        };

        // A timed-out detection keeps running on its blocking thread; its
        // result is discarded.
        match tokio::time::timeout(timeout, task).await {
            Err(_) => {
                warn!("⏱️ Detection timed out after {:?}: {}", timeout, path.display());
                batch.timed_out += 1;
            }
            Ok(Err(e)) => {
                error!("❌ Detection task panicked on {}: {}", path.display(), e);
                batch.failed += 1;
            }
            Ok(Ok(Err(e))) => {
                error!("❌ Failed to process {}: {:#}", path.display(), e);
                batch.failed += 1;
            }
            Ok(Ok(Ok((report, mask)))) => {
                if let Err(e) = write_outputs(&output_dir, path, &report, &mask, save_masks) {
                    error!("❌ Failed to write results for {}: {:#}", path.display(), e);
                    batch.failed += 1;
                    continue;
                }
                let stats = &report.stats;
                info!(
                    "✓ {}: coverage={:.2}% confidence={:.3} density={} flags=[{}]",
                    path.display(),
                    stats.coverage_percentage,
                    stats.confidence_score,
                    report.density.classification.as_str(),
                    report.scenario_flags.join(", ")
                );
                batch.processed += 1;
                batch.coverage_sum += stats.coverage_percentage;
                batch.coverage_max = batch.coverage_max.max(stats.coverage_percentage);
                batch.confidence_sum += stats.confidence_score;
                if stats.fallback_from.is_some() {
                    batch.fallbacks += 1;
                }
            }
        }
    }

    log_summary(&batch);
    Ok(())
}

fn find_image_files(input_dir: &str) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(input_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    images.sort();
    images
}

fn detect_file(detector: &GrassDetector, path: &Path) -> Result<(DetectionReport, Mask)> {
    let image = image::open(path)
        .with_context(|| format!("Failed to decode {}", path.display()))?
        .to_rgb8();
    let detection = detector.detect(&image, detector.config().detection.default_method, None)?;
    let report = DetectionReport::build(detector, &path.display().to_string(), &image, &detection, false)?;
    Ok((report, detection.mask))
}

fn write_outputs(
    output_dir: &Path,
    path: &Path,
    report: &DetectionReport,
    mask: &Mask,
    save_masks: bool,
) -> Result<()> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    if save_masks {
        let mask_path = output_dir.join(format!("{}_mask.png", stem));
        mask.as_image()
            .save(&mask_path)
            .with_context(|| format!("Failed to save {}", mask_path.display()))?;
    }
    report.save(&output_dir.join(format!("{}.json", stem)))
}

fn log_summary(batch: &BatchStats) {
    info!("========================================");
    info!("✓ Batch complete");
    info!("  Processed: {}", batch.processed);
    if batch.failed > 0 {
        info!("  ❌ Failed: {}", batch.failed);
    }
    if batch.timed_out > 0 {
        info!("  ⏱️ Timed out: {}", batch.timed_out);
    }
    if batch.processed > 0 {
        let n = batch.processed as f64;
        info!("  Average coverage: {:.2}%", batch.coverage_sum / n);
        info!("  Max coverage: {:.2}%", batch.coverage_max);
        info!("  Average confidence: {:.3}", batch.confidence_sum / n);
    }
    if batch.fallbacks > 0 {
        info!("  ↩️ Model fallbacks: {}", batch.fallbacks);
    }
}
