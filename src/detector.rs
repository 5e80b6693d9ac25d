// src/detector.rs
//
// GrassDetector: the detection facade.
//
//   image → large-image guard → method dispatch
//     color    → ColorClassifier
//     texture  → TextureClassifier
//     combined → {color, texture, [gradient, statistical]} → fuse → postprocess
//     model    → segmentation adapter (falls back to combined when unavailable)
//   → mask resized back to input size → scenario flags → DetectionStats
//
// `detect` takes `&self`: the mode for one call is passed in or taken from
// the detector, never toggled on shared state mid-call.

use crate::adaptive::{AdaptiveLearningSystem, FeedbackSummary, LearningStats, Metadata, SaveOutcome};
use crate::analysis::{confidence, fusion, postprocess, scenario, spatial, DensityAnalysis};
use crate::color_analysis::{self, DominantColor};
use crate::detection::{
    auxiliary, model, ColorClassifier, ModelStatus, Prediction, SegmentationModel, TextureClassifier,
};
use crate::imaging;
use crate::mask::Mask;
use crate::mode::ModeProfile;
use crate::preprocessing::{self, WorkingImage};
use crate::types::{
    Config, DetectionMethod, DetectionStats, MethodDiagnostics, MethodKind, MethodStats, MethodsAgreement,
    Mode, ModelDiagnostics, SpatialAnalysis,
};
use anyhow::{bail, ensure, Result};
use image::RgbImage;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

const DOMINANT_COLORS: usize = 3;
const REALTIME_COMBINED_DIVISOR: f64 = 50.0;
const REALTIME_COMBINED_CAP: f64 = 0.8;

/// Final mask (input dimensions) and its stats.
#[derive(Debug, Clone)]
pub struct Detection {
    pub mask: Mask,
    pub stats: DetectionStats,
}

/// Result of one method path at working resolution.
struct PathOutcome {
    mask: Mask,
    confidence: f64,
    component_stats: Vec<MethodStats>,
    fusion_weights: Vec<(MethodKind, f64)>,
    spatial_analysis: Option<SpatialAnalysis>,
    methods_agreement: Option<MethodsAgreement>,
    method_pair: Option<(f64, f64)>,
}

impl PathOutcome {
    fn single(mask: Mask, stats: MethodStats) -> Self {
        Self {
            mask,
            confidence: stats.confidence_score,
            component_stats: vec![stats],
            fusion_weights: Vec::new(),
            spatial_analysis: None,
            methods_agreement: None,
            method_pair: None,
        }
    }
}

pub struct GrassDetector {
    config: Config,
    mode: Mode,
    model: SegmentationModel,
    learning: AdaptiveLearningSystem,
}

impl GrassDetector {
    pub fn new(config: Config) -> Result<Self> {
        let learning = AdaptiveLearningSystem::from_config(&config.learning);
        Self::with_learning(config, learning)
    }

    /// Build with an explicitly owned learning system (injectable knowledge
    /// base).
    pub fn with_learning(config: Config, learning: AdaptiveLearningSystem) -> Result<Self> {
        config.validate()?;
        let model = SegmentationModel::from_config(&config.model);
        info!(
            "✓ Grass detector ready: method={} mode={} model={} ({})",
            config.detection.default_method.as_str(),
            config.detection.mode.as_str(),
            model.status().as_str(),
            model.backend_name()
        );
        Ok(Self {
            mode: config.detection.mode,
            config,
            model,
            learning,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch the default mode. Realtime and precision exclude each other
    /// by construction.
    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            info!("🔁 Mode: {} → {}", self.mode.as_str(), mode.as_str());
        }
        self.mode = mode;
    }

    pub fn model_status(&self) -> ModelStatus {
        self.model.status()
    }

    // ========================================================================
    // DETECTION
    // ========================================================================

    /// # Arguments
    /// * `image` - Decoded RGB image (not modified)
    /// * `method` - Detection method
    /// * `mode` - Mode for this call; the detector's mode when `None`
    pub fn detect(&self, image: &RgbImage, method: DetectionMethod, mode: Option<Mode>) -> Result<Detection> {
        ensure!(
            image.width() > 0 && image.height() > 0,
            "invalid image: {}x{}",
            image.width(),
            image.height()
        );
        let start = Instant::now();
        let mode = mode.unwrap_or(self.mode);
        let profile = ModeProfile::for_mode(mode, &self.config);

        let working = preprocessing::fit_within(image, self.config.detection.max_width, self.config.detection.max_height);

        let mut fallback_from = None;
        let mut used_method = method;
        let outcome = match method {
            DetectionMethod::Color => self.run_color(&working)?,
            DetectionMethod::Texture => self.run_texture(&working, &profile)?,
            DetectionMethod::Combined => self.run_combined(&working, &profile)?,
            DetectionMethod::Model => match self.run_model(&working, &profile)? {
                Some(outcome) => outcome,
                None => {
                    info!("↩️ Model unavailable, using combined pipeline");
                    fallback_from = Some(DetectionMethod::Model);
                    used_method = DetectionMethod::Combined;
                    self.run_combined(&working, &profile)?
                }
            },
        };

        let mask = if outcome.mask.dimensions() != image.dimensions() {
            outcome.mask.resize_nearest(image.width(), image.height())
        } else {
            outcome.mask
        };

        // Exposure and focus come from the working image; coverage flags
        // must agree with the returned mask.
        let gray = imaging::to_gray(&working);
        let scenario_flags = scenario::detect_scenarios(
            &gray,
            &mask,
            outcome.method_pair,
            None,
            &self.config.scenario,
        );

        let stats = DetectionStats {
            method: used_method,
            mode,
            coverage_percentage: mask.coverage_percentage(),
            confidence_score: outcome.confidence.clamp(0.0, 1.0),
            grass_pixels: mask.count(),
            total_pixels: mask.total_pixels(),
            scenario_flags,
            component_stats: outcome.component_stats,
            fusion_weights: outcome.fusion_weights,
            spatial_analysis: outcome.spatial_analysis,
            methods_agreement: outcome.methods_agreement,
            fallback_from,
            processing_ms: start.elapsed().as_secs_f64() * 1000.0,
        };

        info!(
            "🌿 {} ({}): coverage={:.2}% conf={:.3} in {:.1}ms",
            stats.method.as_str(),
            stats.mode.as_str(),
            stats.coverage_percentage,
            stats.confidence_score,
            stats.processing_ms
        );
        Ok(Detection { mask, stats })
    }

    fn run_color(&self, working: &RgbImage) -> Result<PathOutcome> {
        let (mask, stats) = ColorClassifier::new(&self.config.color).detect(&WorkingImage::borrowed(working), None)?;
        Ok(PathOutcome::single(mask, stats))
    }

    fn run_texture(&self, working: &RgbImage, profile: &ModeProfile) -> Result<PathOutcome> {
        let (mask, stats) =
            TextureClassifier::new(&self.config.texture).detect(&WorkingImage::borrowed(working), profile)?;
        Ok(PathOutcome::single(mask, stats))
    }

    fn run_combined(&self, working: &RgbImage, profile: &ModeProfile) -> Result<PathOutcome> {
        let input = if profile.precision_preprocess {
            preprocessing::precision_enhance(&WorkingImage::borrowed(working), self.config.color.clahe_tile_grid)
        } else {
            WorkingImage::borrowed(working)
        };

        let mut results: Vec<(Mask, MethodStats)> = Vec::new();
        collect(&mut results, MethodKind::Color, ColorClassifier::new(&self.config.color).detect(&input, None));
        collect(
            &mut results,
            MethodKind::Texture,
            TextureClassifier::new(&self.config.texture).detect(&input, profile),
        );
        if profile.auxiliary_classifiers {
            collect(&mut results, MethodKind::Gradient, auxiliary::detect_gradient_patterns(&input));
            collect(&mut results, MethodKind::Statistical, auxiliary::detect_statistical_patterns(&input));
        }

        let Some(fused) = fusion::fuse(&results, profile.mode.is_precision(), &self.config.fusion) else {
            bail!("every detection method failed");
        };

        let mask = if profile.mode.is_precision() {
            postprocess::precision(
                &fused.mask,
                &input.image,
                profile,
                &self.config.precision,
                self.config.texture.min_area as u64,
            )
        } else {
            postprocess::standard(&fused.mask)
        };

        let confidence = if profile.simple_confidence {
            confidence::linear_confidence(mask.coverage_percentage(), REALTIME_COMBINED_DIVISOR, REALTIME_COMBINED_CAP)
        } else {
            confidence::mask_confidence(&mask, &imaging::to_gray(&input.image)).score
        };

        let component_stats: Vec<MethodStats> = results.into_iter().map(|(_, s)| s).collect();
        let coverage_of = |kind: MethodKind| {
            component_stats
                .iter()
                .find(|s| s.method == kind)
                .map(|s| s.coverage_percentage)
        };
        let method_pair = coverage_of(MethodKind::Color).zip(coverage_of(MethodKind::Texture));

        Ok(PathOutcome {
            spatial_analysis: Some(spatial::spatial_analysis(&mask)),
            methods_agreement: Some(spatial::methods_agreement(&component_stats)),
            mask,
            confidence,
            component_stats,
            fusion_weights: fused.weights,
            method_pair,
        })
    }

    /// `None` when no segmentation backend is available.
    fn run_model(&self, working: &RgbImage, profile: &ModeProfile) -> Result<Option<PathOutcome>> {
        if self.model.status() == ModelStatus::Unavailable {
            return Ok(None);
        }
        let input = if profile.precision_preprocess {
            preprocessing::precision_enhance(&WorkingImage::borrowed(working), self.config.color.clahe_tile_grid)
        } else {
            WorkingImage::borrowed(working)
        };
        let (w, h) = (input.width(), input.height());

        let mut predictions: Vec<Prediction> = Vec::new();
        let mut boosts = Vec::new();
        for &scale in &profile.multi_scale {
            let scaled = if (scale - 1.0).abs() < f32::EPSILON {
                input.image.clone().into_owned()
            } else {
                preprocessing::scale_image(&input.image, scale)
            };
            let prediction = match self.model.predict(&scaled, &self.config.texture) {
                Ok(Some(p)) => p,
                Ok(None) => return Ok(None),
                Err(e) => {
                    warn!("⚠️ Model prediction at scale {:.2} failed: {:#}", scale, e);
                    continue;
                }
            };
            let boost = self.learning.get_adaptive_confidence_boost(&prediction.probability, &scaled);
            let mut prediction = Prediction { scale, ..prediction.resized(w, h) };
            prediction.apply_boost(boost);
            boosts.push(boost);
            predictions.push(prediction);
        }
        let Some(probability) = model::ensemble(&predictions) else {
            warn!("⚠️ No model prediction succeeded");
            return Ok(None);
        };

        let (mask, threshold) = model::postprocess(&probability, profile.mode.is_precision());

        // Classical coverages at standard settings for the consensus check.
        let standard = ModeProfile::for_mode(Mode::Standard, &self.config);
        let color = ColorClassifier::new(&self.config.color).detect(&input, None);
        let texture = TextureClassifier::new(&self.config.texture).detect(&input, &standard);
        let model_coverage = mask.coverage_percentage();
        let coverage = |r: &Result<(Mask, MethodStats)>| match r {
            Ok((_, s)) => s.coverage_percentage,
            Err(_) => model_coverage,
        };
        let consensus = model::consensus_score(model_coverage, coverage(&color), coverage(&texture));
        let certainty = model::prediction_certainty(&probability);
        let boost = self.learning.parameters().confidence_boost;
        let confidence = model::model_confidence(certainty, consensus, boost);
        let adaptive_boost = if boosts.is_empty() {
            1.0
        } else {
            boosts.iter().sum::<f64>() / boosts.len() as f64
        };

        debug!(
            "🤖 Model: threshold={:.3} certainty={:.3} consensus={:.3} boost={:.3}",
            threshold, certainty, consensus, adaptive_boost
        );

        let model_stats = MethodStats {
            method: MethodKind::Model,
            coverage_percentage: model_coverage,
            confidence_score: confidence,
            grass_pixels: mask.count(),
            total_pixels: mask.total_pixels(),
            num_components: imaging::components(&mask).len(),
            diagnostics: MethodDiagnostics::Model(ModelDiagnostics {
                backend: self.model.backend_name().to_string(),
                threshold_used: threshold,
                prediction_certainty: certainty,
                consensus_score: consensus,
                adaptive_boost,
                scales: predictions.iter().map(|p| p.scale).collect(),
            }),
        };

        let mut component_stats = vec![model_stats];
        let mut pair = (None, None);
        for (kind, result) in [(MethodKind::Color, color), (MethodKind::Texture, texture)] {
            match result {
                Ok((_, s)) => {
                    if kind == MethodKind::Color {
                        pair.0 = Some(s.coverage_percentage);
                    } else {
                        pair.1 = Some(s.coverage_percentage);
                    }
                    component_stats.push(s);
                }
                Err(e) => warn!("⚠️ {} consensus check failed: {:#}", kind.as_str(), e),
            }
        }

        Ok(Some(PathOutcome {
            spatial_analysis: Some(spatial::spatial_analysis(&mask)),
            methods_agreement: None,
            mask,
            confidence,
            component_stats,
            fusion_weights: Vec::new(),
            method_pair: pair.0.zip(pair.1),
        }))
    }

    // ========================================================================
    // ANALYSIS HELPERS
    // ========================================================================

    pub fn analyze_density(&self, mask: &Mask) -> DensityAnalysis {
        spatial::analyze_density(mask)
    }

    pub fn dominant_colors(&self, image: &RgbImage, mask: &Mask) -> Vec<DominantColor> {
        color_analysis::dominant_colors(image, mask, DOMINANT_COLORS)
    }

    pub fn detection_confidence(&self, stats: &DetectionStats) -> f64 {
        spatial::detection_confidence(stats)
    }

    // ========================================================================
    // LEARNING
    // ========================================================================

    pub fn learn_from_example(
        &mut self,
        image: &RgbImage,
        mask: &Mask,
        is_positive: bool,
        metadata: Metadata,
    ) -> Result<SaveOutcome> {
        self.learning.learn_from_example(image, mask, is_positive, metadata)
    }

    pub fn learn_from_user_feedback(
        &mut self,
        image: &RgbImage,
        detected: &Mask,
        corrected: &Mask,
    ) -> Result<FeedbackSummary> {
        self.learning.learn_from_user_feedback(image, detected, corrected)
    }

    pub fn get_learning_stats(&self) -> LearningStats {
        self.learning.get_learning_stats()
    }

    pub fn export_knowledge(&mut self, path: &Path) -> Result<()> {
        self.learning.export_knowledge(path)
    }

    pub fn import_knowledge(&mut self, path: &Path) -> Result<SaveOutcome> {
        self.learning.import_knowledge(path)
    }
}

/// Keep a method's result or log and drop it.
fn collect(results: &mut Vec<(Mask, MethodStats)>, kind: MethodKind, outcome: Result<(Mask, MethodStats)>) {
    match outcome {
        Ok(r) => results.push(r),
        Err(e) => warn!("⚠️ {} dropped from fusion: {:#}", kind.as_str(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn detector() -> GrassDetector {
        GrassDetector::new(Config::default()).unwrap()
    }

    fn green_rectangle() -> RgbImage {
        RgbImage::from_fn(200, 100, |x, y| {
            if (60..140).contains(&x) && (25..75).contains(&y) {
                Rgb([34, 139, 34])
            } else {
                Rgb([128, 128, 128])
            }
        })
    }

    fn meadow() -> RgbImage {
        RgbImage::from_fn(96, 72, |x, y| {
            let n = ((x * 37 + y * 91) % 23) as u8;
            if x < 60 {
                Rgb([40 + n, 120 + 3 * n, 30 + n])
            } else {
                Rgb([150, 140 + n / 2, 130])
            }
        })
    }

    const METHODS: [DetectionMethod; 4] = [
        DetectionMethod::Color,
        DetectionMethod::Texture,
        DetectionMethod::Combined,
        DetectionMethod::Model,
    ];

    #[test]
    fn test_mask_matches_input_for_all_methods_and_modes() {
        let d = detector();
        let img = meadow();
        for method in METHODS {
            for mode in [Mode::Standard, Mode::Realtime, Mode::Precision] {
                let det = d.detect(&img, method, Some(mode)).unwrap();
                assert_eq!(det.mask.dimensions(), img.dimensions(), "{:?} {:?}", method, mode);
                assert!((0.0..=100.0).contains(&det.stats.coverage_percentage));
                assert!((0.0..=1.0).contains(&det.stats.confidence_score));
                assert_eq!(det.stats.total_pixels, 96 * 72);
            }
        }
    }

    #[test]
    fn test_detect_is_idempotent() {
        let d = detector();
        let img = meadow();
        for method in METHODS {
            let a = d.detect(&img, method, None).unwrap();
            let b = d.detect(&img, method, None).unwrap();
            assert_eq!(a.mask, b.mask);
        }
    }

    #[test]
    fn test_uniform_gray_is_sparse() {
        let d = detector();
        let img = RgbImage::from_pixel(120, 90, Rgb([128, 128, 128]));
        let det = d.detect(&img, DetectionMethod::Combined, None).unwrap();
        assert!(det.stats.coverage_percentage < 1.0);
        assert!(det.stats.scenario_flags.sparse_detection);
        assert!(!det.stats.scenario_flags.dense_detection);
    }

    #[test]
    fn test_green_rectangle_color() {
        let d = detector();
        let det = d.detect(&green_rectangle(), DetectionMethod::Color, None).unwrap();
        assert!((det.stats.coverage_percentage - 20.0).abs() < 3.0);
        assert!(det.stats.confidence_score > 0.5);
    }

    #[test]
    fn test_zero_coverage_method_weight_bounded() {
        let d = detector();
        let det = d.detect(&green_rectangle(), DetectionMethod::Combined, None).unwrap();
        let n = det.stats.fusion_weights.len() as f64;
        assert!(n >= 2.0);
        for (kind, weight) in &det.stats.fusion_weights {
            let coverage = det
                .stats
                .component_stats
                .iter()
                .find(|s| s.method == *kind)
                .map(|s| s.coverage_percentage)
                .unwrap();
            if coverage == 0.0 {
                assert!(*weight <= 1.0 / n + 1e-12);
            }
        }
        assert!(det.stats.methods_agreement.is_some());
        assert!(det.stats.spatial_analysis.is_some());
    }

    #[test]
    fn test_large_image_guard_restores_size() {
        let mut config = Config::default();
        config.detection.max_width = 100;
        config.detection.max_height = 50;
        let d = GrassDetector::new(config).unwrap();
        let det = d.detect(&green_rectangle(), DetectionMethod::Color, None).unwrap();
        assert_eq!(det.mask.dimensions(), (200, 100));
    }

    #[test]
    fn test_coverage_flags_follow_returned_mask() {
        let mut config = Config::default();
        config.detection.max_width = 100;
        config.detection.max_height = 100;
        config.color.min_area = 0;
        config.color.adaptive_min_area = false;
        let d = GrassDetector::new(config).unwrap();
        let thresholds = d.config().scenario.clone();
        for stripe in [3u32, 5, 9, 10, 11, 15, 21] {
            let img = RgbImage::from_fn(201, 100, |x, _| {
                if (20..20 + stripe).contains(&x) {
                    Rgb([34, 139, 34])
                } else {
                    Rgb([128, 128, 128])
                }
            });
            let det = d.detect(&img, DetectionMethod::Color, None).unwrap();
            assert_eq!(det.mask.dimensions(), (201, 100));
            let coverage = det.mask.coverage_fraction();
            let flags = &det.stats.scenario_flags;
            assert_eq!(flags.sparse_detection, coverage < thresholds.sparse_coverage, "stripe {}", stripe);
            assert_eq!(flags.dense_detection, coverage > thresholds.dense_coverage, "stripe {}", stripe);
        }
    }

    #[test]
    fn test_model_falls_back_when_unavailable() {
        let mut config = Config::default();
        config.model.allow_simulation = false;
        let d = GrassDetector::new(config).unwrap();
        assert_eq!(d.model_status(), ModelStatus::Unavailable);
        let det = d.detect(&meadow(), DetectionMethod::Model, None).unwrap();
        assert_eq!(det.stats.method, DetectionMethod::Combined);
        assert_eq!(det.stats.fallback_from, Some(DetectionMethod::Model));
    }

    #[test]
    fn test_precision_model_uses_all_scales() {
        let d = detector();
        let det = d.detect(&meadow(), DetectionMethod::Model, Some(Mode::Precision)).unwrap();
        match &det.stats.component_stats[0].diagnostics {
            MethodDiagnostics::Model(m) => {
                assert_eq!(m.scales, vec![0.75, 1.0, 1.25]);
                assert_eq!(m.backend, "simulation");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_image_rejected() {
        let d = detector();
        assert!(d.detect(&RgbImage::new(0, 0), DetectionMethod::Color, None).is_err());
    }

    #[test]
    fn test_mode_switch() {
        let mut d = detector();
        d.set_mode(Mode::Realtime);
        assert!(d.mode().is_realtime() && !d.mode().is_precision());
        d.set_mode(Mode::Precision);
        assert!(d.mode().is_precision() && !d.mode().is_realtime());
        let det = d.detect(&meadow(), DetectionMethod::Combined, None).unwrap();
        assert_eq!(det.stats.mode, Mode::Precision);
    }

    #[test]
    fn test_learning_through_detector() {
        let mut d = detector();
        let img = green_rectangle();
        let mask = Mask::from_fn(200, 100, |x, y| (60..140).contains(&x) && (25..75).contains(&y));
        let outcome = d.learn_from_example(&img, &mask, true, Metadata::new()).unwrap();
        assert_eq!(outcome, SaveOutcome::Skipped);
        let stats = d.get_learning_stats();
        assert_eq!(stats.positive_examples, 1);
        assert!(stats.parameters.confidence_boost > 1.0);
    }

    #[test]
    fn test_analysis_helpers() {
        let d = detector();
        let img = green_rectangle();
        let det = d.detect(&img, DetectionMethod::Color, None).unwrap();
        let density = d.analyze_density(&det.mask);
        assert_eq!(density.num_regions, 1);
        let colors = d.dominant_colors(&img, &det.mask);
        assert!(!colors.is_empty());
        assert!(colors[0].rgb[1] > colors[0].rgb[0]);
        let c = d.detection_confidence(&det.stats);
        assert!((0.0..=1.0).contains(&c));
    }
}
