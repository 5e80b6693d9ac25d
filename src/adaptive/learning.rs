// src/adaptive/learning.rs
//
// Adaptive learning system: owns the parameters and the knowledge base.
//
//   learn_from_example:  features → append → update params → prune → save
//   confidence boost:    similarity of the current prediction to the most
//                        recent examples of each class
//
// One owner per knowledge file; callers serialize learning calls.

use super::features::{self, FeatureVector};
use super::knowledge_base::{Example, KnowledgeBase, KnowledgeLoad};
use super::parameters::AdaptiveParameters;
use super::synthetic;
use crate::mask::{Mask, ProbabilityMap};
use crate::types::LearningConfig;
use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const PREDICTION_CUTOFF: f32 = 0.3;
const EMPTY_PREDICTION_BOOST: f64 = 0.5;
const BOOST_RANGE: (f64, f64) = (0.1, 5.0);
const SYNTHETIC_SEED: u64 = 42;

pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// No knowledge file configured.
    Skipped,
    /// Write failed; state is kept in memory and retried on flush.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningStats {
    pub examples_learned: u64,
    pub positive_examples: u64,
    pub negative_examples: u64,
    pub stored_positive: usize,
    pub stored_negative: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub parameters: AdaptiveParameters,
}

/// Examples learned from one feedback call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackSummary {
    pub false_positives: bool,
    pub false_negatives: bool,
    pub confirmed: bool,
}

pub struct AdaptiveLearningSystem {
    params: AdaptiveParameters,
    knowledge: KnowledgeBase,
    path: Option<PathBuf>,
    max_examples: usize,
    similarity_window: usize,
    examples_learned: u64,
    positive_examples: u64,
    negative_examples: u64,
    last_update: Option<DateTime<Utc>>,
    dirty: bool,
}

impl AdaptiveLearningSystem {
    /// Knowledge file taken from `config.knowledge_file`.
    pub fn from_config(config: &LearningConfig) -> Self {
        Self::open(config, config.knowledge_file.as_ref().map(PathBuf::from))
    }

    /// # Arguments
    /// * `config` - Learning settings
    /// * `path` - Knowledge file; `None` keeps everything in memory
    pub fn open(config: &LearningConfig, path: Option<PathBuf>) -> Self {
        let knowledge = match &path {
            Some(p) => match KnowledgeBase::load(p) {
                KnowledgeLoad::Loaded(kb) => {
                    info!(
                        "📚 Knowledge base loaded: {} positive, {} negative ({})",
                        kb.vegetation_patterns.len(),
                        kb.non_vegetation_patterns.len(),
                        p.display()
                    );
                    kb
                }
                KnowledgeLoad::Missing => {
                    info!("📚 No knowledge base at {}, starting fresh", p.display());
                    KnowledgeBase::default()
                }
                KnowledgeLoad::Corrupt(reason) => {
                    warn!("⚠️ Knowledge base {} unreadable ({}), starting fresh", p.display(), reason);
                    KnowledgeBase::default()
                }
            },
            None => KnowledgeBase::default(),
        };

        let mut system = Self {
            params: AdaptiveParameters::with_learning_rate(config.learning_rate),
            knowledge,
            path,
            max_examples: config.max_examples.max(1),
            similarity_window: config.similarity_window.max(1),
            examples_learned: 0,
            positive_examples: 0,
            negative_examples: 0,
            last_update: None,
            dirty: false,
        };
        system.knowledge.prune(system.max_examples);

        if config.bootstrap_synthetic && system.knowledge.is_empty() {
            system.bootstrap();
        }
        system
    }

    fn bootstrap(&mut self) {
        info!("🎓 Bootstrapping with synthetic examples");
        let examples = synthetic::training_examples(SYNTHETIC_SEED);
        let count = examples.len();
        for example in examples {
            let mut metadata = Metadata::new();
            metadata.insert("source".into(), "synthetic_training".into());
            if let Err(e) = self.learn_from_example(&example.image, &example.mask, example.is_positive, metadata) {
                warn!("⚠️ Synthetic example skipped: {:#}", e);
            }
        }
        info!("✓ Bootstrapped with {} examples", count);
    }

    /// # Arguments
    /// * `image` - Source image
    /// * `mask` - Labelled region; an empty mask labels the whole image
    /// * `is_positive` - Whether the region is vegetation
    /// * `metadata` - Free-form tags stored with the example
    pub fn learn_from_example(
        &mut self,
        image: &RgbImage,
        mask: &Mask,
        is_positive: bool,
        metadata: Metadata,
    ) -> Result<SaveOutcome> {
        ensure!(image.width() > 0 && image.height() > 0, "empty image");
        ensure!(
            mask.dimensions() == image.dimensions(),
            "mask {:?} does not match image {:?}",
            mask.dimensions(),
            image.dimensions()
        );
        let features = features::extract(image, mask).context("feature extraction failed")?;

        let now = Utc::now();
        self.knowledge.push(
            Example {
                features: features.clone(),
                timestamp: now,
                metadata,
            },
            is_positive,
        );
        self.params.update(&features, is_positive);

        self.examples_learned += 1;
        if is_positive {
            self.positive_examples += 1;
        } else {
            self.negative_examples += 1;
        }
        self.last_update = Some(now);
        self.knowledge.prune(self.max_examples);

        debug!(
            "🎓 Learned {} example (total {})",
            if is_positive { "positive" } else { "negative" },
            self.examples_learned
        );
        Ok(self.save())
    }

    /// Learn false positives as negatives, missed areas and confirmed
    /// detections as positives.
    pub fn learn_from_user_feedback(
        &mut self,
        image: &RgbImage,
        detected: &Mask,
        corrected: &Mask,
    ) -> Result<FeedbackSummary> {
        ensure!(detected.dimensions() == corrected.dimensions(), "feedback masks differ in size");
        let false_positives = detected.difference(corrected);
        let false_negatives = corrected.difference(detected);
        let confirmed = detected.intersection(corrected);

        let mut summary = FeedbackSummary::default();
        let tagged = |kind: &str| {
            let mut m = Metadata::new();
            m.insert("type".into(), kind.into());
            m.insert("source".into(), "user_feedback".into());
            m
        };
        if !false_positives.is_empty() {
            self.learn_from_example(image, &false_positives, false, tagged("false_positive"))?;
            summary.false_positives = true;
            info!("📉 Learned to avoid false positives");
        }
        if !false_negatives.is_empty() {
            self.learn_from_example(image, &false_negatives, true, tagged("false_negative"))?;
            summary.false_negatives = true;
            info!("📈 Learned missed areas");
        }
        if !confirmed.is_empty() {
            self.learn_from_example(image, &confirmed, true, tagged("correct_positive"))?;
            summary.confirmed = true;
            info!("✓ Reinforced correct detections");
        }
        Ok(summary)
    }

    /// Multiplier for model confidence, in [0.1, 5.0] once any positive
    /// example exists; 1.0 before that.
    pub fn get_adaptive_confidence_boost(&self, prediction: &ProbabilityMap, image: &RgbImage) -> f64 {
        if self.knowledge.vegetation_patterns.is_empty() {
            return 1.0;
        }
        let mask = Mask::from_probability(prediction, PREDICTION_CUTOFF);
        if mask.is_empty() || mask.dimensions() != image.dimensions() {
            return EMPTY_PREDICTION_BOOST;
        }
        let Some(current) = features::extract(image, &mask) else {
            return EMPTY_PREDICTION_BOOST;
        };

        let positive = self.similarity_to(&current, true);
        let negative = self.similarity_to(&current, false);
        let boost = if positive > negative {
            self.params.confidence_boost * (1.0 + positive)
        } else {
            self.params.confidence_boost * (1.0 - 0.5 * negative)
        };
        debug!(
            "🧠 Adaptive boost: {:.3} (pos_sim={:.3}, neg_sim={:.3})",
            boost, positive, negative
        );
        boost.clamp(BOOST_RANGE.0, BOOST_RANGE.1)
    }

    fn similarity_to(&self, current: &FeatureVector, is_positive: bool) -> f64 {
        let recent = self.knowledge.recent(is_positive, self.similarity_window);
        if recent.is_empty() {
            return 0.0;
        }
        recent.iter().map(|e| features::similarity(current, &e.features)).sum::<f64>() / recent.len() as f64
    }

    pub fn get_learning_stats(&self) -> LearningStats {
        LearningStats {
            examples_learned: self.examples_learned,
            positive_examples: self.positive_examples,
            negative_examples: self.negative_examples,
            stored_positive: self.knowledge.vegetation_patterns.len(),
            stored_negative: self.knowledge.non_vegetation_patterns.len(),
            last_update: self.last_update,
            parameters: self.params.clone(),
        }
    }

    pub fn parameters(&self) -> &AdaptiveParameters {
        &self.params
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn export_knowledge(&mut self, path: &Path) -> Result<()> {
        self.knowledge.save(path)?;
        info!("💾 Knowledge exported to {}", path.display());
        Ok(())
    }

    /// Replace the in-memory knowledge base with the file's content and
    /// persist it to the owned knowledge file.
    pub fn import_knowledge(&mut self, path: &Path) -> Result<SaveOutcome> {
        match KnowledgeBase::load(path) {
            KnowledgeLoad::Loaded(kb) => {
                self.knowledge = kb;
                self.knowledge.prune(self.max_examples);
                info!("📥 Knowledge imported from {} ({} examples)", path.display(), self.knowledge.len());
                Ok(self.save())
            }
            KnowledgeLoad::Missing => anyhow::bail!("{} does not exist", path.display()),
            KnowledgeLoad::Corrupt(reason) => anyhow::bail!("{} is not a knowledge base: {}", path.display(), reason),
        }
    }

    fn save(&mut self) -> SaveOutcome {
        let Some(path) = self.path.clone() else {
            return SaveOutcome::Skipped;
        };
        match self.knowledge.save(&path) {
            Ok(()) => {
                self.dirty = false;
                SaveOutcome::Saved
            }
            Err(e) => {
                error!("❌ Knowledge base not saved: {:#}", e);
                self.dirty = true;
                SaveOutcome::Failed
            }
        }
    }

    /// Retry a failed save.
    pub fn flush(&mut self) -> SaveOutcome {
        if !self.dirty {
            return SaveOutcome::Skipped;
        }
        self.save()
    }
}

impl Drop for AdaptiveLearningSystem {
    fn drop(&mut self) {
        if self.dirty {
            self.flush();
        }
    }
}
