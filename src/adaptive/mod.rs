// src/adaptive/mod.rs
//
// Online parameter learning from labelled examples. No model weights are
// trained; a handful of sensitivity parameters are nudged and a bounded
// example history drives a similarity-based confidence multiplier.

pub mod features;
pub mod knowledge_base;
pub mod learning;
pub mod parameters;
pub mod synthetic;

pub use features::FeatureVector;
pub use knowledge_base::{Example, KnowledgeBase, KnowledgeLoad};
pub use learning::{AdaptiveLearningSystem, FeedbackSummary, LearningStats, Metadata, SaveOutcome};
pub use parameters::AdaptiveParameters;
