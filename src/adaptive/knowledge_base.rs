// src/adaptive/knowledge_base.rs
//
// Persisted knowledge base: two bounded example lists (oldest first) plus a
// version tag. Saved as one JSON document overwritten on every save.

use super::features::FeatureVector;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const KNOWLEDGE_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub features: FeatureVector,
    pub timestamp: DateTime<Utc>,
    #[serde(default, rename = "info")]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBase {
    pub vegetation_patterns: Vec<Example>,
    pub non_vegetation_patterns: Vec<Example>,
    pub version: String,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self {
            vegetation_patterns: Vec::new(),
            non_vegetation_patterns: Vec::new(),
            version: KNOWLEDGE_VERSION.to_string(),
            last_updated: None,
        }
    }
}

/// Outcome of reading the knowledge file at startup.
#[derive(Debug)]
pub enum KnowledgeLoad {
    Loaded(KnowledgeBase),
    Missing,
    Corrupt(String),
}

impl KnowledgeBase {
    pub fn load(path: &Path) -> KnowledgeLoad {
        if !path.exists() {
            return KnowledgeLoad::Missing;
        }
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => return KnowledgeLoad::Corrupt(e.to_string()),
        };
        match serde_json::from_str::<KnowledgeBase>(&text) {
            Ok(kb) => KnowledgeLoad::Loaded(kb),
            Err(e) => KnowledgeLoad::Corrupt(e.to_string()),
        }
    }

    /// Whole-file overwrite. Stamps `last_updated`.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.last_updated = Some(Utc::now());
        let json = serde_json::to_string_pretty(self).context("Failed to serialize knowledge base")?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn push(&mut self, example: Example, is_positive: bool) {
        if is_positive {
            self.vegetation_patterns.push(example);
        } else {
            self.non_vegetation_patterns.push(example);
        }
    }

    /// Drop the oldest entries beyond `max` in each list.
    pub fn prune(&mut self, max: usize) {
        for list in [&mut self.vegetation_patterns, &mut self.non_vegetation_patterns] {
            if list.len() > max {
                let excess = list.len() - max;
                list.drain(..excess);
            }
        }
    }

    /// The most recent `window` examples of one class.
    pub fn recent(&self, is_positive: bool, window: usize) -> &[Example] {
        let list = if is_positive { &self.vegetation_patterns } else { &self.non_vegetation_patterns };
        &list[list.len().saturating_sub(window)..]
    }

    pub fn len(&self) -> usize {
        self.vegetation_patterns.len() + self.non_vegetation_patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
