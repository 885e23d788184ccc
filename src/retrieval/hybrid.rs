//! Combining keyword and vector signals

use crate::config::SearchConfig;
use serde::{Deserialize, Serialize};

/// Weights used to combine scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub keyword_weight: f32,
    pub vector_weight: f32,
    /// Added when both signals qualify a document
    pub agreement_bonus: f32,
    /// Multiplier on vector scores in semantic mode
    pub semantic_boost: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            keyword_weight: 0.6,
            vector_weight: 0.4,
            agreement_bonus: 0.1,
            semantic_boost: 1.2,
        }
    }
}

impl From<&SearchConfig> for ScoringConfig {
    fn from(config: &SearchConfig) -> Self {
        Self {
            keyword_weight: config.keyword_weight,
            vector_weight: config.vector_weight,
            agreement_bonus: config.agreement_bonus,
            semantic_boost: config.semantic_boost,
        }
    }
}

impl ScoringConfig {
    /// Hybrid score of a document given the signals that qualified it
    ///
    /// Returns `None` when neither signal qualifies. A document qualified
    /// by one signal keeps that signal's score unchanged.
    pub fn hybrid(&self, keyword: Option<f32>, vector: Option<f32>) -> Option<f32> {
        match (keyword, vector) {
            (Some(kw), Some(vec)) => Some(
                (self.keyword_weight * kw + self.vector_weight * vec + self.agreement_bonus)
                    .min(1.0),
            ),
            (Some(kw), None) => Some(kw),
            (None, Some(vec)) => Some(vec),
            (None, None) => None,
        }
    }

    /// Boosted vector score for semantic mode
    pub fn semantic(&self, vector: f32) -> f32 {
        (vector * self.semantic_boost).clamp(-1.0, 1.0)
    }
}
