//! Two-signal confidence calibration.
//!
//! A run produces two independent signals: how well retrieval matched the
//! question (mean similarity) and how confident the model claims to be in its
//! own answer. [`fuse`] combines them with normalized weights and
//! [`score_to_level`] buckets the result. When the model's self-rating cannot be
//! parsed, [`heuristic_score`] scans the free text for hedging markers instead.

use serde::{Deserialize, Serialize};

use crate::types::ConfidenceLevel;

/// Scores at or above this are at least `low`. Not configurable.
pub const LOW_THRESHOLD: f64 = 0.25;

pub const DEFAULT_RETRIEVAL_WEIGHT: f64 = 0.6;
pub const DEFAULT_MODEL_WEIGHT: f64 = 0.4;
pub const DEFAULT_HIGH_THRESHOLD: f64 = 0.75;
pub const DEFAULT_MEDIUM_THRESHOLD: f64 = 0.50;

/// Phrases admitting the retrieved material does not support an answer.
const INADEQUATE_MARKERS: &[&str] = &[
    "i don't have enough information",
    "i do not have enough information",
    "insufficient information",
    "cannot answer",
];

/// Phrases signalling only partial relevance.
const PARTIAL_MARKERS: &[&str] = &[
    "limited information",
    "may not fully answer",
    "somewhat relevant",
];

const INADEQUATE_SCORE: f64 = 0.2;
const PARTIAL_SCORE: f64 = 0.5;
const STRONG_SCORE: f64 = 0.9;
const UNMARKED_SCORE: f64 = 0.7;

/// Process-wide defaults for fusion weights and level thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSettings {
    pub retrieval_weight: f64,
    pub model_weight: f64,
    pub high_threshold: f64,
    pub medium_threshold: f64,
}

impl Default for ConfidenceSettings {
    fn default() -> Self {
        Self {
            retrieval_weight: DEFAULT_RETRIEVAL_WEIGHT,
            model_weight: DEFAULT_MODEL_WEIGHT,
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            medium_threshold: DEFAULT_MEDIUM_THRESHOLD,
        }
    }
}

/// A numeric score together with the level it maps to.
///
/// Only constructible from a score and thresholds, so the level can never
/// disagree with the score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Confidence {
    score: f64,
    level: ConfidenceLevel,
}

impl Confidence {
    pub fn from_score(score: f64, high_threshold: f64, medium_threshold: f64) -> Self {
        Self {
            score,
            level: score_to_level(score, high_threshold, medium_threshold),
        }
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn level(&self) -> ConfidenceLevel {
        self.level
    }
}

/// The single-word self-rating the model is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfRating {
    High,
    Medium,
    Low,
    Insufficient,
}

impl SelfRating {
    pub fn score(&self) -> f64 {
        match self {
            Self::High => 0.9,
            Self::Medium => 0.6,
            Self::Low => 0.3,
            Self::Insufficient => 0.1,
        }
    }

    fn from_word(word: &str) -> Option<Self> {
        if word.eq_ignore_ascii_case("high") {
            Some(Self::High)
        } else if word.eq_ignore_ascii_case("medium") {
            Some(Self::Medium)
        } else if word.eq_ignore_ascii_case("low") {
            Some(Self::Low)
        } else if word.eq_ignore_ascii_case("insufficient") {
            Some(Self::Insufficient)
        } else {
            None
        }
    }

    /// Find the first rating word in a model reply, e.g. `"Confidence: MEDIUM"`.
    ///
    /// Matches whole words only, so "follow" does not read as LOW.
    pub fn parse(reply: &str) -> Option<Self> {
        reply
            .split(|c: char| !c.is_ascii_alphabetic())
            .filter(|w| !w.is_empty())
            .find_map(Self::from_word)
    }
}

/// Weighted sum of the two signals with weights normalized to sum to 1.
///
/// Callers may pass raw weights; `fuse(r, m, 3.0, 2.0)` equals
/// `fuse(r, m, 0.6, 0.4)`. A non-positive total falls back to equal weights.
pub fn fuse(retrieval_score: f64, model_score: f64, retrieval_weight: f64, model_weight: f64) -> f64 {
    let total = retrieval_weight + model_weight;
    let (wr, wm) = if total > 0.0 && total.is_finite() {
        (retrieval_weight / total, model_weight / total)
    } else {
        (0.5, 0.5)
    };
    retrieval_score * wr + model_score * wm
}

/// Map a score onto a level. Boundaries are inclusive.
pub fn score_to_level(score: f64, high_threshold: f64, medium_threshold: f64) -> ConfidenceLevel {
    if score >= high_threshold {
        ConfidenceLevel::High
    } else if score >= medium_threshold {
        ConfidenceLevel::Medium
    } else if score >= LOW_THRESHOLD {
        ConfidenceLevel::Low
    } else {
        ConfidenceLevel::Insufficient
    }
}

/// Estimate confidence from hedging language in free text.
///
/// Order matters: inadequate-support markers win over partial ones, which win
/// over strong-support markers. Text with no marker scores 0.7.
pub fn heuristic_score(text: &str) -> f64 {
    let lower = text.to_lowercase();

    if INADEQUATE_MARKERS.iter().any(|m| lower.contains(m)) {
        return INADEQUATE_SCORE;
    }
    if PARTIAL_MARKERS.iter().any(|m| lower.contains(m)) {
        return PARTIAL_SCORE;
    }
    if lower.contains("the retrieved documents") && lower.contains("directly address") {
        return STRONG_SCORE;
    }
    UNMARKED_SCORE
}

/// Stateless assessor bound to a set of default weights and thresholds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceAssessor {
    settings: ConfidenceSettings,
}

impl ConfidenceAssessor {
    pub fn new(settings: ConfidenceSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ConfidenceSettings {
        &self.settings
    }

    /// Bucket a score with the default thresholds.
    pub fn confidence(&self, score: f64) -> Confidence {
        Confidence::from_score(
            score,
            self.settings.high_threshold,
            self.settings.medium_threshold,
        )
    }

    /// Fuse retrieval and model scores with the default weights.
    pub fn assess(&self, retrieval_score: f64, model_score: f64) -> Confidence {
        self.assess_with(retrieval_score, model_score, None, None)
    }

    /// Fuse with per-call weight overrides; `None` keeps the default.
    pub fn assess_with(
        &self,
        retrieval_score: f64,
        model_score: f64,
        retrieval_weight: Option<f64>,
        model_weight: Option<f64>,
    ) -> Confidence {
        let score = fuse(
            retrieval_score,
            model_score,
            retrieval_weight.unwrap_or(self.settings.retrieval_weight),
            model_weight.unwrap_or(self.settings.model_weight),
        );
        self.confidence(score)
    }

    /// Confidence from the hedging-phrase scan alone.
    pub fn heuristic(&self, text: &str) -> Confidence {
        self.confidence(heuristic_score(text))
    }

    /// Parse the model's one-word self-rating, scanning the reply heuristically
    /// when it names no rating.
    pub fn parse_self_rating(&self, reply: &str) -> Confidence {
        match SelfRating::parse(reply) {
            Some(rating) => self.confidence(rating.score()),
            None => self.heuristic(reply),
        }
    }
}
