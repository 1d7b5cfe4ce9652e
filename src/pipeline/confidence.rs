use serde::Serialize;

use super::types::OcrToken;

/// Confidence thresholds on the engine's 0-100 scale.
pub mod thresholds {
    /// Below this: recognition likely failed (wrong orientation, noise).
    pub const VERY_LOW: f32 = 30.0;

    /// Below this: significant uncertainty.
    pub const LOW: f32 = 50.0;

    /// At or above this: high confidence. Between `LOW` and here is moderate.
    pub const HIGH: f32 = 85.0;
}

/// Arithmetic mean of the confidences that are known (> 0).
/// No known confidences yields 0.
pub fn mean_confidence(confidences: impl IntoIterator<Item = u8>) -> f32 {
    let (sum, count) = confidences
        .into_iter()
        .filter(|&c| c > 0)
        .fold((0u64, 0u64), |(sum, count), c| (sum + u64::from(c), count + 1));

    if count == 0 {
        return 0.0;
    }
    sum as f32 / count as f32
}

/// Score for a token list, used both to rank fallback candidates and as
/// the overall confidence of a run.
pub fn aggregate_confidence(tokens: &[OcrToken]) -> f32 {
    mean_confidence(tokens.iter().map(|t| t.confidence))
}

/// Coarse label for a confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    VeryLow,
    Low,
    Moderate,
    High,
}

impl ConfidenceBand {
    pub fn from_score(score: f32) -> Self {
        if score < thresholds::VERY_LOW {
            ConfidenceBand::VeryLow
        } else if score < thresholds::LOW {
            ConfidenceBand::Low
        } else if score < thresholds::HIGH {
            ConfidenceBand::Moderate
        } else {
            ConfidenceBand::High
        }
    }
}
