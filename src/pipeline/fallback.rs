//! Confidence-ranked fallback: when orientation is undetermined, recognize
//! all four quarter-turns and keep the one the engine reads best.

use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use super::confidence::aggregate_confidence;
use super::orientation::apply_rotation;
use super::types::{OcrToken, PixelBuffer, RecognitionEngine, RotationAngle, RotationCandidate};

/// Recognition result for one candidate.
#[derive(Debug, Clone)]
pub struct CandidateScore {
    pub angle: RotationAngle,
    /// Mean known confidence; 0 for failed or empty candidates.
    pub score: f32,
    /// `None` when recognition failed for this candidate.
    pub tokens: Option<Vec<OcrToken>>,
}

impl CandidateScore {
    pub fn failed(&self) -> bool {
        self.tokens.is_none()
    }
}

/// The chosen rendition of the page.
#[derive(Debug, Clone)]
pub struct FallbackSelection {
    pub buffer: PixelBuffer,
    pub angle: RotationAngle,
    pub score: f32,
    /// Tokens recognized on `buffer`, reusable by later stages.
    pub tokens: Option<Vec<OcrToken>>,
    /// Every candidate failed recognition; `buffer` is the input as given.
    pub all_failed: bool,
}

/// The four lossless quarter-turn renditions in evaluation order.
pub fn generate_candidates(image: &PixelBuffer) -> Vec<RotationCandidate> {
    RotationAngle::ALL
        .iter()
        .map(|&angle| RotationCandidate {
            buffer: apply_rotation(image, angle),
            angle,
        })
        .collect()
}

/// Index of the winner: strictly highest score, ties to the earliest.
/// `None` for an empty slice.
pub fn pick_winner(scores: &[CandidateScore]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, candidate) in scores.iter().enumerate() {
        match best {
            Some(b) if candidate.score <= scores[b].score => {}
            _ => best = Some(i),
        }
    }
    best
}

pub struct FallbackSelector {
    engine: Arc<dyn RecognitionEngine>,
    parallel: bool,
}

impl FallbackSelector {
    pub fn new(engine: Arc<dyn RecognitionEngine>) -> Self {
        Self {
            engine,
            parallel: true,
        }
    }

    /// Evaluate candidates on scoped threads (default) or one after another.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Score one candidate. Engine errors count as a failed candidate.
    fn evaluate(&self, candidate: &RotationCandidate) -> CandidateScore {
        match self.engine.recognize(&candidate.buffer) {
            Ok(tokens) => {
                let score = aggregate_confidence(&tokens);
                debug!(
                    angle = candidate.angle.degrees(),
                    score,
                    tokens = tokens.len(),
                    "Fallback candidate scored"
                );
                CandidateScore {
                    angle: candidate.angle,
                    score,
                    tokens: Some(tokens),
                }
            }
            Err(e) => {
                warn!(angle = candidate.angle.degrees(), error = %e, "Fallback candidate failed");
                CandidateScore {
                    angle: candidate.angle,
                    score: 0.0,
                    tokens: None,
                }
            }
        }
    }

    /// Scores in candidate order regardless of how they were computed.
    fn score_all(&self, candidates: &[RotationCandidate]) -> Vec<CandidateScore> {
        if !self.parallel {
            return candidates.iter().map(|c| self.evaluate(c)).collect();
        }

        thread::scope(|scope| {
            let handles: Vec<_> = candidates
                .iter()
                .map(|c| (c.angle, scope.spawn(move || self.evaluate(c))))
                .collect();

            handles
                .into_iter()
                .map(|(angle, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        warn!(angle = angle.degrees(), "Fallback worker panicked");
                        CandidateScore {
                            angle,
                            score: 0.0,
                            tokens: None,
                        }
                    })
                })
                .collect()
        })
    }

    /// Recognize every quarter-turn of `image` and keep the best one.
    pub fn select(&self, image: &PixelBuffer) -> FallbackSelection {
        let mut candidates = generate_candidates(image);
        let mut scores = self.score_all(&candidates);

        if scores.iter().all(CandidateScore::failed) {
            warn!("All orientation candidates failed recognition; keeping page as uploaded");
            return FallbackSelection {
                buffer: image.clone(),
                angle: RotationAngle::Deg0,
                score: 0.0,
                tokens: None,
                all_failed: true,
            };
        }

        let winner = pick_winner(&scores).unwrap_or(0);
        let chosen = scores.swap_remove(winner);
        let candidate = candidates.swap_remove(winner);

        info!(
            angle = chosen.angle.degrees(),
            score = chosen.score,
            "Fallback orientation selected"
        );

        FallbackSelection {
            buffer: candidate.buffer,
            angle: chosen.angle,
            score: chosen.score,
            tokens: chosen.tokens,
            all_failed: false,
        }
    }
}
