//! Result ranking
//!
//! Final score is `alpha*similarity + beta*confidence + gamma*context_boost
//! + delta*recency` with weights from configuration. Ranking modes reorder
//! the scored set: relevance keeps score order, recency sorts fresh
//! annotations first, diversity decays repeated files.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use astdex_config::RankingConfig;
use astdex_core::Annotation;

use crate::types::{QueryContext, RankingMode};

/// Score decay per repeated file in diversity mode.
const DIVERSITY_DECAY: f32 = 0.8;

/// A hydrated candidate awaiting ranking.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub annotation: Annotation,
    /// Cosine similarity to the query (1 - distance)
    pub similarity: f32,
}

/// A ranked candidate with its final score.
#[derive(Debug, Clone)]
pub struct Ranked {
    pub annotation: Annotation,
    pub similarity: f32,
    pub confidence: f32,
    pub context_boost: f32,
    pub recency: f32,
    pub score: f32,
}

/// Annotation completeness as a confidence proxy.
///
/// A fully populated annotation (signature, summary, purpose) scores 1.0;
/// bare records bottom out at 0.5.
pub fn confidence_of(annotation: &Annotation) -> f32 {
    let mut confidence = 0.5f32;
    if !annotation.signature.is_empty() {
        confidence += 0.2;
    }
    if !annotation.summary.is_empty() {
        confidence += 0.15;
    }
    if !annotation.purpose.is_empty() {
        confidence += 0.15;
    }
    confidence.min(1.0)
}

/// Recency in [0, 1]: 1.0 for annotations updated now, decaying by age.
pub fn recency_of(annotation: &Annotation, now_ms: i64) -> f32 {
    let age_ms = (now_ms - annotation.last_updated).max(0) as f64;
    let age_days = age_ms / (24.0 * 60.0 * 60.0 * 1000.0);
    (1.0 / (1.0 + age_days)) as f32
}

/// Context boost in [0, 1] from editor context.
pub fn context_boost_of(annotation: &Annotation, context: Option<&QueryContext>) -> f32 {
    let Some(context) = context else {
        return 0.0;
    };

    if let Some(current) = &context.current_file {
        if annotation.file_path == *current {
            return 1.0;
        }
    }
    if context.recent_files.iter().any(|f| *f == annotation.file_path) {
        return 0.5;
    }
    if let Some(current) = &context.current_file {
        let current_dir = current.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        let candidate_dir = annotation
            .file_path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or("");
        if !current_dir.is_empty() && current_dir == candidate_dir {
            return 0.25;
        }
    }
    0.0
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Score and order candidates.
pub fn rank(
    candidates: Vec<Candidate>,
    weights: &RankingConfig,
    mode: RankingMode,
    context: Option<&QueryContext>,
    use_context_boosting: bool,
) -> Vec<Ranked> {
    let now_ms = unix_millis();

    let mut ranked: Vec<Ranked> = candidates
        .into_iter()
        .map(|candidate| {
            let confidence = confidence_of(&candidate.annotation);
            let context_boost = if use_context_boosting {
                context_boost_of(&candidate.annotation, context)
            } else {
                0.0
            };
            let recency = recency_of(&candidate.annotation, now_ms);
            let score = weights.alpha * candidate.similarity
                + weights.beta * confidence
                + weights.gamma * context_boost
                + weights.delta * recency;

            Ranked {
                annotation: candidate.annotation,
                similarity: candidate.similarity,
                confidence,
                context_boost,
                recency,
                score,
            }
        })
        .collect();

    match mode {
        RankingMode::Relevance => {
            sort_by_score(&mut ranked);
        }
        RankingMode::Recency => {
            ranked.sort_by(|a, b| {
                b.annotation
                    .last_updated
                    .cmp(&a.annotation.last_updated)
                    .then_with(|| b.score.total_cmp(&a.score))
                    .then_with(|| a.annotation.node_id.cmp(&b.annotation.node_id))
            });
        }
        RankingMode::Diversity => {
            sort_by_score(&mut ranked);
            // Greedy decay: each further hit from an already-seen file
            // drops by the decay factor, then re-sort
            let mut seen: HashMap<String, u32> = HashMap::new();
            for entry in ranked.iter_mut() {
                let repeats = seen.entry(entry.annotation.file_path.clone()).or_insert(0);
                entry.score *= DIVERSITY_DECAY.powi(*repeats as i32);
                *repeats += 1;
            }
            sort_by_score(&mut ranked);
        }
    }

    ranked
}

fn sort_by_score(ranked: &mut [Ranked]) {
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.annotation.node_id.cmp(&b.annotation.node_id))
    });
}
