//! Cosine similarity and result ranking for the linear-scan fact search.

use std::cmp::Ordering;

use super::types::{Fact, ScoredFact};

/// `dot(a, b) / (|a| * |b|)`. Returns `0.0` for a zero-norm input or when the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Score every candidate against `query`, keep those at or above `min_score`,
/// and return the best `top_k`.
///
/// Order: score descending, then newest `created_at`, then id descending.
pub fn rank(query: &[f32], facts: Vec<Fact>, top_k: usize, min_score: f32) -> Vec<ScoredFact> {
    if top_k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<ScoredFact> = facts
        .into_iter()
        .map(|fact| {
            let score = cosine_similarity(query, &fact.embedding);
            ScoredFact { fact, score }
        })
        .filter(|s| s.score >= min_score)
        .collect();

    scored.sort_by(compare);
    scored.truncate(top_k);
    scored
}

fn compare(a: &ScoredFact, b: &ScoredFact) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.fact.created_at.cmp(&a.fact.created_at))
        .then_with(|| b.fact.id.cmp(&a.fact.id))
}
