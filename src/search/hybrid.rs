//! RRF (Reciprocal Rank Fusion) for hybrid search

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::FusionConfig;
use crate::document::Document;

/// Range ratio above which one list's scores are flagged as dominant.
const DOMINANCE_RATIO: f64 = 5.0;

/// Reciprocal Rank Fusion parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RrfConfig {
    /// K parameter (default: 60)
    pub k: f64,
    /// Weight for the first (vector) list
    pub vector_weight: f64,
    /// Weight for the second (lexical) list
    pub lexical_weight: f64,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self {
            k: 60.0,
            vector_weight: 1.0,
            lexical_weight: 1.0,
        }
    }
}

impl From<&FusionConfig> for RrfConfig {
    fn from(config: &FusionConfig) -> Self {
        Self {
            k: config.k,
            vector_weight: config.vector_weight,
            lexical_weight: config.lexical_weight,
        }
    }
}

/// Distribution of one result list's scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub range: f64,
}

impl ScoreSummary {
    /// `None` when no document carries a score.
    pub fn of(documents: &[Document]) -> Option<Self> {
        let scores: Vec<f64> = documents.iter().filter_map(|doc| doc.score).collect();
        if scores.is_empty() {
            return None;
        }
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        Some(Self {
            count: scores.len(),
            min,
            max,
            mean,
            range: max - min,
        })
    }
}

/// Whether one list's score range exceeds the other's by more than 5x.
pub fn range_dominates(a: &ScoreSummary, b: &ScoreSummary) -> bool {
    let (wide, narrow) = if a.range >= b.range {
        (a.range, b.range)
    } else {
        (b.range, a.range)
    };
    if narrow > 0.0 {
        wide / narrow > DOMINANCE_RATIO
    } else {
        wide > 0.0
    }
}

fn log_summaries(vector: &[Document], lexical: &[Document]) {
    let vector_summary = ScoreSummary::of(vector);
    let lexical_summary = ScoreSummary::of(lexical);
    debug!(vector = ?vector_summary, lexical = ?lexical_summary, "fusing result lists");
    if let (Some(v), Some(l)) = (vector_summary, lexical_summary) {
        if range_dominates(&v, &l) {
            warn!(
                vector_range = v.range,
                lexical_range = l.range,
                "one retriever's score range dominates the other"
            );
        }
    }
}

/// Fuse two ranked lists using RRF.
///
/// A document at 1-based rank `r` contributes `weight / (k + r)`. A document
/// in both lists keeps the first list's payload. Output is ordered by fused
/// score descending, then id ascending, and carries the fused score.
pub fn fuse(
    vector: &[Document],
    lexical: &[Document],
    top_k: usize,
    config: &RrfConfig,
) -> Vec<Document> {
    log_summaries(vector, lexical);

    let mut fused: HashMap<&str, (f64, &Document)> = HashMap::new();
    for (list, weight) in [(vector, config.vector_weight), (lexical, config.lexical_weight)] {
        for (rank, doc) in list.iter().enumerate() {
            let contribution = weight / (config.k + (rank + 1) as f64);
            fused
                .entry(doc.id.as_str())
                .and_modify(|(score, _)| *score += contribution)
                .or_insert((contribution, doc));
        }
    }

    let mut ranked: Vec<(f64, &Document)> = fused.into_values().collect();
    ranked.sort_by(|(score_a, doc_a), (score_b, doc_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| doc_a.id.cmp(&doc_b.id))
    });
    ranked.truncate(top_k);

    ranked
        .into_iter()
        .map(|(score, doc)| Document {
            score: Some(score),
            ..doc.clone()
        })
        .collect()
}
