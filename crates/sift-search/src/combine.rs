//! Merging structured and semantic result sets.
//!
//! All strategies are pure: inputs are borrowed, never mutated, and the
//! same inputs always produce the same output. Results are matched across
//! the two sides by the text value of the configured id field.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use sift_core::config::CombinationConfig;
use sift_core::error::{Result, SiftError};
use sift_core::types::{MatchType, Origin, SearchResult};

/// How hybrid results are merged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum CombineStrategy {
    /// Min-max normalise each side, then blend:
    /// `w * structured + (1 - w) * vector`.
    Weighted { structured_weight: f64 },
    /// Structured results, a separator, then unseen vector results.
    Sequential,
    /// Best single score plus `boost` for items found by both sides.
    RankBoost { boost: f64 },
}

impl CombineStrategy {
    pub fn from_config(config: &CombinationConfig) -> Result<Self> {
        match config.strategy.to_ascii_lowercase().as_str() {
            "weighted" => Ok(CombineStrategy::Weighted {
                structured_weight: config.structured_weight.clamp(0.0, 1.0),
            }),
            "sequential" => Ok(CombineStrategy::Sequential),
            "rank_boost" | "rankboost" => Ok(CombineStrategy::RankBoost {
                boost: config.boost,
            }),
            other => Err(SiftError::Config(format!(
                "unknown combination strategy '{}'",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CombineStrategy::Weighted { .. } => "weighted",
            CombineStrategy::Sequential => "sequential",
            CombineStrategy::RankBoost { .. } => "rank_boost",
        }
    }

    /// Whether merged output keeps its own order instead of being re-sorted.
    pub fn preserves_order(&self) -> bool {
        matches!(self, CombineStrategy::Sequential)
    }
}

/// Merge `structured` and `vector` results with `strategy`.
pub fn combine(
    structured: &[SearchResult],
    vector: &[SearchResult],
    strategy: CombineStrategy,
    id_field: &str,
) -> Vec<SearchResult> {
    match strategy {
        CombineStrategy::Weighted { structured_weight } => {
            weighted(structured, vector, structured_weight, id_field)
        }
        CombineStrategy::Sequential => sequential(structured, vector, id_field),
        CombineStrategy::RankBoost { boost } => rank_boost(structured, vector, boost, id_field),
    }
}

// =============================================================================
// Merge bookkeeping
// =============================================================================

/// One distinct item across both sides, in first-seen order.
struct Merged<'a> {
    /// First occurrence; the structured record when both sides have it.
    base: &'a SearchResult,
    structured: Option<f64>,
    vector: Option<f64>,
    /// Position on each side, for tie-breaking.
    rank_a: Option<usize>,
    rank_b: Option<usize>,
}

impl Merged<'_> {
    fn into_result(self, score: f64) -> SearchResult {
        let mut result = self.base.clone();
        result.score = score;
        if self.structured.is_some() && self.vector.is_some() {
            result.match_type = MatchType::Hybrid;
            result.origin = Origin::Both;
        }
        result
    }
}

/// Key for matching. Results without an id never merge with anything.
fn key_for(result: &SearchResult, id_field: &str, side: char, index: usize) -> String {
    result
        .key(id_field)
        .unwrap_or_else(|| format!("\u{0}{}{}", side, index))
}

/// Pair up both sides by key. Scores come from `score_a` / `score_b`.
/// Duplicate keys within one side keep their first occurrence.
fn merge<'a>(
    a: &'a [SearchResult],
    score_a: &[f64],
    b: &'a [SearchResult],
    score_b: &[f64],
    id_field: &str,
) -> Vec<Merged<'a>> {
    let mut order: Vec<Merged<'a>> = Vec::with_capacity(a.len() + b.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (i, (result, score)) in a.iter().zip(score_a).enumerate() {
        let key = key_for(result, id_field, 'a', i);
        if positions.contains_key(&key) {
            continue;
        }
        positions.insert(key, order.len());
        order.push(Merged {
            base: result,
            structured: Some(*score),
            vector: None,
            rank_a: Some(i),
            rank_b: None,
        });
    }

    for (i, (result, score)) in b.iter().zip(score_b).enumerate() {
        let key = key_for(result, id_field, 'b', i);
        match positions.get(&key) {
            Some(&pos) => {
                if order[pos].vector.is_none() {
                    order[pos].vector = Some(*score);
                    order[pos].rank_b = Some(i);
                }
            }
            None => {
                positions.insert(key, order.len());
                order.push(Merged {
                    base: result,
                    structured: None,
                    vector: Some(*score),
                    rank_a: None,
                    rank_b: Some(i),
                });
            }
        }
    }

    order
}

/// Min-max normalisation to [0, 1]. A constant side maps to all 1.0.
fn normalize_scores(results: &[SearchResult]) -> Vec<f64> {
    let min = results.iter().map(|r| r.score).fold(f64::INFINITY, f64::min);
    let max = results.iter().map(|r| r.score).fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    results
        .iter()
        .map(|r| if range > 0.0 { (r.score - min) / range } else { 1.0 })
        .collect()
}

fn raw_scores(results: &[SearchResult]) -> Vec<f64> {
    results.iter().map(|r| r.score).collect()
}

pub(crate) fn sort_desc(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

// =============================================================================
// Strategies
// =============================================================================

fn weighted(a: &[SearchResult], b: &[SearchResult], w: f64, id_field: &str) -> Vec<SearchResult> {
    let w = w.clamp(0.0, 1.0);
    let norm_a = normalize_scores(a);
    let norm_b = normalize_scores(b);

    let mut scored: Vec<(f64, (usize, usize), Merged<'_>)> = merge(a, &norm_a, b, &norm_b, id_field)
        .into_iter()
        .filter_map(|item| {
            let score = match (item.structured, item.vector) {
                (Some(sa), Some(sb)) => w * sa + (1.0 - w) * sb,
                (Some(sa), None) if w > 0.0 => w * sa,
                (None, Some(sb)) if w < 1.0 => (1.0 - w) * sb,
                _ => return None,
            };
            // With no structured weight the vector side's own order decides ties.
            let ra = item.rank_a.unwrap_or(usize::MAX);
            let rb = item.rank_b.unwrap_or(usize::MAX);
            let tie = if w <= 0.0 { (rb, ra) } else { (ra, rb) };
            Some((score, tie, item))
        })
        .collect();

    scored.sort_by(|x, y| {
        y.0.partial_cmp(&x.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(x.1.cmp(&y.1))
    });
    scored
        .into_iter()
        .map(|(score, _, item)| item.into_result(score))
        .collect()
}

fn sequential(a: &[SearchResult], b: &[SearchResult], id_field: &str) -> Vec<SearchResult> {
    let seen: HashSet<String> = a
        .iter()
        .enumerate()
        .map(|(i, r)| key_for(r, id_field, 'a', i))
        .collect();

    let mut out: Vec<SearchResult> = a.to_vec();
    if !a.is_empty() && !b.is_empty() {
        out.push(SearchResult::separator());
    }

    let mut emitted = HashSet::new();
    for (i, result) in b.iter().enumerate() {
        let key = key_for(result, id_field, 'b', i);
        if seen.contains(&key) || !emitted.insert(key) {
            continue;
        }
        out.push(result.clone());
    }
    out
}

fn rank_boost(a: &[SearchResult], b: &[SearchResult], boost: f64, id_field: &str) -> Vec<SearchResult> {
    let mut out: Vec<SearchResult> = merge(a, &raw_scores(a), b, &raw_scores(b), id_field)
        .into_iter()
        .map(|item| {
            let score = match (item.structured, item.vector) {
                (Some(sa), Some(sb)) => sa.max(sb) + boost,
                (Some(s), None) | (None, Some(s)) => s,
                (None, None) => 0.0,
            };
            item.into_result(score)
        })
        .collect();

    sort_desc(&mut out);
    out
}
