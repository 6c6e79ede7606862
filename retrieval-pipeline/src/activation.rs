//! Parallel weighted retrieval across consolidation levels L0-L3 plus the session
//! working-memory buffer, grounded in the teacher's pattern of issuing independent
//! per-facet searches and assembling them into one formatted context block.

use common::error::AppError;
use common::session::{ConversationTurn, WorkingBuffer};
use ingest_pipeline::qntm::QntmGenerator;

use crate::search::{SearchEngine, SearchRequest, SearchResult};

const LEVEL_COUNT: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct LevelWeights {
    pub l0: f32,
    pub l1: f32,
    pub l2: f32,
    pub l3: f32,
}

impl Default for LevelWeights {
    fn default() -> Self {
        Self { l0: 0.4, l1: 0.3, l2: 0.2, l3: 0.1 }
    }
}

impl LevelWeights {
    fn as_array(&self) -> [f32; LEVEL_COUNT] {
        [self.l0, self.l1, self.l2, self.l3]
    }
}

pub struct ActivationRequest {
    pub query: String,
    pub session_id: Option<String>,
    pub limit: usize,
    pub weights: LevelWeights,
}

impl Default for ActivationRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            session_id: None,
            limit: 20,
            weights: LevelWeights::default(),
        }
    }
}

pub struct ActivationResult {
    pub working: Vec<ConversationTurn>,
    pub levels: [Vec<SearchResult>; LEVEL_COUNT],
    pub total_results: usize,
    pub query_expansion: Vec<String>,
}

/// Issues one search per consolidation level (in parallel, via `tokio::join!`-style
/// concurrent futures) with per-level limits proportional to `weights`, and folds in the
/// session's recent working-memory turns.
pub async fn activate(
    engine: &SearchEngine,
    working_buffer: &WorkingBuffer,
    qntm: Option<&QntmGenerator>,
    request: ActivationRequest,
) -> Result<ActivationResult, AppError> {
    let working = match &request.session_id {
        Some(session_id) => working_buffer.recent(session_id, request.limit).await,
        None => Vec::new(),
    };

    let query_expansion = match qntm {
        Some(qntm) => qntm.generate_query_qntm_keys(&request.query, &[]).await,
        None => Vec::new(),
    };

    let per_level_limits = level_limits(request.limit, request.weights);

    let futures = per_level_limits.into_iter().enumerate().map(|(level, limit)| {
        let search_request = SearchRequest {
            query: request.query.clone(),
            limit,
            consolidation_level: Some(level as u8),
            ..Default::default()
        };
        engine.search(search_request)
    });

    let results: Vec<Result<Vec<SearchResult>, AppError>> = futures::future::join_all(futures).await;

    let mut levels: [Vec<SearchResult>; LEVEL_COUNT] = Default::default();
    for (level, result) in results.into_iter().enumerate() {
        levels[level] = match result {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(level, error = %err, "activation search failed for this level");
                Vec::new()
            }
        };
    }

    let total_results = levels.iter().map(Vec::len).sum();

    Ok(ActivationResult {
        working,
        levels,
        total_results,
        query_expansion,
    })
}

/// Computes per-level limits as `ceil(limit * w_i / sum(w))`, matching the distilled
/// spec's rounding policy exactly (ceiling, not floor, so small limits still activate
/// every level at least once when its weight is nonzero).
fn level_limits(limit: usize, weights: LevelWeights) -> [usize; LEVEL_COUNT] {
    let raw = weights.as_array();
    let total: f32 = raw.iter().sum();
    if total <= 0.0 {
        return [0; LEVEL_COUNT];
    }
    let mut out = [0usize; LEVEL_COUNT];
    for (i, w) in raw.iter().enumerate() {
        out[i] = ((limit as f32) * w / total).ceil() as usize;
    }
    out
}

/// Renders an activation result to a plain-text context block: one section per level plus
/// the working buffer, each hit truncated to roughly 200 characters.
pub fn format_activated_memory(result: &ActivationResult) -> String {
    const TRUNCATE_AT: usize = 200;
    let mut out = String::new();

    if !result.working.is_empty() {
        out.push_str("## Working Memory\n");
        for turn in &result.working {
            out.push_str(&format!("- [{}] {}\n", turn.role, truncate(&turn.text, TRUNCATE_AT)));
        }
        out.push('\n');
    }

    let labels = ["L0 (episodic)", "L1 (topic)", "L2 (concept)", "L3 (principle)"];
    for (label, hits) in labels.iter().zip(result.levels.iter()) {
        if hits.is_empty() {
            continue;
        }
        out.push_str(&format!("## {label}\n"));
        for hit in hits {
            out.push_str(&format!(
                "- ({}#{}) {}\n",
                hit.file_path,
                hit.chunk_index,
                truncate(&hit.text, TRUNCATE_AT)
            ));
        }
        out.push('\n');
    }

    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push('\u{2026}');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_limits_ceil_round_and_respect_default_weights() {
        let limits = level_limits(10, LevelWeights::default());
        assert_eq!(limits, [4, 3, 2, 1]);
    }

    #[test]
    fn level_limits_all_zero_when_weights_sum_to_zero() {
        let limits = level_limits(10, LevelWeights { l0: 0.0, l1: 0.0, l2: 0.0, l3: 0.0 });
        assert_eq!(limits, [0, 0, 0, 0]);
    }

    #[test]
    fn format_truncates_long_hits() {
        let long_text = "x".repeat(300);
        assert!(truncate(&long_text, 200).chars().count() <= 201);
    }
}
