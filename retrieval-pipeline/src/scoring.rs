//! Reciprocal rank fusion of two ranked lists, grounded in the `Scored<T>` accumulator
//! shape the teacher's linear-weighted `fuse_scores` uses, but implementing RRF instead:
//! this domain always fuses exactly two ranked lists (dense + full-text), so plain RRF
//! with a fixed `k` is the right-sized tool rather than the teacher's tunable
//! `FusionWeights`/`multi_bonus` scheme for three simultaneous signals.

use std::cmp::Ordering;
use std::collections::HashMap;

use common::chunk::Chunk;

const RRF_K: f32 = 60.0;

/// Fuses `dense` and `fts`, both already ranked best-first, summing `1/(k+rank)` per list
/// a chunk appears in. Returns the top `limit` by combined score, ties broken by id for
/// determinism.
pub fn reciprocal_rank_fusion(
    dense: Vec<(Chunk, f32)>,
    fts: Vec<(Chunk, f32)>,
    limit: usize,
) -> Vec<(Chunk, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut items: HashMap<String, Chunk> = HashMap::new();

    for (rank, (chunk, _)) in dense.into_iter().enumerate() {
        let id = chunk.id.clone();
        *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
        items.entry(id).or_insert(chunk);
    }
    for (rank, (chunk, _)) in fts.into_iter().enumerate() {
        let id = chunk.id.clone();
        *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
        items.entry(id).or_insert(chunk);
    }

    let mut fused: Vec<(Chunk, f32)> = items
        .into_iter()
        .map(|(id, chunk)| {
            let score = scores.get(&id).copied().unwrap_or(0.0);
            (chunk, score)
        })
        .collect();

    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
    fused.truncate(limit);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str) -> Chunk {
        Chunk::new(id.to_string(), "text".into(), "p".into(), "p".into(), "md".into(), 0, 1)
    }

    #[test]
    fn chunk_present_in_both_lists_outranks_single_list_hits() {
        let dense = vec![(chunk("a"), 0.9), (chunk("b"), 0.8)];
        let fts = vec![(chunk("b"), 2.0), (chunk("c"), 1.0)];

        let fused = reciprocal_rank_fusion(dense, fts, 10);

        assert_eq!(fused[0].0.id, "b");
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn truncates_to_limit() {
        let dense = vec![(chunk("a"), 0.9), (chunk("b"), 0.8), (chunk("c"), 0.7)];
        let fused = reciprocal_rank_fusion(dense, Vec::new(), 2);
        assert_eq!(fused.len(), 2);
    }
}
