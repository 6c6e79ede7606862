//! Grace-period hard-delete reclamation for chunks already soft-deleted by a caller.

use chrono::{Duration, Utc};
use common::chunk::Chunk;
use common::error::AppError;
use common::store::filter::{Filter, FilterClause};
use common::store::ChunkStore;
use serde_json::json;
use tracing::info;

pub const GRACE_PERIOD_DAYS: i64 = 14;

#[derive(Debug, Clone, Default)]
pub struct VacuumRequest {
    pub force: bool,
    pub dry_run: bool,
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct VacuumSummary {
    pub scanned: usize,
    pub deleted: usize,
    pub within_grace: usize,
    pub sample: Vec<String>,
}

/// Scrolls up to `request.limit` soft-deleted chunks; for each, hard-deletes it if
/// `force` or the grace period has elapsed, otherwise counts it as within grace. In
/// `dry_run` mode nothing is deleted, only counted.
pub async fn run(store: &dyn ChunkStore, request: VacuumRequest) -> Result<VacuumSummary, AppError> {
    let filter = Filter::new().must(FilterClause::Match {
        key: "deletion_eligible".to_string(),
        value: json!(true),
    });
    let candidates = store.scroll(&filter, request.limit).await?;

    let mut summary = VacuumSummary {
        scanned: candidates.len(),
        ..Default::default()
    };

    let mut to_delete = Vec::new();
    for chunk in &candidates {
        if eligible_for_hard_delete(chunk, request.force) {
            to_delete.push(chunk.id.clone());
            if summary.sample.len() < 10 {
                summary.sample.push(chunk.id.clone());
            }
        } else {
            summary.within_grace += 1;
        }
    }

    if request.dry_run {
        summary.deleted = to_delete.len();
        info!(scanned = summary.scanned, would_delete = summary.deleted, "vacuum dry run complete");
        return Ok(summary);
    }

    if !to_delete.is_empty() {
        store.delete(&to_delete).await?;
    }
    summary.deleted = to_delete.len();

    info!(scanned = summary.scanned, deleted = summary.deleted, within_grace = summary.within_grace, "vacuum complete");
    Ok(summary)
}

fn eligible_for_hard_delete(chunk: &Chunk, force: bool) -> bool {
    if force {
        return true;
    }
    match chunk.deletion_marked_at {
        Some(marked_at) => Utc::now() - marked_at >= Duration::days(GRACE_PERIOD_DAYS),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_marked(days_ago: i64) -> Chunk {
        let mut c = Chunk::new("id1".into(), "x".into(), "a.md".into(), "a.md".into(), "md".into(), 0, 1);
        c.deletion_eligible = true;
        c.deletion_marked_at = Some(Utc::now() - Duration::days(days_ago));
        c
    }

    #[test]
    fn within_grace_is_not_eligible_without_force() {
        let chunk = chunk_marked(1);
        assert!(!eligible_for_hard_delete(&chunk, false));
    }

    #[test]
    fn past_grace_is_eligible_without_force() {
        let chunk = chunk_marked(15);
        assert!(eligible_for_hard_delete(&chunk, false));
    }

    #[test]
    fn force_overrides_grace() {
        let chunk = chunk_marked(1);
        assert!(eligible_for_hard_delete(&chunk, true));
    }
}
