//! Duplicate-cluster scanning, merge classification, and supersessor creation, grounded
//! in the request-building/response-parsing shape of the teacher's
//! `prepare_llm_request`/`perform_analysis` pair, retargeted at a
//! `{type, direction, reasoning, merged_text}` classification schema.

use std::sync::Arc;
use std::time::Duration;

use common::backends::embedding::EmbeddingBackend;
use common::backends::llm::JsonLlmBackend;
use common::backends::{with_timeout, DEFAULT_NETWORK_TIMEOUT};
use common::chunk::{Chunk, ConsolidationDirection, ConsolidationType, Importance};
use common::error::AppError;
use common::store::filter::{Filter, FilterClause};
use common::store::{ChunkPoint, ChunkStore};
use ingest_pipeline::qntm::QntmGenerator;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

const DEFAULT_THRESHOLD: f32 = 0.92;
const MIN_CLUSTER_SIZE: usize = 2;
const CLASSIFICATION_TEMPLATE: &str = "CONSOLIDATION_CLASSIFICATION\n%BODY%";

#[derive(Debug, Clone)]
pub struct ConsolidationRequest {
    pub threshold: f32,
    pub limit: usize,
    pub dry_run: bool,
}

impl Default for ConsolidationRequest {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            limit: 100,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsolidationCandidate {
    pub seed_id: String,
    pub member_ids: Vec<String>,
    pub similarities: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct ConsolidationSummary {
    pub consolidated: usize,
    pub deleted: usize,
    pub candidates_found: usize,
    pub candidates: Vec<ConsolidationCandidate>,
}

#[derive(Debug, Deserialize)]
struct ClassificationResponse {
    #[serde(rename = "type")]
    kind: String,
    direction: String,
    reasoning: String,
    merged_text: String,
}

pub struct ConsolidationEngine {
    store: Arc<dyn ChunkStore>,
    embedding: Arc<dyn EmbeddingBackend>,
    llm: Arc<dyn JsonLlmBackend>,
    qntm: Arc<QntmGenerator>,
    timeout: Duration,
}

impl ConsolidationEngine {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedding: Arc<dyn EmbeddingBackend>,
        llm: Arc<dyn JsonLlmBackend>,
        qntm: Arc<QntmGenerator>,
    ) -> Self {
        Self {
            store,
            embedding,
            llm,
            qntm,
            timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }

    /// Overrides the per-call deadline applied to embedding and LLM calls, normally
    /// sourced from `AppConfig::network_timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(&self, request: ConsolidationRequest) -> Result<ConsolidationSummary, AppError> {
        let seeds = self.scroll_eligible_seeds(request.limit).await?;
        let mut consumed = std::collections::HashSet::new();
        let mut candidates = Vec::new();

        for seed in &seeds {
            if consumed.contains(&seed.id) {
                continue;
            }
            let cluster = self.find_cluster(seed, request.threshold).await?;
            if cluster.member_ids.len() < MIN_CLUSTER_SIZE {
                continue;
            }
            for member_id in &cluster.member_ids {
                consumed.insert(member_id.clone());
            }
            candidates.push(cluster);
        }

        let candidates_found = candidates.len();

        if request.dry_run {
            info!(candidates_found, "consolidation dry run complete");
            return Ok(ConsolidationSummary {
                consolidated: 0,
                deleted: 0,
                candidates_found,
                candidates,
            });
        }

        let mut consolidated = 0;
        for candidate in &candidates {
            match self.consolidate_cluster(candidate).await {
                Ok(()) => consolidated += 1,
                Err(err) => warn!(seed_id = %candidate.seed_id, error = %err, "failed to consolidate cluster"),
            }
        }

        Ok(ConsolidationSummary {
            consolidated,
            deleted: 0,
            candidates_found,
            candidates: Vec::new(),
        })
    }

    async fn scroll_eligible_seeds(&self, limit: usize) -> Result<Vec<Chunk>, AppError> {
        let filter = Filter::visible_heads().must(FilterClause::Match {
            key: "consolidated".to_string(),
            value: json!(false),
        });
        self.store.scroll(&filter, limit).await
    }

    async fn find_cluster(&self, seed: &Chunk, threshold: f32) -> Result<ConsolidationCandidate, AppError> {
        let batch = with_timeout(
            self.timeout,
            self.embedding.embed_text(std::slice::from_ref(&seed.original_text)),
        )
        .await?;
        let Some(vector) = batch.embeddings.into_iter().next() else {
            return Ok(ConsolidationCandidate {
                seed_id: seed.id.clone(),
                member_ids: vec![seed.id.clone()],
                similarities: vec![1.0],
            });
        };

        let filter = Filter::visible_heads().must(FilterClause::Match {
            key: "consolidated".to_string(),
            value: json!(false),
        });
        let neighbors = self.store.search(vector, &filter, MIN_CLUSTER_SIZE.max(8)).await?;

        let mut member_ids = vec![seed.id.clone()];
        let mut similarities = vec![1.0];
        for (chunk, score) in neighbors {
            if chunk.id == seed.id || score < threshold {
                continue;
            }
            member_ids.push(chunk.id);
            similarities.push(score);
        }

        Ok(ConsolidationCandidate { seed_id: seed.id.clone(), member_ids, similarities })
    }

    async fn consolidate_cluster(&self, candidate: &ConsolidationCandidate) -> Result<(), AppError> {
        let mut members = Vec::with_capacity(candidate.member_ids.len());
        for id in &candidate.member_ids {
            match self.store.retrieve(id).await? {
                Some(chunk) => members.push(chunk),
                None => {
                    warn!(chunk_id = %id, "consolidation candidate vanished before merge; skipping cluster");
                    return Ok(());
                }
            }
        }

        let classification = self.classify(&members).await?;

        let merged_text = if classification.merged_text.is_empty() {
            members.first().map(|c| c.original_text.clone()).unwrap_or_default()
        } else {
            classification.merged_text.clone()
        };

        let embedded = with_timeout(
            self.timeout,
            self.embedding.embed_text(std::slice::from_ref(&merged_text)),
        )
        .await?;
        let vector = embedded
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("embedding backend returned no vector for merged text".into()))?;

        let existing_keys: Vec<String> = members.iter().flat_map(|c| c.qntm_keys.clone()).collect();
        let qntm_keys = self
            .qntm
            .generate_chunk_keys(&merged_text, &existing_keys, "consolidation", 0, 1, 0)
            .await;

        let successor_id = uuid::Uuid::new_v4().to_string();
        let mut successor = Chunk::new(
            successor_id.clone(),
            merged_text,
            members.first().map(|c| c.file_path.clone()).unwrap_or_default(),
            "consolidated".to_string(),
            "consolidated".to_string(),
            0,
            1,
        );
        successor.qntm_keys = qntm_keys;
        successor.importance = Importance::Normal;
        successor.consolidated = true;
        successor.parents = candidate.member_ids.clone();
        successor.consolidated_from = candidate.member_ids.clone();
        successor.consolidation_type = parse_consolidation_type(&classification.kind);
        successor.consolidation_direction = parse_consolidation_direction(&classification.direction);
        successor.consolidation_reasoning = Some(classification.reasoning);

        self.store.upsert(vec![ChunkPoint { chunk: successor, vector }]).await?;

        for member_id in &candidate.member_ids {
            let patch = json!({ "superseded_by": successor_id });
            self.store.set_payload(member_id, patch).await?;
        }

        info!(successor_id, members = candidate.member_ids.len(), "cluster consolidated");
        Ok(())
    }

    async fn classify(&self, members: &[Chunk]) -> Result<ClassificationResponse, AppError> {
        let texts: Vec<&str> = members.iter().map(|c| c.original_text.as_str()).collect();
        let body = format!("MEMBER_COUNT: {}\nMEMBERS: {texts:?}", members.len());
        let prompt = CLASSIFICATION_TEMPLATE.replace("%BODY%", &body);

        let value = with_timeout(self.timeout, self.llm.complete_json(&prompt)).await?;
        serde_json::from_value(value).map_err(AppError::Json)
    }
}

fn parse_consolidation_type(raw: &str) -> Option<ConsolidationType> {
    match raw {
        "duplicate_work" => Some(ConsolidationType::DuplicateWork),
        "sequential_iteration" => Some(ConsolidationType::SequentialIteration),
        "contextual_convergence" => Some(ConsolidationType::ContextualConvergence),
        other => {
            warn!(kind = other, "unrecognized consolidation type from classifier");
            None
        }
    }
}

fn parse_consolidation_direction(raw: &str) -> Option<ConsolidationDirection> {
    match raw {
        "forward" => Some(ConsolidationDirection::Forward),
        "backward" => Some(ConsolidationDirection::Backward),
        "convergent" => Some(ConsolidationDirection::Convergent),
        "unknown" => Some(ConsolidationDirection::Unknown),
        other => {
            warn!(direction = other, "unrecognized consolidation direction from classifier");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_consolidation_types() {
        assert!(matches!(parse_consolidation_type("duplicate_work"), Some(ConsolidationType::DuplicateWork)));
        assert!(parse_consolidation_type("bogus").is_none());
    }

    #[test]
    fn parses_known_consolidation_directions() {
        assert!(matches!(parse_consolidation_direction("forward"), Some(ConsolidationDirection::Forward)));
        assert!(parse_consolidation_direction("bogus").is_none());
    }
}
