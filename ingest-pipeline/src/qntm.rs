//! Builds level-aware QNTM prompts and parses the JSON-LLM response into sanitized keys,
//! grounded in the request-building/response-parsing shape of the teacher's
//! `prepare_llm_request`/`perform_analysis` pair but retargeted at the QNTM schema.

use std::sync::Arc;
use std::time::Duration;

use common::backends::{retry_with_backoff, with_timeout, Capability, LlmRegistry, DEFAULT_NETWORK_TIMEOUT};
use common::error::AppError;
use serde::Deserialize;

const RETRY_ATTEMPTS: usize = 3;

const LEVEL_TEMPLATES: [&str; 4] = [
    "QNTM_KEY_GENERATION\nLEVEL: L0 episodic instance\n%BODY%",
    "QNTM_KEY_GENERATION\nLEVEL: L1 deduplicated topic\n%BODY%",
    "QNTM_KEY_GENERATION\nLEVEL: L2 decontextualized concept\n%BODY%",
    "QNTM_KEY_GENERATION\nLEVEL: L3 abstract principle\n%BODY%",
];

const QUERY_EXPANSION_TEMPLATE: &str = "QNTM_QUERY_EXPANSION\n%BODY%";

#[derive(Debug, Deserialize)]
struct QntmResponse {
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    reasoning: String,
}

pub struct QntmGenerator {
    registry: Arc<LlmRegistry>,
    timeout: Duration,
}

impl QntmGenerator {
    pub fn new(registry: Arc<LlmRegistry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }

    /// Overrides the per-call deadline, normally sourced from `AppConfig::network_timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Generates keys for a chunk at the given consolidation level. On exhausted retries
    /// this returns an empty key list rather than propagating the error, per I7 — callers
    /// that need to distinguish "no keys because nothing was found" from "generation
    /// failed" should inspect the accompanying `warn!` log, not the return value.
    pub async fn generate_chunk_keys(
        &self,
        chunk_text: &str,
        existing_keys: &[String],
        file_name: &str,
        chunk_index: usize,
        total_chunks: usize,
        level: u8,
    ) -> Vec<String> {
        let template = LEVEL_TEMPLATES
            .get(usize::from(level).min(LEVEL_TEMPLATES.len() - 1))
            .unwrap_or(&LEVEL_TEMPLATES[0]);
        let recent_keys: Vec<&str> = existing_keys.iter().rev().take(10).map(String::as_str).collect();
        let body = format!(
            "CHUNK_TEXT: {chunk_text}\nFILE_NAME: {file_name}\nCHUNK_INDEX: {chunk_index}\nTOTAL_CHUNKS: {total_chunks}\nEXISTING_KEYS: {recent_keys:?}"
        );
        let prompt = template.replace("%BODY%", &body);

        match self.complete_with_retry(&prompt).await {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!(error = %err, file_name, chunk_index, "qntm key generation failed after retries; ingesting with empty keys");
                Vec::new()
            }
        }
    }

    pub async fn generate_query_qntm_keys(
        &self,
        query: &str,
        existing_keys: &[String],
    ) -> Vec<String> {
        let body = format!("QUERY: {query}\nEXISTING_KEYS: {existing_keys:?}");
        let prompt = QUERY_EXPANSION_TEMPLATE.replace("%BODY%", &body);
        self.complete_with_retry(&prompt).await.unwrap_or_default()
    }

    async fn complete_with_retry(&self, prompt: &str) -> Result<Vec<String>, AppError> {
        let registry = Arc::clone(&self.registry);
        let prompt = prompt.to_string();
        let timeout = self.timeout;
        let keys = retry_with_backoff(RETRY_ATTEMPTS, move || {
            let registry = Arc::clone(&registry);
            let prompt = prompt.clone();
            async move {
                let backend = registry.resolve(Capability::QntmGeneration)?;
                let value = with_timeout(timeout, backend.complete_json(&prompt)).await?;
                serde_json::from_value::<QntmResponse>(value)
                    .map(|response| response.keys)
                    .map_err(AppError::Json)
            }
        })
        .await?;

        Ok(sanitize_keys(keys))
    }
}

/// Trims, collapses internal whitespace, drops empties, and dedupes while preserving
/// first-seen order.
fn sanitize_keys(keys: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for key in keys {
        let collapsed = key.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            continue;
        }
        if seen.insert(collapsed.clone()) {
            out.push(collapsed);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::backends::llm::TemplateJsonLlm;

    fn registry() -> Arc<LlmRegistry> {
        let mut registry = LlmRegistry::new();
        registry.register(Capability::QntmGeneration, Arc::new(TemplateJsonLlm));
        Arc::new(registry)
    }

    #[test]
    fn sanitize_keys_dedupes_and_trims() {
        let keys = sanitize_keys(vec![
            "  @rust  ~   great  ".to_string(),
            "@rust ~ great".to_string(),
            "   ".to_string(),
            "@other ~ thing".to_string(),
        ]);
        assert_eq!(keys, vec!["@rust ~ great", "@other ~ thing"]);
    }

    #[tokio::test]
    async fn generate_chunk_keys_returns_nonempty_from_template_backend() {
        let generator = QntmGenerator::new(registry());
        let keys = generator
            .generate_chunk_keys("rust is great", &[], "a.md", 0, 1, 0)
            .await;
        assert!(!keys.is_empty());
    }

    #[tokio::test]
    async fn generate_chunk_keys_empty_when_backend_unavailable() {
        let generator = QntmGenerator::new(Arc::new(LlmRegistry::new()));
        let keys = generator
            .generate_chunk_keys("rust is great", &[], "a.md", 0, 1, 0)
            .await;
        assert!(keys.is_empty());
    }
}
