use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::stored_object;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    Normal,
    High,
}

impl Default for Importance {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationType {
    DuplicateWork,
    SequentialIteration,
    ContextualConvergence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationDirection {
    Forward,
    Backward,
    Convergent,
    Unknown,
}

stored_object!(Chunk, "chunk", {
    original_text: String,
    file_path: String,
    file_name: String,
    file_type: String,
    chunk_index: u32,
    total_chunks: u32,
    char_count: u32,
    #[serde(default)]
    qntm_keys: Vec<String>,
    #[serde(default)]
    importance: Importance,
    #[serde(default)]
    consolidated: bool,
    #[serde(default)]
    consolidation_level: u8,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    agent_role: Option<String>,
    #[serde(default)]
    temperature: Option<String>,
    #[serde(default)]
    superseded_by: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    consolidated_from: Vec<String>,
    #[serde(default)]
    consolidation_type: Option<ConsolidationType>,
    #[serde(default)]
    consolidation_direction: Option<ConsolidationDirection>,
    #[serde(default)]
    consolidation_reasoning: Option<String>,
    #[serde(default)]
    deletion_eligible: bool,
    #[serde(default)]
    deletion_marked_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    access_count: u64,
    #[serde(default)]
    last_accessed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    source_checksum: Option<String>,
    #[serde(default = "default_schema_version")]
    schema_version: u8
});

fn default_schema_version() -> u8 {
    1
}

impl Chunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        original_text: String,
        file_path: String,
        file_name: String,
        file_type: String,
        chunk_index: u32,
        total_chunks: u32,
    ) -> Self {
        let now = Utc::now();
        let char_count = u32::try_from(original_text.chars().count()).unwrap_or(u32::MAX);
        Self {
            id,
            created_at: now,
            updated_at: now,
            original_text,
            file_path,
            file_name,
            file_type,
            chunk_index,
            total_chunks,
            char_count,
            qntm_keys: Vec::new(),
            importance: Importance::Normal,
            consolidated: false,
            consolidation_level: 0,
            content_type: None,
            agent_role: None,
            temperature: None,
            superseded_by: None,
            parents: Vec::new(),
            consolidated_from: Vec::new(),
            consolidation_type: None,
            consolidation_direction: None,
            consolidation_reasoning: None,
            deletion_eligible: false,
            deletion_marked_at: None,
            access_count: 0,
            last_accessed_at: None,
            source_checksum: None,
            schema_version: 1,
        }
    }

    pub fn is_head(&self) -> bool {
        self.superseded_by.is_none()
    }

    pub fn is_visible(&self) -> bool {
        self.is_head() && !self.deletion_eligible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_chunk_is_a_visible_head_with_no_keys() {
        let chunk = Chunk::new(
            "id1".into(),
            "hello world".into(),
            "a.md".into(),
            "a.md".into(),
            "markdown".into(),
            0,
            1,
        );
        assert!(chunk.is_head());
        assert!(chunk.is_visible());
        assert!(chunk.qntm_keys.is_empty());
        assert_eq!(chunk.char_count, 11);
        assert_eq!(chunk.schema_version, 1);
    }

    #[test]
    fn deletion_eligible_chunk_is_not_visible() {
        let mut chunk = Chunk::new(
            "id1".into(),
            "x".into(),
            "a.md".into(),
            "a.md".into(),
            "markdown".into(),
            0,
            1,
        );
        chunk.deletion_eligible = true;
        assert!(!chunk.is_visible());
    }

    #[test]
    fn superseded_chunk_is_not_a_head() {
        let mut chunk = Chunk::new(
            "id1".into(),
            "x".into(),
            "a.md".into(),
            "a.md".into(),
            "markdown".into(),
            0,
            1,
        );
        chunk.superseded_by = Some("id2".into());
        assert!(!chunk.is_head());
        assert!(!chunk.is_visible());
    }
}
