use sha2::{Digest, Sha256};

/// Derives a stable chunk id from its position in the source file. Re-ingesting the same
/// file at the same `relative_path` always yields the same ids for the same chunk
/// indices, making ingestion an upsert rather than an append.
pub fn derive_chunk_id(relative_path: &str, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(relative_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(chunk_index.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_yields_same_id() {
        assert_eq!(
            derive_chunk_id("notes/a.md", 3),
            derive_chunk_id("notes/a.md", 3)
        );
    }

    #[test]
    fn different_index_yields_different_id() {
        assert_ne!(
            derive_chunk_id("notes/a.md", 0),
            derive_chunk_id("notes/a.md", 1)
        );
    }

    #[test]
    fn different_path_yields_different_id() {
        assert_ne!(
            derive_chunk_id("notes/a.md", 0),
            derive_chunk_id("notes/b.md", 0)
        );
    }
}
