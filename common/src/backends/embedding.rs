use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
    pub dimensions: usize,
}

/// A capability that turns text into fixed-dimension dense vectors, in batch.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed_text(&self, inputs: &[String]) -> Result<EmbeddingBatch, AppError>;

    fn dimension(&self) -> usize;

    fn backend_label(&self) -> &str;
}

/// Deterministic, dependency-free embedder: hashes each input into a fixed-size float
/// vector. Used as the reference/test backend so the rest of the pipeline can be
/// exercised without a real model or network access, the same role
/// `EmbeddingProvider::new_hashed` plays during local development and tests.
pub struct HashedEmbedder {
    dimensions: usize,
}

impl HashedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dimensions);
        let mut counter: u32 = 0;
        while vector.len() < self.dimensions {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks(4) {
                if vector.len() >= self.dimensions {
                    break;
                }
                let mut buf = [0u8; 4];
                buf[..chunk.len()].copy_from_slice(chunk);
                let raw = u32::from_le_bytes(buf);
                // Map into [-1, 1] so cosine similarity behaves sensibly.
                vector.push((raw as f32 / u32::MAX as f32) * 2.0 - 1.0);
            }
            counter += 1;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingBackend for HashedEmbedder {
    async fn embed_text(&self, inputs: &[String]) -> Result<EmbeddingBatch, AppError> {
        let embeddings = inputs.iter().map(|t| self.hash_to_vector(t)).collect();
        Ok(EmbeddingBatch {
            embeddings,
            model: "hashed-reference".to_string(),
            dimensions: self.dimensions,
        })
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }

    fn backend_label(&self) -> &str {
        "hashed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashed_embedder_is_deterministic_and_unit_norm() {
        let embedder = HashedEmbedder::new(16);
        let batch = embedder
            .embed_text(&["hello world".to_string(), "hello world".to_string()])
            .await
            .expect("embed");

        assert_eq!(batch.embeddings[0], batch.embeddings[1]);
        assert_eq!(batch.embeddings[0].len(), 16);
        let norm: f32 = batch.embeddings[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn different_inputs_produce_different_vectors() {
        let embedder = HashedEmbedder::new(8);
        let batch = embedder
            .embed_text(&["alpha".to_string(), "beta".to_string()])
            .await
            .expect("embed");
        assert_ne!(batch.embeddings[0], batch.embeddings[1]);
    }
}
