//! Embedding model trait and types.
//!
//! Defines the interface for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Vector embedding as produced by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Get the embedding dimension
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Euclidean norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Model name (e.g., "paraphrase-multilingual-MiniLM-L12-v2")
    pub name: String,
    /// Embedding dimension
    pub dimension: usize,
}

/// Trait for embedding models.
///
/// Implementations must be thread-safe (Send + Sync) for concurrent use.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Get model information
    fn info(&self) -> &ModelInfo;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| EmbeddingError::Malformed("empty response for single text".into()))
    }
}

/// Check that a model answered with one vector of the configured width per input.
pub fn validate_batch(
    info: &ModelInfo,
    inputs: usize,
    outputs: &[Embedding],
) -> Result<(), EmbeddingError> {
    if outputs.len() != inputs {
        return Err(EmbeddingError::Malformed(format!(
            "expected {} vectors, got {}",
            inputs,
            outputs.len()
        )));
    }
    if let Some(bad) = outputs.iter().find(|e| e.dimension() != info.dimension) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: info.dimension,
            actual: bad.dimension(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(dimension: usize) -> ModelInfo {
        ModelInfo {
            name: "test".into(),
            dimension,
        }
    }

    #[test]
    fn test_embedding_is_not_normalized() {
        let emb = Embedding::new(vec![3.0, 4.0]);
        assert_eq!(emb.values, vec![3.0, 4.0]);
        assert!((emb.norm() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_validate_batch_count() {
        let out = vec![Embedding::new(vec![0.0; 3])];
        assert!(matches!(
            validate_batch(&info(3), 2, &out),
            Err(EmbeddingError::Malformed(_))
        ));
        assert!(validate_batch(&info(3), 1, &out).is_ok());
    }

    #[test]
    fn test_validate_batch_dimension() {
        let out = vec![Embedding::new(vec![0.0; 3]), Embedding::new(vec![0.0; 2])];
        match validate_batch(&info(3), 2, &out) {
            Err(EmbeddingError::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
