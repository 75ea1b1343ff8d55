//! Offline feature-hashing embedder.
//!
//! Each lowercase word is hashed into one of `dimension` buckets with a sign
//! taken from a separate hash bit. Texts sharing no words produce orthogonal
//! vectors (modulo bucket collisions), which makes results easy to reason
//! about in tests.

use async_trait::async_trait;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::EmbeddingError;
use crate::model::{Embedding, EmbeddingModel, ModelInfo};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic bag-of-words embedder.
pub struct HashingEmbedder {
    info: ModelInfo,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::Config("dimension must be > 0".into()));
        }
        Ok(Self {
            info: ModelInfo {
                name: format!("feature-hashing-{}", dimension),
                dimension,
            },
        })
    }

    /// Embed synchronously; the async trait method delegates here.
    pub fn embed_text(&self, text: &str) -> Embedding {
        let dim = self.info.dimension as u64;
        let mut values = vec![0.0f32; self.info.dimension];
        for word in text.unicode_words() {
            let h = fnv1a(word.to_lowercase().as_bytes());
            let bucket = (h % dim) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            values[bucket] += sign;
        }
        Embedding::new(values)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

#[async_trait]
impl EmbeddingModel for HashingEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
