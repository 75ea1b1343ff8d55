//! # vecsync-embeddings
//!
//! Embedding generation for the vecsync index engine.
//!
//! The embedding model is a black box mapping text to a fixed-width vector.
//! This crate provides:
//! - The `EmbeddingModel` trait every backend implements
//! - `HashingEmbedder`: deterministic, offline feature hashing
//! - `HttpEmbedder`: OpenAI-compatible `/embeddings` endpoint
//! - `EmbeddingPipeline`: a batcher that amortizes model calls across
//!   concurrent callers, flushing on batch size or timeout
//!
//! Vectors are returned as the model produced them; distance semantics
//! belong to the graph index.

pub mod error;
pub mod hashing;
pub mod http;
pub mod model;
pub mod pipeline;
pub mod provider;

pub use error::EmbeddingError;
pub use hashing::HashingEmbedder;
pub use http::{HttpEmbedder, HttpEmbedderConfig};
pub use model::{Embedding, EmbeddingModel, ModelInfo};
pub use pipeline::{EmbeddingPipeline, PipelineConfig};
pub use provider::model_from_settings;
