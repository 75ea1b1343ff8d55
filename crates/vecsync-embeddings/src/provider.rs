//! Build the configured embedding backend.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::info;
use vecsync_types::{EmbeddingProvider, EmbeddingSettings};

use crate::error::EmbeddingError;
use crate::hashing::HashingEmbedder;
use crate::http::{HttpEmbedder, HttpEmbedderConfig};
use crate::model::EmbeddingModel;

/// Construct the model selected by `settings.provider`.
pub fn model_from_settings(
    settings: &EmbeddingSettings,
) -> Result<Arc<dyn EmbeddingModel>, EmbeddingError> {
    match settings.provider {
        EmbeddingProvider::Hashing => {
            info!(dimension = settings.dimension, "Using feature-hashing embedder");
            Ok(Arc::new(HashingEmbedder::new(settings.dimension)?))
        }
        EmbeddingProvider::Http => {
            info!(
                base_url = %settings.base_url,
                model = %settings.model,
                dimension = settings.dimension,
                "Using HTTP embedder"
            );
            let config = HttpEmbedderConfig {
                base_url: settings.base_url.clone(),
                model: settings.model.clone(),
                api_key: settings.api_key.clone().map(SecretString::from),
                dimension: settings.dimension,
                timeout: Duration::from_millis(settings.request_timeout_ms),
            };
            Ok(Arc::new(HttpEmbedder::new(config)?))
        }
    }
}
