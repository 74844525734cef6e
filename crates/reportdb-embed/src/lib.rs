//! Embedding providers.
//!
//! `openai` calls a remote `/v1/embeddings` endpoint; `hashing` is local and
//! deterministic. `APP_USE_FAKE_EMBEDDINGS=1` switches any configuration to
//! the hashing embedder for offline development and tests.

use std::sync::Arc;

use tracing::info;

use reportdb_core::config::{ProviderKind, ProviderSettings};
use reportdb_core::error::{Error, Result};
use reportdb_core::traits::EmbedProvider;

pub mod hashing;
pub mod openai;

pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;

pub fn use_fake_embeddings() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn provider_from_settings(settings: &ProviderSettings) -> Result<Arc<dyn EmbedProvider>> {
    if use_fake_embeddings() || settings.kind == ProviderKind::Hashing {
        let dim = if settings.kind == ProviderKind::Hashing { settings.dimension } else { hashing::DEFAULT_DIM };
        let provider = HashingEmbedder::new(dim)?;
        info!(embedder = provider.embedder_id(), "using hashing embedder");
        return Ok(Arc::new(provider));
    }
    let api_key = settings
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .ok_or_else(|| Error::InvalidConfig("provider.api_key (or OPENAI_API_KEY) is required for the openai provider".into()))?;
    let provider = OpenAiEmbedder::new(&settings.base_url, &settings.model, api_key, settings.dimension)?;
    info!(embedder = provider.embedder_id(), endpoint = provider.endpoint(), "using remote embedder");
    Ok(Arc::new(provider))
}
