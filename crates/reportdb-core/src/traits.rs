use async_trait::async_trait;

use crate::error::Result;
use crate::types::ConversationTurn;

/// Deterministic tokenization scheme shared by chunking and downstream
/// context budgeting.
pub trait TokenCounter: Send + Sync {
    /// Name of the encoding, e.g. `cl100k_base`.
    fn name(&self) -> &str;
    fn encode(&self, text: &str) -> Vec<u32>;
    /// Fails when `tokens` do not decode to valid UTF-8 (a window cut
    /// through a multi-byte character).
    fn decode(&self, tokens: &[u32]) -> Result<String>;
    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

#[async_trait]
pub trait EmbedProvider: Send + Sync {
    /// Stable identifier for the provider/model (e.g., `openai:text-embedding-3-large:d3072`).
    fn embedder_id(&self) -> &str;
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    /// Compute embeddings for a batch of input texts, one vector per text,
    /// in input order. Fails with `ProviderUnavailable` or `RateLimited`.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Hook for the chat layer to turn a conversational question into a
/// standalone search query.
#[async_trait]
pub trait QueryRewriter: Send + Sync {
    async fn rewrite(&self, query: &str, history: &[ConversationTurn]) -> Result<String>;
}
