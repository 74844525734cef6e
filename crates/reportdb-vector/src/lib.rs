//! reportdb-vector
//!
//! Exact dense search over L2-normalized chunk embeddings, with a
//! fingerprint-keyed on-disk vector cache and bounded provider retries.
pub mod cache;
pub mod retry;
pub mod store;

pub use cache::{fingerprint, VectorCache};
pub use retry::{Backoff, RetryPolicy};
pub use store::{BuildStats, EmbeddingIndex, EmbeddingStore};
