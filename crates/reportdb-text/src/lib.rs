//! reportdb-text
//!
//! In-memory tantivy BM25 index over chunk text, rebuilt with every snapshot.
pub mod index;
pub mod tantivy_utils;

pub use index::{KeywordIndex, TermStats};
