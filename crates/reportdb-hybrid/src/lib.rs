//! reportdb-hybrid
//!
//! Dense + keyword retrieval fused with reciprocal rank fusion, served from
//! atomically swapped index snapshots.
pub mod engine;
pub mod fusion;
pub mod snapshot;

pub use engine::{new_build_locks, BuildLocks, RetrievalEngine, SessionContext};
pub use fusion::{fuse, FusedCandidate, DEFAULT_RRF_CONSTANT};
pub use snapshot::{IndexSnapshot, SnapshotInfo};
