//! Assetcache Core - on-disk artifact cache for build pipelines
//!
//! Artifacts are addressed by an (id, hash) pair and stored as plain files:
//! - staged under `incoming/` while a put is streaming
//! - promoted into `{hash[0:2]}/{id}_{hash}.data` when complete
//! - evicted least-recently-accessed first once the cache exceeds its cap

pub mod client;
pub mod config;
pub mod error;
pub mod key;
pub mod operations;
pub mod storage;
pub mod wire;

pub use client::{CacheClient, GetResult};
pub use config::{CacheConfig, StoreOptions};
pub use error::{CacheError, Result};
pub use key::CacheKey;
pub use operations::{
    GetArtifactOperation, GetArtifactOperationOutcome, GetArtifactOperationRequest,
    PutArtifactOperation, PutArtifactOperationRequest, PutArtifactOperationResult,
};
pub use storage::{BlobStore, CacheEntry, EntryReader, EvictionReport, SizeTracker};
