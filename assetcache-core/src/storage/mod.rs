//! Storage modules for Assetcache
//!
//! Provides the on-disk blob store, its size accounting and LRU eviction.

pub mod blob_store;
pub mod entry;
pub mod eviction;
pub mod size_tracker;

pub use blob_store::{BlobStore, EntryReader, PromoteResult, StagingLock, INCOMING_DIR};
pub use entry::{CacheEntry, scan_entries};
pub use eviction::EvictionReport;
pub use size_tracker::SizeTracker;
