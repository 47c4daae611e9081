//! Least-recently-accessed eviction.
//!
//! A run only starts once the store is over its cap. It lists every permanent
//! entry, oldest access first, and deletes until the total drops to
//! `cap * free_fraction`. The size lock is taken per deletion, never across
//! the scan, so puts keep promoting while a run drains the store.

use super::blob_store::{BlobStore, remove_counted};
use super::entry::scan_entries;
use crate::error::Result;
use std::io::ErrorKind;
use tokio::fs;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub removed_entries: usize,
    pub removed_bytes: u64,
    pub final_size: u64,
}

pub(crate) async fn run(store: &BlobStore) -> Result<EvictionReport> {
    let cap = store.options().max_size_bytes;
    let target = store.options().eviction_target_bytes();
    let sizes = store.sizes();

    let mut report = EvictionReport {
        final_size: sizes.total(),
        ..EvictionReport::default()
    };

    if report.final_size <= cap {
        return Ok(report);
    }

    tracing::info!(
        "Starting eviction: cache size {} bytes exceeds cap {} bytes, target {} bytes",
        report.final_size,
        cap,
        target
    );

    let mut entries = scan_entries(store.root()).await?;
    entries.sort_by_key(|entry| entry.last_accessed);

    for entry in entries {
        if sizes.total() <= target {
            break;
        }

        // The entry may have been overwritten since the scan; count what is
        // actually being removed, and only if this run removed it. A promote
        // replacing the file between stat and remove can still skew the
        // counter by the length difference; that drift is tolerated.
        let length = match fs::metadata(&entry.path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!("Cannot stat {:?} for eviction: {}", entry.path, e);
                continue;
            }
        };

        match remove_counted(&entry.path, length).await {
            Ok(Some(length)) => {
                let total = sizes.sub(length);
                report.removed_entries += 1;
                report.removed_bytes += length;
                tracing::debug!(
                    "Evicted {} ({} bytes, last accessed {}), cache size {} bytes",
                    entry.key,
                    length,
                    entry.last_accessed,
                    total
                );
            }
            Ok(None) => continue,
            Err(e) => tracing::warn!("Failed to evict {:?}: {}", entry.path, e),
        }
    }

    report.final_size = sizes.total();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use crate::config::StoreOptions;
    use crate::key::CacheKey;
    use crate::storage::BlobStore;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use uuid::Uuid;

    fn key(hash: &str) -> CacheKey {
        CacheKey::new(Uuid::new_v4(), hash).unwrap()
    }

    async fn store_bytes(store: &BlobStore, key: &CacheKey, len: usize) {
        let mut file = store.create_staging(key, len as u64).await.unwrap();
        file.write_all(&vec![7u8; len]).await.unwrap();
        file.flush().await.unwrap();
        drop(file);
        store.promote(key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_evicts_least_recently_accessed_first() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(StoreOptions::new(temp_dir.path(), 1000, 0.7))
            .await
            .unwrap();
        store.wait_for_background_tasks().await;

        let a = key("aa01");
        let b = key("bb02");
        let c = key("cc03");
        let d = key("dd04");

        store_bytes(&store, &a, 300).await;
        store_bytes(&store, &b, 300).await;
        store_bytes(&store, &c, 300).await;

        // Re-reading `a` makes it younger than `b` and `c`.
        assert!(store.open_entry(&a).await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;

        store_bytes(&store, &d, 300).await;
        store.wait_for_background_tasks().await;

        assert_eq!(store.total_size(), 600);
        assert!(store.contains(&a).await.unwrap());
        assert!(!store.contains(&b).await.unwrap());
        assert!(!store.contains(&c).await.unwrap());
        assert!(store.contains(&d).await.unwrap());
        assert!(!store.sizes().is_evicting());
    }

    #[tokio::test]
    async fn test_under_cap_is_noop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(StoreOptions::new(temp_dir.path(), 1000, 0.5))
            .await
            .unwrap();
        store.wait_for_background_tasks().await;

        let a = key("aa01");
        store_bytes(&store, &a, 1000).await;
        store.wait_for_background_tasks().await;

        let report = super::run(&store).await.unwrap();
        assert_eq!(report.removed_entries, 0);
        assert_eq!(report.final_size, 1000);
        assert!(store.contains(&a).await.unwrap());
    }

    #[tokio::test]
    async fn test_foreign_files_survive_eviction() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(StoreOptions::new(temp_dir.path(), 100, 0.5))
            .await
            .unwrap();
        store.wait_for_background_tasks().await;

        let stranger = temp_dir.path().join("aa").join("notes.txt");
        std::fs::create_dir_all(stranger.parent().unwrap()).unwrap();
        std::fs::write(&stranger, vec![0u8; 500]).unwrap();

        let a = key("aa01");
        let b = key("aa02");
        let c = key("aa03");
        store_bytes(&store, &a, 40).await;
        store_bytes(&store, &b, 40).await;
        store_bytes(&store, &c, 40).await;
        store.wait_for_background_tasks().await;

        assert!(stranger.exists());
        assert!(!store.contains(&a).await.unwrap());
        assert!(!store.contains(&b).await.unwrap());
        assert!(store.contains(&c).await.unwrap());
        assert_eq!(store.total_size(), 40);
    }

    #[tokio::test]
    async fn test_startup_scan_triggers_eviction() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let store = BlobStore::open(StoreOptions::new(temp_dir.path(), 10_000, 0.5))
                .await
                .unwrap();
            store.wait_for_background_tasks().await;
            for hash in ["aa01", "bb02", "cc03", "dd04"] {
                store_bytes(&store, &key(hash), 100).await;
            }
            store.wait_for_background_tasks().await;
            assert_eq!(store.total_size(), 400);
        }

        let store = BlobStore::open(StoreOptions::new(temp_dir.path(), 300, 0.5))
            .await
            .unwrap();
        store.wait_for_background_tasks().await;

        assert_eq!(store.total_size(), 100);
        assert_eq!(store.list_entries().await.unwrap().len(), 1);
    }
}
