use super::entry::{CacheEntry, scan_entries};
use super::eviction;
use super::size_tracker::SizeTracker;
use crate::config::StoreOptions;
use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use std::collections::HashMap;
use std::fs::FileTimes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::fs;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;

/// Staging directory under the cache root. Never holds a valid entry.
pub const INCOMING_DIR: &str = "incoming";

/// BlobStore owns the cache root on disk.
///
/// Permanent entries live at `root/{hash[0:2]}/{id}_{hash}.data`; puts are
/// staged flat under `root/incoming/` and renamed into place once complete.
/// Cloning is cheap and every clone shares the same size accounting.
#[derive(Clone)]
pub struct BlobStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    options: StoreOptions,
    incoming: PathBuf,
    sizes: SizeTracker,
    staging_locks: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Exclusive ownership of one key's staging file. Held from
/// `create_staging` until the put is promoted or discarded.
pub struct StagingLock {
    store: BlobStore,
    key: CacheKey,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for StagingLock {
    fn drop(&mut self) {
        let mut locks = self.store.lock_staging_map();
        // The map and this guard are the only holders: nobody is waiting.
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            locks.remove(&self.key);
        }
    }
}

/// An opened permanent entry, ready to be streamed.
pub struct EntryReader {
    pub file: fs::File,
    pub length: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromoteResult {
    pub length: u64,
    /// Length of the entry this promotion overwrote, if any.
    pub replaced_length: Option<u64>,
    pub total_size: u64,
}

impl BlobStore {
    /// Prepares the cache root, throws away staging residue from an earlier
    /// run and starts sizing the existing entries in the background.
    pub async fn open(options: StoreOptions) -> Result<Self> {
        options.validate()?;

        let incoming = options.root.join(INCOMING_DIR);
        if !fs::try_exists(&options.root).await? {
            tracing::info!("Initializing cache folder: {:?}", options.root);
        }
        fs::create_dir_all(&incoming).await?;
        tracing::info!("Cache folder is ready: {:?}", options.root);

        let flushed = flush_incoming(&incoming).await?;
        if flushed > 0 {
            tracing::info!("Discarded {} unfinished uploads from {:?}", flushed, incoming);
        }

        tracing::info!(
            "Setting max cache size to {} bytes (evicting down to {} bytes)",
            options.max_size_bytes,
            options.eviction_target_bytes()
        );

        let store = Self {
            inner: Arc::new(StoreInner {
                options,
                incoming,
                sizes: SizeTracker::new(),
                staging_locks: Mutex::new(HashMap::new()),
                background: Mutex::new(Vec::new()),
            }),
        };

        let sizing = store.clone();
        store.track(tokio::spawn(async move {
            sizing.compute_initial_size().await;
        }));

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.inner.options.root
    }

    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    pub fn sizes(&self) -> &SizeTracker {
        &self.inner.sizes
    }

    pub fn total_size(&self) -> u64 {
        self.inner.sizes.total()
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root().join(key.shard()).join(key.file_name())
    }

    pub fn staging_path(&self, key: &CacheKey) -> PathBuf {
        self.inner.incoming.join(key.file_name())
    }

    pub async fn contains(&self, key: &CacheKey) -> Result<bool> {
        Ok(fs::try_exists(self.entry_path(key)).await?)
    }

    pub async fn entry_len(&self, key: &CacheKey) -> Result<Option<u64>> {
        match fs::metadata(self.entry_path(key)).await {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_entries(&self) -> Result<Vec<CacheEntry>> {
        scan_entries(self.root()).await
    }

    /// Waits until no other put is staging `key`, then claims its staging
    /// file for the caller.
    pub async fn lock_staging(&self, key: &CacheKey) -> StagingLock {
        let lock = {
            let mut locks = self.lock_staging_map();
            locks.entry(key.clone()).or_default().clone()
        };
        StagingLock {
            store: self.clone(),
            key: key.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Creates (or truncates) the staging file for `key`, sized to `length`.
    /// Callers must hold the key's [`StagingLock`].
    pub async fn create_staging(&self, key: &CacheKey, length: u64) -> Result<fs::File> {
        let file = fs::File::create(self.staging_path(key)).await?;
        file.set_len(length).await?;
        Ok(file)
    }

    pub async fn discard_staging(&self, key: &CacheKey) -> Result<()> {
        remove_if_present(&self.staging_path(key)).await
    }

    /// Moves a fully staged put into permanent storage, replacing any entry
    /// already stored under the same key.
    pub async fn promote(&self, key: &CacheKey) -> Result<PromoteResult> {
        let src = self.staging_path(key);
        let dest = self.entry_path(key);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Only count the old entry if this call removed it. An eviction
        // landing between the stat and the remove already subtracted it.
        // The remaining window (eviction stats, then we remove) can leave
        // the counter slightly off until the next restart; that is tolerated.
        let replaced_length = match fs::metadata(&dest).await {
            Ok(metadata) => remove_counted(&dest, metadata.len()).await?,
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        fs::rename(&src, &dest).await?;
        touch_accessed(dest.clone()).await?;
        let length = fs::metadata(&dest).await?.len();

        let total_size = self
            .inner
            .sizes
            .replace(replaced_length.unwrap_or(0), length);

        tracing::debug!("Moved {} to permanent cache ({} bytes)", key, length);

        self.schedule_eviction_if_needed();

        Ok(PromoteResult {
            length,
            replaced_length,
            total_size,
        })
    }

    /// Opens the permanent entry for reading and marks it as just used.
    pub async fn open_entry(&self, key: &CacheKey) -> Result<Option<EntryReader>> {
        let path = self.entry_path(key);
        let opened = tokio::task::spawn_blocking(move || -> std::io::Result<_> {
            let file = match std::fs::File::open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e),
            };
            file.set_times(FileTimes::new().set_accessed(SystemTime::now()))?;
            let length = file.metadata()?.len();
            Ok(Some((file, length)))
        })
        .await
        .map_err(|e| CacheError::Internal(format!("open task failed: {}", e)))??;

        Ok(opened.map(|(file, length)| EntryReader {
            file: fs::File::from_std(file),
            length,
        }))
    }

    /// Starts an eviction run when the store is over its cap and no run is
    /// already in flight.
    pub fn schedule_eviction_if_needed(&self) {
        let cap = self.inner.options.max_size_bytes;
        if !self.inner.sizes.try_begin_eviction(cap) {
            return;
        }

        let store = self.clone();
        self.track(tokio::spawn(async move {
            let _guard = EvictionGuard(&store.inner.sizes);
            match eviction::run(&store).await {
                Ok(report) => tracing::info!(
                    "Eviction complete: removed {} entries ({} bytes), cache size {} bytes",
                    report.removed_entries,
                    report.removed_bytes,
                    report.final_size
                ),
                Err(e) => tracing::error!("Eviction failed: {}", e),
            }
        }));
    }

    /// Waits for the startup sizing pass and any eviction runs it (or later
    /// promotions) started.
    pub async fn wait_for_background_tasks(&self) {
        loop {
            let handles: Vec<_> = {
                let mut background = self.lock_background();
                background.drain(..).collect()
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::warn!("Background cache task ended abnormally: {}", e);
                }
            }
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut background = self.lock_background();
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    fn lock_staging_map(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>> {
        self.inner
            .staging_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_background(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn compute_initial_size(&self) {
        tracing::info!("Determining cache folder size");
        match scan_entries(self.root()).await {
            Ok(entries) => {
                let bytes: u64 = entries.iter().map(|entry| entry.length).sum();
                let total = self.inner.sizes.add(bytes);
                tracing::info!(
                    "Folder sizing complete: {} entries, cache size {} MB",
                    entries.len(),
                    total / (1024 * 1024)
                );
                self.schedule_eviction_if_needed();
            }
            Err(e) => tracing::error!("Failed to size cache folder {:?}: {}", self.root(), e),
        }
    }
}

struct EvictionGuard<'a>(&'a SizeTracker);

impl Drop for EvictionGuard<'_> {
    fn drop(&mut self) {
        self.0.finish_eviction();
    }
}

async fn flush_incoming(incoming: &Path) -> Result<usize> {
    let mut removed = 0;
    let mut listing = fs::read_dir(incoming).await?;
    while let Some(item) = listing.next_entry().await? {
        let path = item.path();
        if item.file_type().await?.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            remove_if_present(&path).await?;
        }
        tracing::debug!("Removed staging residue {:?}", path);
        removed += 1;
    }
    Ok(removed)
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Removes a file whose length was read beforehand. Returns the length only
/// when this call did the removal, so a concurrent remover is never
/// subtracted twice.
pub(crate) async fn remove_counted(path: &Path, length: u64) -> Result<Option<u64>> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(Some(length)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn touch_accessed(path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let file = std::fs::File::open(&path)?;
        file.set_times(FileTimes::new().set_accessed(SystemTime::now()))
    })
    .await
    .map_err(|e| CacheError::Internal(format!("touch task failed: {}", e)))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use uuid::Uuid;

    fn options(root: &Path) -> StoreOptions {
        StoreOptions::new(root, 1024 * 1024, 0.75)
    }

    async fn store_bytes(store: &BlobStore, key: &CacheKey, data: &[u8]) -> PromoteResult {
        let mut file = store.create_staging(key, data.len() as u64).await.unwrap();
        file.write_all(data).await.unwrap();
        file.flush().await.unwrap();
        drop(file);
        store.promote(key).await.unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("cache");
        let store = BlobStore::open(options(&root)).await.unwrap();
        store.wait_for_background_tasks().await;

        assert!(root.join(INCOMING_DIR).is_dir());
        assert_eq!(store.total_size(), 0);
    }

    #[tokio::test]
    async fn test_open_rejects_bad_free_fraction() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = BlobStore::open(StoreOptions::new(temp_dir.path(), 1024, 1.0)).await;
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[tokio::test]
    async fn test_promote_and_read_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(options(temp_dir.path())).await.unwrap();
        store.wait_for_background_tasks().await;

        let key = CacheKey::new(Uuid::new_v4(), "ABCDEF").unwrap();
        let result = store_bytes(&store, &key, b"artifact bytes").await;
        assert_eq!(result.length, 14);
        assert_eq!(result.replaced_length, None);

        let expected = temp_dir.path().join("ab").join(key.file_name());
        assert_eq!(store.entry_path(&key), expected);
        assert!(expected.is_file());
        assert!(!store.staging_path(&key).exists());

        let mut reader = store.open_entry(&key).await.unwrap().unwrap();
        assert_eq!(reader.length, 14);
        let mut data = Vec::new();
        reader.file.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"artifact bytes");
    }

    #[tokio::test]
    async fn test_open_entry_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(options(temp_dir.path())).await.unwrap();
        let key = CacheKey::new(Uuid::new_v4(), "abcd").unwrap();
        assert!(store.open_entry(&key).await.unwrap().is_none());
        assert_eq!(store.entry_len(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_counts_final_length_only() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(options(temp_dir.path())).await.unwrap();
        store.wait_for_background_tasks().await;

        let key = CacheKey::new(Uuid::new_v4(), "abcd").unwrap();
        store_bytes(&store, &key, &[1u8; 100]).await;
        let result = store_bytes(&store, &key, &[2u8; 30]).await;

        assert_eq!(result.replaced_length, Some(100));
        assert_eq!(store.total_size(), 30);
        assert_eq!(store.entry_len(&key).await.unwrap(), Some(30));
    }

    #[tokio::test]
    async fn test_open_entry_refreshes_access_time() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(options(temp_dir.path())).await.unwrap();
        let key = CacheKey::new(Uuid::new_v4(), "abcd").unwrap();
        store_bytes(&store, &key, b"x").await;

        let path = store.entry_path(&key);
        let old = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        std::fs::File::open(&path)
            .unwrap()
            .set_times(FileTimes::new().set_accessed(old))
            .unwrap();

        store.open_entry(&key).await.unwrap().unwrap();
        let accessed = std::fs::metadata(&path).unwrap().accessed().unwrap();
        assert!(accessed > old);
    }

    #[tokio::test]
    async fn test_restart_discards_staging_and_counts_entries() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();

        let kept = CacheKey::new(Uuid::new_v4(), "1234").unwrap();
        let abandoned = CacheKey::new(Uuid::new_v4(), "5678").unwrap();
        std::fs::create_dir_all(root.join("12")).unwrap();
        std::fs::write(root.join("12").join(kept.file_name()), vec![0u8; 64]).unwrap();
        std::fs::create_dir_all(root.join(INCOMING_DIR)).unwrap();
        std::fs::write(root.join(INCOMING_DIR).join(abandoned.file_name()), vec![0u8; 999])
            .unwrap();
        std::fs::write(root.join("12").join("README.txt"), vec![0u8; 5000]).unwrap();

        let store = BlobStore::open(options(root)).await.unwrap();
        store.wait_for_background_tasks().await;

        assert!(!root.join(INCOMING_DIR).join(abandoned.file_name()).exists());
        assert_eq!(store.total_size(), 64);
        assert!(store.contains(&kept).await.unwrap());
        assert!(!store.contains(&abandoned).await.unwrap());
        assert!(root.join("12").join("README.txt").exists());

        let entries = store.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, kept);
    }

    #[tokio::test]
    async fn test_remove_counted_skips_file_removed_by_someone_else() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("entry.data");
        std::fs::write(&path, vec![0u8; 40]).unwrap();
        let length = std::fs::metadata(&path).unwrap().len();

        // Another remover wins between the stat and our delete.
        std::fs::remove_file(&path).unwrap();
        assert_eq!(remove_counted(&path, length).await.unwrap(), None);

        std::fs::write(&path, vec![0u8; 40]).unwrap();
        assert_eq!(remove_counted(&path, 40).await.unwrap(), Some(40));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_staging_lock_is_exclusive_per_key() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(options(temp_dir.path())).await.unwrap();
        let key = CacheKey::new(Uuid::new_v4(), "abcd").unwrap();
        let other = CacheKey::new(Uuid::new_v4(), "abcd").unwrap();

        let first = store.lock_staging(&key).await;
        // Unrelated keys never wait.
        drop(store.lock_staging(&other).await);

        let contender = {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _lock = store.lock_staging(&key).await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(first);
        tokio::time::timeout(std::time::Duration::from_secs(5), contender)
            .await
            .unwrap()
            .unwrap();
        assert!(store.lock_staging_map().is_empty());
    }
}
