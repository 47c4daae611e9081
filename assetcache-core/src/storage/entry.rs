use super::blob_store::INCOMING_DIR;
use crate::error::Result;
use crate::key::CacheKey;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;

/// A permanent file found on disk.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub path: PathBuf,
    pub length: u64,
    pub last_accessed: DateTime<Utc>,
}

/// Walks `root`, skipping the staging directory, and returns every file whose
/// name parses as `{uuid}_{hash}.data`. Other files are left alone.
pub async fn scan_entries(root: &Path) -> Result<Vec<CacheEntry>> {
    let incoming = root.join(INCOMING_DIR);
    let mut entries = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut listing = match fs::read_dir(&dir).await {
            Ok(listing) => listing,
            // A shard directory can disappear under us; nothing to count there.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && dir != root => continue,
            Err(e) => return Err(e.into()),
        };

        while let Some(item) = listing.next_entry().await? {
            let path = item.path();
            let file_type = item.file_type().await?;

            if file_type.is_dir() {
                if path != incoming {
                    pending.push(path);
                }
                continue;
            }

            if !file_type.is_file() {
                continue;
            }

            let Some(key) = item.file_name().to_str().and_then(CacheKey::parse_file_name) else {
                tracing::debug!("Skipping unrecognized file {:?}", path);
                continue;
            };

            let metadata = match item.metadata().await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            let accessed = metadata.accessed().or_else(|_| metadata.modified())?;

            entries.push(CacheEntry {
                key,
                path,
                length: metadata.len(),
                last_accessed: DateTime::<Utc>::from(accessed),
            });
        }
    }

    Ok(entries)
}
