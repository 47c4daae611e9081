use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::storage::BlobStore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

#[derive(Clone)]
pub struct PutArtifactOperation {
    store: BlobStore,
    block_size: usize,
}

pub struct PutArtifactOperationRequest<'a, R> {
    pub key: CacheKey,
    pub length: u64,
    pub body: &'a mut R,
}

#[derive(Debug, Clone)]
pub struct PutArtifactOperationResult {
    pub key: CacheKey,
    pub length: u64,
    pub replaced: bool,
    pub total_size: u64,
}

impl PutArtifactOperation {
    pub fn new(store: BlobStore, block_size: usize) -> Self {
        Self {
            store,
            block_size: block_size.max(1),
        }
    }

    /// Streams `length` bytes from `body` into staging, then promotes the
    /// staged file. The staging file is removed if the body comes up short or
    /// promotion fails. Concurrent puts of the same key take turns; the last
    /// one to finish wins.
    pub async fn run<R>(
        &self,
        request: PutArtifactOperationRequest<'_, R>,
    ) -> Result<PutArtifactOperationResult>
    where
        R: AsyncRead + Unpin,
    {
        let PutArtifactOperationRequest { key, length, body } = request;

        let _staging = self.store.lock_staging(&key).await;

        if let Err(error) = self.stage(&key, length, body).await {
            self.discard(&key).await;
            return Err(error);
        }

        let promoted = match self.store.promote(&key).await {
            Ok(promoted) => promoted,
            Err(error) => {
                self.discard(&key).await;
                return Err(error);
            }
        };

        Ok(PutArtifactOperationResult {
            key,
            length: promoted.length,
            replaced: promoted.replaced_length.is_some(),
            total_size: promoted.total_size,
        })
    }

    async fn discard(&self, key: &CacheKey) {
        if let Err(cleanup) = self.store.discard_staging(key).await {
            tracing::warn!("Failed to discard staging file for {}: {}", key, cleanup);
        }
    }

    async fn stage<R>(&self, key: &CacheKey, length: u64, body: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = self.store.create_staging(key, length).await?;
        let mut buffer = vec![0u8; self.block_size];
        let mut remaining = length;

        while remaining > 0 {
            let want = remaining.min(self.block_size as u64) as usize;
            let read = body
                .read(&mut buffer[..want])
                .await
                .map_err(CacheError::Transport)?;
            if read == 0 {
                return Err(CacheError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("payload ended with {} of {} bytes missing", remaining, length),
                )));
            }
            file.write_all(&buffer[..read]).await?;
            remaining -= read as u64;
        }

        file.flush().await?;
        Ok(())
    }
}
