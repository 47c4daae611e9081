use crate::error::Result;
use crate::key::CacheKey;
use crate::storage::{BlobStore, EntryReader};

#[derive(Clone)]
pub struct GetArtifactOperation {
    store: BlobStore,
}

#[derive(Debug, Clone)]
pub struct GetArtifactOperationRequest {
    pub key: CacheKey,
}

pub enum GetArtifactOperationOutcome {
    Found(EntryReader),
    NotFound,
}

impl GetArtifactOperation {
    pub fn new(store: BlobStore) -> Self {
        Self { store }
    }

    pub async fn run(
        &self,
        request: GetArtifactOperationRequest,
    ) -> Result<GetArtifactOperationOutcome> {
        match self.store.open_entry(&request.key).await? {
            Some(reader) => Ok(GetArtifactOperationOutcome::Found(reader)),
            None => Ok(GetArtifactOperationOutcome::NotFound),
        }
    }
}
