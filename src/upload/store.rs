//! Object store abstraction
//!
//! The dispatcher only talks to the archive through these traits, so tests
//! and dry runs can swap the network client out.

use crate::credentials::Credentials;
use crate::error::{StoreError, StoreResult};
use crate::item::ItemMetadata;
use std::path::Path;
use tracing::info;

/// Result of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Item the file was stored under
    pub item: String,
    /// Remote key
    pub key: String,
    /// Bytes sent
    pub bytes: u64,
    /// Where the file ended up
    pub location: String,
}

/// Factory for upload sessions
#[async_trait::async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Open a session carrying one file's item metadata
    async fn new_session(
        &self,
        credentials: &Credentials,
        metadata: &ItemMetadata,
    ) -> StoreResult<Box<dyn UploadSession>>;
}

/// One authenticated upload
#[async_trait::async_trait]
pub trait UploadSession: Send + Sync {
    /// Upload a local file as `key` inside `item`
    async fn upload(&self, local_path: &Path, item: &str, key: &str) -> StoreResult<UploadReceipt>;
}

/// Store that logs instead of uploading
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunStore;

impl DryRunStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ObjectStoreClient for DryRunStore {
    async fn new_session(
        &self,
        _credentials: &Credentials,
        metadata: &ItemMetadata,
    ) -> StoreResult<Box<dyn UploadSession>> {
        Ok(Box::new(DryRunSession {
            metadata: metadata.clone(),
        }))
    }
}

struct DryRunSession {
    metadata: ItemMetadata,
}

#[async_trait::async_trait]
impl UploadSession for DryRunSession {
    async fn upload(&self, local_path: &Path, item: &str, key: &str) -> StoreResult<UploadReceipt> {
        let bytes = tokio::fs::metadata(local_path)
            .await
            .map_err(|source| StoreError::Local {
                path: local_path.to_path_buf(),
                source,
            })?
            .len();

        info!(
            file = %key,
            item = %item,
            bytes,
            metadata = self.metadata.pairs().len(),
            derive = self.metadata.derive(),
            "Dry run, not uploading"
        );

        Ok(UploadReceipt {
            item: item.to_string(),
            key: key.to_string(),
            bytes,
            location: format!("dry-run://{}/{}", item, key),
        })
    }
}
