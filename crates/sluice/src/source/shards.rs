//! Source shards in object storage.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::path::Path;
use tracing::{debug, warn};

use sluice_core::{StorageError, StorageProviderRef};

/// A retrieved shard. Either field may be missing, in which case the shard is
/// skipped.
#[derive(Debug, Clone, Default)]
pub struct ShardObject {
    pub body: Option<Bytes>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Where export shards come from.
#[async_trait]
pub trait ShardSource: Send + Sync {
    /// All shard keys, in processing order.
    async fn list(&self) -> Result<Vec<String>, StorageError>;

    /// Fetch one shard.
    async fn get(&self, key: &str) -> Result<ShardObject, StorageError>;
}

/// Shards stored under a storage provider's root.
pub struct StorageShardSource {
    storage: StorageProviderRef,
}

impl StorageShardSource {
    pub fn new(storage: StorageProviderRef) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ShardSource for StorageShardSource {
    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let objects = self.storage.list().await?;
        debug!(
            source = self.storage.canonical_url(),
            count = objects.len(),
            "Listed source objects"
        );
        Ok(objects.into_iter().map(|o| o.path.to_string()).collect())
    }

    async fn get(&self, key: &str) -> Result<ShardObject, StorageError> {
        let object = match self.storage.get(&Path::from(key)).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => {
                warn!(shard = %key, "Shard disappeared after listing");
                return Ok(ShardObject::default());
            }
            Err(e) => return Err(e),
        };
        Ok(ShardObject {
            body: (!object.bytes.is_empty()).then_some(object.bytes),
            last_modified: Some(object.last_modified),
        })
    }
}
