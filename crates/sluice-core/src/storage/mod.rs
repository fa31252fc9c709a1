//! Object storage abstraction.
//!
//! Wraps an [`ObjectStore`] rooted at a key prefix so callers work with paths
//! relative to the configured location, whether it is `s3://`, `gs://`,
//! `file://` or a plain local directory.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use snafu::prelude::*;
use tracing::debug;
use url::Url;

use crate::emit;
use crate::error::{InvalidUrlSnafu, IoSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// An object found while listing, with its path relative to the provider root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub path: Path,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// The contents of a retrieved object together with its metadata.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub last_modified: DateTime<Utc>,
}

/// Storage provider rooted at a key prefix inside an object store.
#[derive(Clone)]
pub struct StorageProvider {
    object_store: Arc<dyn ObjectStore>,
    prefix: Option<Path>,
    canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a provider for a URL (`s3://bucket/prefix`, `gs://…`, `file:///…`)
    /// or a local directory path, which is created if missing.
    ///
    /// `options` are passed to the backend builder (region, credentials, endpoint).
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        if !url.contains("://") {
            return Self::for_local_dir(url).await;
        }

        let parsed = Url::parse(url).context(InvalidUrlSnafu { url })?;
        let (store, prefix) =
            object_store::parse_url_opts(&parsed, options).context(ObjectStoreSnafu)?;

        debug!(url, prefix = %prefix, "Created storage provider");

        Ok(Self {
            object_store: Arc::from(store),
            prefix: (!prefix.as_ref().is_empty()).then_some(prefix),
            canonical_url: url.trim_end_matches('/').to_string(),
        })
    }

    async fn for_local_dir(dir: &str) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(dir)
            .await
            .context(IoSnafu { path: dir })?;

        let store = LocalFileSystem::new_with_prefix(dir).context(ObjectStoreSnafu)?;
        let absolute = std::fs::canonicalize(dir).unwrap_or_else(|_| PathBuf::from(dir));

        Ok(Self {
            object_store: Arc::new(store),
            prefix: None,
            canonical_url: format!("file://{}", absolute.display()),
        })
    }

    /// Wrap an existing object store, e.g. an in-memory store in tests.
    pub fn with_store(object_store: Arc<dyn ObjectStore>, canonical_url: impl Into<String>) -> Self {
        Self {
            object_store,
            prefix: None,
            canonical_url: canonical_url.into(),
        }
    }

    /// The URL this provider was created for.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Qualify a relative path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match &self.prefix {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// List every object below the root, recursively, sorted by path.
    ///
    /// Pagination is handled by the object store; a listing failure aborts the
    /// whole call.
    pub async fn list(&self) -> Result<Vec<ListedObject>, StorageError> {
        let start = Instant::now();
        let skip = self.prefix.as_ref().map_or(0, |p| p.parts().count());

        let result: Result<Vec<_>, _> = self
            .object_store
            .list(self.prefix.as_ref())
            .map_ok(|meta| ListedObject {
                path: meta.location.parts().skip(skip).collect(),
                size: meta.size as u64,
                last_modified: meta.last_modified,
            })
            .try_collect()
            .await;

        emit!(StorageRequest {
            operation: StorageOperation::List,
            status: RequestStatus::from_result(&result),
            duration: start.elapsed(),
        });

        let mut objects = result.context(ObjectStoreSnafu)?;
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }

    /// Fetch an object's contents and last-modified time.
    pub async fn get(&self, path: &Path) -> Result<StoredObject, StorageError> {
        let start = Instant::now();
        let qualified = self.qualify_path(path);

        let result = async {
            let response = self.object_store.get(&qualified).await?;
            let last_modified = response.meta.last_modified;
            let bytes = response.bytes().await?;
            Ok::<_, object_store::Error>(StoredObject {
                bytes,
                last_modified,
            })
        }
        .await;

        emit!(StorageRequest {
            operation: StorageOperation::Get,
            status: RequestStatus::from_result(&result),
            duration: start.elapsed(),
        });

        result.context(ObjectStoreSnafu)
    }

    /// Write bytes to a path, replacing any existing object.
    pub async fn put(&self, path: &Path, bytes: Bytes) -> Result<(), StorageError> {
        let start = Instant::now();
        let qualified = self.qualify_path(path);
        let result = self
            .object_store
            .put(&qualified, PutPayload::from(bytes))
            .await;

        emit!(StorageRequest {
            operation: StorageOperation::Put,
            status: RequestStatus::from_result(&result),
            duration: start.elapsed(),
        });

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }
}
