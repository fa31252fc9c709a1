//! sluice-core: shared infrastructure for the sluice migration tool.
//!
//! - `storage/` - object-store backed provider for S3, GCS and the local filesystem
//! - `metrics/` - `InternalEvent` metric events and the Prometheus textfile snapshot
//! - `config/` - config primitives and environment variable interpolation
//! - `tracing` - subscriber initialization
//! - `error` - storage, config and metrics error types

pub mod config;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod tracing;

pub use config::{InterpolationResult, KB, LogFormat, MB, MetricsConfig, interpolate};
pub use error::{ConfigError, MetricsError, StorageError};
pub use metrics::{MetricsHandle, init_recorder};
pub use storage::{ListedObject, StorageProvider, StorageProviderRef, StoredObject};
pub use tracing::init_tracing;
