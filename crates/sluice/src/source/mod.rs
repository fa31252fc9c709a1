//! Shard discovery and line reading.
//!
//! - `shards`: the [`ShardSource`] seam over object storage
//! - `compression`: codecs for shard bodies
//! - `reader`: streams decompressed lines through a bounded channel

pub mod compression;
pub mod reader;
pub mod shards;

pub use compression::{CompressionCodec, CompressionFormat};
pub use reader::{LineReader, ShardLine, ShardLines};
pub use shards::{ShardObject, ShardSource, StorageShardSource};
