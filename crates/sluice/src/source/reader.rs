//! Streams decompressed shard lines to the driver.
//!
//! Decompression runs on the blocking pool and hands lines over a bounded
//! channel, so a slow consumer (a backpressured sink) stalls decompression
//! instead of buffering the whole shard.

use std::io::BufRead;
use std::ops::ControlFlow;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use sluice_core::emit;
use sluice_core::metrics::events::{BytesRead, ShardDecompressionCompleted};

use super::compression::CompressionFormat;
use crate::error::ReaderError;

/// A non-empty line of a shard, numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLine {
    pub number: usize,
    pub text: String,
}

/// Lines of one shard as they are decompressed.
///
/// A decompression failure arrives as the final item. After the receiver is
/// exhausted, [`ShardLines::finish`] surfaces a panicked reader task.
pub struct ShardLines {
    pub lines: mpsc::Receiver<Result<ShardLine, ReaderError>>,
    task: JoinHandle<()>,
    path: String,
}

impl ShardLines {
    /// Wait for the reader task to exit.
    pub async fn finish(self) -> Result<(), ReaderError> {
        drop(self.lines);
        self.task.await.map_err(|source| ReaderError::ReaderTask {
            path: self.path,
            source,
        })
    }
}

/// Spawns blocking line readers for shard bodies.
#[derive(Debug, Clone, Copy)]
pub struct LineReader {
    compression: CompressionFormat,
    buffer: usize,
}

impl LineReader {
    /// `buffer` is the number of lines held between decompressor and consumer.
    pub fn new(compression: CompressionFormat, buffer: usize) -> Self {
        Self {
            compression,
            buffer: buffer.max(1),
        }
    }

    /// Start decompressing `body` and return its line stream.
    pub fn spawn(&self, path: &str, body: Bytes) -> ShardLines {
        let (tx, rx) = mpsc::channel(self.buffer);
        let compression = self.compression;
        let read_path = path.to_string();

        let task = tokio::task::spawn_blocking(move || {
            let result = read_lines(compression, &body, &read_path, &mut |line| {
                match tx.blocking_send(Ok(line)) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(_) => ControlFlow::Break(()), // receiver dropped
                }
            });

            if let Err(e) = result {
                // Ignore send error, receiver may already be dropped
                let _ = tx.blocking_send(Err(e));
            }
        });

        ShardLines {
            lines: rx,
            task,
            path: path.to_string(),
        }
    }
}

/// Decompress `body` and pass each non-empty line to `on_line`.
///
/// Returns the number of lines delivered.
fn read_lines(
    compression: CompressionFormat,
    body: &Bytes,
    path: &str,
    on_line: &mut dyn FnMut(ShardLine) -> ControlFlow<()>,
) -> Result<usize, ReaderError> {
    emit!(BytesRead {
        bytes: body.len() as u64,
    });

    let start = Instant::now();
    let reader = compression.codec().create_reader(body);
    let mut delivered = 0;

    for (index, line) in reader.split(b'\n').enumerate() {
        let mut bytes = line.map_err(|source| ReaderError::Decompression {
            path: path.to_string(),
            source,
        })?;
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        // Invalid UTF-8 is replaced rather than failing the shard.
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                debug!(path, line = index + 1, "Replacing invalid UTF-8 in line");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        if text.trim().is_empty() {
            continue;
        }

        delivered += 1;
        let line = ShardLine {
            number: index + 1,
            text,
        };
        if on_line(line).is_break() {
            debug!(path, delivered, "Line consumer went away, stopping early");
            return Ok(delivered);
        }
    }

    emit!(ShardDecompressionCompleted {
        duration: start.elapsed(),
    });
    debug!(path, bytes = body.len(), lines = delivered, "Decompressed shard");

    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Bytes {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        Bytes::from(encoder.finish().unwrap())
    }

    async fn collect(mut lines: ShardLines) -> (Vec<ShardLine>, Option<ReaderError>) {
        let mut out = Vec::new();
        let mut error = None;
        while let Some(item) = lines.lines.recv().await {
            match item {
                Ok(line) => out.push(line),
                Err(e) => error = Some(e),
            }
        }
        lines.finish().await.unwrap();
        (out, error)
    }

    #[tokio::test]
    async fn test_lines_are_numbered_and_blank_lines_skipped() {
        let reader = LineReader::new(CompressionFormat::Gzip, 2);
        let body = gzip(b"first\n\nthird\n  \nfifth");

        let (lines, error) = collect(reader.spawn("data/a.json.gz", body)).await;

        assert!(error.is_none());
        let numbered: Vec<_> = lines.iter().map(|l| (l.number, l.text.as_str())).collect();
        assert_eq!(numbered, vec![(1, "first"), (3, "third"), (5, "fifth")]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_stop_the_shard() {
        let reader = LineReader::new(CompressionFormat::Gzip, 4);
        let body = gzip(b"first\r\ncaf\xE9\nthird\n");

        let (lines, error) = collect(reader.spawn("data/a.json.gz", body)).await;

        assert!(error.is_none());
        let numbered: Vec<_> = lines.iter().map(|l| (l.number, l.text.as_str())).collect();
        assert_eq!(numbered, vec![(1, "first"), (2, "caf\u{FFFD}"), (3, "third")]);
    }

    #[tokio::test]
    async fn test_corrupt_shard_reports_decompression_error() {
        let reader = LineReader::new(CompressionFormat::Gzip, 4);
        let mut corrupt = gzip(b"line\n").to_vec();
        corrupt.truncate(corrupt.len() / 2);

        let (_, error) = collect(reader.spawn("data/bad.json.gz", Bytes::from(corrupt))).await;

        assert!(matches!(error, Some(ReaderError::Decompression { ref path, .. }) if path == "data/bad.json.gz"));
    }

    #[tokio::test]
    async fn test_uncompressed_shards() {
        let reader = LineReader::new(CompressionFormat::None, 4);
        let (lines, _) = collect(reader.spawn("plain", Bytes::from_static(b"a\nb\n"))).await;
        assert_eq!(lines.len(), 2);
    }

    #[tokio::test]
    async fn test_bounded_buffer_holds_back_decompression() {
        let reader = LineReader::new(CompressionFormat::None, 1);
        let body = Bytes::from((0..100).map(|i| format!("{i}\n")).collect::<String>());
        let mut lines = reader.spawn("many", body);

        // Give the reader time to fill the channel, then read slowly.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let first = lines.lines.recv().await.unwrap().unwrap();
        assert_eq!(first.text, "0");

        let mut count = 1;
        while let Some(line) = lines.lines.recv().await {
            line.unwrap();
            count += 1;
        }
        assert_eq!(count, 100);
        lines.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropping_receiver_stops_reader() {
        let reader = LineReader::new(CompressionFormat::None, 1);
        let body = Bytes::from((0..10_000).map(|i| format!("{i}\n")).collect::<String>());
        let mut lines = reader.spawn("many", body);

        lines.lines.recv().await.unwrap().unwrap();
        lines.finish().await.unwrap();
    }
}
