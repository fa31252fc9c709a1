//! Compression codecs for shard bodies.

use std::io::{BufRead, BufReader, Cursor};

use serde::{Deserialize, Serialize};

/// Compression of the source shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    #[default]
    Gzip,
    None,
}

impl CompressionFormat {
    /// The codec that decodes this format.
    pub fn codec(&self) -> &'static dyn CompressionCodec {
        match self {
            CompressionFormat::Gzip => &GzipCodec,
            CompressionFormat::None => &NoopCodec,
        }
    }
}

/// Streaming decompression of an in-memory body.
///
/// Errors in the compressed data surface as `io::Error`s while reading.
pub trait CompressionCodec: Send + Sync {
    fn create_reader<'a>(&self, data: &'a [u8]) -> Box<dyn BufRead + Send + 'a>;

    /// Human-readable name of this codec (for logging).
    fn name(&self) -> &'static str;
}

/// Gzip codec. Concatenated gzip members are read as one stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCodec;

impl CompressionCodec for GzipCodec {
    fn create_reader<'a>(&self, data: &'a [u8]) -> Box<dyn BufRead + Send + 'a> {
        Box::new(BufReader::new(flate2::read::MultiGzDecoder::new(data)))
    }

    fn name(&self) -> &'static str {
        "gzip"
    }
}

/// Codec for uncompressed shards.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCodec;

impl CompressionCodec for NoopCodec {
    fn create_reader<'a>(&self, data: &'a [u8]) -> Box<dyn BufRead + Send + 'a> {
        Box::new(Cursor::new(data))
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    const TEST_DATA: &[u8] = b"{\"Item\":{}}\n{\"Item\":{}}\n";

    fn make_gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_gzip_codec() {
        let compressed = make_gzip(TEST_DATA);
        let mut result = String::new();
        GzipCodec
            .create_reader(&compressed)
            .read_to_string(&mut result)
            .unwrap();
        assert_eq!(result.as_bytes(), TEST_DATA);
    }

    #[test]
    fn test_gzip_reads_concatenated_members() {
        let mut compressed = make_gzip(b"a\n");
        compressed.extend(make_gzip(b"b\n"));

        let lines: Vec<String> = GzipCodec
            .create_reader(&compressed)
            .lines()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_gzip_rejects_garbage() {
        let mut result = Vec::new();
        let err = GzipCodec
            .create_reader(b"definitely not gzip")
            .read_to_end(&mut result);
        assert!(err.is_err());
    }

    #[test]
    fn test_format_selects_codec() {
        assert_eq!(CompressionFormat::Gzip.codec().name(), "gzip");
        assert_eq!(CompressionFormat::None.codec().name(), "none");
        assert_eq!(CompressionFormat::default(), CompressionFormat::Gzip);
    }
}
