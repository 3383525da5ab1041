use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::AppError::Compression as CompressionError;
use crate::AppResult;

pub const GZIP_COMPRESSOR: u8 = 1;

/// Shrinks serialized payloads on the wire. Compressors work on raw bytes
/// only, so unlike serializers they stay fully dynamic.
pub trait Compressor: Send + Sync {
    fn code(&self) -> u8;

    fn compress(&self, data: &[u8]) -> AppResult<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> AppResult<Vec<u8>>;
}

#[derive(Debug, Default)]
pub struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn code(&self) -> u8 {
        GZIP_COMPRESSOR
    }

    fn compress(&self, data: &[u8]) -> AppResult<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| CompressionError(format!("gzip compress: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> AppResult<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CompressionError(format!("gzip decompress: {}", e)))?;
        Ok(out)
    }
}

/// Per-instance table of compressors keyed by wire code. Code 0 and any
/// unregistered code mean the payload is used uncompressed.
#[derive(Default, Clone)]
pub struct CompressorRegistry {
    table: HashMap<u8, Arc<dyn Compressor>>,
}

impl CompressorRegistry {
    pub fn new() -> CompressorRegistry {
        CompressorRegistry {
            table: HashMap::new(),
        }
    }

    pub fn register(&mut self, compressor: Arc<dyn Compressor>) {
        self.table.insert(compressor.code(), compressor);
    }

    pub fn get(&self, code: u8) -> Option<Arc<dyn Compressor>> {
        self.table.get(&code).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_decompress_roundtrip() {
        let compressor = GzipCompressor;
        let payload = b"hello hello hello hello hello".repeat(10);
        let compressed = compressor.compress(&payload).unwrap();
        assert_ne!(compressed, payload);
        let restored = compressor.decompress(&compressed).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn test_decompress_garbage_fails() {
        let compressor = GzipCompressor;
        assert!(compressor.decompress(b"definitely not gzip").is_err());
    }

    #[test]
    fn test_registry_lookup_by_code() {
        let mut registry = CompressorRegistry::new();
        registry.register(Arc::new(GzipCompressor));
        assert!(registry.get(GZIP_COMPRESSOR).is_some());
        assert!(registry.get(0).is_none());
    }
}
