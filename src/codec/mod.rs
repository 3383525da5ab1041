mod compressor;
mod serializer;

pub use compressor::{Compressor, CompressorRegistry, GzipCompressor, GZIP_COMPRESSOR};
pub use serializer::{
    AnySerializer, BincodeSerializer, JsonSerializer, Serializer, SerializerRegistry,
    BINCODE_SERIALIZER, JSON_SERIALIZER,
};
