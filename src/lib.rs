mod client;
mod codec;
mod config;
mod context;
mod error;
mod logging;
mod network;
mod pool;
mod protocol;
mod server;

pub use client::{Client, ClientBuilder, MethodStub};
pub use codec::{
    AnySerializer, BincodeSerializer, Compressor, GzipCompressor, JsonSerializer, Serializer,
    BINCODE_SERIALIZER, GZIP_COMPRESSOR, JSON_SERIALIZER,
};
pub use config::{AppConfig, ClientConfig, NetworkConfig, PoolConfig};
pub use context::CallContext;
pub use error::{AppError, AppResult, BusinessError};
pub use logging::setup_tracing;
pub use network::DEFAULT_MAX_FRAME_SIZE;
pub use pool::{Pool, PoolOptions};
pub use protocol::{Request, Response, PROTOCOL_VERSION};
pub use server::{Server, Service};
