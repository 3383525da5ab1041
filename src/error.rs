use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
#[error("rpc transport error")]
pub enum AppError {
    /// configuration errors
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// transport errors
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("malformed protocol: {0}")]
    MalformedProtocol(String),

    /// marker error: not enough bytes buffered to parse a frame
    Incomplete,

    /// protocol errors
    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("unknown serializer code: {0}")]
    UnknownSerializer(u8),

    /// codec errors
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("compression error: {0}")]
    Compression(String),

    /// acquisition / cancellation errors
    #[error("call cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("pool is closed")]
    PoolClosed,

    #[error("channel recv error: {0}")]
    ChannelRecvError(String),

    /// sentinel: a one-way call carries no response
    #[error("one-way call, no response expected")]
    OneWay,

    /// handler-returned application error, carried in the response error info
    #[error("{0}")]
    Business(String),
}

/// An application-level error returned by a service handler. It travels in
/// the response header's error info and never closes the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessError(pub String);

impl fmt::Display for BusinessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for BusinessError {}

impl From<&str> for BusinessError {
    fn from(msg: &str) -> Self {
        BusinessError(msg.to_string())
    }
}

impl From<String> for BusinessError {
    fn from(msg: String) -> Self {
        BusinessError(msg)
    }
}
