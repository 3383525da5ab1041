mod connection;
mod frame;

pub use connection::Connection;
pub use frame::Frame;

/// Default upper bound on a single frame, header and body included.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;
