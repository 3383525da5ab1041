mod request;
mod response;

pub use request::Request;
pub use response::Response;

/// Length of the fixed part of a frame header: two u32 lengths, a u32
/// message id and three single-byte codec fields.
pub const FIXED_HEADER_LEN: usize = 15;

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 1;

/// Well-known meta key carrying the call deadline as absolute Unix millis.
pub const META_DEADLINE: &str = "deadline";
/// Well-known meta key marking a call as one-way.
pub const META_ONE_WAY: &str = "one-way";
