use bytes::BytesMut;

use crate::protocol::FIXED_HEADER_LEN;
use crate::AppError::Incomplete;
use crate::{AppError, AppResult};

/// Raw frame delimiting over a byte stream.
///
/// The first 8 bytes of every frame carry the header length and the body
/// length as big-endian u32; the frame is complete once
/// `head_length + body_length` bytes are buffered.
#[derive(Debug)]
pub struct Frame;

impl Frame {
    fn check(buffer: &mut BytesMut, max_frame_size: usize) -> AppResult<usize> {
        if buffer.len() < 8 {
            return Err(Incomplete);
        }
        let head_length = u32::from_be_bytes(buffer[0..4].try_into().unwrap()) as usize;
        let body_length = u32::from_be_bytes(buffer[4..8].try_into().unwrap()) as usize;
        if head_length < FIXED_HEADER_LEN {
            return Err(AppError::MalformedProtocol(format!(
                "frame head length {} less than the {} byte fixed header",
                head_length, FIXED_HEADER_LEN
            )));
        }
        let total = head_length + body_length;
        if total > max_frame_size {
            return Err(AppError::MalformedProtocol(format!(
                "frame of length {} is too large",
                total
            )));
        }
        if buffer.len() < total {
            buffer.reserve(total - buffer.len());
            return Err(Incomplete);
        }
        Ok(total)
    }

    /// Splits one complete frame off the front of `buffer`, or returns
    /// `None` when more bytes are needed.
    pub fn parse(buffer: &mut BytesMut, max_frame_size: usize) -> AppResult<Option<BytesMut>> {
        match Frame::check(buffer, max_frame_size) {
            Ok(total) => Ok(Some(buffer.split_to(total))),
            Err(AppError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
