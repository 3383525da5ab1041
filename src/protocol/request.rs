use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::AppError::MalformedProtocol;
use crate::AppResult;

use super::FIXED_HEADER_LEN;

fn split_segment<'a>(buf: &mut &'a [u8], sep: u8) -> Option<&'a [u8]> {
    let idx = buf.iter().position(|&b| b == sep)?;
    let segment = &buf[..idx];
    *buf = &buf[idx + 1..];
    Some(segment)
}

fn utf8_segment(segment: &[u8]) -> AppResult<String> {
    String::from_utf8(segment.to_vec())
        .map_err(|e| MalformedProtocol(format!("invalid utf-8 in header: {}", e)))
}

/// One encoded RPC call.
///
/// The fixed header is 15 bytes: `head_length`, `body_length` and
/// `message_id` as big-endian u32, then `version`, `compressor` and
/// `serializer` as single bytes. The variable header carries the service
/// name, the method name and the meta entries, each terminated by `\n`
/// (meta keys and values are separated by `\r`). The body, if any,
/// follows the header.
///
/// `head_length` and `body_length` do not track field changes; they must
/// be recomputed via [`Request::calculate_head_length`] and
/// [`Request::calculate_body_length`] before [`Request::encode`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Request {
    pub head_length: u32,
    pub body_length: u32,
    pub message_id: u32,
    pub version: u8,
    pub compressor: u8,
    pub serializer: u8,

    pub service_name: String,
    pub method_name: String,
    pub meta: HashMap<String, String>,

    pub data: Bytes,
}

impl Request {
    pub fn calculate_head_length(&mut self) {
        let mut length = FIXED_HEADER_LEN + self.service_name.len() + 1 + self.method_name.len() + 1;
        for (key, value) in &self.meta {
            length += key.len() + 1 + value.len() + 1;
        }
        self.head_length = length as u32;
    }

    pub fn calculate_body_length(&mut self) {
        self.body_length = self.data.len() as u32;
    }

    pub fn encode(&self) -> Bytes {
        let total = (self.head_length + self.body_length) as usize;
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32(self.head_length);
        buf.put_u32(self.body_length);
        buf.put_u32(self.message_id);
        buf.put_u8(self.version);
        buf.put_u8(self.compressor);
        buf.put_u8(self.serializer);

        buf.put_slice(self.service_name.as_bytes());
        buf.put_u8(b'\n');
        buf.put_slice(self.method_name.as_bytes());
        buf.put_u8(b'\n');
        // meta keys and values use '\r' as the pair separator, '\n' after
        // every entry including the last one
        for (key, value) in &self.meta {
            buf.put_slice(key.as_bytes());
            buf.put_u8(b'\r');
            buf.put_slice(value.as_bytes());
            buf.put_u8(b'\n');
        }

        if self.body_length > 0 {
            buf.put_slice(&self.data);
        }

        buf.freeze()
    }

    pub fn decode(frame: &[u8]) -> AppResult<Request> {
        if frame.len() < FIXED_HEADER_LEN {
            return Err(MalformedProtocol(format!(
                "request frame of {} bytes is shorter than the fixed header",
                frame.len()
            )));
        }
        let head_length = u32::from_be_bytes(frame[0..4].try_into().unwrap());
        let body_length = u32::from_be_bytes(frame[4..8].try_into().unwrap());
        if (head_length as usize) < FIXED_HEADER_LEN || head_length as usize > frame.len() {
            return Err(MalformedProtocol(format!(
                "request head length {} out of range for a {} byte frame",
                head_length,
                frame.len()
            )));
        }

        let mut request = Request {
            head_length,
            body_length,
            message_id: u32::from_be_bytes(frame[8..12].try_into().unwrap()),
            version: frame[12],
            compressor: frame[13],
            serializer: frame[14],
            ..Default::default()
        };

        let mut header = &frame[FIXED_HEADER_LEN..head_length as usize];
        request.service_name = utf8_segment(
            split_segment(&mut header, b'\n')
                .ok_or_else(|| MalformedProtocol("missing service name".into()))?,
        )?;
        request.method_name = utf8_segment(
            split_segment(&mut header, b'\n')
                .ok_or_else(|| MalformedProtocol("missing method name".into()))?,
        )?;

        while let Some(pair) = split_segment(&mut header, b'\n') {
            let mut pair = pair;
            let key = split_segment(&mut pair, b'\r')
                .ok_or_else(|| MalformedProtocol("meta entry without a value".into()))?;
            request
                .meta
                .insert(utf8_segment(key)?, utf8_segment(pair)?);
        }

        if body_length > 0 {
            request.data = Bytes::copy_from_slice(&frame[head_length as usize..]);
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(mut request: Request) -> Request {
        request.calculate_head_length();
        request.calculate_body_length();
        let encoded = request.encode();
        let decoded = Request::decode(&encoded).unwrap();
        assert_eq!(request, decoded);
        decoded
    }

    #[test]
    fn test_roundtrip_with_meta_and_data() {
        let mut meta = HashMap::new();
        meta.insert("deadline".to_string(), "1700000000000".to_string());
        meta.insert("one-way".to_string(), "true".to_string());
        roundtrip(Request {
            message_id: 42,
            version: 1,
            compressor: 1,
            serializer: 2,
            service_name: "user-service".to_string(),
            method_name: "get_user_by_id".to_string(),
            meta,
            data: Bytes::from_static(b"{\"id\":123}"),
            ..Default::default()
        });
    }

    #[test]
    fn test_roundtrip_without_meta() {
        let decoded = roundtrip(Request {
            service_name: "echo".to_string(),
            method_name: "echo".to_string(),
            data: Bytes::from_static(b"hello"),
            ..Default::default()
        });
        assert!(decoded.meta.is_empty());
    }

    #[test]
    fn test_roundtrip_empty_data() {
        let decoded = roundtrip(Request {
            service_name: "echo".to_string(),
            method_name: "ping".to_string(),
            ..Default::default()
        });
        assert_eq!(decoded.body_length, 0);
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn test_fixed_header_layout() {
        let mut request = Request {
            message_id: 7,
            version: 1,
            compressor: 2,
            serializer: 3,
            service_name: "s".to_string(),
            method_name: "m".to_string(),
            data: Bytes::from_static(b"xy"),
            ..Default::default()
        };
        request.calculate_head_length();
        request.calculate_body_length();
        let bytes = request.encode();
        // 15 fixed + "s\n" + "m\n"
        assert_eq!(&bytes[0..4], &19u32.to_be_bytes());
        assert_eq!(&bytes[4..8], &2u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &7u32.to_be_bytes());
        assert_eq!(&bytes[12..15], &[1, 2, 3]);
        assert_eq!(&bytes[15..19], b"s\nm\n");
        assert_eq!(&bytes[19..], b"xy");
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        assert!(Request::decode(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_head_length() {
        let mut request = Request {
            service_name: "s".to_string(),
            method_name: "m".to_string(),
            ..Default::default()
        };
        request.calculate_head_length();
        request.calculate_body_length();
        let mut bytes = BytesMut::from(&request.encode()[..]);
        // claim a header longer than the frame
        bytes[0..4].copy_from_slice(&1000u32.to_be_bytes());
        assert!(Request::decode(&bytes).is_err());
    }
}
