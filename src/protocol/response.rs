use bytes::{BufMut, Bytes, BytesMut};

use crate::AppError::MalformedProtocol;
use crate::AppResult;

use super::FIXED_HEADER_LEN;

/// One encoded RPC result.
///
/// The fixed header matches [`super::Request`]. The variable header is
/// solely the business-error bytes; they run to `head_length` with no
/// delimiter, so an empty error info means success. Length fields must be
/// recomputed before [`Response::encode`], same as for requests.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Response {
    pub head_length: u32,
    pub body_length: u32,
    pub message_id: u32,
    pub version: u8,
    pub compressor: u8,
    pub serializer: u8,

    pub error_info: Bytes,

    pub data: Bytes,
}

impl Response {
    pub fn calculate_head_length(&mut self) {
        self.head_length = (FIXED_HEADER_LEN + self.error_info.len()) as u32;
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

        buf.put_slice(&self.error_info);
        buf.put_slice(&self.data);

        buf.freeze()
    }

    pub fn decode(frame: &[u8]) -> AppResult<Response> {
        if frame.len() < FIXED_HEADER_LEN {
            return Err(MalformedProtocol(format!(
                "response frame of {} bytes is shorter than the fixed header",
                frame.len()
            )));
        }
        let head_length = u32::from_be_bytes(frame[0..4].try_into().unwrap());
        let body_length = u32::from_be_bytes(frame[4..8].try_into().unwrap());
        if (head_length as usize) < FIXED_HEADER_LEN || head_length as usize > frame.len() {
            return Err(MalformedProtocol(format!(
                "response head length {} out of range for a {} byte frame",
                head_length,
                frame.len()
            )));
        }

        let mut response = Response {
            head_length,
            body_length,
            message_id: u32::from_be_bytes(frame[8..12].try_into().unwrap()),
            version: frame[12],
            compressor: frame[13],
            serializer: frame[14],
            ..Default::default()
        };

        response.error_info =
            Bytes::copy_from_slice(&frame[FIXED_HEADER_LEN..head_length as usize]);
        if body_length > 0 {
            response.data = Bytes::copy_from_slice(&frame[head_length as usize..]);
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(mut response: Response) -> Response {
        response.calculate_head_length();
        response.calculate_body_length();
        let encoded = response.encode();
        let decoded = Response::decode(&encoded).unwrap();
        assert_eq!(response, decoded);
        decoded
    }

    #[test]
    fn test_roundtrip_success() {
        let decoded = roundtrip(Response {
            message_id: 9,
            version: 1,
            serializer: 1,
            data: Bytes::from_static(b"{\"msg\":\"hello\"}"),
            ..Default::default()
        });
        assert!(decoded.error_info.is_empty());
    }

    #[test]
    fn test_roundtrip_business_error_without_data() {
        let decoded = roundtrip(Response {
            message_id: 10,
            error_info: Bytes::from_static(b"user not found"),
            ..Default::default()
        });
        assert_eq!(decoded.error_info, Bytes::from_static(b"user not found"));
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn test_roundtrip_error_and_data_coexist() {
        let decoded = roundtrip(Response {
            error_info: Bytes::from_static(b"partial failure"),
            data: Bytes::from_static(b"partial result"),
            ..Default::default()
        });
        assert_eq!(decoded.error_info, Bytes::from_static(b"partial failure"));
        assert_eq!(decoded.data, Bytes::from_static(b"partial result"));
    }

    #[test]
    fn test_error_info_runs_to_head_length() {
        let mut response = Response {
            error_info: Bytes::from_static(b"boom"),
            data: Bytes::from_static(b"d"),
            ..Default::default()
        };
        response.calculate_head_length();
        response.calculate_body_length();
        let bytes = response.encode();
        assert_eq!(&bytes[0..4], &19u32.to_be_bytes());
        assert_eq!(&bytes[15..19], b"boom");
        assert_eq!(&bytes[19..], b"d");
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        assert!(Response::decode(&[0u8; 3]).is_err());
    }
}
