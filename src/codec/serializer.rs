use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::AppError::Serialization;
use crate::AppResult;

pub const JSON_SERIALIZER: u8 = 1;
pub const BINCODE_SERIALIZER: u8 = 2;

/// Turns call payloads into bytes and back.
///
/// The generic serde bounds keep this trait out of trait-object land, so
/// by-code lookup goes through [`AnySerializer`] instead of `dyn`.
pub trait Serializer {
    fn code(&self) -> u8;

    fn encode<T>(&self, value: &T) -> AppResult<Vec<u8>>
    where
        T: Serialize + ?Sized;

    fn decode<T>(&self, data: &[u8]) -> AppResult<T>
    where
        T: DeserializeOwned;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn code(&self) -> u8 {
        JSON_SERIALIZER
    }

    fn encode<T>(&self, value: &T) -> AppResult<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value).map_err(|e| Serialization(format!("json encode: {}", e)))
    }

    fn decode<T>(&self, data: &[u8]) -> AppResult<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(data).map_err(|e| Serialization(format!("json decode: {}", e)))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn code(&self) -> u8 {
        BINCODE_SERIALIZER
    }

    fn encode<T>(&self, value: &T) -> AppResult<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| Serialization(format!("bincode encode: {}", e)))
    }

    fn decode<T>(&self, data: &[u8]) -> AppResult<T>
    where
        T: DeserializeOwned,
    {
        bincode::serde::decode_from_slice(data, bincode::config::standard())
            .map(|(value, _)| value)
            .map_err(|e| Serialization(format!("bincode decode: {}", e)))
    }
}

/// A serializer selectable at runtime by its wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnySerializer {
    Json(JsonSerializer),
    Bincode(BincodeSerializer),
}

impl Serializer for AnySerializer {
    fn code(&self) -> u8 {
        match self {
            AnySerializer::Json(s) => s.code(),
            AnySerializer::Bincode(s) => s.code(),
        }
    }

    fn encode<T>(&self, value: &T) -> AppResult<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        match self {
            AnySerializer::Json(s) => s.encode(value),
            AnySerializer::Bincode(s) => s.encode(value),
        }
    }

    fn decode<T>(&self, data: &[u8]) -> AppResult<T>
    where
        T: DeserializeOwned,
    {
        match self {
            AnySerializer::Json(s) => s.decode(data),
            AnySerializer::Bincode(s) => s.decode(data),
        }
    }
}

/// Per-instance table of serializers keyed by wire code. Each client or
/// server owns its own table; there is no process-wide registry.
#[derive(Debug, Default, Clone)]
pub struct SerializerRegistry {
    table: HashMap<u8, AnySerializer>,
}

impl SerializerRegistry {
    pub fn new() -> SerializerRegistry {
        SerializerRegistry {
            table: HashMap::new(),
        }
    }

    pub fn register(&mut self, serializer: AnySerializer) {
        self.table.insert(serializer.code(), serializer);
    }

    pub fn get(&self, code: u8) -> Option<AnySerializer> {
        self.table.get(&code).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        id: u64,
        name: String,
    }

    #[rstest]
    #[case(AnySerializer::Json(JsonSerializer))]
    #[case(AnySerializer::Bincode(BincodeSerializer))]
    fn test_encode_decode_roundtrip(#[case] serializer: AnySerializer) {
        let sample = Sample {
            id: 123,
            name: "hello".to_string(),
        };
        let bytes = serializer.encode(&sample).unwrap();
        let decoded: Sample = serializer.decode(&bytes).unwrap();
        assert_eq!(sample, decoded);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let garbage = b"not a payload";
        let json: AppResult<Sample> = JsonSerializer.decode(garbage);
        assert!(json.is_err());
    }

    #[test]
    fn test_registry_lookup_by_code() {
        let mut registry = SerializerRegistry::new();
        registry.register(AnySerializer::Json(JsonSerializer));
        registry.register(AnySerializer::Bincode(BincodeSerializer));
        assert_eq!(
            registry.get(JSON_SERIALIZER),
            Some(AnySerializer::Json(JsonSerializer))
        );
        assert!(registry.get(99).is_none());
    }
}
