//! Hex (de)serialization helpers for JSON artifacts.

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer, T: AsRef<[u8]>>(bytes: T, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(&hex::encode(bytes.as_ref()))
}

pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(de)?;
    hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
}

/// Fixed-size variant, for byte-array fields.
pub mod fixed {
    use super::*;

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        de: D,
    ) -> Result<[u8; N], D::Error> {
        let bytes = super::deserialize(de)?;
        bytes
            .try_into()
            .map_err(|b: Vec<u8>| serde::de::Error::custom(format!("expected {N} bytes, got {}", b.len())))
    }
}

/// Optional variant, for fields absent in resharing results.
pub mod option {
    use super::*;
    use serde::Serialize;

    pub fn serialize<S: Serializer, T: AsRef<[u8]>>(
        bytes: &Option<T>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => Some(hex::encode(b.as_ref())).serialize(ser),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Vec<u8>>, D::Error> {
        let maybe: Option<String> = Option::deserialize(de)?;
        maybe
            .map(|s| hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom))
            .transpose()
    }
}
