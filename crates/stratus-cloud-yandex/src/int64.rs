//! int64 fields
//!
//! The REST gateway encodes 64-bit integers as JSON strings (`"size": "10737418240"`)
//! but accepts plain numbers too. Use with `#[serde(with = "crate::int64")]`.

use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Number(i64),
    Text(String),
}

impl Raw {
    fn into_i64<E: serde::de::Error>(self) -> Result<i64, E> {
        match self {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s
                .parse()
                .map_err(|_| E::custom(format!("invalid int64 value '{s}'"))),
        }
    }
}

pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Raw::deserialize(deserializer)?.into_i64()
}

/// Same for `Option<i64>`; pair with `#[serde(default)]`
pub mod option {
    use super::Raw;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        Option::<Raw>::deserialize(deserializer)?
            .map(Raw::into_i64)
            .transpose()
    }
}
