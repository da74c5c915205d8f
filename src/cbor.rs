//! CBOR encoding helpers shared by every definition in this crate.
//!
//! All wire structures go through [to_vec] and [from_slice] so the underlying
//! CBOR library is only referenced here.
use serde::{de, Serialize};
use thiserror::Error;

pub use ciborium::Value;

#[derive(Debug, Error)]
pub enum CborError {
    /// CBOR decoding failure.
    #[error("CBOR decoding failure: {0}")]
    DecodeFailed(String),
    /// CBOR encoding failure.
    #[error("CBOR encoding failure: {0}")]
    EncodeFailed(String),
    /// Unexpected CBOR item encountered (got, want).
    #[error("unexpected item: {0}, want {1}")]
    UnexpectedItem(&'static str, &'static str),
}

impl From<coset::CoseError> for CborError {
    fn from(e: coset::CoseError) -> Self {
        match e {
            coset::CoseError::DecodeFailed(e) => CborError::DecodeFailed(e.to_string()),
            coset::CoseError::UnexpectedItem(got, want) => CborError::UnexpectedItem(got, want),
            other => CborError::EncodeFailed(other.to_string()),
        }
    }
}

pub fn to_vec<T>(value: &T) -> Result<Vec<u8>, CborError>
where
    T: Serialize,
{
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CborError::EncodeFailed(e.to_string()))?;
    Ok(buf)
}

pub fn from_slice<T>(slice: &[u8]) -> Result<T, CborError>
where
    T: de::DeserializeOwned,
{
    ciborium::from_reader(slice).map_err(|e| CborError::DecodeFailed(e.to_string()))
}

/// Convert a [Value] into a type `T`.
pub fn from_value<T>(value: Value) -> Result<T, CborError>
where
    T: de::DeserializeOwned,
{
    value
        .deserialized()
        .map_err(|e| CborError::DecodeFailed(e.to_string()))
}

pub fn into_value<S>(v: S) -> Result<Value, CborError>
where
    S: Serialize,
{
    Value::serialized(&v).map_err(|e| CborError::EncodeFailed(e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn text_keyed_map() {
        let map: BTreeMap<String, u64> = [("status".to_string(), 20)].into_iter().collect();
        let bytes = to_vec(&map).unwrap();
        assert_eq!(bytes, hex::decode("A16673746174757314").unwrap());
        let decoded: BTreeMap<String, u64> = from_slice(&bytes).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn truncated_input_is_a_decode_failure() {
        let err = from_slice::<Vec<u8>>(&[0x45, 0x01]).unwrap_err();
        assert!(matches!(err, CborError::DecodeFailed(_)));
    }
}
