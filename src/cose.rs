//! Glue between `coset` structures and the serde-based definitions.
use coset::{AsCborValue, CoseSign1, Label};
use serde::{Deserialize, Serialize};

use crate::cbor::Value;

/// Header label carrying the X.509 certificate chain.
pub const X5CHAIN_HEADER_LABEL: i64 = 33;

/// Wrapper for `coset` types, which only implement `AsCborValue`, so they can
/// be embedded in serde structures.
#[derive(Debug, Clone, PartialEq)]
pub struct CoseValue<T>(pub T);

impl<T> CoseValue<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> AsRef<T> for CoseValue<T> {
    fn as_ref(&self) -> &T {
        &self.0
    }
}

impl<T> From<T> for CoseValue<T> {
    fn from(inner: T) -> Self {
        Self(inner)
    }
}

impl<T: Clone + AsCborValue> Serialize for CoseValue<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0
            .clone()
            .to_cbor_value()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de, T: AsCborValue> Deserialize<'de> for CoseValue<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        T::from_cbor_value(Value::deserialize(deserializer)?)
            .map_err(serde::de::Error::custom)
            .map(Self)
    }
}

/// DER certificates found in the `x5chain` header, leaf first.
///
/// The chain may sit in either the unprotected or the protected bucket, and
/// may be a single byte string or an array of them.
pub fn x5chain(sign1: &CoseSign1) -> Vec<Vec<u8>> {
    let label = Label::Int(X5CHAIN_HEADER_LABEL);
    let value = sign1
        .unprotected
        .rest
        .iter()
        .chain(sign1.protected.header.rest.iter())
        .find(|(l, _)| *l == label)
        .map(|(_, v)| v);

    match value {
        Some(Value::Bytes(der)) => vec![der.clone()],
        Some(Value::Array(certs)) => certs
            .iter()
            .filter_map(|c| match c {
                Value::Bytes(der) => Some(der.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use coset::{CoseSign1Builder, HeaderBuilder};

    #[test]
    fn x5chain_single_and_array() {
        let single = CoseSign1Builder::new()
            .unprotected(
                HeaderBuilder::new()
                    .value(X5CHAIN_HEADER_LABEL, Value::Bytes(vec![1, 2, 3]))
                    .build(),
            )
            .build();
        assert_eq!(x5chain(&single), vec![vec![1, 2, 3]]);

        let chain = CoseSign1Builder::new()
            .unprotected(
                HeaderBuilder::new()
                    .value(
                        X5CHAIN_HEADER_LABEL,
                        Value::Array(vec![Value::Bytes(vec![1]), Value::Bytes(vec![2])]),
                    )
                    .build(),
            )
            .build();
        assert_eq!(x5chain(&chain), vec![vec![1], vec![2]]);

        assert!(x5chain(&CoseSign1Builder::new().build()).is_empty());
    }

    #[test]
    fn sign1_survives_serde() {
        let sign1 = CoseSign1Builder::new()
            .payload(vec![0xAA])
            .signature(vec![0xBB])
            .build();
        let bytes = crate::cbor::to_vec(&CoseValue(sign1.clone())).unwrap();
        let decoded: CoseValue<CoseSign1> = crate::cbor::from_slice(&bytes).unwrap();
        assert_eq!(decoded.0.payload, sign1.payload);
        assert_eq!(decoded.0.signature, sign1.signature);
    }
}
