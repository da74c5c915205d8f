//! Ephemeral session keys as RFC-8152 [COSE_Key](https://datatracker.ietf.org/doc/html/rfc8152#section-13)
//! structures, restricted to uncompressed EC2 keys on P-256.
use ciborium::Value;
use p256::elliptic_curve::sec1::{Coordinates, FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, FieldBytes, PublicKey};
use serde::{Deserialize, Serialize};

const KTY: i128 = 1;
const KTY_EC2: i128 = 2;
const CRV: i128 = -1;
const CRV_P256: i128 = 1;
const X: i128 = -2;
const Y: i128 = -3;

/// An EC2 key on curve P-256, with both coordinates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Value", into = "Value")]
pub struct CoseKey {
    pub x: Vec<u8>,
    pub y: Vec<u8>,
}

/// Errors that can occur when deserialising a COSE_Key.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("COSE_Key of kty 'EC2' missing x coordinate")]
    EC2MissingX,
    #[error("COSE_Key of kty 'EC2' missing y coordinate")]
    EC2MissingY,
    #[error("Expected to parse a CBOR map, received: '{0:?}'")]
    NotAMap(Value),
    #[error("This implementation of COSE_Key only supports P-256")]
    UnsupportedCurve,
    #[error("This implementation of COSE_Key only supports EC2 keys")]
    UnsupportedKeyType,
    #[error("Could not reconstruct a point on the curve from the provided COSE_Key")]
    InvalidCoseKey,
}

impl From<CoseKey> for Value {
    fn from(key: CoseKey) -> Value {
        Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())),
            (Value::Integer((-1).into()), Value::Integer(1.into())),
            (Value::Integer((-2).into()), Value::Bytes(key.x)),
            (Value::Integer((-3).into()), Value::Bytes(key.y)),
        ])
    }
}

impl TryFrom<Value> for CoseKey {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let Value::Map(entries) = v else {
            return Err(Error::NotAMap(v));
        };
        let mut kty = None;
        let mut crv = None;
        let mut x = None;
        let mut y = None;
        for (label, value) in entries {
            let Value::Integer(label) = label else {
                continue;
            };
            match (i128::from(label), value) {
                (KTY, Value::Integer(i)) => kty = Some(i128::from(i)),
                (CRV, Value::Integer(i)) => crv = Some(i128::from(i)),
                (X, Value::Bytes(b)) => x = Some(b),
                (Y, Value::Bytes(b)) => y = Some(b),
                _ => {}
            }
        }
        if kty != Some(KTY_EC2) {
            return Err(Error::UnsupportedKeyType);
        }
        if crv != Some(CRV_P256) {
            return Err(Error::UnsupportedCurve);
        }
        Ok(CoseKey {
            x: x.ok_or(Error::EC2MissingX)?,
            y: y.ok_or(Error::EC2MissingY)?,
        })
    }
}

impl TryFrom<&CoseKey> for PublicKey {
    type Error = Error;

    fn try_from(key: &CoseKey) -> Result<Self, Error> {
        if key.x.len() != 32 || key.y.len() != 32 {
            return Err(Error::InvalidCoseKey);
        }
        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&key.x),
            FieldBytes::from_slice(&key.y),
            false,
        );
        Option::from(PublicKey::from_encoded_point(&point)).ok_or(Error::InvalidCoseKey)
    }
}

impl TryFrom<&PublicKey> for CoseKey {
    type Error = Error;

    fn try_from(key: &PublicKey) -> Result<Self, Error> {
        match key.to_encoded_point(false).coordinates() {
            Coordinates::Uncompressed { x, y } => Ok(CoseKey {
                x: x.to_vec(),
                y: y.to_vec(),
            }),
            _ => Err(Error::InvalidCoseKey),
        }
    }
}
