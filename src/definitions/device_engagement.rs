//! This module contains the definitions for the [DeviceEngagement] struct and related types.
//!
//! The holder publishes a [DeviceEngagement] (usually as a QR code) carrying its ephemeral
//! public key and the BLE service the reader must connect to.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cbor;
use crate::definitions::cose_key::CoseKey;
use crate::definitions::helpers::{NonEmptyVec, Tag24};

pub type EDeviceKeyBytes = Tag24<CoseKey>;
pub type EReaderKeyBytes = Tag24<CoseKey>;
pub type DeviceRetrievalMethods = NonEmptyVec<DeviceRetrievalMethod>;

/// URI scheme of a QR engagement.
pub const QR_URI_PREFIX: &str = "mdoc:";

const BLE_TRANSPORT: i128 = 2;
const RETRIEVAL_VERSION: i128 = 1;

/// Errors that can occur when deserialising a DeviceEngagement.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("unsupported device engagement version, expected 1.0")]
    UnsupportedVersion,
    #[error("Unsupported device retrieval method")]
    UnsupportedDRM,
    #[error("Invalid DeviceEngagement found")]
    InvalidDeviceEngagement,
    #[error("Malformed object not recognised")]
    Malformed,
    #[error("QR code does not start with '{QR_URI_PREFIX}'")]
    InvalidQrPrefix,
    #[error("QR code payload is not base64url: {0}")]
    InvalidQrEncoding(String),
    #[error("Something went wrong parsing a tag24: {0}")]
    Tag24Error(String),
}

/// Represents a device engagement.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "ciborium::Value", into = "ciborium::Value")]
pub struct DeviceEngagement {
    pub version: String,
    pub security: Security,
    pub device_retrieval_methods: Option<DeviceRetrievalMethods>,
}

/// Cipher suite identifier and the ephemeral device key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Security(pub u64, pub EDeviceKeyBytes);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceRetrievalMethod {
    BLE(BleOptions),
}

/// Represents the options for `Bluetooth Low Energy` (BLE) device engagement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BleOptions {
    /// Service UUID when the holder acts as the GATT server.
    pub peripheral_server_mode: Option<Uuid>,
    /// Service UUID when the holder acts as the GATT client.
    pub central_client_mode: Option<Uuid>,
}

impl DeviceEngagement {
    /// Engagement for a holder acting as a BLE peripheral advertising `service`.
    pub fn ble_peripheral(e_device_key: EDeviceKeyBytes, service: Uuid) -> Self {
        DeviceEngagement {
            version: "1.0".into(),
            security: Security(1, e_device_key),
            device_retrieval_methods: Some(NonEmptyVec::new(DeviceRetrievalMethod::BLE(
                BleOptions {
                    peripheral_server_mode: Some(service),
                    central_client_mode: None,
                },
            ))),
        }
    }

    /// The peripheral service UUID advertised by the holder, if any.
    pub fn peripheral_service(&self) -> Option<Uuid> {
        self.device_retrieval_methods
            .iter()
            .flat_map(|methods| methods.iter())
            .find_map(|method| match method {
                DeviceRetrievalMethod::BLE(options) => options.peripheral_server_mode,
            })
    }
}

fn integer_keyed(entries: Vec<(ciborium::Value, ciborium::Value)>) -> Result<BTreeMap<i128, ciborium::Value>, Error> {
    entries
        .into_iter()
        .map(|(k, v)| {
            let k = k.as_integer().ok_or(Error::Malformed)?;
            Ok((i128::from(k), v))
        })
        .collect()
}

fn uuid_from(value: Option<ciborium::Value>) -> Result<Option<Uuid>, Error> {
    match value {
        None => Ok(None),
        Some(ciborium::Value::Bytes(bytes)) => {
            let bytes: [u8; 16] = bytes.try_into().map_err(|_| Error::Malformed)?;
            Ok(Some(Uuid::from_bytes(bytes)))
        }
        Some(_) => Err(Error::Malformed),
    }
}

impl From<DeviceEngagement> for ciborium::Value {
    fn from(device_engagement: DeviceEngagement) -> ciborium::Value {
        let Security(cipher_suite, key) = device_engagement.security;
        let mut map = vec![
            (
                ciborium::Value::Integer(0.into()),
                ciborium::Value::Text(device_engagement.version),
            ),
            (
                ciborium::Value::Integer(1.into()),
                ciborium::Value::Array(vec![
                    ciborium::Value::Integer(cipher_suite.into()),
                    ciborium::Value::from(&key),
                ]),
            ),
        ];
        if let Some(methods) = device_engagement.device_retrieval_methods {
            let methods = methods.into_iter().map(ciborium::Value::from).collect();
            map.push((
                ciborium::Value::Integer(2.into()),
                ciborium::Value::Array(methods),
            ));
        }
        ciborium::Value::Map(map)
    }
}

impl TryFrom<ciborium::Value> for DeviceEngagement {
    type Error = Error;

    fn try_from(v: ciborium::Value) -> Result<Self, Error> {
        let ciborium::Value::Map(map) = v else {
            return Err(Error::InvalidDeviceEngagement);
        };
        let mut map = integer_keyed(map)?;
        match map.remove(&0) {
            Some(ciborium::Value::Text(v)) if v == "1.0" => {}
            Some(ciborium::Value::Text(_)) => return Err(Error::UnsupportedVersion),
            _ => return Err(Error::Malformed),
        }
        let security: Security = map
            .remove(&1)
            .map(cbor::from_value)
            .transpose()
            .map_err(|_| Error::Malformed)?
            .ok_or(Error::Malformed)?;

        let device_retrieval_methods = match map.remove(&2) {
            Some(ciborium::Value::Array(methods)) => {
                let methods = methods
                    .into_iter()
                    .map(DeviceRetrievalMethod::try_from)
                    .collect::<Result<Vec<_>, Error>>()?;
                Some(NonEmptyVec::try_from(methods).map_err(|_| Error::Malformed)?)
            }
            Some(_) => return Err(Error::Malformed),
            None => None,
        };

        Ok(DeviceEngagement {
            version: "1.0".into(),
            security,
            device_retrieval_methods,
        })
    }
}

impl From<DeviceRetrievalMethod> for ciborium::Value {
    fn from(drm: DeviceRetrievalMethod) -> Self {
        let DeviceRetrievalMethod::BLE(options) = drm;
        let mut map = vec![
            (
                ciborium::Value::Integer(0.into()),
                ciborium::Value::Bool(options.peripheral_server_mode.is_some()),
            ),
            (
                ciborium::Value::Integer(1.into()),
                ciborium::Value::Bool(options.central_client_mode.is_some()),
            ),
        ];
        if let Some(uuid) = options.peripheral_server_mode {
            map.push((
                ciborium::Value::Integer(10.into()),
                ciborium::Value::Bytes(uuid.as_bytes().to_vec()),
            ));
        }
        if let Some(uuid) = options.central_client_mode {
            map.push((
                ciborium::Value::Integer(11.into()),
                ciborium::Value::Bytes(uuid.as_bytes().to_vec()),
            ));
        }
        ciborium::Value::Array(vec![
            ciborium::Value::Integer(2.into()),
            ciborium::Value::Integer(1.into()),
            ciborium::Value::Map(map),
        ])
    }
}

impl TryFrom<ciborium::Value> for DeviceRetrievalMethod {
    type Error = Error;

    fn try_from(value: ciborium::Value) -> Result<Self, Error> {
        let ciborium::Value::Array(list) = value else {
            return Err(Error::Malformed);
        };
        let mut list = list.into_iter();
        let (Some(transport), Some(version), Some(options)) = (list.next(), list.next(), list.next())
        else {
            return Err(Error::Malformed);
        };
        let transport = transport.as_integer().map(i128::from);
        let version = version.as_integer().map(i128::from);
        if transport != Some(BLE_TRANSPORT) {
            return Err(Error::UnsupportedDRM);
        }
        if version != Some(RETRIEVAL_VERSION) {
            return Err(Error::Malformed);
        }
        let ciborium::Value::Map(options) = options else {
            return Err(Error::Malformed);
        };
        let mut options = integer_keyed(options)?;
        let peripheral = matches!(options.remove(&0), Some(ciborium::Value::Bool(true)));
        let central = matches!(options.remove(&1), Some(ciborium::Value::Bool(true)));
        let peripheral_uuid = uuid_from(options.remove(&10))?;
        let central_uuid = uuid_from(options.remove(&11))?;
        Ok(DeviceRetrievalMethod::BLE(BleOptions {
            peripheral_server_mode: peripheral_uuid.filter(|_| peripheral),
            central_client_mode: central_uuid.filter(|_| central),
        }))
    }
}

impl Tag24<DeviceEngagement> {
    pub fn to_qr_code_uri(&self) -> String {
        let mut qr_code_uri = String::from(QR_URI_PREFIX);
        base64::encode_config_buf(&self.inner_bytes, base64::URL_SAFE_NO_PAD, &mut qr_code_uri);
        qr_code_uri
    }

    pub fn from_qr_code_uri(qr_code_uri: &str) -> Result<Self, Error> {
        let encoded_de = qr_code_uri
            .strip_prefix(QR_URI_PREFIX)
            .ok_or(Error::InvalidQrPrefix)?;
        let decoded_de = base64::decode_config(encoded_de, base64::URL_SAFE_NO_PAD)
            .map_err(|e| Error::InvalidQrEncoding(e.to_string()))?;
        Tag24::from_bytes(decoded_de).map_err(|e| Error::Tag24Error(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::OsRng;

    fn engagement() -> Tag24<DeviceEngagement> {
        let public = p256::SecretKey::random(&mut OsRng).public_key();
        let key = Tag24::new(CoseKey::try_from(&public).unwrap()).unwrap();
        Tag24::new(DeviceEngagement::ble_peripheral(key, Uuid::new_v4())).unwrap()
    }

    #[test]
    fn qr_code_roundtrip() {
        let original = engagement();
        let uri = original.to_qr_code_uri();
        assert!(uri.starts_with("mdoc:"));
        let parsed = Tag24::<DeviceEngagement>::from_qr_code_uri(&uri).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(
            parsed.as_ref().peripheral_service(),
            original.as_ref().peripheral_service()
        );
    }

    #[test]
    fn wrong_scheme() {
        assert_eq!(
            Tag24::<DeviceEngagement>::from_qr_code_uri("https://example.com").unwrap_err(),
            Error::InvalidQrPrefix
        );
    }

    #[test]
    fn unsupported_version() {
        let value = ciborium::Value::Map(vec![(
            ciborium::Value::Integer(0.into()),
            ciborium::Value::Text("2.0".into()),
        )]);
        assert_eq!(
            DeviceEngagement::try_from(value).unwrap_err(),
            Error::UnsupportedVersion
        );
    }
}
