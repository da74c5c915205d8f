//! This module contains the definitions related to device signing.
use std::collections::BTreeMap;

use coset::{CoseMac0, CoseSign1};
use serde::{Deserialize, Serialize};

use crate::cbor::Value;
use crate::cose::CoseValue;
use crate::definitions::{
    helpers::{NonEmptyMap, Tag24},
    session::SessionTranscript,
};

/// Represents a device-signed structure.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSigned {
    #[serde(rename = "nameSpaces")]
    pub namespaces: DeviceNamespacesBytes,
    pub device_auth: DeviceAuth,
}

pub type DeviceNamespacesBytes = Tag24<DeviceNamespaces>;
pub type DeviceNamespaces = BTreeMap<String, DeviceSignedItems>;
pub type DeviceSignedItems = NonEmptyMap<String, Value>;

/// Proof of possession of the device key, over a detached [DeviceAuthentication] payload.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceAuth {
    DeviceSignature(CoseValue<CoseSign1>),
    DeviceMac(CoseValue<CoseMac0>),
}

pub type DeviceAuthenticationBytes = Tag24<DeviceAuthentication>;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeviceAuthentication(
    pub String,
    pub SessionTranscript,
    pub String,
    pub DeviceNamespacesBytes,
);

impl DeviceAuthentication {
    pub fn new(
        transcript: SessionTranscript,
        doc_type: String,
        namespaces_bytes: DeviceNamespacesBytes,
    ) -> Self {
        Self(
            "DeviceAuthentication".into(),
            transcript,
            doc_type,
            namespaces_bytes,
        )
    }
}
