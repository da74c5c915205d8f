use std::collections::BTreeMap;

use coset::CoseSign1;
use serde::{Deserialize, Serialize};

use crate::cbor::Value;
use crate::cose::CoseValue;
use crate::definitions::helpers::{NonEmptyMap, NonEmptyVec, Tag24};
use crate::definitions::session::SessionTranscript;

pub type ItemsRequestBytes = Tag24<ItemsRequest>;
pub type DocType = String;
pub type NameSpace = String;
pub type IntentToRetain = bool;
pub type DataElementIdentifier = String;
pub type DataElements = NonEmptyMap<DataElementIdentifier, IntentToRetain>;
pub type Namespaces = NonEmptyMap<NameSpace, DataElements>;
pub type ReaderAuth = CoseValue<CoseSign1>;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest {
    pub version: String,
    pub doc_requests: NonEmptyVec<DocRequest>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocRequest {
    pub items_request: ItemsRequestBytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_auth: Option<ReaderAuth>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemsRequest {
    pub doc_type: DocType,
    #[serde(rename = "nameSpaces")]
    pub namespaces: Namespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_info: Option<BTreeMap<String, Value>>,
}

/// Detached payload of the reader authentication signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaderAuthentication(pub String, pub SessionTranscript, pub ItemsRequestBytes);

impl DeviceRequest {
    pub const VERSION: &'static str = "1.0";
}

impl ReaderAuthentication {
    pub fn new(transcript: SessionTranscript, items_request: ItemsRequestBytes) -> Self {
        ReaderAuthentication("ReaderAuthentication".into(), transcript, items_request)
    }
}
