//! This module contains the definition of the [IssuerSigned] struct and related types.
//!
//! The holder never re-signs issuer data: items are disclosed by copying their original
//! [IssuerSignedItemBytes], so the digests in the issuer's mobile security object still match.
use coset::CoseSign1;
use serde::{Deserialize, Serialize};

use crate::cbor::Value;
use crate::cose::CoseValue;
use crate::definitions::helpers::{ByteStr, NonEmptyMap, NonEmptyVec, Tag24};

pub type DigestId = u64;

/// Represents an issuer-signed object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSigned {
    #[serde(skip_serializing_if = "Option::is_none", rename = "nameSpaces")]
    pub namespaces: Option<IssuerNamespaces>,
    pub issuer_auth: CoseValue<CoseSign1>,
}

pub type IssuerNamespaces = NonEmptyMap<String, NonEmptyVec<IssuerSignedItemBytes>>;
pub type IssuerSignedItemBytes = Tag24<IssuerSignedItem>;

/// Represents an item signed by the issuer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSignedItem {
    #[serde(rename = "digestID")]
    pub digest_id: DigestId,

    /// Random salt hashed together with the element.
    pub random: ByteStr,

    pub element_identifier: String,

    pub element_value: Value,
}

impl IssuerSigned {
    /// The signed items held for `namespace`, in issuer order.
    pub fn items(&self, namespace: &str) -> &[IssuerSignedItemBytes] {
        self.namespaces
            .as_ref()
            .and_then(|namespaces| namespaces.get(namespace))
            .map(|items| items.as_ref())
            .unwrap_or_default()
    }

    /// Element identifiers held per namespace.
    pub fn element_identifiers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.namespaces
            .iter()
            .flat_map(|namespaces| namespaces.iter())
            .flat_map(|(namespace, items)| {
                items
                    .iter()
                    .map(move |item| (namespace.as_str(), item.as_ref().element_identifier.as_str()))
            })
    }
}
