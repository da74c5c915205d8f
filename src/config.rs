//! What a transfer session is initialized with: the holder's credentials, the reader
//! trust anchors and tuning knobs.
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cbor;
use crate::definitions::IssuerSigned;
use crate::presentation::channel::MAX_UPDATE_LEN;
use crate::security::{trust_anchor, DeviceAuthMethod, DevicePrivateKey, TrustAnchorRegistry};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to read transfer info: {0}")]
    Io(#[from] std::io::Error),
    #[error("transfer info is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document '{id}': {reason}")]
    Document { id: String, reason: String },
    #[error(transparent)]
    TrustAnchor(#[from] trust_anchor::Error),
}

/// Session tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferConfig {
    /// Largest notification to send, header included. Clamped to the transport's limit.
    pub max_fragment_size: usize,
    pub device_auth_method: DeviceAuthMethod,
    /// Return to `Initialized` after an error instead of staying in `Error`.
    pub auto_recover: bool,
    /// Seconds without reader activity before the host should post an idle timeout.
    pub idle_timeout_secs: u64,
    /// Accept events without acting on them, for UI previews.
    pub preview: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_fragment_size: MAX_UPDATE_LEN,
            device_auth_method: DeviceAuthMethod::default(),
            auto_recover: false,
            idle_timeout_secs: 60,
            preview: false,
        }
    }
}

impl TransferConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// A document held in the wallet.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: String,
    pub doc_type: String,
    pub issuer_signed: IssuerSigned,
    pub private_key: DevicePrivateKey,
    /// Opaque data needed to unlock a hardware-backed key.
    pub unlock_data: Option<Vec<u8>>,
    pub display_name: Option<String>,
    /// Human readable element names, by namespace then element identifier.
    pub element_names: BTreeMap<String, BTreeMap<String, String>>,
}

/// Credentials by document id.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    credentials: BTreeMap<String, Credential>,
}

impl CredentialStore {
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Self {
        Self {
            credentials: credentials.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Credential> {
        self.credentials.get(id)
    }

    /// The first credential, by document id, of `doc_type`.
    pub fn first_of_type(&self, doc_type: &str) -> Option<&Credential> {
        self.credentials.values().find(|c| c.doc_type == doc_type)
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.credentials.values()
    }
}

/// Everything a transfer session is initialized with.
#[derive(Debug, Clone, Default)]
pub struct TransferInfo {
    pub credentials: Arc<CredentialStore>,
    pub trust_anchors: Arc<TrustAnchorRegistry>,
    pub config: TransferConfig,
}

/// On-disk form of [TransferInfo].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferInfoFile {
    pub documents: BTreeMap<String, DocumentFile>,
    #[serde(default)]
    pub trust_anchors: Vec<String>,
    #[serde(default)]
    pub config: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFile {
    pub doc_type: String,
    /// Base64 CBOR `IssuerSigned`.
    pub issuer_signed: String,
    /// Base64 SEC1 DER, or raw scalar, of the device key.
    pub device_private_key: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub element_names: BTreeMap<String, BTreeMap<String, String>>,
}

impl DocumentFile {
    fn into_credential(self, id: String) -> Result<Credential, Error> {
        let invalid = |reason: String| Error::Document {
            id: id.clone(),
            reason,
        };
        let issuer_signed = base64::decode(&self.issuer_signed)
            .map_err(|e| invalid(format!("issuerSigned is not base64: {e}")))?;
        let issuer_signed: IssuerSigned = cbor::from_slice(&issuer_signed)
            .map_err(|e| invalid(format!("issuerSigned is not valid: {e}")))?;
        let key = base64::decode(&self.device_private_key)
            .map_err(|e| invalid(format!("devicePrivateKey is not base64: {e}")))?;
        let private_key =
            DevicePrivateKey::from_bytes(&key).map_err(|e| invalid(e.to_string()))?;
        Ok(Credential {
            id,
            doc_type: self.doc_type,
            issuer_signed,
            private_key,
            unlock_data: None,
            display_name: self.display_name,
            element_names: self.element_names,
        })
    }
}

impl TryFrom<TransferInfoFile> for TransferInfo {
    type Error = Error;

    fn try_from(file: TransferInfoFile) -> Result<Self, Error> {
        let credentials = file
            .documents
            .into_iter()
            .map(|(id, document)| document.into_credential(id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TransferInfo {
            credentials: Arc::new(CredentialStore::new(credentials)),
            trust_anchors: Arc::new(TrustAnchorRegistry::from_pem_certificates(
                file.trust_anchors.as_slice(),
            )?),
            config: file.config,
        })
    }
}

impl TransferInfo {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str::<TransferInfoFile>(json)?.try_into()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}
