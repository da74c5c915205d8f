//! Cryptographic seams of a presentation.
//!
//! The transfer session never touches keys directly: it asks a [SecurityProvider] to derive
//! session keys, to authenticate each returned document, and to judge the reader's signature.
//! [IsoSecurityProvider] implements these with the ISO/IEC 18013-5 cipher suite 1.
use std::fmt;

use async_trait::async_trait;
use coset::CoseSign1;
use p256::SecretKey;
use serde::{Deserialize, Serialize};

use crate::cbor::CborError;
use crate::definitions::device_request::ItemsRequestBytes;
use crate::definitions::{CoseKey, DeviceAuth, SessionEstablishment, SessionTranscript};
use crate::definitions::session::{self, Handover};
use crate::presentation::engagement::Engagement;

pub mod iso;
pub mod trust_anchor;

pub use iso::IsoSecurityProvider;
pub use trust_anchor::TrustAnchorRegistry;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the reader ephemeral key is missing")]
    ReaderKeyMissing,
    #[error("the reader ephemeral key is not a usable P-256 key: {0}")]
    InvalidReaderKey(String),
    #[error("session cryptography failed: {0}")]
    Session(#[from] session::Error),
    #[error("device authentication could not be produced: {0}")]
    DeviceAuth(String),
    #[error(transparent)]
    Cbor(#[from] CborError),
}

/// How each document proves possession of its device key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceAuthMethod {
    #[default]
    DeviceMac,
    DeviceSignature,
}

/// The long-lived P-256 key bound to a credential by its issuer.
#[derive(Clone)]
pub struct DevicePrivateKey(SecretKey);

impl DevicePrivateKey {
    pub fn new(key: SecretKey) -> Self {
        Self(key)
    }

    /// Parse a SEC1 DER or raw 32-byte scalar encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        SecretKey::from_sec1_der(bytes)
            .or_else(|_| SecretKey::from_slice(bytes))
            .map(Self)
            .map_err(|e| Error::DeviceAuth(format!("invalid device key: {e}")))
    }

    pub fn secret(&self) -> &SecretKey {
        &self.0
    }
}

impl fmt::Debug for DevicePrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DevicePrivateKey(..)")
    }
}

/// Established per-session encryption, as seen from the holder.
///
/// Encrypts holder-to-reader messages and decrypts reader-to-holder messages, each direction
/// with its own key and counter.
pub trait SessionEncryption: Send + Sync {
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error>;
    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error>;
    fn transcript(&self) -> &SessionTranscript;
    fn reader_key(&self) -> &CoseKey;
}

/// Everything needed to authenticate one returned document.
pub struct DeviceAuthRequest<'a> {
    pub doc_type: &'a str,
    pub transcript: &'a SessionTranscript,
    pub reader_key: &'a CoseKey,
    pub device_key: &'a DevicePrivateKey,
    pub method: DeviceAuthMethod,
    /// Opaque data used to unlock a hardware-backed key.
    pub unlock_data: Option<&'a [u8]>,
}

/// Reader authentication material found in a doc request.
pub struct ReaderAuthInput<'a> {
    pub reader_auth: &'a CoseSign1,
    /// DER certificates, leaf first.
    pub x5chain: Vec<Vec<u8>>,
    pub items_request: &'a ItemsRequestBytes,
    pub transcript: &'a SessionTranscript,
}

/// Outcome of reader authentication, surfaced to the consent prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderAuthOutcome {
    pub validated: bool,
    /// Issuer of the reader certificate, when one could be parsed.
    pub certificate_issuer: Option<String>,
    /// Subject of the reader certificate, standing in for the reader's legal name.
    pub certificate_subject: Option<String>,
    /// Why validation failed.
    pub message: Option<String>,
}

#[async_trait]
pub trait SecurityProvider: Send + Sync {
    async fn derive_session_keys(
        &self,
        establishment: &SessionEstablishment,
        engagement: &Engagement,
        handover: &Handover,
    ) -> Result<Box<dyn SessionEncryption>, Error>;

    async fn build_device_auth(&self, request: DeviceAuthRequest<'_>) -> Result<DeviceAuth, Error>;

    async fn validate_reader_auth(
        &self,
        input: ReaderAuthInput<'_>,
        trust_anchors: &TrustAnchorRegistry,
    ) -> ReaderAuthOutcome;
}

impl ReaderAuthOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            validated: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }
}
