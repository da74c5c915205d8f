//! Session establishment messages and the session encryption primitives of ISO/IEC 18013-5 §9.1.1.
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use hkdf::Hkdf;
use p256::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cbor::Value;
use crate::definitions::device_engagement::{DeviceEngagement, EReaderKeyBytes};
use crate::definitions::helpers::{ByteStr, Tag24};

pub type DeviceEngagementBytes = Tag24<DeviceEngagement>;

/// First message from the reader: its ephemeral key and the encrypted request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEstablishment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_reader_key: Option<EReaderKeyBytes>,
    pub data: ByteStr,
}

/// Every message after [SessionEstablishment], in both directions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ByteStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "u64", into = "u64")]
pub enum Status {
    SessionEncryptionError,
    CborDecodingError,
    SessionTermination,
}

/// Binds the session keys and authentication structures to this particular engagement.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionTranscript(
    pub DeviceEngagementBytes,
    pub EReaderKeyBytes,
    pub Handover,
);

/// How the engagement reached the reader. Only QR engagement is supported, which carries no handover data.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Value", into = "Value")]
pub enum Handover {
    #[default]
    Qr,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("unrecognised session status code: {0}")]
    UnknownStatus(u64),
    #[error("handover must be null for QR engagement")]
    UnsupportedHandover,
    #[error("unable to encode session transcript: {0}")]
    Transcript(String),
    #[error("key derivation produced an invalid length")]
    KeyDerivation,
    #[error("message counter exhausted")]
    CounterExhausted,
    #[error("AES-GCM encryption failed")]
    Encryption,
    #[error("AES-GCM decryption failed")]
    Decryption,
}

/// Which party produced a message; selects the IV identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Party {
    Reader,
    Device,
}

impl Party {
    fn identifier(self) -> [u8; 8] {
        match self {
            Party::Reader => [0, 0, 0, 0, 0, 0, 0, 0],
            Party::Device => [0, 0, 0, 0, 0, 0, 0, 1],
        }
    }

    fn key_info(self) -> &'static [u8] {
        match self {
            Party::Reader => b"SKReader",
            Party::Device => b"SKDevice",
        }
    }
}

/// A 256-bit session key for one direction, with its message counter.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; 32],
    #[zeroize(skip)]
    party: Party,
    #[zeroize(skip)]
    counter: u32,
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("party", &self.party)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

impl From<Status> for u64 {
    fn from(s: Status) -> u64 {
        match s {
            Status::SessionEncryptionError => 10,
            Status::CborDecodingError => 11,
            Status::SessionTermination => 20,
        }
    }
}

impl TryFrom<u64> for Status {
    type Error = Error;

    fn try_from(n: u64) -> Result<Status, Error> {
        match n {
            10 => Ok(Status::SessionEncryptionError),
            11 => Ok(Status::CborDecodingError),
            20 => Ok(Status::SessionTermination),
            _ => Err(Error::UnknownStatus(n)),
        }
    }
}

impl From<Handover> for Value {
    fn from(_: Handover) -> Value {
        Value::Null
    }
}

impl TryFrom<Value> for Handover {
    type Error = Error;

    fn try_from(v: Value) -> Result<Handover, Error> {
        match v {
            Value::Null => Ok(Handover::Qr),
            _ => Err(Error::UnsupportedHandover),
        }
    }
}

impl SessionData {
    pub fn encrypted(data: Vec<u8>) -> Self {
        SessionData {
            data: Some(data.into()),
            status: None,
        }
    }

    /// A message carrying only `status`, sent in the clear.
    pub fn status_only(status: Status) -> Self {
        SessionData {
            data: None,
            status: Some(status),
        }
    }

    pub fn termination() -> Self {
        Self::status_only(Status::SessionTermination)
    }
}

impl SessionTranscript {
    /// `SessionTranscriptBytes`: the transcript wrapped in tag 24, as hashed into the salt.
    pub fn to_tagged_bytes(&self) -> Result<Vec<u8>, Error> {
        Tag24::new(self.clone())
            .and_then(|t| t.to_tagged_bytes())
            .map_err(|e| Error::Transcript(e.to_string()))
    }
}

impl SessionKey {
    pub fn party(&self) -> Party {
        self.party
    }

    fn next_nonce(&mut self) -> Result<[u8; 12], Error> {
        self.counter = self.counter.checked_add(1).ok_or(Error::CounterExhausted)?;
        let mut nonce = [0u8; 12];
        nonce[..8].copy_from_slice(&self.party.identifier());
        nonce[8..].copy_from_slice(&self.counter.to_be_bytes());
        Ok(nonce)
    }

    /// Encrypt the next message from this key's party.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = self.next_nonce()?;
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Encryption)
    }

    /// Decrypt the next message sent by this key's party.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = self.next_nonce()?;
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| Error::Decryption)
    }
}

/// ECDH between a local private key and the other party's public key.
pub fn shared_secret(secret: &SecretKey, public: &PublicKey) -> Vec<u8> {
    p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine())
        .raw_secret_bytes()
        .to_vec()
}

fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; 32], Error> {
    let mut okm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, &mut okm)
        .map_err(|_| Error::KeyDerivation)?;
    Ok(okm)
}

/// Derive `SKReader` or `SKDevice` from the ECDH shared secret.
pub fn derive_session_key(
    shared_secret: &[u8],
    transcript: &SessionTranscript,
    party: Party,
) -> Result<SessionKey, Error> {
    let salt = Sha256::digest(transcript.to_tagged_bytes()?);
    let key = hkdf_sha256(shared_secret, &salt, party.key_info())?;
    Ok(SessionKey {
        key,
        party,
        counter: 0,
    })
}

/// Derive `EMacKey` for MAC-based device authentication.
pub fn derive_e_mac_key(
    device_key: &SecretKey,
    e_reader_key: &PublicKey,
    transcript: &SessionTranscript,
) -> Result<[u8; 32], Error> {
    let salt = Sha256::digest(transcript.to_tagged_bytes()?);
    hkdf_sha256(&shared_secret(device_key, e_reader_key), &salt, b"EMacKey")
}

/// The BLE ident characteristic value derived from `EDeviceKeyBytes`.
pub fn derive_ble_ident(e_device_key_bytes: &[u8]) -> Result<[u8; 16], Error> {
    let mut ident = [0u8; 16];
    Hkdf::<Sha256>::new(None, e_device_key_bytes)
        .expand(b"BLEIdent", &mut ident)
        .map_err(|_| Error::KeyDerivation)?;
    Ok(ident)
}
