//! The single place where session cryptography meets the transfer session.
use crate::definitions::{CoseKey, SessionTranscript};
use crate::presentation::error::TransferError;
use crate::security::SessionEncryption;

/// Holds the session encryption once the reader's key has been received.
#[derive(Default)]
pub struct EncryptionGateway {
    session: Option<Box<dyn SessionEncryption>>,
}

impl EncryptionGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, session: Box<dyn SessionEncryption>) {
        self.session = Some(session);
    }

    pub fn is_established(&self) -> bool {
        self.session.is_some()
    }

    /// Drop the session keys.
    pub fn clear(&mut self) {
        self.session = None;
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, TransferError> {
        self.session
            .as_mut()
            .ok_or(TransferError::SessionNotEstablished)?
            .encrypt(plaintext)
            .map_err(TransferError::EncryptFailed)
    }

    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, TransferError> {
        self.session
            .as_mut()
            .ok_or(TransferError::SessionNotEstablished)?
            .decrypt(ciphertext)
            .map_err(TransferError::DecryptFailed)
    }

    pub fn transcript(&self) -> Result<&SessionTranscript, TransferError> {
        self.session
            .as_ref()
            .map(|s| s.transcript())
            .ok_or(TransferError::SessionNotEstablished)
    }

    pub fn reader_key(&self) -> Result<&CoseKey, TransferError> {
        self.session
            .as_ref()
            .map(|s| s.reader_key())
            .ok_or(TransferError::SessionNotEstablished)
    }
}

impl std::fmt::Debug for EncryptionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionGateway")
            .field("established", &self.is_established())
            .finish()
    }
}
