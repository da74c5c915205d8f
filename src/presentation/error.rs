use strum_macros::{AsRefStr, Display};

use crate::cbor::CborError;
use crate::definitions::session::Status as SessionStatus;
use crate::presentation::channel::TransportError;
use crate::presentation::engagement;
use crate::security;

/// Why a transfer session ended in error.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The user denied the app access to the radio.
    #[error("access to the transport is not authorized")]
    TransportUnauthorized,
    /// The device has no usable radio.
    #[error("the transport is not supported on this device")]
    TransportUnsupported,
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// No usable credential was provided at initialization.
    #[error("no valid credential was provided")]
    InvalidCredentialInput,
    /// The reassembled request is not a valid session establishment or device request.
    #[error("the request could not be decoded: {0}")]
    RequestDecodeFailed(String),
    #[error("session encryption has not been established")]
    SessionNotEstablished,
    #[error("the reader ephemeral key is missing")]
    ReaderKeyMissing,
    #[error("device engagement has not been performed")]
    EngagementMissing,
    #[error(transparent)]
    Engagement(#[from] engagement::Error),
    #[error("the user rejected the request")]
    UserRejected,
    /// Every requested document was unavailable, or every requested item was filtered out.
    #[error("no requested document can be disclosed")]
    NoDisclosableDocument,
    #[error("device authentication failed for '{doc_type}': {source}")]
    DeviceAuthFailed {
        doc_type: String,
        #[source]
        source: security::Error,
    },
    #[error("unable to decrypt session data: {0}")]
    DecryptFailed(#[source] security::Error),
    #[error("unable to encrypt session data: {0}")]
    EncryptFailed(#[source] security::Error),
    #[error("unable to encode the response: {0}")]
    Cbor(#[from] CborError),
}

/// Stable tag of a [TransferError], for hosts that branch on the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    TransportUnauthorized,
    TransportUnsupported,
    Transport,
    InvalidCredentialInput,
    RequestDecodeFailed,
    SessionNotEstablished,
    ReaderKeyMissing,
    EngagementMissing,
    Engagement,
    UserRejected,
    NoDisclosableDocument,
    DeviceAuthFailed,
    DecryptFailed,
    EncryptFailed,
    Cbor,
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::TransportUnauthorized => ErrorKind::TransportUnauthorized,
            TransferError::TransportUnsupported => ErrorKind::TransportUnsupported,
            TransferError::Transport(_) => ErrorKind::Transport,
            TransferError::InvalidCredentialInput => ErrorKind::InvalidCredentialInput,
            TransferError::RequestDecodeFailed(_) => ErrorKind::RequestDecodeFailed,
            TransferError::SessionNotEstablished => ErrorKind::SessionNotEstablished,
            TransferError::ReaderKeyMissing => ErrorKind::ReaderKeyMissing,
            TransferError::EngagementMissing => ErrorKind::EngagementMissing,
            TransferError::Engagement(_) => ErrorKind::Engagement,
            TransferError::UserRejected => ErrorKind::UserRejected,
            TransferError::NoDisclosableDocument => ErrorKind::NoDisclosableDocument,
            TransferError::DeviceAuthFailed { .. } => ErrorKind::DeviceAuthFailed,
            TransferError::DecryptFailed(_) => ErrorKind::DecryptFailed,
            TransferError::EncryptFailed(_) => ErrorKind::EncryptFailed,
            TransferError::Cbor(_) => ErrorKind::Cbor,
        }
    }

    /// Whether starting over with a fresh engagement can succeed. Bad input and a missing or
    /// forbidden radio fail again on every attempt.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            TransferError::InvalidCredentialInput
                | TransferError::TransportUnauthorized
                | TransferError::TransportUnsupported
        )
    }

    /// Status code owed to the reader when its request fails this way. `None` when the
    /// failure is not the reader's message.
    pub fn session_status(&self) -> Option<SessionStatus> {
        match self {
            TransferError::RequestDecodeFailed(_) => Some(SessionStatus::CborDecodingError),
            TransferError::SessionNotEstablished
            | TransferError::ReaderKeyMissing
            | TransferError::EngagementMissing
            | TransferError::DecryptFailed(_) => Some(SessionStatus::SessionEncryptionError),
            _ => None,
        }
    }
}
