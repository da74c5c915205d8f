//! ISO/IEC 18013-5 mobile document presentation, holder side, over proximity transports.
//!
//! The crate covers the transfer session itself: engagement, the fragmented request/response
//! exchange, session encryption and selective disclosure of the holder's issuer-signed data.
//! The radio is abstracted behind [presentation::Transport] and cryptography behind
//! [security::SecurityProvider], with [security::IsoSecurityProvider] as the default.
//!
//! ```ignore
//! use std::sync::Arc;
//! use mdoc_transfer::config::TransferInfo;
//! use mdoc_transfer::presentation::{Event, SessionHandle, TransferSession};
//! use mdoc_transfer::security::IsoSecurityProvider;
//!
//! let info = TransferInfo::from_path("transfer.json")?;
//! let session = TransferSession::new(info, transport, Arc::new(IsoSecurityProvider), delegate);
//! let handle = SessionHandle::spawn(session);
//! handle.post(Event::Initialize)?;
//! ```
pub mod cbor;
pub mod config;
pub mod cose;
pub mod definitions;
pub mod presentation;
pub mod security;

pub use config::{Credential, CredentialStore, TransferConfig, TransferInfo};
