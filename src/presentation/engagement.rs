//! The holder's ephemeral key pair and the device engagement published with it.
use std::fmt;

use p256::SecretKey;
use rand::rngs::OsRng;
use uuid::Uuid;

use crate::definitions::device_engagement::DeviceEngagement;
use crate::definitions::helpers::Tag24;
use crate::definitions::session::{self, DeviceEngagementBytes};
use crate::definitions::CoseKey;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to encode the ephemeral device key: {0}")]
    Key(String),
    #[error("unable to encode the device engagement: {0}")]
    Encoding(String),
    #[error(transparent)]
    Session(#[from] session::Error),
}

/// Created when the transport becomes ready, dropped (and zeroized) on teardown.
pub struct Engagement {
    secret: SecretKey,
    device_engagement: DeviceEngagementBytes,
    service: Uuid,
}

impl Engagement {
    /// Fresh ephemeral key, fresh peripheral service UUID.
    pub fn generate() -> Result<Self, Error> {
        let secret = SecretKey::random(&mut OsRng);
        let e_device_key = CoseKey::try_from(&secret.public_key())
            .map_err(|e| Error::Key(e.to_string()))?;
        let e_device_key = Tag24::new(e_device_key).map_err(|e| Error::Key(e.to_string()))?;
        let service = Uuid::new_v4();
        let device_engagement = Tag24::new(DeviceEngagement::ble_peripheral(e_device_key, service))
            .map_err(|e| Error::Encoding(e.to_string()))?;
        Ok(Self {
            secret,
            device_engagement,
            service,
        })
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn device_engagement(&self) -> &DeviceEngagementBytes {
        &self.device_engagement
    }

    /// The GATT service the reader connects to.
    pub fn service_uuid(&self) -> Uuid {
        self.service
    }

    /// Contents of the QR code to display.
    pub fn qr_code_uri(&self) -> String {
        self.device_engagement.to_qr_code_uri()
    }

    /// Value of the ident characteristic, letting the reader confirm it reached the right holder.
    pub fn ble_ident(&self) -> Result<[u8; 16], Error> {
        let e_device_key = &self.device_engagement.as_ref().security.1;
        let bytes = e_device_key
            .to_tagged_bytes()
            .map_err(|e| Error::Key(e.to_string()))?;
        Ok(session::derive_ble_ident(&bytes)?)
    }
}

impl fmt::Debug for Engagement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engagement")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}
