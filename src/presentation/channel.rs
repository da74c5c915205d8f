//! The GATT peripheral the holder exposes to the reader, abstracted away from any BLE stack.
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter};
use uuid::Uuid;

/// Largest update a BLE characteristic can carry, header included.
pub const MAX_UPDATE_LEN: usize = 512;

/// State characteristic value: the reader starts a transaction.
pub const START: u8 = 0x01;
/// State characteristic value: the reader ends the session.
pub const END: u8 = 0x02;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Characteristic {
    State,
    Client2Server,
    Server2Client,
}

impl Characteristic {
    pub const STATE: Uuid = Uuid::from_u128(0x00000001_a123_48ce_896b_4c76973373e6);
    pub const CLIENT_2_SERVER: Uuid = Uuid::from_u128(0x00000002_a123_48ce_896b_4c76973373e6);
    pub const SERVER_2_CLIENT: Uuid = Uuid::from_u128(0x00000003_a123_48ce_896b_4c76973373e6);

    pub fn uuid(self) -> Uuid {
        match self {
            Characteristic::State => Self::STATE,
            Characteristic::Client2Server => Self::CLIENT_2_SERVER,
            Characteristic::Server2Client => Self::SERVER_2_CLIENT,
        }
    }

    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Characteristic::iter().find(|c| c.uuid() == *uuid)
    }

    /// Characteristics the reader subscribes to for notifications.
    pub fn is_notifying(self) -> bool {
        matches!(self, Characteristic::State | Characteristic::Server2Client)
    }
}

/// Power and permission state of the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum TransportState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    Ready,
}

/// Answer to a reader's write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum ChannelAck {
    Success,
    Rejected,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("unable to advertise service {service}: {reason}")]
    Advertise { service: Uuid, reason: String },
}

/// A GATT server hosting the transfer service.
///
/// Implementations translate the platform's callbacks into
/// [Event](crate::presentation::status::Event)s and post them to the session.
pub trait Transport: Send + Sync {
    fn state(&self) -> TransportState;

    fn start_advertising(&mut self, service: Uuid) -> Result<(), TransportError>;

    fn stop_advertising(&mut self);

    /// Push `value` to subscribers of `characteristic`.
    ///
    /// Returns `false` when the transmit queue is full; the transport signals readiness later.
    fn notify(&mut self, characteristic: Characteristic, value: &[u8]) -> bool;

    /// Maximum length of a single notification.
    fn max_update_len(&self) -> usize {
        MAX_UPDATE_LEN
    }
}
