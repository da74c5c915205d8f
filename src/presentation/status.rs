//! Session lifecycle as a pure transition table.
//!
//! [transition] maps the current [Snapshot] and an incoming [Event] to the next status and the
//! [Effect]s to run; [on_enter] adds the effects bound to entering a status. Nothing here
//! touches the transport or any key material, the
//! [TransferSession](crate::presentation::device::TransferSession) executes the effects.
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

use crate::presentation::channel::{Characteristic, ChannelAck, TransportState, END, START};
use crate::presentation::disclosure::RequestItems;
use crate::presentation::error::TransferError;
use crate::presentation::fragment::FragmentHeader;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum TransferStatus {
    #[default]
    Initializing,
    Initialized,
    EngagementReady,
    Connected,
    Started,
    RequestReceived,
    UserSelected,
    ResponseSent,
    Disconnected,
    Error,
}

impl TransferStatus {
    /// A reader is attached and the session has not finished yet.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            TransferStatus::Connected
                | TransferStatus::Started
                | TransferStatus::RequestReceived
                | TransferStatus::UserSelected
                | TransferStatus::ResponseSent
        )
    }

    /// States in which an idle reader ends the session.
    pub fn is_exchanging(self) -> bool {
        matches!(
            self,
            TransferStatus::Started
                | TransferStatus::RequestReceived
                | TransferStatus::UserSelected
                | TransferStatus::ResponseSent
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Disconnected | TransferStatus::Error)
    }
}

/// The user's answer to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentDecision {
    pub accepted: bool,
    /// Items to return; `None` returns every valid item.
    pub items: Option<RequestItems>,
    /// Request cycle the decision answers. Decisions for an earlier cycle are ignored.
    pub cycle: u64,
}

/// Everything that can happen to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Validate the credentials and look at the transport.
    Initialize,
    TransportState(TransportState),
    Subscribed(Characteristic),
    Unsubscribed(Characteristic),
    Write {
        characteristic: Characteristic,
        value: Vec<u8>,
    },
    /// The transport can take more notifications.
    ReadyToSendMore,
    Consent(ConsentDecision),
    /// Posted by the host when the reader stopped making progress.
    IdleTimeout,
    Recover,
    /// Posted by the session once the last response fragment was handed to the transport.
    QueueDrained,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ValidateCredentials,
    ProbeTransport,
    Reinitialize,
    BeginEngagement,
    StartAdvertising,
    StopAdvertising,
    Subscribe(Characteristic),
    Unsubscribe(Characteristic),
    ClearReassembly,
    AppendFragment(Vec<u8>),
    ProcessRequest,
    BuildResponse(Option<RequestItems>),
    SendTermination,
    SendNext,
    Teardown,
}

/// Failures decided by the table itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    TransportUnauthorized,
    TransportUnsupported,
    UserRejected,
}

impl From<Failure> for TransferError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::TransportUnauthorized => TransferError::TransportUnauthorized,
            Failure::TransportUnsupported => TransferError::TransportUnsupported,
            Failure::UserRejected => TransferError::UserRejected,
        }
    }
}

/// Notifying characteristics the reader is subscribed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Subscriptions {
    state: bool,
    server_2_client: bool,
}

impl Subscriptions {
    /// Both notifying characteristics.
    pub const ALL: Self = Self {
        state: true,
        server_2_client: true,
    };

    pub fn contains(self, characteristic: Characteristic) -> bool {
        match characteristic {
            Characteristic::State => self.state,
            Characteristic::Server2Client => self.server_2_client,
            Characteristic::Client2Server => false,
        }
    }

    /// The set with `characteristic` added or removed. Writes-only characteristics are never held.
    pub fn with(mut self, characteristic: Characteristic, subscribed: bool) -> Self {
        match characteristic {
            Characteristic::State => self.state = subscribed,
            Characteristic::Server2Client => self.server_2_client = subscribed,
            Characteristic::Client2Server => {}
        }
        self
    }

    pub fn len(self) -> usize {
        usize::from(self.state) + usize::from(self.server_2_client)
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub fn is_complete(self) -> bool {
        self == Self::ALL
    }
}

/// What the session looks like to the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub status: TransferStatus,
    pub subscriptions: Subscriptions,
    pub consent_cycle: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// `None` keeps the current status.
    pub next: Option<TransferStatus>,
    pub effects: Vec<Effect>,
    pub ack: ChannelAck,
    pub failure: Option<Failure>,
}

impl Transition {
    fn stay() -> Self {
        Self {
            next: None,
            effects: vec![],
            ack: ChannelAck::Success,
            failure: None,
        }
    }

    fn reject() -> Self {
        Self {
            ack: ChannelAck::Rejected,
            ..Self::stay()
        }
    }

    fn to(next: TransferStatus) -> Self {
        Self {
            next: Some(next),
            ..Self::stay()
        }
    }

    fn fail(failure: Failure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::to(TransferStatus::Error)
        }
    }

    fn with(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

pub fn transition(snapshot: &Snapshot, event: &Event) -> Transition {
    use TransferStatus::*;

    let status = snapshot.status;
    match event {
        Event::Initialize if status == Initializing => {
            Transition::to(Initialized).with([Effect::ValidateCredentials])
        }
        Event::Initialize => Transition::stay(),

        Event::TransportState(state) => match (status, state) {
            (Initialized, TransportState::Ready) => Transition::to(EngagementReady)
                .with([Effect::BeginEngagement, Effect::StartAdvertising]),
            (s, TransportState::Unauthorized) if !s.is_terminal() => {
                Transition::fail(Failure::TransportUnauthorized)
            }
            (s, TransportState::Unsupported) if !s.is_terminal() => {
                Transition::fail(Failure::TransportUnsupported)
            }
            (s, TransportState::PoweredOff) if s == EngagementReady || s.is_connected() => {
                Transition::to(Disconnected)
            }
            _ => Transition::stay(),
        },

        Event::Subscribed(characteristic) => {
            let characteristic = *characteristic;
            if !characteristic.is_notifying()
                || status.is_terminal()
                || snapshot.subscriptions.contains(characteristic)
            {
                return Transition::stay();
            }
            let subscribed = Transition::stay().with([Effect::Subscribe(characteristic)]);
            let after = snapshot.subscriptions.with(characteristic, true);
            if status == EngagementReady && after.is_complete() {
                Transition {
                    next: Some(Connected),
                    ..subscribed
                }
            } else {
                subscribed
            }
        }

        Event::Unsubscribed(characteristic) => {
            let characteristic = *characteristic;
            if !snapshot.subscriptions.contains(characteristic) {
                return Transition::stay();
            }
            let released = Transition::stay().with([Effect::Unsubscribe(characteristic)]);
            let after = snapshot.subscriptions.with(characteristic, false);
            if status.is_connected() && after.is_empty() {
                Transition {
                    next: Some(Disconnected),
                    ..released
                }
            } else {
                released
            }
        }

        Event::Write {
            characteristic,
            value,
        } => write(status, *characteristic, value),

        Event::ReadyToSendMore if status == UserSelected => {
            Transition::stay().with([Effect::SendNext])
        }
        Event::ReadyToSendMore => Transition::stay(),

        Event::QueueDrained if status == UserSelected => Transition::to(ResponseSent),
        Event::QueueDrained => Transition::stay(),

        Event::Consent(decision)
            if status == RequestReceived && decision.cycle == snapshot.consent_cycle =>
        {
            if decision.accepted {
                Transition::to(UserSelected)
                    .with([Effect::BuildResponse(decision.items.clone()), Effect::SendNext])
            } else {
                Transition::fail(Failure::UserRejected).with([Effect::SendTermination])
            }
        }
        Event::Consent(_) => Transition::stay(),

        Event::IdleTimeout if status.is_exchanging() => Transition::to(Disconnected),
        Event::IdleTimeout => Transition::stay(),

        Event::Recover if status == Error => {
            Transition::to(Initializing).with([Effect::Reinitialize])
        }
        Event::Recover => Transition::stay(),
    }
}

fn write(status: TransferStatus, characteristic: Characteristic, value: &[u8]) -> Transition {
    use TransferStatus::*;

    match characteristic {
        Characteristic::State => match (status, value) {
            (Connected, [START]) => Transition::to(Started),
            (ResponseSent, [END]) => Transition::to(Disconnected),
            _ => Transition::reject(),
        },
        Characteristic::Client2Server => match status {
            // The reader has not started a transaction yet.
            Connected => Transition::stay(),
            Started => {
                let Some((&first, payload)) = value.split_first() else {
                    return Transition::reject();
                };
                match FragmentHeader::try_from(first) {
                    Ok(FragmentHeader::More) => {
                        Transition::stay().with([Effect::AppendFragment(payload.to_vec())])
                    }
                    Ok(FragmentHeader::Last) => Transition::to(RequestReceived)
                        .with([Effect::AppendFragment(payload.to_vec())]),
                    Err(_) => Transition::reject(),
                }
            }
            _ => Transition::reject(),
        },
        Characteristic::Server2Client => Transition::reject(),
    }
}

/// Effects bound to entering `next` from `previous`.
pub fn on_enter(previous: TransferStatus, next: TransferStatus) -> Vec<Effect> {
    use TransferStatus::*;

    if previous == next {
        return vec![];
    }
    match next {
        Initialized => vec![Effect::ProbeTransport],
        Started => vec![Effect::ClearReassembly],
        RequestReceived => vec![Effect::StopAdvertising, Effect::ProcessRequest],
        Disconnected | Error if previous != Disconnected => vec![Effect::Teardown],
        _ => vec![],
    }
}
