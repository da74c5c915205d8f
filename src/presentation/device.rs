//! Holder side of a proximity presentation.
//!
//! A [TransferSession] owns everything one presentation needs: status, reassembly buffer,
//! outgoing fragment queue, ephemeral engagement and session encryption. Events are applied
//! one at a time through [TransferSession::handle]; the status table in
//! [status](crate::presentation::status) decides what happens and the session executes the
//! resulting effects.
//!
//! ```ignore
//! let mut session = TransferSession::new(info, transport, Arc::new(IsoSecurityProvider), delegate);
//! session.initialize().await;
//! // forward transport callbacks
//! session.handle(Event::Subscribed(Characteristic::State)).await;
//! ```
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use crate::cbor;
use crate::config::{CredentialStore, TransferConfig, TransferInfo};
use crate::cose;
use crate::definitions::session::Status as SessionStatus;
use crate::definitions::{
    DeviceRequest, Handover, ItemsRequest, SessionData, SessionEstablishment,
};
use crate::presentation::channel::{ChannelAck, Characteristic, Transport};
use crate::presentation::delegate::{TransferDelegate, UserRequestInfo};
use crate::presentation::disclosure::{
    self, DeviceAuthContext, DisclosureRequest, RequestItems,
};
use crate::presentation::engagement::Engagement;
use crate::presentation::error::{ErrorKind, TransferError};
use crate::presentation::fragment;
use crate::presentation::gateway::EncryptionGateway;
use crate::presentation::handle::{ConsentResponder, EventSender};
use crate::presentation::status::{
    self, Effect, Event, Snapshot, Subscriptions, TransferStatus,
};
use crate::security::{self, ReaderAuthInput, ReaderAuthOutcome, SecurityProvider, TrustAnchorRegistry};

/// The decoded request awaiting the user's decision.
#[derive(Debug, Clone)]
struct PendingRequest {
    items_requests: Vec<ItemsRequest>,
}

pub struct TransferSession<T: Transport> {
    id: Uuid,
    span: tracing::Span,
    status: TransferStatus,
    subscriptions: Subscriptions,
    advertising: bool,
    reassembly: Vec<u8>,
    outgoing: VecDeque<Vec<u8>>,
    engagement: Option<Engagement>,
    gateway: EncryptionGateway,
    pending: Option<PendingRequest>,
    consent_cycle: u64,
    credentials: Arc<CredentialStore>,
    trust_anchors: Arc<TrustAnchorRegistry>,
    config: TransferConfig,
    transport: T,
    security: Arc<dyn SecurityProvider>,
    delegate: Arc<dyn TransferDelegate>,
    posted_tx: mpsc::UnboundedSender<Event>,
    posted_rx: mpsc::UnboundedReceiver<Event>,
    last_error: Option<TransferError>,
}

impl<T: Transport> TransferSession<T> {
    pub fn new(
        info: TransferInfo,
        transport: T,
        security: Arc<dyn SecurityProvider>,
        delegate: Arc<dyn TransferDelegate>,
    ) -> Self {
        let id = Uuid::new_v4();
        let (posted_tx, posted_rx) = mpsc::unbounded_channel();
        Self {
            id,
            span: tracing::info_span!("transfer_session", session_id = %id),
            status: TransferStatus::Initializing,
            subscriptions: Subscriptions::default(),
            advertising: false,
            reassembly: Vec::new(),
            outgoing: VecDeque::new(),
            engagement: None,
            gateway: EncryptionGateway::new(),
            pending: None,
            consent_cycle: 0,
            credentials: info.credentials,
            trust_anchors: info.trust_anchors,
            config: info.config,
            transport,
            security,
            delegate,
            posted_tx,
            posted_rx,
            last_error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// The engagement to publish, once the transport is ready.
    pub fn engagement(&self) -> Option<&Engagement> {
        self.engagement.as_ref()
    }

    pub fn is_established(&self) -> bool {
        self.gateway.is_established()
    }

    pub fn reassembly(&self) -> &[u8] {
        &self.reassembly
    }

    /// Response fragments not yet handed to the transport.
    pub fn pending_fragments(&self) -> usize {
        self.outgoing.len()
    }

    pub fn subscriptions(&self) -> Subscriptions {
        self.subscriptions
    }

    pub fn consent_cycle(&self) -> u64 {
        self.consent_cycle
    }

    pub fn last_error(&self) -> Option<&TransferError> {
        self.last_error.as_ref()
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Posts events to this session from outside of [TransferSession::handle].
    pub fn event_sender(&self) -> EventSender {
        EventSender::new(self.posted_tx.clone())
    }

    /// Wait for the next posted event.
    pub async fn next_posted(&mut self) -> Option<Event> {
        self.posted_rx.recv().await
    }

    /// Apply every posted event that is already waiting.
    pub async fn process_posted(&mut self) {
        while let Ok(event) = self.posted_rx.try_recv() {
            self.handle(event).await;
        }
    }

    pub async fn initialize(&mut self) -> ChannelAck {
        self.handle(Event::Initialize).await
    }

    /// Apply `event` and everything it sets off, returning the answer for the reader's write.
    pub async fn handle(&mut self, event: Event) -> ChannelAck {
        let span = self.span.clone();
        self.process(event).instrument(span).await
    }

    async fn process(&mut self, event: Event) -> ChannelAck {
        if self.config.preview {
            tracing::debug!("preview session, event ignored");
            return ChannelAck::Success;
        }

        let mut queue = VecDeque::from([event]);
        let mut ack = None;
        loop {
            let Some(event) = queue.pop_front().or_else(|| self.posted_rx.try_recv().ok()) else {
                break;
            };
            let (event_ack, follow_ups) = self.apply(event).await;
            ack.get_or_insert(event_ack);
            queue.extend(follow_ups);
        }
        ack.unwrap_or(ChannelAck::Success)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            subscriptions: self.subscriptions,
            consent_cycle: self.consent_cycle,
        }
    }

    async fn apply(&mut self, event: Event) -> (ChannelAck, Vec<Event>) {
        let transition = status::transition(&self.snapshot(), &event);
        tracing::trace!(status = %self.status, next = ?transition.next, "applying event");

        let mut follow_ups = vec![];
        let mut failure = transition.failure.map(TransferError::from);
        let mut pending: VecDeque<Effect> = transition.effects.into();
        if let Some(next) = transition.next {
            pending.extend(self.set_status(next));
        }

        while let Some(effect) = pending.pop_front() {
            match self.run(effect).await {
                Ok(Some(event)) => follow_ups.push(event),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "session step failed");
                    failure.get_or_insert(e);
                    if self.status != TransferStatus::Error {
                        pending.clear();
                        pending.extend(self.set_status(TransferStatus::Error));
                    }
                }
            }
        }

        if let Some(error) = failure {
            self.report(error, &mut follow_ups);
        }
        (transition.ack, follow_ups)
    }

    /// Store the new status and return the effects of entering it.
    fn set_status(&mut self, next: TransferStatus) -> Vec<Effect> {
        let previous = self.status;
        if previous == next {
            return vec![];
        }
        self.status = next;
        tracing::info!(from = %previous, to = %next, "status changed");
        self.delegate.did_change_status(next);
        status::on_enter(previous, next)
    }

    fn report(&mut self, error: TransferError, follow_ups: &mut Vec<Event>) {
        tracing::error!(kind = %error.kind(), "transfer failed: {error}");
        self.delegate.did_finish_with_error(&error);
        if self.config.auto_recover && error.is_recoverable() {
            follow_ups.push(Event::Recover);
        }
        self.last_error = Some(error);
    }

    async fn run(&mut self, effect: Effect) -> Result<Option<Event>, TransferError> {
        match effect {
            Effect::ValidateCredentials => {
                if self.credentials.is_empty() {
                    return Err(TransferError::InvalidCredentialInput);
                }
            }
            Effect::ProbeTransport => return Ok(Some(Event::TransportState(self.transport.state()))),
            Effect::Reinitialize => return Ok(Some(Event::Initialize)),
            Effect::BeginEngagement => {
                self.gateway.clear();
                let engagement = Engagement::generate()?;
                tracing::debug!(service = %engagement.service_uuid(), "engagement created");
                self.engagement = Some(engagement);
            }
            Effect::StartAdvertising => {
                let service = self
                    .engagement
                    .as_ref()
                    .ok_or(TransferError::EngagementMissing)?
                    .service_uuid();
                self.transport.start_advertising(service)?;
                self.advertising = true;
            }
            Effect::StopAdvertising => self.stop_advertising(),
            Effect::Subscribe(characteristic) => {
                self.subscriptions = self.subscriptions.with(characteristic, true)
            }
            Effect::Unsubscribe(characteristic) => {
                self.subscriptions = self.subscriptions.with(characteristic, false)
            }
            Effect::ClearReassembly => self.reassembly.clear(),
            Effect::AppendFragment(payload) => self.reassembly.extend_from_slice(&payload),
            Effect::ProcessRequest => {
                if let Err(e) = self.process_request().await {
                    if let Some(status) = e.session_status() {
                        self.send_status(status);
                    }
                    return Err(e);
                }
            }
            Effect::BuildResponse(items) => self.build_response(items).await?,
            Effect::SendTermination => self.send_status(SessionStatus::SessionTermination),
            Effect::SendNext => return Ok(self.send_next()),
            Effect::Teardown => self.teardown(),
        }
        Ok(None)
    }

    async fn process_request(&mut self) -> Result<(), TransferError> {
        let message = std::mem::take(&mut self.reassembly);
        let establishment: SessionEstablishment = cbor::from_slice(&message)
            .map_err(|e| TransferError::RequestDecodeFailed(e.to_string()))?;
        if establishment.e_reader_key.is_none() {
            return Err(TransferError::ReaderKeyMissing);
        }
        let engagement = self
            .engagement
            .as_ref()
            .ok_or(TransferError::EngagementMissing)?;
        let session = self
            .security
            .derive_session_keys(&establishment, engagement, &Handover::Qr)
            .await
            .map_err(|e| match e {
                security::Error::ReaderKeyMissing => TransferError::ReaderKeyMissing,
                e => TransferError::RequestDecodeFailed(e.to_string()),
            })?;
        self.gateway.install(session);

        let request = self.gateway.decrypt(establishment.data.as_ref())?;
        let request: DeviceRequest = cbor::from_slice(&request)
            .map_err(|e| TransferError::RequestDecodeFailed(e.to_string()))?;
        let items_requests: Vec<ItemsRequest> = request
            .doc_requests
            .iter()
            .map(|doc_request| doc_request.items_request.as_ref().clone())
            .collect();
        let reader_auth = self.reader_auth(&request).await?;

        let disclosure = disclosure::filter(
            &self.credentials,
            DisclosureRequest::Verifier {
                requests: &items_requests,
                selection: None,
            },
        );
        tracing::info!(
            documents = items_requests.len(),
            disclosable = disclosure.documents.len(),
            "request received"
        );
        self.consent_cycle += 1;
        self.pending = Some(PendingRequest { items_requests });
        let info = UserRequestInfo {
            valid_items_requested: disclosure.valid_items,
            error_items_requested: disclosure.error_items,
            document_names: disclosure.document_names,
            reader_auth,
        };
        let responder = ConsentResponder::new(self.event_sender(), self.consent_cycle);
        self.delegate.did_receive_request(info, responder);
        Ok(())
    }

    async fn reader_auth(
        &self,
        request: &DeviceRequest,
    ) -> Result<Option<ReaderAuthOutcome>, TransferError> {
        let Some((doc_request, reader_auth)) = request
            .doc_requests
            .iter()
            .find_map(|r| r.reader_auth.as_ref().map(|auth| (r, auth)))
        else {
            return Ok(None);
        };
        let input = ReaderAuthInput {
            reader_auth: &reader_auth.0,
            x5chain: cose::x5chain(&reader_auth.0),
            items_request: &doc_request.items_request,
            transcript: self.gateway.transcript()?,
        };
        let outcome = self
            .security
            .validate_reader_auth(input, &self.trust_anchors)
            .await;
        if !outcome.validated {
            tracing::warn!(reason = ?outcome.message, "reader authentication failed");
        }
        Ok(Some(outcome))
    }

    async fn build_response(&mut self, items: Option<RequestItems>) -> Result<(), TransferError> {
        let pending = self
            .pending
            .take()
            .ok_or(TransferError::SessionNotEstablished)?;
        let disclosure = disclosure::filter(
            &self.credentials,
            DisclosureRequest::Verifier {
                requests: &pending.items_requests,
                selection: items.as_ref(),
            },
        );
        if disclosure.is_empty() {
            self.send_status(SessionStatus::SessionTermination);
            return Err(TransferError::NoDisclosableDocument);
        }

        let response = disclosure::build_response(
            &disclosure,
            &self.credentials,
            self.security.as_ref(),
            Some(DeviceAuthContext {
                transcript: self.gateway.transcript()?,
                reader_key: self.gateway.reader_key()?,
                method: self.config.device_auth_method,
            }),
        )
        .await?;
        let response = cbor::to_vec(&response)?;
        let encrypted = self.gateway.encrypt(&response)?;
        let message = cbor::to_vec(&SessionData {
            data: Some(encrypted.into()),
            status: Some(SessionStatus::SessionTermination),
        })?;
        self.outgoing = fragment::frame(&message, self.block_size());
        tracing::info!(
            fragments = self.outgoing.len(),
            bytes = message.len(),
            "response ready"
        );
        Ok(())
    }

    /// Payload bytes per response fragment.
    fn block_size(&self) -> NonZeroUsize {
        let max = self
            .config
            .max_fragment_size
            .min(self.transport.max_update_len());
        NonZeroUsize::new(max.saturating_sub(1)).unwrap_or(NonZeroUsize::MIN)
    }

    /// Hand queued fragments to the transport until it pushes back.
    fn send_next(&mut self) -> Option<Event> {
        while let Some(fragment) = self.outgoing.front() {
            if !self.transport.notify(Characteristic::Server2Client, fragment) {
                tracing::debug!(remaining = self.outgoing.len(), "transport is busy");
                return None;
            }
            self.outgoing.pop_front();
        }
        Some(Event::QueueDrained)
    }

    /// Best effort: the session is ending either way.
    fn send_status(&mut self, status: SessionStatus) {
        let message = match cbor::to_vec(&SessionData::status_only(status)) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, ?status, "unable to encode session status");
                return;
            }
        };
        for fragment in fragment::frame(&message, self.block_size()) {
            if !self.transport.notify(Characteristic::Server2Client, &fragment) {
                tracing::warn!(?status, "session status was not sent");
                return;
            }
        }
    }

    fn stop_advertising(&mut self) {
        if self.advertising {
            self.transport.stop_advertising();
            self.advertising = false;
        }
    }

    fn teardown(&mut self) {
        self.stop_advertising();
        self.engagement = None;
        self.gateway.clear();
        self.reassembly.clear();
        self.outgoing.clear();
        self.pending = None;
        self.subscriptions = Subscriptions::default();
        tracing::debug!("session torn down");
    }
}

impl<T: Transport> std::fmt::Debug for TransferSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSession")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("subscriptions", &self.subscriptions)
            .field("reassembly", &self.reassembly.len())
            .field("outgoing", &self.outgoing.len())
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}
