use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use mdoc_transfer::cbor;
use mdoc_transfer::definitions::session::Status;
use mdoc_transfer::definitions::{SessionData, SessionEstablishment};
use mdoc_transfer::presentation::channel::{END, START};
use mdoc_transfer::presentation::fragment::{self, LAST, MORE};
use mdoc_transfer::presentation::reader::{self, ReaderSession};
use mdoc_transfer::presentation::{
    ChannelAck, Characteristic, ErrorKind, Event, Subscriptions, TransferSession, TransferStatus,
    TransportState,
};
use mdoc_transfer::security::{DeviceAuthMethod, IsoSecurityProvider};
use mdoc_transfer::TransferConfig;

use common::{Decision, MockTransport, RecordingDelegate};

mod common;

type Session = TransferSession<MockTransport>;

fn session(
    config: TransferConfig,
    transport: MockTransport,
    decision: Decision,
) -> (Session, Arc<RecordingDelegate>, p256::SecretKey) {
    let (credential, device_key) = common::mdl("mdl-1", &common::default_items());
    let delegate = RecordingDelegate::new(decision);
    let session = TransferSession::new(
        common::transfer_info(vec![credential], config),
        transport,
        Arc::new(IsoSecurityProvider),
        delegate.clone(),
    );
    (session, delegate, device_key)
}

fn write(characteristic: Characteristic, value: Vec<u8>) -> Event {
    Event::Write {
        characteristic,
        value,
    }
}

/// Initialize, subscribe and start a transaction.
async fn connect(session: &mut Session) {
    session.initialize().await;
    assert_eq!(session.status(), TransferStatus::EngagementReady);
    session.handle(Event::Subscribed(Characteristic::State)).await;
    session
        .handle(Event::Subscribed(Characteristic::Server2Client))
        .await;
    assert_eq!(session.status(), TransferStatus::Connected);
    assert_eq!(
        session.handle(write(Characteristic::State, vec![START])).await,
        ChannelAck::Success
    );
    assert_eq!(session.status(), TransferStatus::Started);
}

/// Send a request for `elements` from a fresh reader, 64 bytes per fragment.
async fn send_request(session: &mut Session, elements: &[&str]) -> ReaderSession {
    let engagement = session.engagement().expect("no engagement");
    let mut reader = ReaderSession::new(engagement.device_engagement().clone()).unwrap();
    let request = reader
        .device_request(vec![common::items_request(elements)], None)
        .unwrap();
    let establishment = reader.establishment(&request).unwrap();
    let fragments = fragment::frame(&establishment, NonZeroUsize::new(64).unwrap());
    assert!(fragments.len() > 1);
    for fragment in fragments {
        assert_eq!(
            session.handle(write(Characteristic::Client2Server, fragment)).await,
            ChannelAck::Success
        );
    }
    reader
}

fn sent_message(transport: &MockTransport) -> Vec<u8> {
    let sent = transport.take_sent();
    fragment::reassemble(sent.iter().map(Vec::as_slice))
        .unwrap()
        .expect("response is incomplete")
}

#[tokio::test]
async fn presents_selected_items() {
    let transport = MockTransport::with_credits(1);
    let (mut session, delegate, device_key) = session(
        TransferConfig {
            max_fragment_size: 100,
            ..Default::default()
        },
        transport.clone(),
        Decision::Accept(None),
    );
    connect(&mut session).await;
    let service = session.engagement().unwrap().service_uuid();
    assert_eq!(transport.radio().advertised, Some(service));

    let mut reader = send_request(&mut session, &["family_name", "portrait", "height"]).await;
    assert!(session.is_established());
    assert!(transport.radio().advertised.is_none());

    let request = delegate.last_request().expect("no consent prompt");
    let valid: Vec<_> = request.valid_items_requested[common::MDL][common::NAMESPACE]
        .iter()
        .map(|item| item.element_identifier.as_str())
        .collect();
    assert_eq!(valid, vec!["family_name", "portrait"]);
    let errors: Vec<_> = request.error_items_requested[common::MDL][common::NAMESPACE]
        .iter()
        .map(|item| item.element_identifier.as_str())
        .collect();
    assert_eq!(errors, vec!["height"]);
    assert!(request.reader_auth.is_none());
    assert_eq!(request.document_names[common::MDL], "Driving licence");

    // One notification per credit.
    assert_eq!(session.status(), TransferStatus::UserSelected);
    assert_eq!(transport.radio().sent.len(), 1);
    let mut rounds = 0;
    while session.status() == TransferStatus::UserSelected {
        transport.grant(1);
        session.handle(Event::ReadyToSendMore).await;
        rounds += 1;
        assert!(rounds < 100, "response never drained");
    }
    assert!(rounds > 5);
    assert_eq!(session.status(), TransferStatus::ResponseSent);
    assert!(transport
        .radio()
        .sent
        .iter()
        .all(|fragment| fragment.len() <= 100));

    let response = reader.handle_response(&sent_message(&transport)).unwrap();
    let documents = response.documents.expect("no documents");
    let document = &documents[0];
    assert_eq!(document.doc_type, common::MDL);
    let disclosed: Vec<_> = document
        .issuer_signed
        .element_identifiers()
        .map(|(_, id)| id)
        .collect();
    assert_eq!(disclosed, vec!["family_name", "portrait"]);
    reader
        .verify_device_auth(document, &device_key.public_key())
        .unwrap();

    assert_eq!(
        session.handle(write(Characteristic::State, vec![END])).await,
        ChannelAck::Success
    );
    assert_eq!(session.status(), TransferStatus::Disconnected);
    assert!(session.engagement().is_none());
    assert!(!session.is_established());
    assert!(session.reassembly().is_empty());
    assert_eq!(session.pending_fragments(), 0);
    assert!(session.subscriptions().is_empty());
    assert_eq!(
        delegate.statuses(),
        vec![
            TransferStatus::Initialized,
            TransferStatus::EngagementReady,
            TransferStatus::Connected,
            TransferStatus::Started,
            TransferStatus::RequestReceived,
            TransferStatus::UserSelected,
            TransferStatus::ResponseSent,
            TransferStatus::Disconnected,
        ]
    );
}

#[tokio::test]
async fn user_choice_narrows_the_response() {
    let transport = MockTransport::default();
    let choice = BTreeMap::from([(
        common::MDL.to_string(),
        BTreeMap::from([(
            common::NAMESPACE.to_string(),
            vec!["given_name".to_string()],
        )]),
    )]);
    let (mut session, _, device_key) = session(
        TransferConfig {
            device_auth_method: DeviceAuthMethod::DeviceSignature,
            ..Default::default()
        },
        transport.clone(),
        Decision::Accept(Some(choice)),
    );
    connect(&mut session).await;
    let mut reader = send_request(&mut session, &["family_name", "given_name"]).await;

    // Unlimited credits: everything goes out at once.
    assert_eq!(session.status(), TransferStatus::ResponseSent);
    let response = reader.handle_response(&sent_message(&transport)).unwrap();
    let documents = response.documents.expect("no documents");
    let document = &documents[0];
    let disclosed: Vec<_> = document
        .issuer_signed
        .element_identifiers()
        .map(|(_, id)| id)
        .collect();
    assert_eq!(disclosed, vec!["given_name"]);
    reader
        .verify_device_auth(document, &device_key.public_key())
        .unwrap();
}

#[tokio::test]
async fn rejection_terminates_the_session() {
    let transport = MockTransport::default();
    let (mut session, delegate, _) =
        session(TransferConfig::default(), transport.clone(), Decision::Reject);
    connect(&mut session).await;
    let mut reader = send_request(&mut session, &["family_name"]).await;

    assert_eq!(session.status(), TransferStatus::Error);
    assert_eq!(
        session.last_error().map(|e| e.kind()),
        Some(ErrorKind::UserRejected)
    );
    assert!(matches!(
        reader.handle_response(&sent_message(&transport)),
        Err(reader::Error::Terminated(Some(Status::SessionTermination)))
    ));
    assert!(session.engagement().is_none());
    assert_eq!(*delegate.errors.lock().unwrap(), vec!["USER_REJECTED"]);
}

#[tokio::test]
async fn nothing_disclosable_terminates_the_session() {
    let transport = MockTransport::default();
    let choice = BTreeMap::from([(common::MDL.to_string(), BTreeMap::new())]);
    let (mut session, _, _) = session(
        TransferConfig::default(),
        transport.clone(),
        Decision::Accept(Some(choice)),
    );
    connect(&mut session).await;
    let mut reader = send_request(&mut session, &["family_name"]).await;

    assert_eq!(session.status(), TransferStatus::Error);
    assert_eq!(
        session.last_error().map(|e| e.kind()),
        Some(ErrorKind::NoDisclosableDocument)
    );
    assert!(matches!(
        reader.handle_response(&sent_message(&transport)),
        Err(reader::Error::Terminated(_))
    ));
}

#[tokio::test]
async fn undecryptable_request_reports_encryption_error() {
    let transport = MockTransport::default();
    let (mut session, delegate, _) =
        session(TransferConfig::default(), transport.clone(), Decision::Hold);
    connect(&mut session).await;

    let engagement = session.engagement().expect("no engagement");
    let mut reader = ReaderSession::new(engagement.device_engagement().clone()).unwrap();
    let request = reader
        .device_request(vec![common::items_request(&["family_name"])], None)
        .unwrap();
    let mut establishment: SessionEstablishment =
        cbor::from_slice(&reader.establishment(&request).unwrap()).unwrap();
    establishment.data = vec![0x5A; 48].into();
    let message = cbor::to_vec(&establishment).unwrap();
    for fragment in fragment::frame(&message, NonZeroUsize::new(64).unwrap()) {
        session
            .handle(write(Characteristic::Client2Server, fragment))
            .await;
    }

    assert_eq!(session.status(), TransferStatus::Error);
    assert_eq!(
        session.last_error().map(|e| e.kind()),
        Some(ErrorKind::DecryptFailed)
    );
    assert!(matches!(
        reader.handle_response(&sent_message(&transport)),
        Err(reader::Error::Terminated(Some(Status::SessionEncryptionError)))
    ));
    assert!(delegate.last_request().is_none());
}

#[tokio::test]
async fn stale_consent_is_ignored() {
    let transport = MockTransport::default();
    let (mut session, delegate, _) =
        session(TransferConfig::default(), transport.clone(), Decision::Hold);
    connect(&mut session).await;
    send_request(&mut session, &["family_name"]).await;
    assert_eq!(session.status(), TransferStatus::RequestReceived);

    let responder = delegate.take_responder().unwrap();
    assert_eq!(responder.cycle(), session.consent_cycle());
    session
        .handle(Event::Consent(mdoc_transfer::presentation::status::ConsentDecision {
            accepted: true,
            items: None,
            cycle: responder.cycle() + 1,
        }))
        .await;
    assert_eq!(session.status(), TransferStatus::RequestReceived);

    responder.respond(true, None);
    session.process_posted().await;
    assert_eq!(session.status(), TransferStatus::ResponseSent);
}

#[tokio::test]
async fn channel_rules() {
    let transport = MockTransport::default();
    let (mut session, _, _) =
        session(TransferConfig::default(), transport.clone(), Decision::Hold);
    session.initialize().await;

    // Client writes before the transaction started are acknowledged and dropped.
    // A repeated subscription on one characteristic is not a connection.
    session.handle(Event::Subscribed(Characteristic::State)).await;
    session.handle(Event::Subscribed(Characteristic::State)).await;
    session
        .handle(Event::Subscribed(Characteristic::Client2Server))
        .await;
    assert_eq!(session.status(), TransferStatus::EngagementReady);
    assert_eq!(session.subscriptions().len(), 1);
    session
        .handle(Event::Subscribed(Characteristic::Server2Client))
        .await;
    assert_eq!(session.status(), TransferStatus::Connected);

    // Releasing a characteristic twice keeps the other one, and the link.
    session.handle(Event::Unsubscribed(Characteristic::State)).await;
    session.handle(Event::Unsubscribed(Characteristic::State)).await;
    assert_eq!(session.status(), TransferStatus::Connected);
    assert!(session
        .subscriptions()
        .contains(Characteristic::Server2Client));
    session.handle(Event::Subscribed(Characteristic::State)).await;
    assert_eq!(session.subscriptions(), Subscriptions::ALL);
    assert_eq!(
        session
            .handle(write(Characteristic::Client2Server, vec![MORE, 1, 2]))
            .await,
        ChannelAck::Success
    );
    assert!(session.reassembly().is_empty());
    assert_eq!(
        session.handle(write(Characteristic::State, vec![END])).await,
        ChannelAck::Rejected
    );
    assert_eq!(
        session
            .handle(write(Characteristic::Server2Client, vec![LAST]))
            .await,
        ChannelAck::Rejected
    );

    session.handle(write(Characteristic::State, vec![START])).await;
    session
        .handle(write(Characteristic::Client2Server, vec![MORE, 1, 2]))
        .await;
    assert_eq!(
        session
            .handle(write(Characteristic::Client2Server, vec![0x7F, 3]))
            .await,
        ChannelAck::Rejected
    );
    assert_eq!(
        session
            .handle(write(Characteristic::Client2Server, vec![]))
            .await,
        ChannelAck::Rejected
    );
    assert_eq!(session.reassembly(), &[1, 2]);
    assert_eq!(session.status(), TransferStatus::Started);

    session
        .handle(Event::Unsubscribed(Characteristic::State))
        .await;
    assert_eq!(session.status(), TransferStatus::Started);
    session
        .handle(Event::Unsubscribed(Characteristic::Server2Client))
        .await;
    assert_eq!(session.status(), TransferStatus::Disconnected);
    assert!(session.reassembly().is_empty());
    assert!(transport.radio().advertised.is_none());
}

#[tokio::test]
async fn idle_reader_is_disconnected() {
    let (mut session, _, _) = session(
        TransferConfig::default(),
        MockTransport::default(),
        Decision::Hold,
    );
    session.initialize().await;
    session.handle(Event::IdleTimeout).await;
    assert_eq!(session.status(), TransferStatus::EngagementReady);

    connect_from_ready(&mut session).await;
    session.handle(Event::IdleTimeout).await;
    assert_eq!(session.status(), TransferStatus::Disconnected);
    assert!(session.engagement().is_none());
}

async fn connect_from_ready(session: &mut Session) {
    session.handle(Event::Subscribed(Characteristic::State)).await;
    session
        .handle(Event::Subscribed(Characteristic::Server2Client))
        .await;
    session.handle(write(Characteristic::State, vec![START])).await;
    assert_eq!(session.status(), TransferStatus::Started);
}

#[tokio::test]
async fn recovers_after_a_failure() {
    let transport = MockTransport::default();
    let (mut session, delegate, _) = session(
        TransferConfig {
            auto_recover: true,
            ..Default::default()
        },
        transport.clone(),
        Decision::Hold,
    );
    session.initialize().await;
    connect_from_ready(&mut session).await;
    let first = session.engagement().unwrap().service_uuid();

    session
        .handle(write(Characteristic::Client2Server, vec![LAST, 0xFF]))
        .await;
    assert_eq!(
        session.last_error().map(|e| e.kind()),
        Some(ErrorKind::RequestDecodeFailed)
    );
    let report: SessionData = cbor::from_slice(&sent_message(&transport)).unwrap();
    assert!(report.data.is_none());
    assert_eq!(report.status, Some(Status::CborDecodingError));
    // Back to advertising a fresh engagement.
    assert_eq!(session.status(), TransferStatus::EngagementReady);
    let second = session.engagement().unwrap().service_uuid();
    assert_ne!(first, second);
    assert_eq!(transport.radio().advertised, Some(second));
    assert!(delegate
        .statuses()
        .ends_with(&[
            TransferStatus::RequestReceived,
            TransferStatus::Error,
            TransferStatus::Initializing,
            TransferStatus::Initialized,
            TransferStatus::EngagementReady,
        ]));
}

#[tokio::test]
async fn transport_permission_is_fatal() {
    let transport = MockTransport::default();
    transport.radio().state = Some(TransportState::Unauthorized);
    let (mut session, _, _) = session(
        TransferConfig {
            auto_recover: true,
            ..Default::default()
        },
        transport.clone(),
        Decision::Hold,
    );
    session.initialize().await;
    assert_eq!(session.status(), TransferStatus::Error);
    assert_eq!(
        session.last_error().map(|e| e.kind()),
        Some(ErrorKind::TransportUnauthorized)
    );

    // Not retried automatically; an explicit recovery probes the transport again.
    transport.radio().state = Some(TransportState::Ready);
    session.handle(Event::Recover).await;
    assert_eq!(session.status(), TransferStatus::EngagementReady);
}
