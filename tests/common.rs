use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use coset::CoseSign1Builder;
use p256::SecretKey;
use rand::rngs::OsRng;
use uuid::Uuid;

use mdoc_transfer::cbor::Value;
use mdoc_transfer::cose::CoseValue;
use mdoc_transfer::definitions::helpers::{NonEmptyMap, NonEmptyVec, Tag24};
use mdoc_transfer::definitions::{IssuerSigned, IssuerSignedItem, ItemsRequest};
use mdoc_transfer::presentation::channel::{Characteristic, Transport, TransportError, TransportState};
use mdoc_transfer::presentation::{
    ConsentResponder, RequestItems, TransferDelegate, TransferError, TransferStatus,
    UserRequestInfo,
};
use mdoc_transfer::security::DevicePrivateKey;
use mdoc_transfer::{Credential, CredentialStore, TransferConfig, TransferInfo};

#[allow(dead_code)]
pub const MDL: &str = "org.iso.18013.5.1.mDL";
#[allow(dead_code)]
pub const NAMESPACE: &str = "org.iso.18013.5.1";

#[allow(dead_code)]
fn main() {}

/// An mDL holding `items` under the ISO namespace, with a placeholder issuer signature.
#[allow(dead_code)]
pub fn mdl(id: &str, items: &[(&str, Value)]) -> (Credential, SecretKey) {
    let items = items
        .iter()
        .enumerate()
        .map(|(i, (name, value))| {
            Tag24::new(IssuerSignedItem {
                digest_id: i as u64,
                random: vec![i as u8; 16].into(),
                element_identifier: name.to_string(),
                element_value: value.clone(),
            })
            .expect("unable to encode item")
        })
        .collect::<Vec<_>>();
    let device_key = SecretKey::random(&mut OsRng);
    let credential = Credential {
        id: id.into(),
        doc_type: MDL.into(),
        issuer_signed: IssuerSigned {
            namespaces: Some(NonEmptyMap::new(
                NAMESPACE.to_string(),
                NonEmptyVec::try_from(items).expect("no items"),
            )),
            issuer_auth: CoseValue(CoseSign1Builder::new().signature(vec![7; 64]).build()),
        },
        private_key: DevicePrivateKey::new(device_key.clone()),
        unlock_data: None,
        display_name: Some("Driving licence".into()),
        element_names: BTreeMap::new(),
    };
    (credential, device_key)
}

#[allow(dead_code)]
pub fn default_items() -> Vec<(&'static str, Value)> {
    vec![
        ("family_name", Value::Text("Doe".into())),
        ("given_name", Value::Text("Jane".into())),
        ("age_over_18", Value::Bool(true)),
        ("portrait", Value::Bytes(vec![0xAB; 700])),
    ]
}

#[allow(dead_code)]
pub fn transfer_info(credentials: Vec<Credential>, config: TransferConfig) -> TransferInfo {
    TransferInfo {
        credentials: Arc::new(CredentialStore::new(credentials)),
        config,
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn items_request(elements: &[&str]) -> ItemsRequest {
    let elements = elements
        .iter()
        .map(|e| (e.to_string(), false))
        .collect::<BTreeMap<_, _>>();
    ItemsRequest {
        doc_type: MDL.into(),
        namespaces: NonEmptyMap::new(
            NAMESPACE.to_string(),
            NonEmptyMap::try_from(elements).expect("no elements"),
        ),
        request_info: None,
    }
}

#[derive(Debug, Default)]
pub struct Radio {
    pub state: Option<TransportState>,
    pub advertised: Option<Uuid>,
    /// Notifications the transport accepts before reporting a full queue. `None` is unlimited.
    pub credits: Option<usize>,
    pub sent: Vec<Vec<u8>>,
    pub max_update_len: Option<usize>,
}

/// In-memory GATT server, shared with the test through [MockTransport::radio].
#[derive(Debug, Clone, Default)]
pub struct MockTransport(Arc<Mutex<Radio>>);

#[allow(dead_code)]
impl MockTransport {
    pub fn radio(&self) -> std::sync::MutexGuard<'_, Radio> {
        self.0.lock().expect("radio lock poisoned")
    }

    pub fn with_credits(credits: usize) -> Self {
        let transport = Self::default();
        transport.radio().credits = Some(credits);
        transport
    }

    pub fn grant(&self, credits: usize) {
        let mut radio = self.radio();
        radio.credits = Some(radio.credits.unwrap_or_default() + credits);
    }

    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.radio().sent)
    }
}

impl Transport for MockTransport {
    fn state(&self) -> TransportState {
        self.radio().state.unwrap_or(TransportState::Ready)
    }

    fn start_advertising(&mut self, service: Uuid) -> Result<(), TransportError> {
        self.radio().advertised = Some(service);
        Ok(())
    }

    fn stop_advertising(&mut self) {
        self.radio().advertised = None;
    }

    fn notify(&mut self, characteristic: Characteristic, value: &[u8]) -> bool {
        assert_eq!(characteristic, Characteristic::Server2Client);
        let mut radio = self.radio();
        match radio.credits {
            Some(0) => return false,
            Some(ref mut credits) => *credits -= 1,
            None => {}
        }
        radio.sent.push(value.to_vec());
        true
    }

    fn max_update_len(&self) -> usize {
        self.radio().max_update_len.unwrap_or(512)
    }
}

#[derive(Debug, Clone)]
pub enum Decision {
    Accept(Option<RequestItems>),
    Reject,
    /// Keep the responder for the test to answer.
    Hold,
}

#[derive(Debug)]
pub struct RecordingDelegate {
    pub decision: Decision,
    pub statuses: Mutex<Vec<TransferStatus>>,
    pub requests: Mutex<Vec<UserRequestInfo>>,
    pub held: Mutex<Vec<ConsentResponder>>,
    pub errors: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingDelegate {
    pub fn new(decision: Decision) -> Arc<Self> {
        Arc::new(Self {
            decision,
            statuses: Mutex::default(),
            requests: Mutex::default(),
            held: Mutex::default(),
            errors: Mutex::default(),
        })
    }

    pub fn statuses(&self) -> Vec<TransferStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<UserRequestInfo> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn take_responder(&self) -> Option<ConsentResponder> {
        self.held.lock().unwrap().pop()
    }
}

impl TransferDelegate for RecordingDelegate {
    fn did_change_status(&self, status: TransferStatus) {
        self.statuses.lock().unwrap().push(status);
    }

    fn did_receive_request(&self, request: UserRequestInfo, responder: ConsentResponder) {
        self.requests.lock().unwrap().push(request);
        match &self.decision {
            Decision::Accept(items) => responder.respond(true, items.clone()),
            Decision::Reject => responder.respond(false, None),
            Decision::Hold => self.held.lock().unwrap().push(responder),
        }
    }

    fn did_finish_with_error(&self, error: &TransferError) {
        self.errors.lock().unwrap().push(error.kind().to_string());
    }
}
