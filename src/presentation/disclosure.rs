//! Selective disclosure: which of the holder's signed items answer a request.
//!
//! Filtering is a pure computation over the [CredentialStore]. It yields the issuer-signed
//! subsets to return together with the valid and error item summaries shown to the user.
//! [build_response] then adds device authentication and assembles the [DeviceResponse].
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::cbor::Value;
use crate::config::{Credential, CredentialStore};
use crate::definitions::device_response::{DocumentError, DocumentErrorCode, Errors, Status};
use crate::definitions::device_signed::DeviceNamespaces;
use crate::definitions::helpers::{NonEmptyMap, NonEmptyVec, Tag24};
use crate::definitions::issuer_signed::IssuerSignedItemBytes;
use crate::definitions::{
    CoseKey, DeviceResponse, DeviceSigned, Document, IssuerSigned, ItemsRequest,
    SessionTranscript,
};
use crate::presentation::error::TransferError;
use crate::security::{self, DeviceAuthMethod, DeviceAuthRequest, SecurityProvider};

/// Element identifiers by document then namespace.
pub type RequestItems = BTreeMap<String, BTreeMap<String, Vec<String>>>;
/// Request items by document then namespace.
pub type ItemsByDocument = BTreeMap<String, BTreeMap<String, Vec<RequestItem>>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("'{0}' is not an age_over_NN element identifier")]
    NotAnAgeAttestation(String),
}

/// One data element of a request.
///
/// Identity is the element identifier alone; display metadata is ignored by comparisons.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestItem {
    /// The element identifier, or a dotted path for nested fields.
    pub element_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_to_retain: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_optional: Option<bool>,
}

impl RequestItem {
    pub fn new(element_identifier: impl Into<String>) -> Self {
        Self {
            element_identifier: element_identifier.into(),
            ..Default::default()
        }
    }

    pub fn path(&self) -> &str {
        &self.element_identifier
    }
}

impl PartialEq for RequestItem {
    fn eq(&self, other: &Self) -> bool {
        self.element_identifier == other.element_identifier
    }
}

impl Eq for RequestItem {}

impl Hash for RequestItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.element_identifier.hash(state)
    }
}

impl PartialOrd for RequestItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RequestItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.element_identifier.cmp(&other.element_identifier)
    }
}

/// What to disclose.
#[derive(Debug, Clone, Copy)]
pub enum DisclosureRequest<'a> {
    /// A verifier's items requests, matched by document type, optionally narrowed by the
    /// user's choice (keyed by document type as well).
    Verifier {
        requests: &'a [ItemsRequest],
        selection: Option<&'a RequestItems>,
    },
    /// Items picked by the user, keyed by document id.
    Selection(&'a RequestItems),
}

/// A document with at least one item to disclose.
#[derive(Debug, Clone)]
pub struct DisclosedDocument {
    pub document_id: String,
    pub doc_type: String,
    pub issuer_signed: IssuerSigned,
    pub errors: Option<Errors>,
}

/// Result of [filter].
#[derive(Debug, Clone, Default)]
pub struct Disclosure {
    pub documents: Vec<DisclosedDocument>,
    pub document_errors: Vec<DocumentError>,
    pub valid_items: ItemsByDocument,
    pub error_items: ItemsByDocument,
    /// Display names of the matched credentials, under the summary keys.
    pub document_names: BTreeMap<String, String>,
}

impl Disclosure {
    /// Nothing at all would be returned.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Holds the age part of an `age_over_NN` element identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AgeOver(pub u8);

impl TryFrom<&str> for AgeOver {
    type Error = Error;

    fn try_from(element_identifier: &str) -> Result<Self, Error> {
        element_identifier
            .strip_prefix("age_over_")
            .and_then(|age| age.parse::<u8>().ok())
            .map(AgeOver)
            .ok_or_else(|| Error::NotAnAgeAttestation(element_identifier.to_string()))
    }
}

struct Target<'a> {
    /// Key of the summaries: doc type for verifier requests, document id for selections.
    key: String,
    doc_type: String,
    credential: Option<&'a Credential>,
    namespaces: Vec<(String, Vec<RequestItem>)>,
    chosen: Option<BTreeMap<String, Vec<String>>>,
    age_policy: bool,
}

/// Match a request against the credential store.
pub fn filter(store: &CredentialStore, request: DisclosureRequest<'_>) -> Disclosure {
    let mut disclosure = Disclosure::default();
    for target in targets(store, request) {
        disclose(&mut disclosure, target);
    }
    disclosure
}

fn targets<'a>(store: &'a CredentialStore, request: DisclosureRequest<'_>) -> Vec<Target<'a>> {
    match request {
        DisclosureRequest::Verifier {
            requests,
            selection,
        } => {
            // One target per doc type: a credential is answered once, whatever the number of
            // items requests naming its type.
            let mut targets: Vec<Target<'a>> = Vec::new();
            for request in requests {
                let at = match targets.iter().position(|t| t.key == request.doc_type) {
                    Some(at) => at,
                    None => {
                        targets.push(Target {
                            key: request.doc_type.clone(),
                            doc_type: request.doc_type.clone(),
                            credential: store.first_of_type(&request.doc_type),
                            namespaces: Vec::new(),
                            chosen: selection
                                .map(|s| s.get(&request.doc_type).cloned().unwrap_or_default()),
                            age_policy: true,
                        });
                        targets.len() - 1
                    }
                };
                merge_request(&mut targets[at].namespaces, request);
            }
            targets
        }
        DisclosureRequest::Selection(selection) => selection
            .iter()
            .map(|(id, namespaces)| {
                let credential = store.get(id);
                Target {
                    key: id.clone(),
                    doc_type: credential.map_or_else(|| id.clone(), |c| c.doc_type.clone()),
                    credential,
                    namespaces: namespaces
                        .iter()
                        .map(|(namespace, ids)| {
                            (namespace.clone(), ids.iter().map(RequestItem::new).collect())
                        })
                        .collect(),
                    chosen: None,
                    age_policy: false,
                }
            })
            .collect(),
    }
}

/// Add the elements of `request` to `namespaces`, keeping first-seen order. A repeated element
/// is retained if any of the requests intends to retain it.
fn merge_request(namespaces: &mut Vec<(String, Vec<RequestItem>)>, request: &ItemsRequest) {
    for (namespace, elements) in request.namespaces.iter() {
        let slot = match namespaces.iter().position(|(ns, _)| ns == namespace) {
            Some(slot) => slot,
            None => {
                namespaces.push((namespace.clone(), Vec::new()));
                namespaces.len() - 1
            }
        };
        let items = &mut namespaces[slot].1;
        for (id, intent_to_retain) in elements.iter() {
            match items.iter().position(|item| &item.element_identifier == id) {
                Some(at) => {
                    let item = &mut items[at];
                    item.intent_to_retain =
                        Some(item.intent_to_retain.unwrap_or(false) || *intent_to_retain);
                }
                None => items.push(RequestItem {
                    intent_to_retain: Some(*intent_to_retain),
                    ..RequestItem::new(id.as_str())
                }),
            }
        }
    }
}

fn disclose(disclosure: &mut Disclosure, target: Target<'_>) {
    let Some(credential) = target.credential else {
        tracing::debug!(document = %target.key, "no credential matches the request");
        disclosure
            .document_errors
            .push(DocumentError::from([(target.doc_type, DocumentErrorCode::DataNotReturned)]));
        let requested: BTreeMap<_, _> = target
            .namespaces
            .into_iter()
            .filter(|(_, items)| !items.is_empty())
            .collect();
        if !requested.is_empty() {
            disclosure.error_items.insert(target.key, requested);
        }
        return;
    };
    if let Some(name) = &credential.display_name {
        disclosure
            .document_names
            .insert(target.key.clone(), name.clone());
    }

    let mut namespaces = BTreeMap::new();
    let mut valid = BTreeMap::new();
    let mut errors = BTreeMap::new();
    for (namespace, requested) in target.namespaces {
        let requested: Vec<RequestItem> = requested
            .into_iter()
            .map(|item| named(credential, &namespace, item))
            .collect();
        let held = credential.issuer_signed.items(&namespace);
        if held.is_empty() {
            if !requested.is_empty() {
                errors.insert(namespace, requested);
            }
            continue;
        }

        let excluded = if target.age_policy {
            superseded_age_attestations(requested.iter().map(RequestItem::path), held)
        } else {
            BTreeSet::new()
        };
        let requested: Vec<RequestItem> = requested
            .into_iter()
            .filter(|item| !excluded.contains(item.path()))
            .collect();
        let chosen = target
            .chosen
            .as_ref()
            .map(|chosen| chosen.get(&namespace).map(Vec::as_slice).unwrap_or_default());

        let candidates: Vec<IssuerSignedItemBytes> = held
            .iter()
            .filter(|item| {
                let id = &item.as_ref().element_identifier;
                requested.iter().any(|r| &r.element_identifier == id)
                    && chosen.map_or(true, |chosen| chosen.contains(id))
            })
            .cloned()
            .collect();
        let missing: Vec<RequestItem> = requested
            .iter()
            .filter(|r| {
                !held
                    .iter()
                    .any(|item| item.as_ref().element_identifier == r.element_identifier)
            })
            .cloned()
            .collect();
        if !missing.is_empty() {
            errors.insert(namespace.clone(), missing);
        }
        if let Some(candidates) = NonEmptyVec::maybe_new(candidates) {
            let items = candidates
                .iter()
                .filter_map(|item| {
                    requested
                        .iter()
                        .find(|r| r.element_identifier == item.as_ref().element_identifier)
                        .cloned()
                })
                .collect();
            valid.insert(namespace.clone(), items);
            namespaces.insert(namespace, candidates);
        }
    }

    let element_errors = element_errors(&errors);
    if !errors.is_empty() {
        disclosure.error_items.insert(target.key.clone(), errors);
    }
    match NonEmptyMap::maybe_new(namespaces) {
        Some(namespaces) => {
            disclosure.valid_items.insert(target.key, valid);
            disclosure.documents.push(DisclosedDocument {
                document_id: credential.id.clone(),
                doc_type: credential.doc_type.clone(),
                issuer_signed: IssuerSigned {
                    namespaces: Some(namespaces),
                    issuer_auth: credential.issuer_signed.issuer_auth.clone(),
                },
                errors: element_errors,
            });
        }
        None => {
            tracing::debug!(document = %target.key, "nothing to disclose");
            disclosure.document_errors.push(DocumentError::from([(
                credential.doc_type.clone(),
                DocumentErrorCode::DataNotReturned,
            )]));
        }
    }
}

fn named(credential: &Credential, namespace: &str, item: RequestItem) -> RequestItem {
    if item.display_name.is_some() {
        return item;
    }
    let display_name = credential
        .element_names
        .get(namespace)
        .and_then(|names| names.get(&item.element_identifier))
        .cloned();
    RequestItem {
        display_name,
        ..item
    }
}

fn element_errors(errors: &BTreeMap<String, Vec<RequestItem>>) -> Option<Errors> {
    let errors = errors
        .iter()
        .filter_map(|(namespace, items)| {
            let codes = items
                .iter()
                .map(|item| (item.element_identifier.clone(), DocumentErrorCode::DataNotReturned))
                .collect();
            NonEmptyMap::maybe_new(codes).map(|codes| (namespace.clone(), codes))
        })
        .collect();
    NonEmptyMap::maybe_new(errors)
}

/// Requested `age_over_NN` elements made redundant by another requested one.
///
/// Only applies when more than two are requested in a namespace. The smallest requested `NN`
/// the holder attests `true` and the largest requested `NN` it attests `false` are kept.
pub fn superseded_age_attestations<'a>(
    requested: impl IntoIterator<Item = &'a str>,
    held: &[IssuerSignedItemBytes],
) -> BTreeSet<String> {
    let requested: Vec<(AgeOver, &str)> = requested
        .into_iter()
        .filter_map(|id| AgeOver::try_from(id).ok().map(|age| (age, id)))
        .collect();
    if requested.len() <= 2 {
        return BTreeSet::new();
    }

    let attested = |id: &str| {
        held.iter()
            .map(|item| item.as_ref())
            .find(|item| item.element_identifier == id)
            .and_then(|item| match item.element_value {
                Value::Bool(b) => Some(b),
                _ => None,
            })
    };
    let nearest_true = requested
        .iter()
        .filter(|(_, id)| attested(id) == Some(true))
        .min_by_key(|(age, _)| *age);
    let nearest_false = requested
        .iter()
        .filter(|(_, id)| attested(id) == Some(false))
        .max_by_key(|(age, _)| *age);
    let keep: Vec<&str> = nearest_true
        .into_iter()
        .chain(nearest_false)
        .map(|(_, id)| *id)
        .collect();

    requested
        .into_iter()
        .filter(|(_, id)| !keep.contains(id))
        .map(|(_, id)| id.to_string())
        .collect()
}

/// Element identifiers of a summary, as accepted back in a consent decision.
pub fn element_ids(items: &ItemsByDocument) -> RequestItems {
    items
        .iter()
        .map(|(document, namespaces)| {
            let namespaces = namespaces
                .iter()
                .map(|(namespace, items)| {
                    (
                        namespace.clone(),
                        items.iter().map(|i| i.element_identifier.clone()).collect(),
                    )
                })
                .collect();
            (document.clone(), namespaces)
        })
        .collect()
}

/// Session context needed to authenticate the returned documents.
#[derive(Debug, Clone, Copy)]
pub struct DeviceAuthContext<'a> {
    pub transcript: &'a SessionTranscript,
    pub reader_key: &'a CoseKey,
    pub method: DeviceAuthMethod,
}

/// Assemble the response for `disclosure`, authenticating each document when `auth` is given.
///
/// A failure to authenticate any document fails the whole response.
pub async fn build_response(
    disclosure: &Disclosure,
    store: &CredentialStore,
    security: &dyn SecurityProvider,
    auth: Option<DeviceAuthContext<'_>>,
) -> Result<DeviceResponse, TransferError> {
    let mut documents = Vec::with_capacity(disclosure.documents.len());
    for disclosed in &disclosure.documents {
        let device_signed = match auth {
            Some(auth) => Some(device_signed(disclosed, store, security, auth).await?),
            None => None,
        };
        documents.push(Document {
            doc_type: disclosed.doc_type.clone(),
            issuer_signed: disclosed.issuer_signed.clone(),
            device_signed,
            errors: disclosed.errors.clone(),
        });
    }
    Ok(DeviceResponse {
        version: DeviceResponse::VERSION.into(),
        documents: NonEmptyVec::maybe_new(documents),
        document_errors: NonEmptyVec::maybe_new(disclosure.document_errors.clone()),
        status: Status::OK,
    })
}

async fn device_signed(
    disclosed: &DisclosedDocument,
    store: &CredentialStore,
    security: &dyn SecurityProvider,
    auth: DeviceAuthContext<'_>,
) -> Result<DeviceSigned, TransferError> {
    let failed = |source: security::Error| TransferError::DeviceAuthFailed {
        doc_type: disclosed.doc_type.clone(),
        source,
    };
    let credential = store
        .get(&disclosed.document_id)
        .ok_or_else(|| failed(security::Error::DeviceAuth("credential is gone".into())))?;
    let device_auth = security
        .build_device_auth(DeviceAuthRequest {
            doc_type: &disclosed.doc_type,
            transcript: auth.transcript,
            reader_key: auth.reader_key,
            device_key: &credential.private_key,
            method: auth.method,
            unlock_data: credential.unlock_data.as_deref(),
        })
        .await
        .map_err(failed)?;
    let namespaces = Tag24::new(DeviceNamespaces::new())
        .map_err(|e| failed(security::Error::DeviceAuth(e.to_string())))?;
    Ok(DeviceSigned {
        namespaces,
        device_auth,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cose::CoseValue;
    use crate::definitions::IssuerSignedItem;
    use crate::security::{DevicePrivateKey, IsoSecurityProvider};
    use coset::CoseSign1Builder;
    use rand::rngs::OsRng;

    const MDL: &str = "org.iso.18013.5.1.mDL";
    const NS: &str = "org.iso.18013.5.1";

    fn credential(id: &str, doc_type: &str, namespace: &str, items: &[(&str, Value)]) -> Credential {
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
                .unwrap()
            })
            .collect::<Vec<_>>();
        Credential {
            id: id.into(),
            doc_type: doc_type.into(),
            issuer_signed: IssuerSigned {
                namespaces: Some(NonEmptyMap::new(
                    namespace.to_string(),
                    NonEmptyVec::try_from(items).unwrap(),
                )),
                issuer_auth: CoseValue(CoseSign1Builder::new().signature(vec![7; 64]).build()),
            },
            private_key: DevicePrivateKey::new(p256::SecretKey::random(&mut OsRng)),
            unlock_data: None,
            display_name: None,
            element_names: BTreeMap::new(),
        }
    }

    fn items_request(doc_type: &str, namespace: &str, elements: &[&str]) -> ItemsRequest {
        let elements = elements.iter().map(|e| (e.to_string(), false)).collect::<BTreeMap<_, _>>();
        ItemsRequest {
            doc_type: doc_type.into(),
            namespaces: NonEmptyMap::new(
                namespace.to_string(),
                NonEmptyMap::try_from(elements).unwrap(),
            ),
            request_info: None,
        }
    }

    fn ids(items: &[RequestItem]) -> Vec<&str> {
        items.iter().map(RequestItem::path).collect()
    }

    #[tokio::test]
    async fn partial_match_reports_missing_items() {
        let store = CredentialStore::new([credential("doc-1", "X", "core", &[("age", Value::Integer(42.into()))])]);
        let requests = [items_request("X", "core", &["age", "name"])];
        let disclosure = filter(
            &store,
            DisclosureRequest::Verifier {
                requests: &requests,
                selection: None,
            },
        );

        assert_eq!(ids(&disclosure.valid_items["X"]["core"]), vec!["age"]);
        assert_eq!(ids(&disclosure.error_items["X"]["core"]), vec!["name"]);
        assert!(disclosure.document_errors.is_empty());

        let response = build_response(&disclosure, &store, &IsoSecurityProvider, None)
            .await
            .unwrap();
        let documents = response.documents.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].doc_type, "X");
        let disclosed: Vec<_> = documents[0]
            .issuer_signed
            .element_identifiers()
            .map(|(_, id)| id)
            .collect();
        assert_eq!(disclosed, vec!["age"]);
        assert_eq!(
            documents[0].errors.as_ref().unwrap()["core"]["name"],
            DocumentErrorCode::DataNotReturned
        );
        assert!(documents[0].device_signed.is_none());
    }

    #[tokio::test]
    async fn repeated_doc_type_is_answered_once() {
        let store = CredentialStore::new([credential(
            "doc-1",
            "X",
            "core",
            &[("age", Value::Bool(true)), ("name", Value::Text("Doe".into()))],
        )]);
        let mut retained = items_request("X", "core", &["name"]);
        retained.namespaces = NonEmptyMap::new(
            "core".to_string(),
            NonEmptyMap::new("name".to_string(), true),
        );
        let requests = [items_request("X", "core", &["age"]), retained];
        let disclosure = filter(
            &store,
            DisclosureRequest::Verifier {
                requests: &requests,
                selection: None,
            },
        );

        assert_eq!(disclosure.documents.len(), 1);
        let shown = &disclosure.valid_items["X"]["core"];
        assert_eq!(ids(shown), vec!["age", "name"]);
        assert_eq!(shown[1].intent_to_retain, Some(true));

        let response = build_response(&disclosure, &store, &IsoSecurityProvider, None)
            .await
            .unwrap();
        let documents = response.documents.unwrap();
        assert_eq!(documents.len(), 1);
        // Everything sent was shown for consent.
        for (namespace, id) in documents[0].issuer_signed.element_identifiers() {
            assert!(ids(&disclosure.valid_items["X"][namespace]).contains(&id));
        }
    }

    #[tokio::test]
    async fn nothing_held_degrades_to_document_error() {
        let store = CredentialStore::new([credential("doc-1", "X", "core", &[("age", Value::Bool(true))])]);
        let requests = [items_request("X", "other", &["name"])];
        let disclosure = filter(
            &store,
            DisclosureRequest::Verifier {
                requests: &requests,
                selection: None,
            },
        );
        assert!(disclosure.is_empty());
        assert!(disclosure.valid_items.is_empty());
        assert_eq!(ids(&disclosure.error_items["X"]["other"]), vec!["name"]);

        let response = build_response(&disclosure, &store, &IsoSecurityProvider, None)
            .await
            .unwrap();
        assert!(response.documents.is_none());
        assert_eq!(
            response.document_errors.unwrap()[0]["X"],
            DocumentErrorCode::DataNotReturned
        );
    }

    #[test]
    fn unknown_document_type() {
        let store = CredentialStore::new([credential("doc-1", MDL, NS, &[("family_name", Value::Text("Doe".into()))])]);
        let requests = [items_request("org.example.other", NS, &["family_name"])];
        let disclosure = filter(
            &store,
            DisclosureRequest::Verifier {
                requests: &requests,
                selection: None,
            },
        );
        assert!(disclosure.is_empty());
        assert_eq!(disclosure.document_errors.len(), 1);
        assert!(disclosure.document_errors[0].contains_key("org.example.other"));
    }

    #[test]
    fn user_choice_narrows_verifier_request() {
        let store = CredentialStore::new([credential(
            "doc-1",
            MDL,
            NS,
            &[
                ("family_name", Value::Text("Doe".into())),
                ("given_name", Value::Text("Jane".into())),
            ],
        )]);
        let requests = [items_request(MDL, NS, &["family_name", "given_name"])];
        let selection = RequestItems::from([(
            MDL.to_string(),
            BTreeMap::from([(NS.to_string(), vec!["given_name".to_string()])]),
        )]);
        let disclosure = filter(
            &store,
            DisclosureRequest::Verifier {
                requests: &requests,
                selection: Some(&selection),
            },
        );
        assert_eq!(ids(&disclosure.valid_items[MDL][NS]), vec!["given_name"]);
        assert!(disclosure.error_items.is_empty());
    }

    #[test]
    fn selection_matches_by_document_id() {
        let mut b = credential("b", MDL, NS, &[("family_name", Value::Text("B".into()))]);
        b.display_name = Some("Work licence".into());
        let store = CredentialStore::new([
            credential("a", MDL, NS, &[("family_name", Value::Text("A".into()))]),
            b,
        ]);
        let selection = RequestItems::from([(
            "b".to_string(),
            BTreeMap::from([(NS.to_string(), vec!["family_name".to_string()])]),
        )]);
        let disclosure = filter(&store, DisclosureRequest::Selection(&selection));
        assert_eq!(disclosure.documents.len(), 1);
        assert_eq!(disclosure.documents[0].document_id, "b");
        assert!(disclosure.valid_items.contains_key("b"));
        assert_eq!(
            disclosure.document_names,
            BTreeMap::from([("b".to_string(), "Work licence".to_string())])
        );
    }

    #[test]
    fn redundant_age_attestations_are_excluded() {
        let held = [
            ("age_over_18", Value::Bool(true)),
            ("age_over_21", Value::Bool(true)),
            ("age_over_65", Value::Bool(false)),
            ("age_over_70", Value::Bool(false)),
        ];
        let store = CredentialStore::new([credential("doc-1", MDL, NS, &held)]);
        let requests = [items_request(
            MDL,
            NS,
            &["age_over_18", "age_over_21", "age_over_65", "age_over_70"],
        )];
        let disclosure = filter(
            &store,
            DisclosureRequest::Verifier {
                requests: &requests,
                selection: None,
            },
        );
        assert_eq!(
            ids(&disclosure.valid_items[MDL][NS]),
            vec!["age_over_18", "age_over_70"]
        );
        assert!(disclosure.error_items.is_empty());

        // A user selection is never narrowed by the age policy.
        let selection = element_ids(&BTreeMap::from([(
            "doc-1".to_string(),
            BTreeMap::from([(
                NS.to_string(),
                held.iter().map(|(id, _)| RequestItem::new(*id)).collect(),
            )]),
        )]));
        let disclosure = filter(&store, DisclosureRequest::Selection(&selection));
        assert_eq!(disclosure.valid_items["doc-1"][NS].len(), 4);
    }

    #[test]
    fn two_age_attestations_are_left_alone() {
        let store = CredentialStore::new([credential(
            "doc-1",
            MDL,
            NS,
            &[("age_over_18", Value::Bool(true)), ("age_over_21", Value::Bool(true))],
        )]);
        let held = store.get("doc-1").unwrap().issuer_signed.items(NS);
        assert!(superseded_age_attestations(["age_over_18", "age_over_21"], held).is_empty());
        assert_eq!(AgeOver::try_from("age_over_21").unwrap(), AgeOver(21));
        assert!(AgeOver::try_from("family_name").is_err());
    }

    #[test]
    fn request_item_identity_ignores_metadata() {
        let plain = RequestItem::new("family_name");
        let named = RequestItem {
            display_name: Some("Family name".into()),
            intent_to_retain: Some(true),
            ..RequestItem::new("family_name")
        };
        assert_eq!(plain, named);
        assert_eq!(
            std::collections::HashSet::from([plain, named]).len(),
            1
        );
    }

    #[test]
    fn display_names_come_from_the_credential() {
        let mut held = credential("doc-1", MDL, NS, &[("family_name", Value::Text("Doe".into()))]);
        held.element_names = BTreeMap::from([(
            NS.to_string(),
            BTreeMap::from([("family_name".to_string(), "Family name".to_string())]),
        )]);
        let store = CredentialStore::new([held]);
        let requests = [items_request(MDL, NS, &["family_name"])];
        let disclosure = filter(
            &store,
            DisclosureRequest::Verifier {
                requests: &requests,
                selection: None,
            },
        );
        assert_eq!(
            disclosure.valid_items[MDL][NS][0].display_name.as_deref(),
            Some("Family name")
        );
    }
}
