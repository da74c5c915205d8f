//! How a transfer session talks back to the hosting application.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::presentation::disclosure::ItemsByDocument;
use crate::presentation::error::TransferError;
use crate::presentation::handle::ConsentResponder;
use crate::presentation::status::TransferStatus;
use crate::security::ReaderAuthOutcome;

/// What the user is asked to consent to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRequestInfo {
    /// Requested items the holder can return, by document type then namespace.
    pub valid_items_requested: ItemsByDocument,
    /// Requested items the holder does not have.
    pub error_items_requested: ItemsByDocument,
    /// Display names of the matched credentials, keyed like the item summaries.
    #[serde(default)]
    pub document_names: BTreeMap<String, String>,
    /// Present when the reader signed its request.
    pub reader_auth: Option<ReaderAuthOutcome>,
}

/// Callbacks of a transfer session.
///
/// Called from inside the session, so implementations must return quickly. The consent
/// decision is given later through the [ConsentResponder].
pub trait TransferDelegate: Send + Sync {
    fn did_change_status(&self, _status: TransferStatus) {}

    fn did_receive_request(&self, request: UserRequestInfo, responder: ConsentResponder);

    fn did_finish_with_error(&self, _error: &TransferError) {}
}
