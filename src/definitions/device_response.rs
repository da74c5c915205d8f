use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;

use crate::definitions::{
    helpers::{NonEmptyMap, NonEmptyVec},
    DeviceSigned, IssuerSigned,
};

/// Represents a device response.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<Documents>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_errors: Option<DocumentErrors>,

    pub status: Status,
}

pub type Documents = NonEmptyVec<Document>;

/// A disclosed document: the issuer-signed subset and the holder's proof of possession.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub doc_type: String,

    pub issuer_signed: IssuerSigned,

    /// Absent only when the response is assembled without a live session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_signed: Option<DeviceSigned>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Errors>,
}

/// Errors mapped by namespace and element identifier.
pub type Errors = NonEmptyMap<String, NonEmptyMap<String, DocumentErrorCode>>;
/// A list of document errors.
pub type DocumentErrors = NonEmptyVec<DocumentError>;
/// A map of document type to document error for them.
pub type DocumentError = BTreeMap<String, DocumentErrorCode>;

/// Document specific errors.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "i64", into = "i64")]
pub enum DocumentErrorCode {
    DataNotReturned,
    ApplicationSpecific(i64),
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, AsRefStr)]
#[serde(try_from = "u64", into = "u64")]
pub enum Status {
    OK,
    GeneralError,
    CborDecodingError,
    CborValidationError,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid status value: {0}")]
    InvalidStatus(u64),
}

impl DeviceResponse {
    pub const VERSION: &'static str = "1.0";
}

impl From<DocumentErrorCode> for i64 {
    fn from(c: DocumentErrorCode) -> i64 {
        match c {
            DocumentErrorCode::DataNotReturned => 0,
            DocumentErrorCode::ApplicationSpecific(i) => i,
        }
    }
}

impl TryFrom<i64> for DocumentErrorCode {
    type Error = std::convert::Infallible;

    fn try_from(i: i64) -> Result<Self, Self::Error> {
        Ok(match i {
            0 => DocumentErrorCode::DataNotReturned,
            i => DocumentErrorCode::ApplicationSpecific(i),
        })
    }
}

impl From<Status> for u64 {
    fn from(s: Status) -> u64 {
        match s {
            Status::OK => 0,
            Status::GeneralError => 10,
            Status::CborDecodingError => 11,
            Status::CborValidationError => 12,
        }
    }
}

impl TryFrom<u64> for Status {
    type Error = Error;

    fn try_from(n: u64) -> Result<Status, Error> {
        match n {
            0 => Ok(Status::OK),
            10 => Ok(Status::GeneralError),
            11 => Ok(Status::CborDecodingError),
            12 => Ok(Status::CborValidationError),
            _ => Err(Error::InvalidStatus(n)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;

    #[test]
    fn document_errors_only() {
        let response = DeviceResponse {
            version: DeviceResponse::VERSION.into(),
            documents: None,
            document_errors: Some(NonEmptyVec::new(BTreeMap::from([(
                "org.iso.18013.5.1.mDL".to_string(),
                DocumentErrorCode::DataNotReturned,
            )]))),
            status: Status::OK,
        };
        let bytes = cbor::to_vec(&response).unwrap();
        let decoded: DeviceResponse = cbor::from_slice(&bytes).unwrap();
        assert!(decoded.documents.is_none());
        assert_eq!(decoded.status, Status::OK);
        assert_eq!(
            decoded.document_errors.unwrap()[0]["org.iso.18013.5.1.mDL"],
            DocumentErrorCode::DataNotReturned
        );
    }

    #[test]
    fn status_codes() {
        assert_eq!(u64::from(Status::CborValidationError), 12);
        assert!(Status::try_from(3).is_err());
        assert_eq!(
            DocumentErrorCode::try_from(-5),
            Ok(DocumentErrorCode::ApplicationSpecific(-5))
        );
    }
}
