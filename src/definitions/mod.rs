pub mod cose_key;
pub mod device_engagement;
pub mod device_request;
pub mod device_response;
pub mod device_signed;
pub mod helpers;
pub mod issuer_signed;
pub mod session;

pub use cose_key::CoseKey;
pub use device_engagement::{BleOptions, DeviceEngagement, DeviceRetrievalMethod, Security};
pub use device_request::{DeviceRequest, DocRequest, ItemsRequest, ReaderAuthentication};
pub use device_response::{DeviceResponse, Document, DocumentErrorCode};
pub use device_signed::{DeviceAuth, DeviceAuthentication, DeviceSigned};
pub use issuer_signed::{IssuerSigned, IssuerSignedItem};
pub use session::{Handover, SessionData, SessionEstablishment, SessionTranscript};
