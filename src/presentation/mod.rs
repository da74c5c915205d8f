//! Holder-side proximity presentation over a BLE-style three-characteristic channel.
//!
//! A [TransferSession] walks one presentation from engagement to teardown:
//!
//! 1. the transport reports it is ready, an [Engagement] is generated and advertised,
//! 2. the reader subscribes to both notifying characteristics and writes the start marker,
//! 3. the encrypted request arrives as [fragment]s and is reassembled,
//! 4. the [disclosure] filter matches it against the credentials and the host is asked for consent,
//! 5. the response is authenticated, encrypted through the [EncryptionGateway] and framed
//!    back to the reader.
//!
//! [SessionHandle] runs a session on its own task for hosts whose transport calls back from
//! arbitrary threads.
pub mod channel;
pub mod delegate;
pub mod device;
pub mod disclosure;
pub mod engagement;
pub mod error;
pub mod fragment;
pub mod gateway;
pub mod handle;
pub mod reader;
pub mod status;

pub use channel::{Characteristic, ChannelAck, Transport, TransportState};
pub use delegate::{TransferDelegate, UserRequestInfo};
pub use device::TransferSession;
pub use disclosure::{Disclosure, DisclosureRequest, RequestItem, RequestItems};
pub use engagement::Engagement;
pub use error::{ErrorKind, TransferError};
pub use gateway::EncryptionGateway;
pub use handle::{ConsentResponder, EventSender, SessionHandle};
pub use reader::ReaderSession;
pub use status::{Event, Subscriptions, TransferStatus};
