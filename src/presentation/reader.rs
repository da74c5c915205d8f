//! Reader side of a proximity presentation: key agreement with the holder's engagement,
//! request construction and response decryption.
//!
//! Used to simulate a verifier against a [TransferSession](crate::presentation::device::TransferSession).
use coset::{iana, CoseSign1Builder, HeaderBuilder};
use hmac::{Hmac, Mac};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::Sha256;
use signature::{Signer, Verifier};

use crate::cbor::{self, CborError, Value};
use crate::cose::{CoseValue, X5CHAIN_HEADER_LABEL};
use crate::definitions::device_engagement::{self, DeviceEngagement};
use crate::definitions::device_request::{ItemsRequestBytes, ReaderAuth};
use crate::definitions::helpers::{NonEmptyVec, Tag24};
use crate::definitions::session::{self, DeviceEngagementBytes, Party, SessionKey, Status};
use crate::definitions::{
    CoseKey, DeviceAuth, DeviceAuthentication, DeviceRequest, DeviceResponse, DocRequest,
    Document, Handover, ItemsRequest, ReaderAuthentication, SessionData, SessionEstablishment,
    SessionTranscript,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the device engagement carries no usable key: {0}")]
    DeviceKey(String),
    #[error(transparent)]
    Engagement(#[from] device_engagement::Error),
    #[error(transparent)]
    Session(#[from] session::Error),
    #[error(transparent)]
    Cbor(#[from] CborError),
    #[error("unable to encode: {0}")]
    Encoding(String),
    #[error("no document was requested")]
    NothingRequested,
    #[error("the holder ended the session (status {0:?})")]
    Terminated(Option<Status>),
    #[error("device authentication is invalid: {0}")]
    DeviceAuth(String),
}

/// Key and certificate chain used to sign requests.
pub struct ReaderAuthKey {
    signing_key: SigningKey,
    x5chain: Vec<Vec<u8>>,
}

impl ReaderAuthKey {
    /// `x5chain` holds DER certificates, leaf first.
    pub fn new(signing_key: SigningKey, x5chain: Vec<Vec<u8>>) -> Self {
        Self {
            signing_key,
            x5chain,
        }
    }

    fn sign(
        &self,
        transcript: &SessionTranscript,
        items_request: &ItemsRequestBytes,
    ) -> Result<ReaderAuth, Error> {
        let payload = Tag24::new(ReaderAuthentication::new(
            transcript.clone(),
            items_request.clone(),
        ))
        .and_then(|t| t.to_tagged_bytes())
        .map_err(|e| Error::Encoding(e.to_string()))?;
        let chain = match self.x5chain.as_slice() {
            [leaf] => Value::Bytes(leaf.clone()),
            chain => Value::Array(chain.iter().cloned().map(Value::Bytes).collect()),
        };
        let mut sign1 = CoseSign1Builder::new()
            .protected(HeaderBuilder::new().algorithm(iana::Algorithm::ES256).build())
            .unprotected(HeaderBuilder::new().value(X5CHAIN_HEADER_LABEL, chain).build())
            .payload(payload)
            .create_signature(&[], |tbs| {
                let signature: Signature = self.signing_key.sign(tbs);
                signature.to_bytes().to_vec()
            })
            .build();
        sign1.payload = None;
        Ok(CoseValue(sign1))
    }
}

pub struct ReaderSession {
    transcript: SessionTranscript,
    e_reader_key: SecretKey,
    sk_reader: SessionKey,
    sk_device: SessionKey,
}

impl ReaderSession {
    /// Agree on session keys with the holder behind `device_engagement`.
    pub fn new(device_engagement: DeviceEngagementBytes) -> Result<Self, Error> {
        let e_reader_key = SecretKey::random(&mut OsRng);
        let reader_key = CoseKey::try_from(&e_reader_key.public_key())
            .map_err(|e| Error::Encoding(e.to_string()))?;
        let reader_key = Tag24::new(reader_key).map_err(|e| Error::Encoding(e.to_string()))?;
        let device_key = PublicKey::try_from(device_engagement.as_ref().security.1.as_ref())
            .map_err(|e| Error::DeviceKey(e.to_string()))?;

        let transcript = SessionTranscript(device_engagement, reader_key, Handover::Qr);
        let shared_secret = session::shared_secret(&e_reader_key, &device_key);
        let sk_reader = session::derive_session_key(&shared_secret, &transcript, Party::Reader)?;
        let sk_device = session::derive_session_key(&shared_secret, &transcript, Party::Device)?;
        Ok(Self {
            transcript,
            e_reader_key,
            sk_reader,
            sk_device,
        })
    }

    /// A new session plus the encoded [SessionEstablishment] carrying `request`.
    pub fn establish(
        device_engagement: DeviceEngagementBytes,
        request: &[u8],
    ) -> Result<(Self, Vec<u8>), Error> {
        let mut reader = Self::new(device_engagement)?;
        let establishment = reader.establishment(request)?;
        Ok((reader, establishment))
    }

    /// As [ReaderSession::establish], from the contents of the holder's QR code.
    pub fn establish_from_qr(qr_code_uri: &str, request: &[u8]) -> Result<(Self, Vec<u8>), Error> {
        let device_engagement = Tag24::<DeviceEngagement>::from_qr_code_uri(qr_code_uri)?;
        Self::establish(device_engagement, request)
    }

    /// Encrypt `request` into the first message of the session.
    pub fn establishment(&mut self, request: &[u8]) -> Result<Vec<u8>, Error> {
        let data = self.encrypt(request)?;
        Ok(cbor::to_vec(&SessionEstablishment {
            e_reader_key: Some(self.transcript.1.clone()),
            data: data.into(),
        })?)
    }

    pub fn transcript(&self) -> &SessionTranscript {
        &self.transcript
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(self.sk_reader.encrypt(plaintext)?)
    }

    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(self.sk_device.decrypt(ciphertext)?)
    }

    /// Encode a [DeviceRequest] for `items_requests`, signing each one when `reader_auth` is given.
    pub fn device_request(
        &self,
        items_requests: Vec<ItemsRequest>,
        reader_auth: Option<&ReaderAuthKey>,
    ) -> Result<Vec<u8>, Error> {
        let doc_requests = items_requests
            .into_iter()
            .map(|items_request| {
                let items_request =
                    Tag24::new(items_request).map_err(|e| Error::Encoding(e.to_string()))?;
                let reader_auth = reader_auth
                    .map(|key| key.sign(&self.transcript, &items_request))
                    .transpose()?;
                Ok(DocRequest {
                    items_request,
                    reader_auth,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let doc_requests = NonEmptyVec::maybe_new(doc_requests).ok_or(Error::NothingRequested)?;
        Ok(cbor::to_vec(&DeviceRequest {
            version: DeviceRequest::VERSION.into(),
            doc_requests,
        })?)
    }

    /// Decode and decrypt the holder's [SessionData].
    pub fn handle_response(&mut self, message: &[u8]) -> Result<DeviceResponse, Error> {
        let session_data: SessionData = cbor::from_slice(message)?;
        let Some(data) = session_data.data else {
            return Err(Error::Terminated(session_data.status));
        };
        let response = self.decrypt(data.as_ref())?;
        Ok(cbor::from_slice(&response)?)
    }

    /// Check the holder's proof of possession of `device_key` for `document`.
    pub fn verify_device_auth(&self, document: &Document, device_key: &PublicKey) -> Result<(), Error> {
        let device_signed = document
            .device_signed
            .as_ref()
            .ok_or_else(|| Error::DeviceAuth("document is not device signed".into()))?;
        let payload = Tag24::new(DeviceAuthentication::new(
            self.transcript.clone(),
            document.doc_type.clone(),
            device_signed.namespaces.clone(),
        ))
        .and_then(|t| t.to_tagged_bytes())
        .map_err(|e| Error::Encoding(e.to_string()))?;

        match &device_signed.device_auth {
            DeviceAuth::DeviceSignature(CoseValue(sign1)) => {
                let verifier = VerifyingKey::from(device_key);
                let mut sign1 = sign1.clone();
                sign1.payload = Some(payload);
                sign1
                    .verify_signature(&[], |signature, data| {
                        verifier.verify(data, &Signature::from_slice(signature)?)
                    })
                    .map_err(|e| Error::DeviceAuth(e.to_string()))
            }
            DeviceAuth::DeviceMac(CoseValue(mac0)) => {
                let e_mac_key =
                    session::derive_e_mac_key(&self.e_reader_key, device_key, &self.transcript)?;
                let mut mac0 = mac0.clone();
                mac0.payload = Some(payload);
                mac0.verify_tag(&[], |tag, data| {
                    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&e_mac_key)
                        .map_err(|e| e.to_string())?;
                    mac.update(data);
                    mac.verify_slice(tag).map_err(|e| e.to_string())
                })
                .map_err(Error::DeviceAuth)
            }
        }
    }
}

impl std::fmt::Debug for ReaderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderSession").finish_non_exhaustive()
    }
}
