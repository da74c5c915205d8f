use async_trait::async_trait;
use coset::{iana, CoseMac0Builder, CoseSign1Builder, HeaderBuilder};
use hmac::{Hmac, Mac};
use p256::ecdsa::{Signature, SigningKey};
use p256::PublicKey;
use sha2::Sha256;
use signature::{Signer, Verifier};
use x509_cert::der::Decode;
use x509_cert::Certificate;

use super::{
    DeviceAuthMethod, DeviceAuthRequest, Error, ReaderAuthInput, ReaderAuthOutcome,
    SecurityProvider, SessionEncryption, TrustAnchorRegistry,
};
use crate::cose::CoseValue;
use crate::definitions::device_signed::{DeviceAuthentication, DeviceNamespaces};
use crate::definitions::helpers::Tag24;
use crate::definitions::session::{self, Handover, Party, SessionKey};
use crate::definitions::{
    CoseKey, DeviceAuth, ReaderAuthentication, SessionEstablishment, SessionTranscript,
};
use crate::presentation::engagement::Engagement;

/// Cipher suite 1: ECDH P-256, HKDF-SHA-256, AES-256-GCM, ES256 and HMAC-SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsoSecurityProvider;

/// Holder side of an established session.
#[derive(Debug)]
pub struct IsoSessionEncryption {
    transcript: SessionTranscript,
    reader_key: CoseKey,
    sk_device: SessionKey,
    sk_reader: SessionKey,
}

impl SessionEncryption for IsoSessionEncryption {
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(self.sk_device.encrypt(plaintext)?)
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(self.sk_reader.decrypt(ciphertext)?)
    }

    fn transcript(&self) -> &SessionTranscript {
        &self.transcript
    }

    fn reader_key(&self) -> &CoseKey {
        &self.reader_key
    }
}

fn device_authentication_bytes(
    transcript: &SessionTranscript,
    doc_type: &str,
) -> Result<Vec<u8>, Error> {
    let namespaces = Tag24::new(DeviceNamespaces::new())
        .map_err(|e| Error::DeviceAuth(e.to_string()))?;
    let authentication = DeviceAuthentication::new(transcript.clone(), doc_type.into(), namespaces);
    Tag24::new(authentication)
        .and_then(|t| t.to_tagged_bytes())
        .map_err(|e| Error::DeviceAuth(e.to_string()))
}

#[async_trait]
impl SecurityProvider for IsoSecurityProvider {
    async fn derive_session_keys(
        &self,
        establishment: &SessionEstablishment,
        engagement: &Engagement,
        handover: &Handover,
    ) -> Result<Box<dyn SessionEncryption>, Error> {
        let e_reader_key = establishment
            .e_reader_key
            .clone()
            .ok_or(Error::ReaderKeyMissing)?;
        let reader_public = PublicKey::try_from(e_reader_key.as_ref())
            .map_err(|e| Error::InvalidReaderKey(e.to_string()))?;
        let transcript = SessionTranscript(
            engagement.device_engagement().clone(),
            e_reader_key.clone(),
            handover.clone(),
        );
        let shared_secret = session::shared_secret(engagement.secret(), &reader_public);
        let sk_device = session::derive_session_key(&shared_secret, &transcript, Party::Device)?;
        let sk_reader = session::derive_session_key(&shared_secret, &transcript, Party::Reader)?;
        tracing::debug!("derived session keys");
        Ok(Box::new(IsoSessionEncryption {
            transcript,
            reader_key: e_reader_key.into_inner(),
            sk_device,
            sk_reader,
        }))
    }

    async fn build_device_auth(&self, request: DeviceAuthRequest<'_>) -> Result<DeviceAuth, Error> {
        let payload = device_authentication_bytes(request.transcript, request.doc_type)?;
        match request.method {
            DeviceAuthMethod::DeviceSignature => {
                let signer = SigningKey::from(request.device_key.secret());
                let protected = HeaderBuilder::new()
                    .algorithm(iana::Algorithm::ES256)
                    .build();
                let mut sign1 = CoseSign1Builder::new()
                    .protected(protected)
                    .payload(payload)
                    .create_signature(&[], |tbs| {
                        let signature: Signature = signer.sign(tbs);
                        signature.to_bytes().to_vec()
                    })
                    .build();
                sign1.payload = None;
                Ok(DeviceAuth::DeviceSignature(CoseValue(sign1)))
            }
            DeviceAuthMethod::DeviceMac => {
                let reader_public = PublicKey::try_from(request.reader_key)
                    .map_err(|e| Error::InvalidReaderKey(e.to_string()))?;
                let e_mac_key = session::derive_e_mac_key(
                    request.device_key.secret(),
                    &reader_public,
                    request.transcript,
                )?;
                let mac = <Hmac<Sha256> as Mac>::new_from_slice(&e_mac_key)
                    .map_err(|e| Error::DeviceAuth(e.to_string()))?;
                let protected = HeaderBuilder::new()
                    .algorithm(iana::Algorithm::HMAC_256_256)
                    .build();
                let mut mac0 = CoseMac0Builder::new()
                    .protected(protected)
                    .payload(payload)
                    .create_tag(&[], move |data| {
                        let mut mac = mac;
                        mac.update(data);
                        mac.finalize().into_bytes().to_vec()
                    })
                    .build();
                mac0.payload = None;
                Ok(DeviceAuth::DeviceMac(CoseValue(mac0)))
            }
        }
    }

    async fn validate_reader_auth(
        &self,
        input: ReaderAuthInput<'_>,
        trust_anchors: &TrustAnchorRegistry,
    ) -> ReaderAuthOutcome {
        let Some(leaf_der) = input.x5chain.first() else {
            return ReaderAuthOutcome::failed("reader certificate chain is missing");
        };
        let leaf = match Certificate::from_der(leaf_der) {
            Ok(leaf) => leaf,
            Err(e) => {
                return ReaderAuthOutcome::failed(format!("unable to parse reader certificate: {e}"))
            }
        };
        let mut outcome = ReaderAuthOutcome {
            certificate_issuer: Some(leaf.tbs_certificate.issuer.to_string()),
            certificate_subject: Some(leaf.tbs_certificate.subject.to_string()),
            ..Default::default()
        };

        if let Err(e) = verify_reader_signature(&input, &leaf) {
            outcome.message = Some(e);
            return outcome;
        }
        match trust_anchors.verify(&leaf) {
            Ok(_) => outcome.validated = true,
            Err(e) => outcome.message = Some(e.to_string()),
        }
        outcome
    }
}

fn verify_reader_signature(input: &ReaderAuthInput<'_>, leaf: &Certificate) -> Result<(), String> {
    let key = super::trust_anchor::public_key(leaf).map_err(|e| e.to_string())?;
    let payload = Tag24::new(ReaderAuthentication::new(
        input.transcript.clone(),
        input.items_request.clone(),
    ))
    .and_then(|t| t.to_tagged_bytes())
    .map_err(|e| e.to_string())?;
    let mut sign1 = input.reader_auth.clone();
    sign1.payload = Some(payload);
    sign1
        .verify_signature(&[], |signature, data| {
            let signature = Signature::from_slice(signature)?;
            key.verify(data, &signature)
        })
        .map_err(|e| format!("reader signature is invalid: {e}"))
}
