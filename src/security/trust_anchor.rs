//! Reader certificate roots, and the chain check applied to reader certificates.
use std::time::{SystemTime, UNIX_EPOCH};

use p256::ecdsa::{Signature, VerifyingKey};
use signature::Verifier;
use x509_cert::der::{Decode, DecodePem, Encode};
use x509_cert::Certificate;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to parse certificate: {0}")]
    Parse(String),
    #[error("The certificate issuer does not match any known trusted issuer")]
    UnknownIssuer,
    #[error("Expired certificate with subject: {0}")]
    Expired(String),
    #[error("Not yet valid certificate with subject: {0}")]
    NotYetValid(String),
    #[error("certificate signature could not be validated: {0}")]
    Signature(String),
}

/// Root certificates accepted for reader authentication.
#[derive(Debug, Clone, Default)]
pub struct TrustAnchorRegistry {
    anchors: Vec<Certificate>,
}

impl TrustAnchorRegistry {
    pub fn new(anchors: Vec<Certificate>) -> Self {
        Self { anchors }
    }

    pub fn from_pem_certificates<S: AsRef<str>>(pems: &[S]) -> Result<Self, Error> {
        pems.iter()
            .map(|pem| {
                Certificate::from_pem(pem.as_ref().as_bytes()).map_err(|e| Error::Parse(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    pub fn from_der_certificates<B: AsRef<[u8]>>(ders: &[B]) -> Result<Self, Error> {
        ders.iter()
            .map(|der| Certificate::from_der(der.as_ref()).map_err(|e| Error::Parse(e.to_string())))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// Check `leaf` against the registry: a known issuer whose key signed it, and a current validity period.
    pub fn verify(&self, leaf: &Certificate) -> Result<&Certificate, Error> {
        check_validity_period(leaf)?;
        let leaf_issuer = &leaf.tbs_certificate.issuer;
        let anchor = self
            .anchors
            .iter()
            .find(|anchor| anchor.tbs_certificate.subject == *leaf_issuer)
            .ok_or(Error::UnknownIssuer)?;
        issuer_signed_subject(leaf, anchor)?;
        Ok(anchor)
    }
}

pub fn check_validity_period(certificate: &Certificate) -> Result<(), Error> {
    let validity = &certificate.tbs_certificate.validity;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    if validity.not_after.to_unix_duration().as_secs() < now {
        return Err(Error::Expired(certificate.tbs_certificate.subject.to_string()));
    }
    if validity.not_before.to_unix_duration().as_secs() > now {
        return Err(Error::NotYetValid(
            certificate.tbs_certificate.subject.to_string(),
        ));
    }
    Ok(())
}

/// The P-256 public key carried by `certificate`.
pub fn public_key(certificate: &Certificate) -> Result<VerifyingKey, Error> {
    VerifyingKey::from_sec1_bytes(
        certificate
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes(),
    )
    .map_err(|e| Error::Parse(e.to_string()))
}

/// Check that the issuer certificate signed the subject certificate.
pub fn issuer_signed_subject(subject: &Certificate, issuer: &Certificate) -> Result<(), Error> {
    let issuer_public_key = public_key(issuer)?;
    let sig = Signature::from_der(subject.signature.raw_bytes())
        .map_err(|e| Error::Signature(e.to_string()))?;
    let tbs = subject
        .tbs_certificate
        .to_der()
        .map_err(|e| Error::Parse(e.to_string()))?;
    issuer_public_key.verify(&tbs, &sig).map_err(|e| {
        tracing::info!("subject certificate signature could not be validated: {e:?}");
        Error::Signature(e.to_string())
    })
}
