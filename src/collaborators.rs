//! Interfaces to the components this crate relies on but does not implement:
//! CMS/ASN.1 decoding, digest and signature primitives, and online revocation
//! fetching.
//!
//! Everything here is plain data already decoded by the collaborator. The
//! engine only compares, resolves and orders these values.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DigestAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

/// A digest together with the algorithm that produced it.
///
/// `algorithm` is `None` when the decoder met an algorithm identifier it does
/// not recognize. Such values are kept for reporting but never match anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DigestAlgoAndValue {
    pub algorithm: Option<DigestAlgorithm>,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IssuerSerial {
    /// DER encoded issuer distinguished name.
    #[serde(with = "hex_bytes")]
    pub issuer: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub serial: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateRefOrigin {
    SigningCertificate,
    CompleteCertificateRefs,
    AttributeCertificateRefs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevocationRefOrigin {
    CompleteRevocationRefs,
    AttributeRevocationRefs,
}

/// A pointer to a certificate, as found in a signed or unsigned attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CertificateRef {
    pub digest: Option<DigestAlgoAndValue>,
    pub issuer_serial: Option<IssuerSerial>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RevocationRef {
    pub digest: Option<DigestAlgoAndValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationValues {
    pub certificates: Vec<Vec<u8>>,
    pub crls: Vec<Vec<u8>>,
    pub ocsps: Vec<Vec<u8>>,
}

impl ValidationValues {
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty() && self.crls.is_empty() && self.ocsps.is_empty()
    }
}

/// The single signer of a PAdES CMS container.
#[derive(Debug, Clone, Default)]
pub struct SignerInfo {
    pub digest_algorithm: Option<DigestAlgorithm>,
    /// Value of the message-digest signed attribute.
    pub message_digest: Option<Vec<u8>>,
    /// DER encoding of the signed attributes, i.e. the bytes the signature
    /// value is computed over.
    pub signed_attributes: Option<Vec<u8>>,
    pub signature_value: Vec<u8>,
    pub signing_time: Option<DateTime<Utc>>,
    pub certificate_refs: Vec<(CertificateRefOrigin, CertificateRef)>,
    pub revocation_refs: Vec<(RevocationRefOrigin, RevocationRef)>,
    /// Encoded signature-time-stamp unsigned attributes.
    pub signature_timestamps: Vec<Vec<u8>>,
    /// `adbe-revocationInfoArchival` signed attribute. Only CRLs and OCSPs.
    pub adbe_revocation: ValidationValues,
    /// CAdES certificate-values unsigned attribute.
    pub certificate_values: Vec<Vec<u8>>,
    /// CAdES authorities-certificate-values found in attribute certificates.
    pub authorities_certificate_values: Vec<Vec<u8>>,
    /// ETSI timestamp-validation-data unsigned attribute.
    pub timestamp_validation_data: ValidationValues,
}

#[derive(Debug, Clone, Default)]
pub struct SignedData {
    /// The encapsulated content type is `id-ct-TSTInfo`.
    pub is_timestamp: bool,
    pub encapsulated_content: Option<Vec<u8>>,
    pub certificates: Vec<Vec<u8>>,
    pub crls: Vec<Vec<u8>>,
    pub signer: Option<SignerInfo>,
}

#[derive(Debug, Clone)]
pub struct TimestampToken {
    pub signed_data: SignedData,
    pub message_imprint: DigestAlgoAndValue,
    pub generation_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertificateInfo {
    pub subject: Vec<u8>,
    pub issuer: Vec<u8>,
    pub serial: Vec<u8>,
    /// DER encoded SubjectPublicKeyInfo.
    pub public_key: Vec<u8>,
}

impl CertificateInfo {
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    pub fn issuer_serial(&self) -> IssuerSerial {
        IssuerSerial {
            issuer: self.issuer.clone(),
            serial: self.serial.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RevocationKind {
    Crl,
    Ocsp,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevocationInfo {
    pub kind: RevocationKind,
    /// Issuer name of the certificates this data is about.
    pub issuer: Vec<u8>,
    /// Serial numbers an OCSP response answers for. Empty for CRLs, which
    /// cover every certificate of their issuer.
    pub covered_serials: Vec<Vec<u8>>,
    pub produced_at: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
}

impl RevocationInfo {
    pub fn covers(&self, certificate: &CertificateInfo) -> bool {
        if self.issuer != certificate.issuer {
            return false;
        }
        match self.kind {
            RevocationKind::Crl => true,
            RevocationKind::Ocsp => self.covered_serials.contains(&certificate.serial),
        }
    }
}

/// ASN.1 decoding of CMS containers, timestamp tokens, certificates and
/// revocation data.
///
/// An `Err` means the input bytes could not be decoded. The engine treats it
/// as a property of the (possibly hostile) document, never as fatal.
pub trait CmsDecoder {
    fn decode_signed_data(&self, cms: &[u8]) -> Result<SignedData>;
    fn decode_timestamp_token(&self, token: &[u8]) -> Result<TimestampToken>;
    fn decode_certificate(&self, der: &[u8]) -> Result<CertificateInfo>;
    fn decode_revocation(&self, kind: RevocationKind, der: &[u8]) -> Result<RevocationInfo>;
}

/// Digest and raw signature primitives.
pub trait SignatureVerifier {
    /// Digest of the concatenation of `data`.
    fn digest(&self, algorithm: DigestAlgorithm, data: &[&[u8]]) -> Result<Vec<u8>>;

    /// Checks `signature` over `signed` with the DER encoded public key.
    fn verify(
        &self,
        algorithm: DigestAlgorithm,
        public_key: &[u8],
        signed: &[u8],
        signature: &[u8],
    ) -> Result<bool>;
}

/// Online revocation sources. `Ok(None)` means unavailable; `Err` is an I/O
/// failure and aborts the run.
pub trait RevocationResolver {
    fn fetch_ocsp(&self, certificate: &[u8], issuer: &[u8]) -> Result<Option<Vec<u8>>>;
    fn fetch_crl(&self, certificate: &[u8]) -> Result<Option<Vec<u8>>>;
}

pub(crate) mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }
}
