//! Incremental PDF writer and in-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::collaborators::{
    CertificateInfo, CertificateRef, CertificateRefOrigin, CmsDecoder, DigestAlgoAndValue,
    DigestAlgorithm, RevocationInfo, RevocationKind, RevocationResolver, SignatureVerifier,
    SignedData, SignerInfo, TimestampToken,
};

const CONTENTS_PADDING: usize = 16;

/// Writes a classic-xref PDF one incremental update at a time.
pub(crate) struct PdfBuilder {
    bytes: Vec<u8>,
    pending: Vec<(u32, usize)>,
    pending_signature: Option<PendingSignature>,
    prev_startxref: Option<usize>,
    size: u32,
    info: Option<u32>,
    byte_ranges: BTreeMap<u32, [usize; 4]>,
}

struct PendingSignature {
    number: u32,
    placeholder: usize,
    gap_start: usize,
    gap_end: usize,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self {
            bytes: b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n".to_vec(),
            pending: Vec::new(),
            pending_signature: None,
            prev_startxref: None,
            size: 1,
            info: None,
            byte_ranges: BTreeMap::new(),
        }
    }

    /// Catalog 1, page tree 2 and a single page 3.
    pub fn base_document(&mut self) -> &mut Self {
        self.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
            .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
            .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>")
    }

    pub fn object(&mut self, number: u32, body: &str) -> &mut Self {
        self.begin_object(number);
        self.bytes.extend_from_slice(body.as_bytes());
        self.bytes.extend_from_slice(b"\nendobj\n");
        self
    }

    pub fn stream(&mut self, number: u32, dict: &str, data: &[u8]) -> &mut Self {
        self.begin_object(number);
        self.bytes
            .extend_from_slice(format!("<< {dict} /Length {} >>\nstream\n", data.len()).as_bytes());
        self.bytes.extend_from_slice(data);
        self.bytes.extend_from_slice(b"\nendstream\nendobj\n");
        self
    }

    /// A signature dictionary whose `/ByteRange` is filled in when the
    /// revision is closed. `cms` is padded with zero bytes.
    pub fn signature(&mut self, number: u32, head: &str, cms: &[u8]) -> &mut Self {
        assert!(self.pending_signature.is_none(), "one signature per revision");
        self.begin_object(number);
        self.bytes.extend_from_slice(format!("<< {head} /ByteRange ").as_bytes());
        let placeholder = self.bytes.len();
        self.bytes.extend_from_slice(byte_range_text(0, 0, 0).as_bytes());
        self.bytes.extend_from_slice(b" /Contents ");
        let gap_start = self.bytes.len();
        let mut hex = hex::encode_upper(cms);
        hex.push_str(&"00".repeat(CONTENTS_PADDING));
        self.bytes.extend_from_slice(format!("<{hex}>").as_bytes());
        let gap_end = self.bytes.len();
        self.bytes.extend_from_slice(b" >>\nendobj\n");
        self.pending_signature = Some(PendingSignature {
            number,
            placeholder,
            gap_start,
            gap_end,
        });
        self
    }

    /// Points `/Info` of this and every later trailer at object `number`.
    pub fn info(&mut self, number: u32) -> &mut Self {
        self.info = Some(number);
        self
    }

    pub fn end_revision(&mut self, root: u32) -> usize {
        self.finish_revision(root, false)
    }

    /// Closes the revision with a trailer whose `/Prev` points to itself.
    pub fn end_revision_with_prev_loop(&mut self, root: u32) -> usize {
        self.finish_revision(root, true)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// SHA-256 over both signed segments of signature object `number`.
    pub fn signed_digest(&self, number: u32) -> Vec<u8> {
        let [start1, len1, start2, len2] = self.byte_ranges[&number];
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes[start1..start1 + len1]);
        hasher.update(&self.bytes[start2..start2 + len2]);
        hasher.finalize().to_vec()
    }

    fn begin_object(&mut self, number: u32) {
        self.pending.push((number, self.bytes.len()));
        self.size = self.size.max(number + 1);
        self.bytes.extend_from_slice(format!("{number} 0 obj\n").as_bytes());
    }

    fn finish_revision(&mut self, root: u32, prev_loop: bool) -> usize {
        let xref_offset = self.bytes.len();
        let mut xref = String::from("xref\n");
        if self.prev_startxref.is_none() {
            xref.push_str("0 1\n0000000000 65535 f \n");
        }
        self.pending.sort();
        for (number, offset) in self.pending.drain(..) {
            xref.push_str(&format!("{number} 1\n{offset:010} 00000 n \n"));
        }
        let prev = match (prev_loop, self.prev_startxref) {
            (true, _) => format!(" /Prev {xref_offset}"),
            (false, Some(prev)) => format!(" /Prev {prev}"),
            (false, None) => String::new(),
        };
        let info = self.info.map(|n| format!(" /Info {n} 0 R")).unwrap_or_default();
        xref.push_str(&format!(
            "trailer\n<< /Size {} /Root {root} 0 R{info}{prev} >>\n\
             startxref\n{xref_offset}\n%%EOF\n",
            self.size
        ));
        self.bytes.extend_from_slice(xref.as_bytes());
        self.prev_startxref = Some(xref_offset);

        let end = self.bytes.len();
        if let Some(sig) = self.pending_signature.take() {
            let text = byte_range_text(sig.gap_start, sig.gap_end, end - sig.gap_end);
            self.bytes[sig.placeholder..sig.placeholder + text.len()]
                .copy_from_slice(text.as_bytes());
            self.byte_ranges
                .insert(sig.number, [0, sig.gap_start, sig.gap_end, end - sig.gap_end]);
        }
        end
    }
}

fn byte_range_text(len1: usize, start2: usize, len2: usize) -> String {
    format!("[0 {len1:<10} {start2:<10} {len2:<10}]")
}

pub(crate) fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

pub(crate) fn sha256_array(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub(crate) fn time(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .unwrap_or_default()
}

/// Signature scheme of the fake verifier: SHA-256 of key and message.
pub(crate) fn fake_signature(public_key: &[u8], signed: &[u8]) -> Vec<u8> {
    sha256(&[public_key, signed].concat())
}

#[derive(Debug, Clone)]
pub(crate) struct FakeCert {
    pub der: Vec<u8>,
    pub info: CertificateInfo,
}

impl FakeCert {
    pub fn new(subject: &str, issuer: &str) -> Self {
        Self {
            der: format!("CERT:{subject}:{issuer}").into_bytes(),
            info: CertificateInfo {
                subject: subject.as_bytes().to_vec(),
                issuer: issuer.as_bytes().to_vec(),
                serial: format!("SN-{subject}").into_bytes(),
                public_key: format!("PK:{subject}").into_bytes(),
            },
        }
    }

    pub fn digest(&self) -> [u8; 32] {
        sha256_array(&self.der)
    }

    pub fn signing_ref(&self) -> (CertificateRefOrigin, CertificateRef) {
        (
            CertificateRefOrigin::SigningCertificate,
            CertificateRef {
                digest: Some(DigestAlgoAndValue {
                    algorithm: Some(DigestAlgorithm::Sha256),
                    value: sha256(&self.der),
                }),
                issuer_serial: Some(self.info.issuer_serial()),
            },
        )
    }

    /// A signer over `message_digest` whose signature the fake verifier
    /// accepts.
    pub fn signer(&self, message_digest: Vec<u8>) -> SignerInfo {
        let signed_attributes = [b"ATTRS:".as_slice(), &message_digest].concat();
        SignerInfo {
            digest_algorithm: Some(DigestAlgorithm::Sha256),
            signature_value: fake_signature(&self.info.public_key, &signed_attributes),
            message_digest: Some(message_digest),
            signed_attributes: Some(signed_attributes),
            certificate_refs: vec![self.signing_ref()],
            ..Default::default()
        }
    }
}

/// A CRL of `issuer` covering all its certificates.
pub(crate) fn fake_crl(
    issuer: &str,
    tag: &str,
    produced_at: DateTime<Utc>,
) -> (Vec<u8>, RevocationInfo) {
    (
        format!("CRL:{issuer}:{tag}").into_bytes(),
        RevocationInfo {
            kind: RevocationKind::Crl,
            issuer: issuer.as_bytes().to_vec(),
            covered_serials: Vec::new(),
            produced_at: Some(produced_at),
            next_update: None,
        },
    )
}

/// Decodes the blobs it was told about. Trailing zero bytes are ignored, like
/// the padding of a `/Contents` value.
#[derive(Default)]
pub(crate) struct FakeDecoder {
    signed_data: HashMap<Vec<u8>, SignedData>,
    timestamps: HashMap<Vec<u8>, TimestampToken>,
    certificates: HashMap<Vec<u8>, CertificateInfo>,
    revocations: HashMap<Vec<u8>, RevocationInfo>,
}

fn blob_key(bytes: &[u8]) -> Vec<u8> {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    bytes[..end].to_vec()
}

impl FakeDecoder {
    pub fn signed_data(&mut self, blob: &[u8], data: SignedData) -> &mut Self {
        self.signed_data.insert(blob_key(blob), data);
        self
    }

    /// Registers a timestamp token over `imprint`, issued by `tsa`.
    pub fn timestamp(
        &mut self,
        blob: &[u8],
        tsa: &FakeCert,
        imprint: Vec<u8>,
        at: DateTime<Utc>,
    ) -> &mut Self {
        let tst_info = [b"TSTINFO:".as_slice(), &imprint].concat();
        let signed_data = SignedData {
            is_timestamp: true,
            encapsulated_content: Some(tst_info.clone()),
            certificates: vec![tsa.der.clone()],
            crls: Vec::new(),
            signer: Some(tsa.signer(sha256(&tst_info))),
        };
        self.certificate(tsa);
        self.timestamps.insert(
            blob_key(blob),
            TimestampToken {
                signed_data,
                message_imprint: DigestAlgoAndValue {
                    algorithm: Some(DigestAlgorithm::Sha256),
                    value: imprint,
                },
                generation_time: at,
            },
        );
        self
    }

    pub fn certificate(&mut self, cert: &FakeCert) -> &mut Self {
        self.certificates.insert(cert.der.clone(), cert.info.clone());
        self
    }

    pub fn revocation(&mut self, der: &[u8], info: RevocationInfo) -> &mut Self {
        self.revocations.insert(der.to_vec(), info);
        self
    }
}

impl CmsDecoder for FakeDecoder {
    fn decode_signed_data(&self, cms: &[u8]) -> Result<SignedData> {
        let key = blob_key(cms);
        if let Some(data) = self.signed_data.get(&key) {
            return Ok(data.clone());
        }
        match self.timestamps.get(&key) {
            Some(token) => Ok(token.signed_data.clone()),
            None => bail!("not a CMS container"),
        }
    }

    fn decode_timestamp_token(&self, token: &[u8]) -> Result<TimestampToken> {
        self.timestamps
            .get(&blob_key(token))
            .cloned()
            .ok_or_else(|| anyhow!("not a timestamp token"))
    }

    fn decode_certificate(&self, der: &[u8]) -> Result<CertificateInfo> {
        self.certificates
            .get(der)
            .cloned()
            .ok_or_else(|| anyhow!("not a certificate"))
    }

    fn decode_revocation(&self, kind: RevocationKind, der: &[u8]) -> Result<RevocationInfo> {
        match self.revocations.get(der) {
            Some(info) if info.kind == kind => Ok(info.clone()),
            _ => bail!("not a {kind:?} response"),
        }
    }
}

pub(crate) struct FakeVerifier;

impl SignatureVerifier for FakeVerifier {
    fn digest(&self, algorithm: DigestAlgorithm, data: &[&[u8]]) -> Result<Vec<u8>> {
        match algorithm {
            DigestAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                for chunk in data {
                    hasher.update(chunk);
                }
                Ok(hasher.finalize().to_vec())
            }
            DigestAlgorithm::Sha1 => {
                let mut hasher = sha1::Sha1::new();
                for chunk in data {
                    hasher.update(chunk);
                }
                Ok(hasher.finalize().to_vec())
            }
            other => bail!("{other:?} not supported by the fake verifier"),
        }
    }

    fn verify(
        &self,
        _: DigestAlgorithm,
        public_key: &[u8],
        signed: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        Ok(fake_signature(public_key, signed) == signature)
    }
}

/// Serves one CRL for every request and counts the calls.
pub(crate) struct FakeResolver {
    pub crl: Vec<u8>,
    pub calls: std::cell::Cell<usize>,
}

impl RevocationResolver for FakeResolver {
    fn fetch_ocsp(&self, _: &[u8], _: &[u8]) -> Result<Option<Vec<u8>>> {
        self.calls.set(self.calls.get() + 1);
        Ok(None)
    }

    fn fetch_crl(&self, _: &[u8]) -> Result<Option<Vec<u8>>> {
        self.calls.set(self.calls.get() + 1);
        Ok(Some(self.crl.clone()))
    }
}
