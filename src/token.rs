//! Turns signature dictionaries, embedded signature timestamps and VRI
//! timestamps into typed tokens.

use std::collections::HashSet;
use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::collaborators::{
    CmsDecoder, DigestAlgoAndValue, SignatureVerifier, SignedData, SignerInfo,
};
use crate::revision::{ByteRange, PdfRevision, RevisionId, SignatureDictionary};
use crate::Finding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimestampKind {
    /// Covers the value of one signature.
    SignatureTimestamp,
    /// Covers the whole document as of its revision.
    DocumentTimestamp,
    /// A document timestamp that also covers validation data.
    ArchiveTimestamp,
    /// Found under a VRI entry. Informational only.
    VriTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenKind {
    Signature,
    Timestamp(TimestampKind),
}

/// Where a token was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TokenSource {
    /// The `/Contents` of a signature or document timestamp dictionary.
    Dictionary { object_id: (u32, u16) },
    /// A signature-time-stamp unsigned attribute of another token.
    SignatureAttribute { signature_id: String },
    /// The `/TS` entry of a VRI dictionary.
    Vri { key: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TimestampInfo {
    pub message_imprint: DigestAlgoAndValue,
    pub generation_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub id: String,
    pub kind: TokenKind,
    pub revision: RevisionId,
    pub source: TokenSource,
    /// Byte range of the dictionary, as declared.
    pub byte_range: Option<ByteRange>,
    pub byte_range_consistent: bool,
    pub encoded: Vec<u8>,
    pub signed_data: Option<SignedData>,
    pub timestamp: Option<TimestampInfo>,
    /// For signature timestamps, the signature whose value is time-stamped.
    pub parent: Option<String>,
    pub decode_error: Option<String>,
}

impl Token {
    pub fn is_timestamp(&self) -> bool {
        matches!(self.kind, TokenKind::Timestamp(_))
    }

    pub fn timestamp_kind(&self) -> Option<TimestampKind> {
        match self.kind {
            TokenKind::Timestamp(kind) => Some(kind),
            TokenKind::Signature => None,
        }
    }

    /// The message imprint of a timestamp. Equal for duplicate tokens even
    /// though their ids differ.
    pub fn digest_algo_and_value(&self) -> Option<&DigestAlgoAndValue> {
        self.timestamp.as_ref().map(|t| &t.message_imprint)
    }

    pub fn generation_time(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_ref().map(|t| t.generation_time)
    }

    pub fn signer(&self) -> Option<&SignerInfo> {
        self.signed_data.as_ref()?.signer.as_ref()
    }

    /// The skipped bytes of a dictionary token with a consistent byte range.
    pub fn gap(&self) -> Option<Range<usize>> {
        self.byte_range
            .filter(|_| self.byte_range_consistent)
            .map(|range| range.gap())
    }

    pub fn object_id(&self) -> Option<(u32, u16)> {
        match self.source {
            TokenSource::Dictionary { object_id } => Some(object_id),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct TokenExtraction {
    pub tokens: Vec<Token>,
    pub findings: Vec<Finding>,
}

fn token_id(prefix: &str, encoded: &[u8], context: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(encoded);
    hasher.update(context);
    format!("{prefix}-{}", hex::encode_upper(hasher.finalize()))
}

fn byte_range_context(sig: &SignatureDictionary) -> Vec<u8> {
    let mut context = format!("{} {}", sig.object_id.0, sig.object_id.1).into_bytes();
    if let Some(range) = sig.byte_range {
        for value in range.values() {
            context.extend_from_slice(&value.to_be_bytes());
        }
    }
    context
}

/// Extracts every token of the document, in document order.
///
/// Undecodable containers are kept as tokens carrying a `decode_error`.
pub fn extract_tokens(
    pdf_bytes: &[u8],
    revisions: &[PdfRevision],
    decoder: &dyn CmsDecoder,
    verifier: &dyn SignatureVerifier,
) -> TokenExtraction {
    let mut extraction = TokenExtraction::default();

    for revision in revisions {
        for sig in &revision.signatures {
            let token = dictionary_token(revision, sig, &extraction.tokens, decoder, verifier);
            if let Some(err) = &token.decode_error {
                extraction.findings.push(Finding {
                    kind: "undecodable_token",
                    message: format!("dictionary {:?}: {err}", sig.object_id),
                });
            }
            let embedded = embedded_timestamps(&token, decoder, &mut extraction.findings);
            extraction.tokens.push(token);
            extraction.tokens.extend(embedded);
        }
    }

    extraction.tokens.extend(vri_timestamps(revisions, decoder, &mut extraction.findings));
    promote_archive_timestamps(revisions, &mut extraction.tokens);

    debug!(
        domain = "pades.token",
        tokens = extraction.tokens.len(),
        bytes = pdf_bytes.len(),
        "Extracted tokens"
    );
    extraction
}

fn dictionary_token(
    revision: &PdfRevision,
    sig: &SignatureDictionary,
    earlier: &[Token],
    decoder: &dyn CmsDecoder,
    verifier: &dyn SignatureVerifier,
) -> Token {
    let mut token = Token {
        id: String::new(),
        kind: TokenKind::Signature,
        revision: revision.index,
        source: TokenSource::Dictionary {
            object_id: sig.object_id,
        },
        byte_range: sig.byte_range,
        byte_range_consistent: sig.is_consistent(),
        encoded: sig.contents.clone(),
        signed_data: None,
        timestamp: None,
        parent: None,
        decode_error: None,
    };

    let mut is_timestamp = None;
    match decoder.decode_signed_data(&sig.contents) {
        Ok(signed_data) if signed_data.is_timestamp => {
            is_timestamp = Some(true);
            match decoder.decode_timestamp_token(&sig.contents) {
                Ok(tst) => {
                    token.parent = timestamped_signature(&tst.message_imprint, earlier, verifier);
                    token.signed_data = Some(tst.signed_data);
                    token.timestamp = Some(TimestampInfo {
                        message_imprint: tst.message_imprint,
                        generation_time: tst.generation_time,
                    });
                }
                Err(e) => {
                    token.signed_data = Some(signed_data);
                    token.decode_error = Some(e.to_string());
                }
            }
        }
        Ok(signed_data) => {
            is_timestamp = Some(false);
            token.signed_data = Some(signed_data);
        }
        Err(e) => token.decode_error = Some(e.to_string()),
    }
    token.kind = classify(sig, is_timestamp, token.parent.is_some());

    let prefix = if token.is_timestamp() { "T" } else { "S" };
    token.id = token_id(prefix, &token.encoded, &byte_range_context(sig));
    token
}

/// Kind of the token held by `sig`.
///
/// `is_timestamp` is `None` when the container could not be decoded, in which
/// case the dictionary type decides. `imprints_signature` tells whether the
/// message imprint is the digest of a preceding signature value. Promotion to
/// [`TimestampKind::ArchiveTimestamp`] happens once every revision is known.
pub fn classify(
    sig: &SignatureDictionary,
    is_timestamp: Option<bool>,
    imprints_signature: bool,
) -> TokenKind {
    match is_timestamp {
        Some(true) if imprints_signature => TokenKind::Timestamp(TimestampKind::SignatureTimestamp),
        Some(true) => TokenKind::Timestamp(TimestampKind::DocumentTimestamp),
        Some(false) => TokenKind::Signature,
        None if sig.is_doc_timestamp() => TokenKind::Timestamp(TimestampKind::DocumentTimestamp),
        None => TokenKind::Signature,
    }
}

/// The earlier signature whose value `imprint` is the digest of, if any.
fn timestamped_signature(
    imprint: &DigestAlgoAndValue,
    earlier: &[Token],
    verifier: &dyn SignatureVerifier,
) -> Option<String> {
    let algorithm = imprint.algorithm?;
    earlier
        .iter()
        .filter(|t| t.kind == TokenKind::Signature)
        .find(|t| {
            t.signer().is_some_and(|signer| {
                verifier
                    .digest(algorithm, &[&signer.signature_value])
                    .is_ok_and(|digest| digest == imprint.value)
            })
        })
        .map(|t| t.id.clone())
}

fn embedded_timestamps(
    parent: &Token,
    decoder: &dyn CmsDecoder,
    findings: &mut Vec<Finding>,
) -> Vec<Token> {
    let Some(signer) = parent.signer() else {
        return Vec::new();
    };
    signer
        .signature_timestamps
        .iter()
        .enumerate()
        .map(|(position, encoded)| {
            let mut token = Token {
                id: token_id(
                    "T",
                    encoded,
                    &[parent.id.as_bytes(), &position.to_be_bytes()].concat(),
                ),
                kind: TokenKind::Timestamp(TimestampKind::SignatureTimestamp),
                revision: parent.revision,
                source: TokenSource::SignatureAttribute {
                    signature_id: parent.id.clone(),
                },
                byte_range: None,
                byte_range_consistent: false,
                encoded: encoded.clone(),
                signed_data: None,
                timestamp: None,
                parent: Some(parent.id.clone()),
                decode_error: None,
            };
            match decoder.decode_timestamp_token(encoded) {
                Ok(tst) => {
                    token.signed_data = Some(tst.signed_data);
                    token.timestamp = Some(TimestampInfo {
                        message_imprint: tst.message_imprint,
                        generation_time: tst.generation_time,
                    });
                }
                Err(e) => {
                    findings.push(Finding {
                        kind: "undecodable_token",
                        message: format!("signature timestamp of {}: {e}", parent.id),
                    });
                    token.decode_error = Some(e.to_string());
                }
            }
            token
        })
        .collect()
}

/// VRI entries persist across revisions; each `/TS` is attributed to the
/// first revision carrying it.
fn vri_timestamps(
    revisions: &[PdfRevision],
    decoder: &dyn CmsDecoder,
    findings: &mut Vec<Finding>,
) -> Vec<Token> {
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();
    for revision in revisions {
        let Some(vri) = &revision.vri else {
            continue;
        };
        for (key, entry) in &vri.entries {
            let Some(encoded) = &entry.ts else {
                continue;
            };
            if !seen.insert((key.clone(), encoded.clone())) {
                continue;
            }
            let mut token = Token {
                id: token_id("T", encoded, key.as_bytes()),
                kind: TokenKind::Timestamp(TimestampKind::VriTimestamp),
                revision: revision.index,
                source: TokenSource::Vri { key: key.clone() },
                byte_range: None,
                byte_range_consistent: false,
                encoded: encoded.clone(),
                signed_data: None,
                timestamp: None,
                parent: None,
                decode_error: None,
            };
            match decoder.decode_timestamp_token(encoded) {
                Ok(tst) => {
                    if let Some(tu) = entry.validation_time() {
                        if tu != tst.generation_time {
                            debug!(
                                domain = "pades.token",
                                kind = "vri_tu_mismatch",
                                vri = %key,
                                tu = %tu,
                                generation_time = %tst.generation_time,
                                "VRI /TU differs from the timestamp generation time"
                            );
                        }
                    }
                    token.signed_data = Some(tst.signed_data);
                    token.timestamp = Some(TimestampInfo {
                        message_imprint: tst.message_imprint,
                        generation_time: tst.generation_time,
                    });
                }
                Err(e) => {
                    warn!(
                        domain = "pades.token",
                        kind = "vri_ts_undecodable",
                        vri = %key,
                        "VRI timestamp: {e}"
                    );
                    findings.push(Finding {
                        kind: "undecodable_token",
                        message: format!("VRI {key} timestamp: {e}"),
                    });
                    token.decode_error = Some(e.to_string());
                }
            }
            tokens.push(token);
        }
    }
    tokens
}

/// A document timestamp is an archive timestamp as soon as its covered
/// revisions carry DSS validation data.
fn promote_archive_timestamps(revisions: &[PdfRevision], tokens: &mut [Token]) {
    for token in tokens.iter_mut() {
        if token.kind != TokenKind::Timestamp(TimestampKind::DocumentTimestamp) {
            continue;
        }
        let covers_dss = revisions
            .iter()
            .take_while(|r| r.index <= token.revision)
            .any(|r| r.dss.as_ref().is_some_and(|dss| dss.has_validation_data()));
        if covers_dss {
            token.kind = TokenKind::Timestamp(TimestampKind::ArchiveTimestamp);
        }
    }
}

/// Tokens whose bytes lie inside the signed content of the timestamp `tst`.
///
/// Dictionary tokens are covered when their `/Contents` sits in a signed
/// segment, embedded timestamps when their parent is, and VRI timestamps when
/// they were added no later than `tst`.
pub fn timestamped_tokens<'t>(tst: &Token, tokens: &'t [Token]) -> Vec<&'t Token> {
    let Some(range) = tst.byte_range.filter(|_| tst.byte_range_consistent) else {
        return Vec::new();
    };
    let covered = |token: &Token| match &token.source {
        TokenSource::Dictionary { .. } => token.gap().is_some_and(|gap| range.covers(&gap)),
        TokenSource::Vri { .. } => token.revision <= tst.revision,
        TokenSource::SignatureAttribute { .. } => false,
    };
    tokens
        .iter()
        .filter(|token| token.id != tst.id)
        .filter(|token| match &token.source {
            TokenSource::SignatureAttribute { signature_id } => tokens
                .iter()
                .find(|t| &t.id == signature_id)
                .is_some_and(|parent| covered(parent)),
            _ => covered(token),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::SignedData;
    use crate::config::ValidationConfig;
    use crate::revision::extract_revisions;
    use crate::testing::{sha256, time, FakeCert, FakeDecoder, FakeVerifier, PdfBuilder};

    const SIG_HEAD: &str = "/Type /Sig /Filter /Adobe.PPKLite /SubFilter /ETSI.CAdES.detached";
    const TS_HEAD: &str = "/Type /DocTimeStamp /Filter /Adobe.PPKLite /SubFilter /ETSI.RFC3161";

    fn extract(bytes: &[u8], decoder: &FakeDecoder) -> TokenExtraction {
        let revisions = extract_revisions(bytes, &ValidationConfig::default()).unwrap();
        extract_tokens(bytes, &revisions, decoder, &FakeVerifier)
    }

    #[test]
    fn signature_and_timestamps_are_classified() {
        let signer = FakeCert::new("Alice", "CA");
        let tsa = FakeCert::new("TSA", "CA");

        let mut pdf = PdfBuilder::new();
        pdf.base_document();
        pdf.end_revision(1);
        pdf.signature(10, SIG_HEAD, b"SIG");
        pdf.end_revision(1);
        pdf.signature(11, TS_HEAD, b"TS-ON-SIG");
        pdf.end_revision(1);
        pdf.signature(12, TS_HEAD, b"DOC-TS");
        pdf.end_revision(1);

        let mut sig = signer.signer(pdf.signed_digest(10));
        sig.signature_timestamps = vec![b"EMBEDDED".to_vec()];
        let signature_value = sig.signature_value.clone();
        let mut decoder = FakeDecoder::default();
        decoder
            .signed_data(
                b"SIG",
                SignedData {
                    signer: Some(sig),
                    ..Default::default()
                },
            )
            .timestamp(b"EMBEDDED", &tsa, sha256(&signature_value), time(10))
            .timestamp(b"TS-ON-SIG", &tsa, sha256(&signature_value), time(20))
            .timestamp(b"DOC-TS", &tsa, pdf.signed_digest(12), time(30));

        let extraction = extract(pdf.bytes(), &decoder);
        assert!(extraction.findings.is_empty(), "{:?}", extraction.findings);
        let kinds = extraction.tokens.iter().map(|t| t.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Signature,
                TokenKind::Timestamp(TimestampKind::SignatureTimestamp),
                TokenKind::Timestamp(TimestampKind::SignatureTimestamp),
                TokenKind::Timestamp(TimestampKind::DocumentTimestamp),
            ]
        );
        let signature_id = &extraction.tokens[0].id;
        assert_eq!(extraction.tokens[1].parent.as_ref(), Some(signature_id));
        assert_eq!(extraction.tokens[2].parent.as_ref(), Some(signature_id));
        assert!(extraction.tokens[0].id.starts_with("S-"));

        // The document timestamp covers everything before it.
        let covered = timestamped_tokens(&extraction.tokens[3], &extraction.tokens)
            .into_iter()
            .map(|t| t.id.clone())
            .collect::<Vec<_>>();
        assert_eq!(covered.len(), 3);
        assert!(timestamped_tokens(&extraction.tokens[2], &extraction.tokens)
            .iter()
            .all(|t| t.id != extraction.tokens[3].id));
    }

    #[test]
    fn duplicate_timestamps_have_distinct_ids() {
        let tsa = FakeCert::new("TSA", "CA");
        let mut pdf = PdfBuilder::new();
        pdf.base_document();
        pdf.end_revision(1);
        pdf.signature(10, TS_HEAD, b"SAME-TS");
        pdf.end_revision(1);
        pdf.signature(11, TS_HEAD, b"SAME-TS");
        pdf.end_revision(1);

        let mut decoder = FakeDecoder::default();
        decoder.timestamp(b"SAME-TS", &tsa, vec![7; 32], time(0));
        let tokens = extract(pdf.bytes(), &decoder).tokens;

        assert_eq!(tokens.len(), 2);
        assert_ne!(tokens[0].id, tokens[1].id);
        assert_eq!(tokens[0].digest_algo_and_value(), tokens[1].digest_algo_and_value());
    }

    #[test]
    fn document_timestamp_over_dss_becomes_archive() {
        let tsa = FakeCert::new("TSA", "CA");
        let mut pdf = PdfBuilder::new();
        pdf.base_document();
        pdf.end_revision(1);
        pdf.stream(20, "", &tsa.der)
            .object(21, "<< /Certs [20 0 R] >>")
            .object(1, "<< /Type /Catalog /Pages 2 0 R /DSS 21 0 R >>")
            .signature(22, TS_HEAD, b"ARCHIVE");
        pdf.end_revision(1);

        let mut decoder = FakeDecoder::default();
        decoder.timestamp(b"ARCHIVE", &tsa, pdf.signed_digest(22), time(0));
        let tokens = extract(pdf.bytes(), &decoder).tokens;
        assert_eq!(tokens[0].kind, TokenKind::Timestamp(TimestampKind::ArchiveTimestamp));
    }

    #[test]
    fn undecodable_doc_timestamp_keeps_its_dictionary_kind() {
        let mut pdf = PdfBuilder::new();
        pdf.base_document();
        pdf.end_revision(1);
        pdf.signature(10, TS_HEAD, b"BROKEN");
        pdf.end_revision(1);

        let revisions = extract_revisions(pdf.bytes(), &ValidationConfig::default()).unwrap();
        let sig = revisions[1].signature_dictionary().unwrap();
        assert_eq!(
            classify(sig, None, false),
            TokenKind::Timestamp(TimestampKind::DocumentTimestamp)
        );
        assert_eq!(classify(sig, Some(false), false), TokenKind::Signature);
        assert_eq!(
            classify(sig, Some(true), true),
            TokenKind::Timestamp(TimestampKind::SignatureTimestamp)
        );

        let tokens =
            extract_tokens(pdf.bytes(), &revisions, &FakeDecoder::default(), &FakeVerifier).tokens;
        assert!(tokens[0].id.starts_with("T-"));
    }

    #[test]
    fn undecodable_contents_is_kept_with_finding() {
        let mut pdf = PdfBuilder::new();
        pdf.base_document();
        pdf.end_revision(1);
        pdf.signature(10, SIG_HEAD, b"GARBAGE");
        pdf.end_revision(1);

        let extraction = extract(pdf.bytes(), &FakeDecoder::default());
        assert_eq!(extraction.tokens.len(), 1);
        assert_eq!(extraction.tokens[0].kind, TokenKind::Signature);
        assert!(extraction.tokens[0].decode_error.is_some());
        assert_eq!(extraction.findings[0].kind, "undecodable_token");
    }
}
