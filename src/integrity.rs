//! Cryptographic checks of a single token: the signed content digest, the
//! timestamp imprint and the CMS signature value.

use serde::Serialize;
use tracing::debug;

use crate::collaborators::{DigestAlgorithm, SignatureVerifier};
use crate::evidence::EvidenceGraph;
use crate::revision::PdfRevision;
use crate::token::{TimestampKind, Token, TokenKind, TokenSource};

#[derive(Debug, Clone, Serialize)]
pub struct TokenIntegrity {
    pub token_id: String,
    /// `None` for tokens not stored in a dictionary.
    pub byte_range_valid: Option<bool>,
    /// `None` when the digest algorithm is missing or unknown.
    pub digest_algorithm: Option<DigestAlgorithm>,
    /// The message-digest attribute matches the signed content.
    pub message_digest_matches: bool,
    /// Timestamps only: the message imprint matches the time-stamped data.
    pub imprint_matches: Option<bool>,
    /// The signature value verifies with the signing certificate's key.
    pub signature_valid: bool,
}

impl TokenIntegrity {
    pub fn is_intact(&self) -> bool {
        self.byte_range_valid != Some(false)
            && self.digest_algorithm.is_some()
            && self.message_digest_matches
            && self.imprint_matches != Some(false)
            && self.signature_valid
    }
}

pub fn check_token(
    pdf_bytes: &[u8],
    token: &Token,
    tokens: &[Token],
    revisions: &[PdfRevision],
    evidence: &EvidenceGraph,
    verifier: &dyn SignatureVerifier,
) -> TokenIntegrity {
    let signer = token.signer();
    let imprint = token.digest_algo_and_value();
    let digest_algorithm = signer
        .and_then(|s| s.digest_algorithm)
        .filter(|_| imprint.map_or(true, |i| i.algorithm.is_some()));

    let mut integrity = TokenIntegrity {
        token_id: token.id.clone(),
        byte_range_valid: matches!(token.source, TokenSource::Dictionary { .. })
            .then_some(token.byte_range_consistent),
        digest_algorithm,
        message_digest_matches: false,
        imprint_matches: None,
        signature_valid: false,
    };
    let (Some(signer), Some(algorithm)) = (signer, digest_algorithm) else {
        return integrity;
    };

    let signed_ranges = token
        .byte_range
        .filter(|_| token.byte_range_consistent)
        .and_then(|range| range.signed_bytes(pdf_bytes));

    let content_digest = match token.kind {
        TokenKind::Signature => {
            signed_ranges.and_then(|ranges| verifier.digest(algorithm, &ranges).ok())
        }
        TokenKind::Timestamp(_) => token
            .signed_data
            .as_ref()
            .and_then(|sd| sd.encapsulated_content.as_deref())
            .and_then(|tst_info| verifier.digest(algorithm, &[tst_info]).ok()),
    };
    integrity.message_digest_matches =
        content_digest.is_some() && content_digest.as_deref() == signer.message_digest.as_deref();

    if let (Some(imprint), Some(kind)) = (imprint, token.timestamp_kind()) {
        let timestamped: Option<Vec<u8>> = match (kind, &token.source) {
            (TimestampKind::VriTimestamp, TokenSource::Vri { key }) => revisions
                .get(token.revision)
                .and_then(|r| r.vri.as_ref())
                .and_then(|vri| vri.entries.get(key))
                .map(|entry| entry.content()),
            (TimestampKind::SignatureTimestamp, _) => token
                .parent
                .as_ref()
                .and_then(|parent| tokens.iter().find(|t| &t.id == parent))
                .and_then(Token::signer)
                .map(|s| s.signature_value.clone()),
            _ => signed_ranges.map(|[first, second]| [first, second].concat()),
        };
        integrity.imprint_matches = Some(match (imprint.algorithm, timestamped) {
            (Some(alg), Some(data)) => verifier
                .digest(alg, &[&data])
                .is_ok_and(|digest| digest == imprint.value),
            _ => false,
        });
    }

    integrity.signature_valid = match (
        evidence.signing_certificate(&token.id).and_then(|r| r.certificate.as_ref()),
        signer.signed_attributes.as_deref(),
    ) {
        (Some(certificate), Some(signed_attributes)) => {
            match verifier.verify(
                algorithm,
                &certificate.public_key,
                signed_attributes,
                &signer.signature_value,
            ) {
                Ok(valid) => valid,
                Err(e) => {
                    debug!(
                        domain = "pades.integrity",
                        token = %token.id,
                        "Signature verification failed: {e}"
                    );
                    false
                }
            }
        }
        _ => false,
    };

    if !integrity.is_intact() {
        debug!(
            domain = "pades.integrity",
            kind = "token_not_intact",
            token = %token.id,
            byte_range_valid = ?integrity.byte_range_valid,
            message_digest = integrity.message_digest_matches,
            imprint = ?integrity.imprint_matches,
            signature = integrity.signature_valid,
            "Token failed integrity checks"
        );
    }
    integrity
}
