#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

pub mod collaborators;
pub mod config;
pub mod evidence;
pub mod integrity;
pub mod level;
pub mod modification;
#[cfg(feature = "openssl")]
pub mod openssl;
pub mod revision;
pub mod token;

#[cfg(test)]
mod testing;

use anyhow::Result;
use regex::bytes::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

pub use collaborators::{CmsDecoder, RevocationResolver, SignatureVerifier};
pub use config::{NumericComparison, TraversalBudget, ValidationConfig};
pub use evidence::{EvidenceGraph, EvidenceOrigin};
pub use level::{LevelReport, SignatureLevel};
pub use modification::{
    ModificationAction, ModificationCategory, ModificationEntry, ObjectModifications,
};
pub use revision::{ByteRange, PdfRevision, RevisionWalker};
pub use token::{TimestampKind, Token, TokenKind, TokenSource};

#[derive(Error, Debug)]
pub enum Error {
    #[error("no revision boundary marker found, document is not a PDF file")]
    MalformedDocument,
    #[error("document contains no signature dictionary")]
    NoSignatureFound,
    #[error("structural limit exceeded: {reason}")]
    StructuralLimitExceeded { reason: String },
    #[error("inconsistent /ByteRange in signature dictionary {object_id:?}")]
    InconsistentByteRange { object_id: (u32, u16) },
    #[error("evidence {digest} decodes to different objects")]
    EvidenceConsistency { digest: String },
    #[error("unsupported digest or signature algorithm in token {token_id}")]
    UnsupportedAlgorithm { token_id: String },
    #[error("PDF parsing error")]
    Pdf(#[from] lopdf::Error),
}

/// A recoverable anomaly met while characterizing the document.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub kind: &'static str,
    pub message: String,
}

impl From<&Error> for Finding {
    fn from(err: &Error) -> Self {
        let kind = match err {
            Error::MalformedDocument => "malformed_document",
            Error::NoSignatureFound => "no_signature_found",
            Error::StructuralLimitExceeded { .. } => "structural_limit_exceeded",
            Error::InconsistentByteRange { .. } => "inconsistent_byte_range",
            Error::EvidenceConsistency { .. } => "evidence_consistency",
            Error::UnsupportedAlgorithm { .. } => "unsupported_algorithm",
            Error::Pdf(_) => "pdf_parsing",
        };
        Finding {
            kind,
            message: err.to_string(),
        }
    }
}

/// External components used by a validation run.
pub struct Collaborators<'a> {
    pub decoder: &'a dyn CmsDecoder,
    pub verifier: &'a dyn SignatureVerifier,
    pub resolver: Option<&'a dyn RevocationResolver>,
    /// SHA-256 digests of the DER certificates accepted as trust anchors.
    pub trust_anchors: &'a [[u8; 32]],
}

/// Modifications found between two consecutive revisions.
#[derive(Debug, Serialize)]
pub struct RevisionDiff {
    pub from: revision::RevisionId,
    pub to: revision::RevisionId,
    pub modifications: ObjectModifications,
}

/// Everything the policy layer needs about one document.
#[derive(Debug)]
pub struct ValidationReport {
    pub revisions: Vec<PdfRevision>,
    pub tokens: Vec<Token>,
    pub integrity: Vec<integrity::TokenIntegrity>,
    pub evidence: EvidenceGraph,
    pub diffs: Vec<RevisionDiff>,
    pub levels: Vec<LevelReport>,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn signatures(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(|t| t.kind == TokenKind::Signature)
    }

    pub fn level(&self, signature_id: &str) -> Option<&LevelReport> {
        self.levels.iter().find(|l| l.signature_id == signature_id)
    }
}

/// State machine for parsing and then validating.
pub struct Validator<'a> {
    pdf_bytes: &'a [u8],
    config: ValidationConfig,
    budget: TraversalBudget,
    walk: revision::RevisionWalk,
}

impl<'a> Validator<'a> {
    /// Recovers the revisions of a PDF document.
    ///
    /// Fails only when the bytes do not contain a single revision boundary.
    pub fn parse(pdf_bytes: &'a [u8], config: ValidationConfig) -> Result<Self> {
        let budget = config.budget();
        let walk = RevisionWalker::new(pdf_bytes, &config, &budget).walk()?;
        Ok(Self {
            pdf_bytes,
            config,
            budget,
            walk,
        })
    }

    pub fn revisions(&self) -> &[PdfRevision] {
        &self.walk.revisions
    }

    /// Runs the remaining stages over the recovered revisions.
    pub fn validate(self, collaborators: &Collaborators) -> Result<ValidationReport> {
        let Validator {
            pdf_bytes,
            config,
            budget,
            walk,
        } = self;
        let revisions = walk.revisions;

        let mut findings = Vec::new();
        if let Some(limit) = &walk.limit {
            findings.push(Finding::from(limit));
        }
        for sig in revisions.iter().flat_map(|r| r.signatures.iter()) {
            if !sig.is_consistent() {
                findings.push(Finding::from(&Error::InconsistentByteRange {
                    object_id: sig.object_id,
                }));
            }
        }

        let extraction = token::extract_tokens(
            pdf_bytes,
            &revisions,
            collaborators.decoder,
            collaborators.verifier,
        );
        let tokens = extraction.tokens;
        findings.extend(extraction.findings);
        if !tokens.iter().any(|t| t.kind == TokenKind::Signature) {
            debug!(domain = "pades", kind = "no_signature", "Document carries no signature");
            findings.push(Finding::from(&Error::NoSignatureFound));
        }

        let evidence = evidence::aggregate(
            &revisions,
            &tokens,
            collaborators.decoder,
            collaborators.verifier,
            collaborators.resolver,
        )?;
        for err in evidence.consistency_errors() {
            findings.push(Finding::from(err));
        }

        let integrity = tokens
            .iter()
            .map(|t| {
                integrity::check_token(
                    pdf_bytes,
                    t,
                    &tokens,
                    &revisions,
                    &evidence,
                    collaborators.verifier,
                )
            })
            .collect::<Vec<_>>();
        for check in &integrity {
            if check.digest_algorithm.is_none() {
                findings.push(Finding::from(&Error::UnsupportedAlgorithm {
                    token_id: check.token_id.clone(),
                }));
            }
        }

        let diffs = revisions
            .windows(2)
            .map(|pair| RevisionDiff {
                from: pair[0].index,
                to: pair[1].index,
                modifications: modification::diff(&pair[0], &pair[1], &config, &budget),
            })
            .collect::<Vec<_>>();
        for diff in &diffs {
            if let ObjectModifications::Undetermined { reason } = &diff.modifications {
                warn!(
                    domain = "pades.modification",
                    kind = "undetermined",
                    from = diff.from,
                    to = diff.to,
                    reason = %reason,
                    "Modifications could not be determined"
                );
            }
        }

        let levels = level::resolve_all(
            &revisions,
            &tokens,
            &integrity,
            &evidence,
            &diffs,
            collaborators,
        );

        Ok(ValidationReport {
            revisions,
            tokens,
            integrity,
            evidence,
            diffs,
            levels,
            findings,
        })
    }
}

/// Parses and validates a PDF document in one call.
pub fn validate(
    pdf_bytes: &[u8],
    config: ValidationConfig,
    collaborators: &Collaborators,
) -> Result<ValidationReport> {
    Validator::parse(pdf_bytes, config)?.validate(collaborators)
}

struct ExactArrayOrNone<T, const N: usize>(Option<[T; N]>);

impl<T, const N: usize> FromIterator<T> for ExactArrayOrNone<T, N> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut iter = iter.into_iter();
        let result = array_init::from_iter(&mut iter);
        let result = if iter.next().is_none() { result } else { None };
        ExactArrayOrNone(result)
    }
}

/// Decodes a PDF hex string, including the delimiters '<' and '>'.
///
/// Returns None if the string doesn't match the pattern "^<[0-9A-Fa-f\s]*>$".
fn decode_pdf_hex_string(hex_input: &[u8]) -> Option<Vec<u8>> {
    // First and last characters must be the delimiters '<' and '>'.
    if hex_input.first() != Some(&b'<') || hex_input.last() != Some(&b'>') {
        return None;
    }
    let hex_input = &hex_input[1..hex_input.len() - 1];

    let mut bytes = Vec::new();
    let mut hex_iter = hex_input
        .iter()
        .filter(|b| !b.is_ascii_whitespace())
        .map(|&b| (b as char).to_digit(16));

    while let Some(first) = hex_iter.next() {
        let first = first? as u8;
        let second = hex_iter.next().unwrap_or(Some(0))? as u8;
        bytes.push(first << 4 | second);
    }

    Some(bytes)
}

lazy_static::lazy_static! {
    static ref EOF_REGEX: Regex = Regex::new(r"(?:\r\n|\r|\n)%%EOF[ \t]*(?:\r\n|\r|\n)?$").unwrap();
}

/// Tests if the PDF ends with the %%EOF marker.
fn pdf_ends_with_eof(pdf_bytes: &[u8]) -> bool {
    EOF_REGEX.is_match(pdf_bytes)
}
