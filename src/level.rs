//! Derives the PAdES baseline level reached by each signature.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::evidence::{EvidenceGraph, EvidenceRecord};
use crate::integrity::TokenIntegrity;
use crate::revision::{PdfRevision, RevisionId};
use crate::token::{timestamped_tokens, TimestampKind, Token, TokenKind};
use crate::{Collaborators, RevisionDiff};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SignatureLevel {
    #[serde(rename = "PAdES-BASELINE-B")]
    B,
    #[serde(rename = "PAdES-BASELINE-T")]
    T,
    #[serde(rename = "PAdES-BASELINE-LT")]
    Lt,
    #[serde(rename = "PAdES-BASELINE-LTA")]
    Lta,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelStatus {
    pub reached: bool,
    /// Reached, and no revision after the signature holds an unexplained
    /// modification.
    pub technically_valid: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelReport {
    pub signature_id: String,
    pub revision: RevisionId,
    pub b: LevelStatus,
    pub t: LevelStatus,
    pub lt: LevelStatus,
    pub lta: LevelStatus,
    /// Verified timestamps providing the T level.
    pub signature_timestamps: Vec<String>,
    /// Verified archive timestamps covering the signature, oldest first.
    pub archive_timestamps: Vec<String>,
    /// Consecutive archive timestamps whose coverage does not strictly grow.
    pub ordering_violations: Vec<(String, String)>,
    /// Certificates and revocation data the LT level relies on.
    pub lt_data: Vec<String>,
    /// Whether every revocation item used was produced after the earliest
    /// signature timestamp. Reported only; never affects a level.
    pub revocation_fresh: Option<bool>,
    pub modified_after_signing: bool,
}

impl LevelReport {
    pub fn status(&self, level: SignatureLevel) -> LevelStatus {
        match level {
            SignatureLevel::B => self.b,
            SignatureLevel::T => self.t,
            SignatureLevel::Lt => self.lt,
            SignatureLevel::Lta => self.lta,
        }
    }

    pub fn highest(&self) -> Option<SignatureLevel> {
        [SignatureLevel::Lta, SignatureLevel::Lt, SignatureLevel::T, SignatureLevel::B]
            .into_iter()
            .find(|&level| self.status(level).reached)
    }

    pub fn is_b_level_technically_valid(&self) -> bool {
        self.b.technically_valid
    }

    pub fn is_t_level_technically_valid(&self) -> bool {
        self.t.technically_valid
    }

    pub fn is_lt_level_technically_valid(&self) -> bool {
        self.lt.technically_valid
    }

    pub fn is_lta_level_technically_valid(&self) -> bool {
        self.lta.technically_valid
    }
}

struct Resolver<'a> {
    tokens: &'a [Token],
    integrity: &'a [TokenIntegrity],
    evidence: &'a EvidenceGraph,
    diffs: &'a [RevisionDiff],
    anchors: Vec<String>,
}

/// What the LT level needs: a chain up to a trust anchor and, per non-anchor
/// certificate, the revocation items covering it.
struct LongTermData<'e> {
    chain: Vec<&'e EvidenceRecord>,
    revocations: Vec<Vec<&'e EvidenceRecord>>,
}

impl<'a> Resolver<'a> {
    fn intact(&self, token: &Token) -> bool {
        self.integrity
            .iter()
            .find(|i| i.token_id == token.id)
            .is_some_and(TokenIntegrity::is_intact)
    }

    fn covered_ids(&self, tst: &Token) -> BTreeSet<&'a str> {
        timestamped_tokens(tst, self.tokens)
            .into_iter()
            .map(|t| t.id.as_str())
            .collect()
    }

    fn is_anchor(&self, certificate: &EvidenceRecord) -> bool {
        self.evidence
            .equivalent_certificates(&certificate.id)
            .iter()
            .any(|c| self.anchors.contains(&c.id))
    }

    fn signature_timestamps(&self, signature: &'a Token) -> Vec<&'a Token> {
        self.tokens
            .iter()
            .filter(|t| self.intact(t))
            .filter(|t| match t.timestamp_kind() {
                Some(TimestampKind::SignatureTimestamp) => t.parent.as_ref() == Some(&signature.id),
                Some(TimestampKind::DocumentTimestamp) | Some(TimestampKind::ArchiveTimestamp) => {
                    self.covered_ids(t).contains(signature.id.as_str())
                }
                Some(TimestampKind::VriTimestamp) | None => false,
            })
            .collect()
    }

    fn long_term_data(&self, signature: &Token) -> Option<LongTermData<'a>> {
        let chain = self.evidence.certificate_chain(&signature.id);
        let anchor = chain.iter().position(|c| self.is_anchor(c))?;
        let chain = chain[..=anchor].to_vec();
        if chain.iter().any(|c| c.is_external()) {
            return None;
        }
        let mut revocations = Vec::new();
        for certificate in &chain[..anchor] {
            let embedded = self
                .evidence
                .revocations_for(&signature.id, &certificate.id)
                .into_iter()
                .filter(|r| !r.is_external())
                .collect::<Vec<_>>();
            if embedded.is_empty() {
                return None;
            }
            revocations.push(embedded);
        }
        Some(LongTermData { chain, revocations })
    }

    /// The archive timestamp `tst` covers `record` when the record was added
    /// no later than `tst`, or is embedded in a token `tst` covers.
    fn record_covered(
        &self,
        record: &EvidenceRecord,
        tst: &Token,
        covered: &BTreeSet<&str>,
    ) -> bool {
        record.first_revision.is_some_and(|r| r <= tst.revision)
            || record.embedded_in.iter().any(|id| covered.contains(id.as_str()))
    }

    fn resolve(&self, signature: &'a Token) -> LevelReport {
        let modified_after_signing = self
            .diffs
            .iter()
            .any(|d| d.from >= signature.revision && d.modifications.is_suspicious());

        let b = self.intact(signature);

        let t_tokens = self.signature_timestamps(signature);
        let t = b && !t_tokens.is_empty();

        let lt_data = self.long_term_data(signature);
        let lt = t && lt_data.is_some();

        let mut archives = self
            .tokens
            .iter()
            .filter(|a| {
                a.timestamp_kind() == Some(TimestampKind::ArchiveTimestamp) && self.intact(a)
            })
            .filter(|a| self.covered_ids(a).contains(signature.id.as_str()))
            .collect::<Vec<_>>();
        archives.sort_by_key(|a| (a.generation_time(), a.revision));

        let mut ordering_violations = Vec::new();
        for pair in archives.windows(2) {
            let (earlier, later) = (pair[0], pair[1]);
            let earlier_covered = self.covered_ids(earlier);
            let later_covered = self.covered_ids(later);
            let grows = later_covered.contains(earlier.id.as_str())
                && !earlier_covered.contains(later.id.as_str())
                && earlier_covered.is_subset(&later_covered)
                && earlier_covered.len() < later_covered.len();
            if !grows {
                ordering_violations.push((earlier.id.clone(), later.id.clone()));
            }
        }

        let lta = lt
            && ordering_violations.is_empty()
            && lt_data.as_ref().is_some_and(|data| {
                archives.iter().any(|a| {
                    let mut covered = self.covered_ids(a);
                    covered.insert(signature.id.as_str());
                    t_tokens.iter().any(|t| covered.contains(t.id.as_str()))
                        && data.chain.iter().all(|c| self.record_covered(c, a, &covered))
                        && data
                            .revocations
                            .iter()
                            .all(|items| items.iter().any(|r| self.record_covered(r, a, &covered)))
                })
            });

        let revocation_fresh = earliest(&t_tokens).zip(lt_data.as_ref()).map(|(time, data)| {
            data.revocations.iter().all(|items| {
                items.iter().any(|r| {
                    r.revocation
                        .as_ref()
                        .and_then(|info| info.produced_at)
                        .is_some_and(|p| p >= time)
                })
            })
        });

        let status = |reached: bool| LevelStatus {
            reached,
            technically_valid: reached && !modified_after_signing,
        };
        let report = LevelReport {
            signature_id: signature.id.clone(),
            revision: signature.revision,
            b: status(b),
            t: status(t),
            lt: status(lt),
            lta: status(lta),
            signature_timestamps: t_tokens.iter().map(|t| t.id.clone()).collect(),
            archive_timestamps: archives.iter().map(|a| a.id.clone()).collect(),
            ordering_violations,
            lt_data: lt_data
                .iter()
                .flat_map(|data| {
                    data.chain
                        .iter()
                        .chain(data.revocations.iter().flatten())
                        .map(|r| r.id.clone())
                })
                .collect(),
            revocation_fresh,
            modified_after_signing,
        };
        info!(
            domain = "pades.level",
            signature = %report.signature_id,
            level = ?report.highest(),
            modified_after_signing,
            "Resolved signature level"
        );
        report
    }
}

fn earliest(tokens: &[&Token]) -> Option<DateTime<Utc>> {
    tokens.iter().filter_map(|t| t.generation_time()).min()
}

/// One report per signature token, in document order.
pub fn resolve_all(
    revisions: &[PdfRevision],
    tokens: &[Token],
    integrity: &[TokenIntegrity],
    evidence: &EvidenceGraph,
    diffs: &[RevisionDiff],
    collaborators: &Collaborators,
) -> Vec<LevelReport> {
    let resolver = Resolver {
        tokens,
        integrity,
        evidence,
        diffs,
        anchors: collaborators.trust_anchors.iter().map(hex::encode_upper).collect(),
    };
    debug!(
        domain = "pades.level",
        revisions = revisions.len(),
        anchors = resolver.anchors.len(),
        "Resolving levels"
    );
    tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Signature)
        .map(|signature| resolver.resolve(signature))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::SignedData;
    use crate::testing::{fake_crl, time, FakeCert, FakeDecoder, FakeVerifier, PdfBuilder};
    use crate::{validate, ValidationConfig, ValidationReport};

    const SIG_HEAD: &str = "/Type /Sig /Filter /Adobe.PPKLite /SubFilter /ETSI.CAdES.detached";
    const TS_HEAD: &str = "/Type /DocTimeStamp /Filter /Adobe.PPKLite /SubFilter /ETSI.RFC3161";

    struct Setup {
        root: FakeCert,
        alice: FakeCert,
        tsa: FakeCert,
        decoder: FakeDecoder,
        pdf: PdfBuilder,
    }

    /// A signed document with an embedded signature timestamp.
    fn signed(with_timestamp: bool) -> Setup {
        let root = FakeCert::new("Root", "Root");
        let alice = FakeCert::new("Alice", "Root");
        let tsa = FakeCert::new("TSA", "Root");
        let mut pdf = PdfBuilder::new();
        pdf.base_document();
        pdf.end_revision(1);
        pdf.signature(10, SIG_HEAD, b"SIG");
        pdf.end_revision(1);

        let mut signer = alice.signer(pdf.signed_digest(10));
        if with_timestamp {
            signer.signature_timestamps = vec![b"SIG-TS".to_vec()];
        }
        let signature_value = signer.signature_value.clone();
        let mut decoder = FakeDecoder::default();
        decoder.certificate(&root).certificate(&alice).signed_data(
            b"SIG",
            SignedData {
                certificates: vec![alice.der.clone()],
                signer: Some(signer),
                ..Default::default()
            },
        );
        if with_timestamp {
            decoder.timestamp(b"SIG-TS", &tsa, crate::testing::sha256(&signature_value), time(10));
        }
        Setup {
            root,
            alice,
            tsa,
            decoder,
            pdf,
        }
    }

    /// Appends a DSS with the root certificate and a CRL of the root.
    fn add_dss(setup: &mut Setup) {
        let (crl, info) = fake_crl("Root", "1", time(100));
        setup.decoder.revocation(&crl, info);
        setup
            .pdf
            .stream(20, "", &setup.root.der)
            .stream(21, "", &crl)
            .object(22, "<< /Certs [20 0 R] /CRLs [21 0 R] >>")
            .object(1, "<< /Type /Catalog /Pages 2 0 R /DSS 22 0 R >>");
        setup.pdf.end_revision(1);
    }

    fn run(setup: &Setup, anchors: &[[u8; 32]]) -> ValidationReport {
        let collaborators = Collaborators {
            decoder: &setup.decoder,
            verifier: &FakeVerifier,
            resolver: None,
            trust_anchors: anchors,
        };
        validate(setup.pdf.bytes(), ValidationConfig::default(), &collaborators).unwrap()
    }

    #[test]
    fn b_only_without_timestamp() {
        let setup = signed(false);
        let report = run(&setup, &[setup.root.digest()]);
        let level = &report.levels[0];
        assert!(level.b.reached && level.b.technically_valid);
        assert!(!level.t.reached && !level.lt.reached && !level.lta.reached);
        assert_eq!(level.highest(), Some(SignatureLevel::B));
    }

    #[test]
    fn lt_needs_a_trust_anchor() {
        let mut setup = signed(true);
        add_dss(&mut setup);

        let trusted = run(&setup, &[setup.root.digest()]);
        assert_eq!(trusted.levels[0].highest(), Some(SignatureLevel::Lt));
        assert_eq!(trusted.levels[0].revocation_fresh, Some(true));
        assert_eq!(trusted.levels[0].lt_data.len(), 3);

        let untrusted = run(&setup, &[setup.tsa.digest()]);
        assert_eq!(untrusted.levels[0].highest(), Some(SignatureLevel::T));
    }

    #[test]
    fn anchored_signing_certificate_needs_no_revocation() {
        let setup = signed(true);
        let report = run(&setup, &[setup.alice.digest()]);
        assert!(report.levels[0].lt.reached);
    }

    #[test]
    fn lta_with_archive_timestamp() {
        let mut setup = signed(true);
        add_dss(&mut setup);
        setup.pdf.signature(30, TS_HEAD, b"ARCHIVE");
        setup.pdf.end_revision(1);
        let imprint = setup.pdf.signed_digest(30);
        let tsa = setup.tsa.clone();
        setup.decoder.timestamp(b"ARCHIVE", &tsa, imprint, time(200));

        let report = run(&setup, &[setup.root.digest()]);
        let level = &report.levels[0];
        assert!(level.lta.reached, "{level:?}");
        assert!(level.lta.technically_valid);
        assert_eq!(level.archive_timestamps.len(), 1);
        // Levels are monotonic.
        assert!(level.lt.reached && level.t.reached && level.b.reached);
    }

    #[test]
    fn backdated_archive_timestamp_breaks_lta() {
        let mut setup = signed(true);
        add_dss(&mut setup);
        let tsa = setup.tsa.clone();
        setup.pdf.signature(30, TS_HEAD, b"ARCHIVE-1");
        setup.pdf.end_revision(1);
        let imprint = setup.pdf.signed_digest(30);
        setup.decoder.timestamp(b"ARCHIVE-1", &tsa, imprint, time(300));
        // Appended later but claiming an earlier generation time.
        setup.pdf.signature(31, TS_HEAD, b"ARCHIVE-2");
        setup.pdf.end_revision(1);
        let imprint = setup.pdf.signed_digest(31);
        setup.decoder.timestamp(b"ARCHIVE-2", &tsa, imprint, time(200));

        let report = run(&setup, &[setup.root.digest()]);
        let mut archives = report
            .tokens
            .iter()
            .filter(|t| t.timestamp_kind() == Some(TimestampKind::ArchiveTimestamp))
            .collect::<Vec<_>>();
        archives.sort_by_key(|t| t.revision);
        let [first, second] = archives[..] else {
            panic!("expected two archive timestamps, got {}", archives.len());
        };

        let level = &report.levels[0];
        assert_eq!(level.archive_timestamps, vec![second.id.clone(), first.id.clone()]);
        assert_eq!(level.ordering_violations, vec![(second.id.clone(), first.id.clone())]);
        assert!(!level.lta.reached, "{level:?}");
        assert!(level.lt.reached);
    }

    #[test]
    fn later_page_change_taints_every_level() {
        let mut setup = signed(true);
        add_dss(&mut setup);
        setup
            .pdf
            .stream(40, "", b"BT (forged) Tj ET")
            .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 40 0 R >>");
        setup.pdf.end_revision(1);

        let report = run(&setup, &[setup.root.digest()]);
        let level = &report.levels[0];
        assert!(level.modified_after_signing);
        assert!(level.lt.reached);
        assert!(!level.is_b_level_technically_valid());
        assert!(!level.is_lt_level_technically_valid());
    }
}
