//! Merges the validation data found in DSS, VRI and CMS containers into one
//! digest-keyed table and derives, per token, which items were delivered,
//! which references resolve, which pointers are orphans and which items are
//! actually used to validate the token.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::collaborators::{
    CertificateInfo, CertificateRef, CertificateRefOrigin, CmsDecoder, DigestAlgoAndValue,
    DigestAlgorithm, RevocationInfo, RevocationKind, RevocationRef, RevocationRefOrigin,
    RevocationResolver, SignatureVerifier, ValidationValues,
};
use crate::revision::{PdfRevision, RevisionId, ValidationStreams};
use crate::token::Token;
use crate::Error;

/// Container an evidence item was delivered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceOrigin {
    DssDictionary,
    VriDictionary,
    CmsSignedData,
    AdbeRevocationInfoArchival,
    TimestampValidationData,
    KeyInfo,
    CertificateValues,
    AttrAuthoritiesCertValues,
    /// Fetched by the [`RevocationResolver`]. Never embedded.
    ExternalResolver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EvidenceKind {
    Certificate,
    Crl,
    Ocsp,
}

impl EvidenceKind {
    pub fn is_revocation(self) -> bool {
        self != EvidenceKind::Certificate
    }
}

impl From<RevocationKind> for EvidenceKind {
    fn from(kind: RevocationKind) -> Self {
        match kind {
            RevocationKind::Crl => EvidenceKind::Crl,
            RevocationKind::Ocsp => EvidenceKind::Ocsp,
        }
    }
}

/// One certificate, CRL or OCSP response, identified by the upper case hex
/// SHA-256 of its encoding.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceRecord {
    pub id: String,
    pub kind: EvidenceKind,
    #[serde(skip)]
    pub encoded: Vec<u8>,
    pub origins: BTreeSet<EvidenceOrigin>,
    /// PDF object numbers of the DSS and VRI streams holding these bytes.
    pub object_numbers: BTreeSet<u32>,
    /// First revision whose DSS or VRI delivers the item.
    pub first_revision: Option<RevisionId>,
    /// Tokens whose CMS container embeds the item.
    pub embedded_in: BTreeSet<String>,
    /// SHA-256 of subject and public key. Certificates sharing it are
    /// interchangeable when building chains.
    pub entity_key: Option<String>,
    #[serde(skip)]
    pub certificate: Option<CertificateInfo>,
    #[serde(skip)]
    pub revocation: Option<RevocationInfo>,
}

impl EvidenceRecord {
    /// Delivered by the resolver only, never found in the document.
    pub fn is_external(&self) -> bool {
        self.origins.iter().all(|&o| o == EvidenceOrigin::ExternalResolver)
    }
}

/// A container entry whose bytes are missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanPointer {
    pub kind: EvidenceKind,
    pub origin: EvidenceOrigin,
    pub object_number: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CertificateReference {
    pub origin: CertificateRefOrigin,
    pub reference: CertificateRef,
    pub resolved: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevocationReference {
    pub origin: RevocationRefOrigin,
    pub reference: RevocationRef,
    pub resolved: Option<String>,
}

/// Evidence as seen from one token.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenEvidence {
    /// Records offered to the token, with the origins they were offered by.
    pub delivered: BTreeMap<String, BTreeSet<EvidenceOrigin>>,
    pub orphans: Vec<OrphanPointer>,
    pub certificate_refs: Vec<CertificateReference>,
    pub revocation_refs: Vec<RevocationReference>,
    pub signing_certificate: Option<String>,
    /// Signing certificate first, then its issuers.
    pub chain: Vec<String>,
    /// Revocation records covering each non self-issued chain certificate.
    pub chain_revocations: BTreeMap<String, Vec<String>>,
    /// Records actually needed to validate the token.
    pub used: BTreeSet<String>,
}

impl TokenEvidence {
    fn deliver(&mut self, id: String, origin: EvidenceOrigin) {
        self.delivered.entry(id).or_default().insert(origin);
    }

    fn orphan(&mut self, pointer: OrphanPointer) {
        if !self.orphans.contains(&pointer) {
            self.orphans.push(pointer);
        }
    }
}

#[derive(Debug, Default)]
pub struct EvidenceGraph {
    records: BTreeMap<String, EvidenceRecord>,
    views: BTreeMap<String, TokenEvidence>,
    consistency_errors: Vec<Error>,
}

impl EvidenceGraph {
    pub fn record(&self, id: &str) -> Option<&EvidenceRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &EvidenceRecord> {
        self.records.values()
    }

    pub fn view(&self, token_id: &str) -> Option<&TokenEvidence> {
        self.views.get(token_id)
    }

    pub fn consistency_errors(&self) -> impl Iterator<Item = &Error> {
        self.consistency_errors.iter()
    }

    pub fn signing_certificate(&self, token_id: &str) -> Option<&EvidenceRecord> {
        let id = self.view(token_id)?.signing_certificate.as_ref()?;
        self.record(id)
    }

    pub fn certificate_chain(&self, token_id: &str) -> Vec<&EvidenceRecord> {
        self.view(token_id)
            .map(|view| view.chain.iter().filter_map(|id| self.record(id)).collect())
            .unwrap_or_default()
    }

    pub fn revocations_for(&self, token_id: &str, certificate_id: &str) -> Vec<&EvidenceRecord> {
        self.view(token_id)
            .and_then(|view| view.chain_revocations.get(certificate_id))
            .map(|ids| ids.iter().filter_map(|id| self.record(id)).collect())
            .unwrap_or_default()
    }

    /// Certificates with the same subject and public key as `certificate_id`,
    /// itself included.
    pub fn equivalent_certificates(&self, certificate_id: &str) -> Vec<&EvidenceRecord> {
        let Some(key) = self.record(certificate_id).and_then(|r| r.entity_key.as_ref()) else {
            return self.record(certificate_id).into_iter().collect();
        };
        self.records
            .values()
            .filter(|r| r.entity_key.as_ref() == Some(key))
            .collect()
    }

    fn delivered(
        &self,
        token_id: &str,
        origin: EvidenceOrigin,
        revocation: bool,
    ) -> Vec<&EvidenceRecord> {
        let Some(view) = self.view(token_id) else {
            return Vec::new();
        };
        view.delivered
            .iter()
            .filter(|(_, origins)| origins.contains(&origin))
            .filter_map(|(id, _)| self.record(id))
            .filter(|r| r.kind.is_revocation() == revocation)
            .collect()
    }

    fn orphans(
        &self,
        token_id: &str,
        origin: EvidenceOrigin,
        revocation: bool,
    ) -> Vec<&OrphanPointer> {
        self.view(token_id)
            .map(|view| {
                view.orphans
                    .iter()
                    .filter(|o| o.origin == origin && o.kind.is_revocation() == revocation)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn unused(&self, token_id: &str, revocation: bool) -> Vec<&EvidenceRecord> {
        let Some(view) = self.view(token_id) else {
            return Vec::new();
        };
        view.delivered
            .keys()
            .filter(|id| !view.used.contains(*id))
            .filter_map(|id| self.record(id))
            .filter(|r| r.kind.is_revocation() == revocation)
            .collect()
    }

    pub fn related_certificates_by_origin(
        &self,
        token_id: &str,
        origin: EvidenceOrigin,
    ) -> Vec<&EvidenceRecord> {
        self.delivered(token_id, origin, false)
    }

    pub fn related_revocations_by_origin(
        &self,
        token_id: &str,
        origin: EvidenceOrigin,
    ) -> Vec<&EvidenceRecord> {
        self.delivered(token_id, origin, true)
    }

    pub fn orphan_certificates_by_origin(
        &self,
        token_id: &str,
        origin: EvidenceOrigin,
    ) -> Vec<&OrphanPointer> {
        self.orphans(token_id, origin, false)
    }

    pub fn orphan_revocations_by_origin(
        &self,
        token_id: &str,
        origin: EvidenceOrigin,
    ) -> Vec<&OrphanPointer> {
        self.orphans(token_id, origin, true)
    }

    pub fn related_certificates_by_ref_origin(
        &self,
        token_id: &str,
        origin: CertificateRefOrigin,
    ) -> Vec<&EvidenceRecord> {
        let mut related: Vec<&EvidenceRecord> = Vec::new();
        for reference in self.view(token_id).iter().flat_map(|v| v.certificate_refs.iter()) {
            if reference.origin != origin {
                continue;
            }
            if let Some(record) = reference.resolved.as_deref().and_then(|id| self.record(id)) {
                if !related.iter().any(|r| r.id == record.id) {
                    related.push(record);
                }
            }
        }
        related
    }

    pub fn orphan_certificates_by_ref_origin(
        &self,
        token_id: &str,
        origin: CertificateRefOrigin,
    ) -> Vec<&CertificateReference> {
        self.view(token_id)
            .iter()
            .flat_map(|v| v.certificate_refs.iter())
            .filter(|r| r.origin == origin && r.resolved.is_none())
            .collect()
    }

    pub fn related_revocations_by_ref_origin(
        &self,
        token_id: &str,
        origin: RevocationRefOrigin,
    ) -> Vec<&EvidenceRecord> {
        let mut related: Vec<&EvidenceRecord> = Vec::new();
        for reference in self.view(token_id).iter().flat_map(|v| v.revocation_refs.iter()) {
            if reference.origin != origin {
                continue;
            }
            if let Some(record) = reference.resolved.as_deref().and_then(|id| self.record(id)) {
                if !related.iter().any(|r| r.id == record.id) {
                    related.push(record);
                }
            }
        }
        related
    }

    pub fn orphan_revocations_by_ref_origin(
        &self,
        token_id: &str,
        origin: RevocationRefOrigin,
    ) -> Vec<&RevocationReference> {
        self.view(token_id)
            .iter()
            .flat_map(|v| v.revocation_refs.iter())
            .filter(|r| r.origin == origin && r.resolved.is_none())
            .collect()
    }

    /// Delivered certificates not needed by the token.
    pub fn unused_certificates(&self, token_id: &str) -> Vec<&EvidenceRecord> {
        self.unused(token_id, false)
    }

    /// Delivered CRLs and OCSP responses not needed by the token.
    pub fn unused_revocations(&self, token_id: &str) -> Vec<&EvidenceRecord> {
        self.unused(token_id, true)
    }
}

/// Upper case hex SHA-1 of a signature value, the key of its VRI entry.
pub fn vri_key(encoded: &[u8]) -> String {
    hex::encode_upper(Sha1::digest(encoded))
}

struct Table<'a> {
    decoder: &'a dyn CmsDecoder,
    verifier: &'a dyn SignatureVerifier,
    records: BTreeMap<String, EvidenceRecord>,
    rejected: BTreeSet<String>,
    errors: Vec<Error>,
    digests: HashMap<(DigestAlgorithm, String), Vec<u8>>,
}

impl<'a> Table<'a> {
    fn insert(
        &mut self,
        kind: EvidenceKind,
        bytes: &[u8],
        origin: EvidenceOrigin,
        object_number: Option<u32>,
        revision: Option<RevisionId>,
    ) -> Option<String> {
        let id = hex::encode_upper(Sha256::digest(bytes));
        if self.rejected.contains(&id) {
            return None;
        }

        let (certificate, revocation) = match kind {
            EvidenceKind::Certificate => (self.decoder.decode_certificate(bytes).ok(), None),
            EvidenceKind::Crl => {
                (None, self.decoder.decode_revocation(RevocationKind::Crl, bytes).ok())
            }
            EvidenceKind::Ocsp => {
                (None, self.decoder.decode_revocation(RevocationKind::Ocsp, bytes).ok())
            }
        };

        let conflict = self.records.get(&id).is_some_and(|existing| {
            existing.kind != kind
                || existing.certificate != certificate
                || existing.revocation != revocation
        });
        if conflict {
            warn!(
                security = true,
                domain = "pades.evidence",
                kind = "evidence_conflict",
                digest = %id,
                "Same digest decodes to different objects; dropping item"
            );
            self.records.remove(&id);
            self.rejected.insert(id.clone());
            self.errors.push(Error::EvidenceConsistency { digest: id });
            return None;
        }

        let record = self.records.entry(id.clone()).or_insert_with(|| EvidenceRecord {
            id: id.clone(),
            kind,
            encoded: bytes.to_vec(),
            origins: BTreeSet::new(),
            object_numbers: BTreeSet::new(),
            first_revision: None,
            embedded_in: BTreeSet::new(),
            entity_key: certificate.as_ref().map(|c| {
                let mut hasher = Sha256::new();
                hasher.update(&c.subject);
                hasher.update(&c.public_key);
                hex::encode_upper(hasher.finalize())
            }),
            certificate,
            revocation,
        });
        record.origins.insert(origin);
        record.object_numbers.extend(object_number);
        if let Some(revision) = revision {
            record.first_revision =
                Some(record.first_revision.map_or(revision, |r| r.min(revision)));
        }
        Some(id)
    }

    fn insert_streams(
        &mut self,
        view: &mut TokenEvidence,
        kind: EvidenceKind,
        streams: &ValidationStreams,
        origin: EvidenceOrigin,
        revision: RevisionId,
    ) {
        for (&number, bytes) in streams {
            match bytes {
                Some(bytes) => {
                    let id = self.insert(kind, bytes, origin, Some(number), Some(revision));
                    if let Some(id) = id {
                        view.deliver(id, origin);
                    }
                }
                None => view.orphan(OrphanPointer {
                    kind,
                    origin,
                    object_number: number,
                }),
            }
        }
    }

    fn insert_embedded(
        &mut self,
        view: &mut TokenEvidence,
        token_id: &str,
        kind: EvidenceKind,
        items: &[Vec<u8>],
        origin: EvidenceOrigin,
    ) {
        for bytes in items {
            if let Some(id) = self.insert(kind, bytes, origin, None, None) {
                if let Some(record) = self.records.get_mut(&id) {
                    record.embedded_in.insert(token_id.to_string());
                }
                view.deliver(id, origin);
            }
        }
    }

    fn insert_values(
        &mut self,
        view: &mut TokenEvidence,
        token_id: &str,
        values: &ValidationValues,
        origin: EvidenceOrigin,
    ) {
        let certificates = &values.certificates;
        self.insert_embedded(view, token_id, EvidenceKind::Certificate, certificates, origin);
        self.insert_embedded(view, token_id, EvidenceKind::Crl, &values.crls, origin);
        self.insert_embedded(view, token_id, EvidenceKind::Ocsp, &values.ocsps, origin);
    }

    fn digest_of(&mut self, algorithm: DigestAlgorithm, id: &str) -> Option<Vec<u8>> {
        if algorithm == DigestAlgorithm::Sha256 {
            return hex::decode(id).ok();
        }
        let key = (algorithm, id.to_string());
        if let Some(digest) = self.digests.get(&key) {
            return Some(digest.clone());
        }
        let encoded = &self.records.get(id)?.encoded;
        let digest = self.verifier.digest(algorithm, &[encoded]).ok()?;
        self.digests.insert(key, digest.clone());
        Some(digest)
    }

    fn resolve_digest(&mut self, digest: &DigestAlgoAndValue, revocation: bool) -> Option<String> {
        let algorithm = digest.algorithm?;
        let candidates = self
            .records
            .values()
            .filter(|r| r.kind.is_revocation() == revocation)
            .map(|r| r.id.clone())
            .collect::<Vec<_>>();
        candidates
            .into_iter()
            .find(|id| self.digest_of(algorithm, id).as_deref() == Some(digest.value.as_slice()))
    }

    fn resolve_certificate(&mut self, reference: &CertificateRef) -> Option<String> {
        match (&reference.digest, &reference.issuer_serial) {
            (Some(digest), _) => self.resolve_digest(digest, false),
            (None, Some(issuer_serial)) => self
                .records
                .values()
                .find(|r| {
                    r.certificate
                        .as_ref()
                        .is_some_and(|c| &c.issuer_serial() == issuer_serial)
                })
                .map(|r| r.id.clone()),
            (None, None) => None,
        }
    }

    fn issuer_of(&self, certificate: &CertificateInfo, view: &TokenEvidence) -> Option<String> {
        self.records
            .values()
            .filter(|r| r.certificate.as_ref().is_some_and(|c| c.subject == certificate.issuer))
            .min_by_key(|r| (!view.delivered.contains_key(&r.id), r.is_external(), r.id.clone()))
            .map(|r| r.id.clone())
    }

    fn covering_revocations(&self, certificate: &CertificateInfo) -> Vec<String> {
        self.records
            .values()
            .filter(|r| r.revocation.as_ref().is_some_and(|rev| rev.covers(certificate)))
            .map(|r| r.id.clone())
            .collect()
    }

    fn build_chain(&self, view: &mut TokenEvidence, signing: String) {
        let mut chain = vec![signing];
        let mut entities = BTreeSet::new();
        loop {
            let Some(current) = chain.last().and_then(|id| self.records.get(id)) else {
                break;
            };
            entities.extend(current.entity_key.clone());
            let Some(certificate) = &current.certificate else {
                break;
            };
            if certificate.is_self_issued() {
                break;
            }
            let Some(issuer) = self.issuer_of(certificate, view) else {
                break;
            };
            let repeated = chain.contains(&issuer)
                || self.records[&issuer]
                    .entity_key
                    .as_ref()
                    .is_some_and(|key| entities.contains(key));
            if repeated {
                break;
            }
            chain.push(issuer);
        }
        view.chain = chain;
    }

    /// Attaches revocation data to every non self-issued chain certificate,
    /// fetching it when none is embedded and a resolver is available.
    fn attach_revocations(
        &mut self,
        view: &mut TokenEvidence,
        resolver: Option<&dyn RevocationResolver>,
    ) -> Result<()> {
        for position in 0..view.chain.len() {
            let id = view.chain[position].clone();
            let Some(certificate) = self.records.get(&id).and_then(|r| r.certificate.clone()) else {
                continue;
            };
            if certificate.is_self_issued() {
                continue;
            }
            let mut covering = self.covering_revocations(&certificate);
            if covering.is_empty() {
                if let Some(resolver) = resolver {
                    let encoded = self.records[&id].encoded.clone();
                    let issuer = view
                        .chain
                        .get(position + 1)
                        .and_then(|issuer| self.records.get(issuer))
                        .map(|r| r.encoded.clone())
                        .unwrap_or_default();
                    let fetched = match resolver.fetch_ocsp(&encoded, &issuer)? {
                        Some(ocsp) => Some((EvidenceKind::Ocsp, ocsp)),
                        None => resolver.fetch_crl(&encoded)?.map(|crl| (EvidenceKind::Crl, crl)),
                    };
                    if let Some((kind, bytes)) = fetched {
                        debug!(
                            domain = "pades.evidence",
                            kind = "revocation_fetched",
                            certificate = %id,
                            "Fetched revocation data"
                        );
                        let origin = EvidenceOrigin::ExternalResolver;
                        if let Some(fetched_id) = self.insert(kind, &bytes, origin, None, None) {
                            view.deliver(fetched_id, origin);
                        }
                        covering = self.covering_revocations(&certificate);
                    }
                }
            }
            if !covering.is_empty() {
                view.chain_revocations.insert(id, covering);
            }
        }
        Ok(())
    }
}

/// Builds the evidence graph of a document.
///
/// Fails only when the resolver reports an I/O error.
pub fn aggregate(
    revisions: &[PdfRevision],
    tokens: &[Token],
    decoder: &dyn CmsDecoder,
    verifier: &dyn SignatureVerifier,
    resolver: Option<&dyn RevocationResolver>,
) -> Result<EvidenceGraph> {
    let mut table = Table {
        decoder,
        verifier,
        records: BTreeMap::new(),
        rejected: BTreeSet::new(),
        errors: Vec::new(),
        digests: HashMap::new(),
    };

    // Document-wide material, in document order.
    let mut dss_view = TokenEvidence::default();
    let mut vri_views: BTreeMap<String, TokenEvidence> = BTreeMap::new();
    for revision in revisions {
        if let Some(dss) = &revision.dss {
            let origin = EvidenceOrigin::DssDictionary;
            let index = revision.index;
            let view = &mut dss_view;
            table.insert_streams(view, EvidenceKind::Certificate, &dss.certs, origin, index);
            table.insert_streams(view, EvidenceKind::Crl, &dss.crls, origin, index);
            table.insert_streams(view, EvidenceKind::Ocsp, &dss.ocsps, origin, index);
        }
        if let Some(vri) = &revision.vri {
            let origin = EvidenceOrigin::VriDictionary;
            for (key, entry) in &vri.entries {
                let view = vri_views.entry(key.clone()).or_default();
                let index = revision.index;
                table.insert_streams(view, EvidenceKind::Certificate, &entry.certs, origin, index);
                table.insert_streams(view, EvidenceKind::Crl, &entry.crls, origin, index);
                table.insert_streams(view, EvidenceKind::Ocsp, &entry.ocsps, origin, index);
            }
        }
    }

    let mut views = BTreeMap::new();
    for token in tokens {
        let mut view = TokenEvidence::default();
        let key = vri_key(&token.encoded);
        for source in std::iter::once(&dss_view).chain(vri_views.get(&key)) {
            for (id, origins) in &source.delivered {
                for &origin in origins {
                    view.deliver(id.clone(), origin);
                }
            }
            for orphan in &source.orphans {
                view.orphan(orphan.clone());
            }
        }

        if let Some(signed_data) = &token.signed_data {
            let origin = EvidenceOrigin::CmsSignedData;
            table.insert_embedded(
                &mut view,
                &token.id,
                EvidenceKind::Certificate,
                &signed_data.certificates,
                origin,
            );
            table.insert_embedded(
                &mut view,
                &token.id,
                EvidenceKind::Crl,
                &signed_data.crls,
                origin,
            );
            if let Some(signer) = &signed_data.signer {
                table.insert_values(
                    &mut view,
                    &token.id,
                    &signer.adbe_revocation,
                    EvidenceOrigin::AdbeRevocationInfoArchival,
                );
                table.insert_embedded(
                    &mut view,
                    &token.id,
                    EvidenceKind::Certificate,
                    &signer.certificate_values,
                    EvidenceOrigin::CertificateValues,
                );
                table.insert_embedded(
                    &mut view,
                    &token.id,
                    EvidenceKind::Certificate,
                    &signer.authorities_certificate_values,
                    EvidenceOrigin::AttrAuthoritiesCertValues,
                );
                table.insert_values(
                    &mut view,
                    &token.id,
                    &signer.timestamp_validation_data,
                    EvidenceOrigin::TimestampValidationData,
                );
            }
        }
        views.insert(token.id.clone(), view);
    }

    // Records dropped as inconsistent after being delivered are forgotten.
    for view in views.values_mut() {
        view.delivered.retain(|id, _| table.records.contains_key(id));
    }

    for token in tokens {
        let Some(mut view) = views.remove(&token.id) else {
            continue;
        };
        if let Some(signer) = token.signer() {
            for (origin, reference) in &signer.certificate_refs {
                let resolved = table.resolve_certificate(reference);
                if *origin == CertificateRefOrigin::SigningCertificate
                    && view.signing_certificate.is_none()
                {
                    view.signing_certificate = resolved.clone();
                }
                view.certificate_refs.push(CertificateReference {
                    origin: *origin,
                    reference: reference.clone(),
                    resolved,
                });
            }
            for (origin, reference) in &signer.revocation_refs {
                let resolved = match &reference.digest {
                    Some(digest) => table.resolve_digest(digest, true),
                    None => None,
                };
                view.revocation_refs.push(RevocationReference {
                    origin: *origin,
                    reference: reference.clone(),
                    resolved,
                });
            }
        }

        if let Some(signing) = view.signing_certificate.clone() {
            table.build_chain(&mut view, signing);
            table.attach_revocations(&mut view, resolver)?;
        }

        let mut used = view.chain.iter().cloned().collect::<BTreeSet<_>>();
        used.extend(view.chain_revocations.values().flatten().cloned());
        used.extend(view.certificate_refs.iter().filter_map(|r| r.resolved.clone()));
        used.extend(view.revocation_refs.iter().filter_map(|r| r.resolved.clone()));
        view.used = used;

        debug!(
            domain = "pades.evidence",
            token = %token.id,
            delivered = view.delivered.len(),
            chain = view.chain.len(),
            orphans = view.orphans.len(),
            "Aggregated token evidence"
        );
        views.insert(token.id.clone(), view);
    }

    Ok(EvidenceGraph {
        records: table.records,
        views,
        consistency_errors: table.errors,
    })
}
