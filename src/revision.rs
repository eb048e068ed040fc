//! Recovers the incremental revisions of a PDF document.
//!
//! Strategy: every `startxref N %%EOF` boundary is collected, then the
//! boundaries are walked backward starting from the last one. Each boundary's
//! `/Prev` chain is checked for loops before the prefix of the file ending at
//! that boundary is handed to the PDF parser, so a crafted chain can never
//! make the parser spin.

use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use lopdf::{xref::XrefEntry, Dictionary, Document, Object, ObjectId, Stream};
use regex::bytes::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{TraversalBudget, ValidationConfig};
use crate::{decode_pdf_hex_string, pdf_ends_with_eof, Error, ExactArrayOrNone};

pub type RevisionId = usize;

lazy_static::lazy_static! {
    static ref BOUNDARY_REGEX: Regex =
        Regex::new(r"startxref[ \t\r\n]+(\d+)[ \t\r\n]+%%EOF[ \t]*(?:\r\n|\r|\n)?").unwrap();
    static ref PREV_REGEX: Regex = Regex::new(r"/Prev[ \t\r\n]+(\d+)").unwrap();
}

/// The four integers of a `/ByteRange` entry, exactly as declared:
/// `[offset1 length1 offset2 length2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ByteRange([i64; 4]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ByteRangeIssue {
    /// Not an array of exactly four integers.
    Malformed,
    /// The first signed segment does not start at the beginning of the file.
    NotFromStart,
    /// Negative values or segments out of order.
    Unordered,
    /// The second segment ends past the end of the file.
    OutOfBounds,
    /// The skipped bytes are not the hex encoded `/Contents`.
    ContentsMismatch,
    /// The covered bytes do not end with a `%%EOF` marker.
    NotAtBoundary,
    /// The `/Contents` value lies in an earlier revision than the dictionary.
    OutsideOwnRevision,
    /// The skipped bytes overlap the skipped bytes of another dictionary.
    OverlapsOtherGap,
}

impl ByteRange {
    pub fn new(values: [i64; 4]) -> Self {
        ByteRange(values)
    }

    pub fn values(&self) -> [i64; 4] {
        self.0
    }

    /// Checks `0 = start1 < end1 <= start2 < end2 <= file_len`.
    pub fn check_bounds(&self, file_len: usize) -> std::result::Result<(), ByteRangeIssue> {
        let [start1, len1, start2, len2] = self.0;
        if self.0.iter().any(|&v| v < 0) {
            return Err(ByteRangeIssue::Unordered);
        }
        if start1 != 0 {
            return Err(ByteRangeIssue::NotFromStart);
        }
        let (Some(end1), Some(end2)) = (start1.checked_add(len1), start2.checked_add(len2)) else {
            return Err(ByteRangeIssue::OutOfBounds);
        };
        if !(start1 < end1 && end1 <= start2 && start2 < end2) {
            return Err(ByteRangeIssue::Unordered);
        }
        if end2 > file_len as i64 {
            return Err(ByteRangeIssue::OutOfBounds);
        }
        Ok(())
    }

    /// The two signed segments. Only meaningful once [`Self::check_bounds`]
    /// succeeded.
    pub fn signed_ranges(&self) -> [Range<usize>; 2] {
        let [start1, len1, start2, len2] = self.0.map(|v| v.max(0) as usize);
        [
            start1..start1.saturating_add(len1),
            start2..start2.saturating_add(len2),
        ]
    }

    /// The skipped bytes, holding the encoded signature value.
    pub fn gap(&self) -> Range<usize> {
        let [first, second] = self.signed_ranges();
        first.end..second.start
    }

    pub fn covered_end(&self) -> usize {
        self.signed_ranges()[1].end
    }

    /// True when `range` lies entirely inside one of the signed segments.
    pub fn covers(&self, range: &Range<usize>) -> bool {
        self.signed_ranges()
            .iter()
            .any(|signed| signed.start <= range.start && range.end <= signed.end)
    }

    pub fn signed_bytes<'a>(&self, pdf_bytes: &'a [u8]) -> Option<[&'a [u8]; 2]> {
        let [first, second] = self.signed_ranges();
        Some([pdf_bytes.get(first)?, pdf_bytes.get(second)?])
    }
}

/// A `/Type /Sig` or `/Type /DocTimeStamp` dictionary.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureDictionary {
    pub object_id: ObjectId,
    pub dict_type: Option<String>,
    pub filter: Option<String>,
    pub sub_filter: Option<String>,
    #[serde(skip)]
    pub contents: Vec<u8>,
    pub byte_range: Option<ByteRange>,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub contact_info: Option<String>,
    pub signing_date: Option<String>,
    pub name: Option<String>,
    /// Fully qualified names of the form fields whose `/V` is this dictionary.
    pub field_names: Vec<String>,
    pub issues: Vec<ByteRangeIssue>,
}

impl SignatureDictionary {
    pub fn is_consistent(&self) -> bool {
        self.byte_range.is_some() && self.issues.is_empty()
    }

    pub fn is_doc_timestamp(&self) -> bool {
        self.dict_type.as_deref() == Some("DocTimeStamp")
            || self.sub_filter.as_deref() == Some("ETSI.RFC3161")
    }

    /// The byte range, only if it passed every consistency check.
    pub fn consistent_byte_range(&self) -> Option<ByteRange> {
        self.byte_range.filter(|_| self.issues.is_empty())
    }
}

/// Validation data keyed by PDF object number. `None` marks an entry whose
/// object could not be resolved to a stream.
pub type ValidationStreams = BTreeMap<u32, Option<Vec<u8>>>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DssDictionary {
    #[serde(skip)]
    pub certs: ValidationStreams,
    #[serde(skip)]
    pub crls: ValidationStreams,
    #[serde(skip)]
    pub ocsps: ValidationStreams,
}

impl DssDictionary {
    pub fn has_validation_data(&self) -> bool {
        !(self.certs.is_empty() && self.crls.is_empty() && self.ocsps.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct VriEntry {
    pub certs: ValidationStreams,
    pub crls: ValidationStreams,
    pub ocsps: ValidationStreams,
    /// Raw `/TU` date string.
    pub tu: Option<String>,
    /// Encoded `/TS` timestamp token.
    pub ts: Option<Vec<u8>>,
}

impl VriEntry {
    /// Bytes of every delivered item, certificates first, then CRLs, then
    /// OCSP responses, each in object number order.
    pub fn content(&self) -> Vec<u8> {
        [&self.certs, &self.crls, &self.ocsps]
            .into_iter()
            .flat_map(|streams| streams.values().flatten())
            .flatten()
            .copied()
            .collect()
    }

    /// `/TU` as a point in time, when it holds a well-formed PDF date.
    pub fn validation_time(&self) -> Option<DateTime<Utc>> {
        self.tu.as_deref().and_then(parse_pdf_date)
    }
}

/// Parses a PDF date (`D:YYYYMMDDHHmmSSOHH'mm'`). Only the year is required;
/// missing fields take their earliest value and a missing zone means UTC.
pub(crate) fn parse_pdf_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    let text = text.strip_prefix("D:").unwrap_or(text);
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    if digits < 4 || digits % 2 != 0 || digits > 14 {
        return None;
    }
    let (stamp, zone) = text.split_at(digits);
    let field = |range: Range<usize>, default: u32| match stamp.get(range) {
        Some(digits) => digits.parse::<u32>().ok(),
        None => Some(default),
    };
    let year = stamp[..4].parse::<i32>().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(4..6, 1)?, field(6..8, 1)?)?;
    let local = date.and_hms_opt(field(8..10, 0)?, field(10..12, 0)?, field(12..14, 0)?)?;

    let offset_minutes = match zone.chars().next() {
        None | Some('Z') => 0,
        Some(sign @ ('+' | '-')) => {
            let mut parts = zone[1..].split('\'').filter(|p| !p.is_empty());
            let hours = parts.next()?.parse::<i64>().ok()?;
            let minutes = parts.next().map_or(Some(0), |m| m.parse::<i64>().ok())?;
            if hours > 23 || minutes > 59 {
                return None;
            }
            let total = hours * 60 + minutes;
            if sign == '-' { -total } else { total }
        }
        Some(_) => return None,
    };
    Some(Utc.from_utc_datetime(&local) - Duration::minutes(offset_minutes))
}

/// VRI entries keyed by the upper case hex SHA-1 of the signature value.
#[derive(Debug, Clone, Default)]
pub struct VriDictionary {
    pub entries: BTreeMap<String, VriEntry>,
}

/// One incremental state of the document.
#[derive(Debug)]
pub struct PdfRevision {
    pub index: RevisionId,
    /// First byte of this revision's incremental update.
    pub start: usize,
    /// Byte offset just past the `%%EOF` marker.
    pub boundary: usize,
    pub startxref: usize,
    /// Signature and timestamp dictionaries introduced by this revision.
    pub signatures: Vec<SignatureDictionary>,
    pub dss: Option<DssDictionary>,
    pub vri: Option<VriDictionary>,
    /// Later revisions whose signed range encloses this one.
    pub outer_revisions: Vec<RevisionId>,
    pub parse_error: Option<String>,
    document: Option<Document>,
}

impl PdfRevision {
    /// The object graph as of this revision.
    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn signature_dictionary(&self) -> Option<&SignatureDictionary> {
        self.signatures.first()
    }

    pub fn byte_range(&self) -> Option<ByteRange> {
        self.signature_dictionary().and_then(|s| s.byte_range)
    }

    pub fn field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.signatures.iter().flat_map(|s| s.field_names.iter()) {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }
}

/// Revisions recovered by the walker. `limit` holds the structural limit that
/// stopped the walk early, if any.
#[derive(Debug)]
pub struct RevisionWalk {
    pub revisions: Vec<PdfRevision>,
    pub limit: Option<Error>,
}

struct Boundary {
    startxref: usize,
    end: usize,
}

pub struct RevisionWalker<'a> {
    pdf_bytes: &'a [u8],
    config: &'a ValidationConfig,
    budget: &'a TraversalBudget,
}

impl<'a> RevisionWalker<'a> {
    pub fn new(
        pdf_bytes: &'a [u8],
        config: &'a ValidationConfig,
        budget: &'a TraversalBudget,
    ) -> Self {
        Self {
            pdf_bytes,
            config,
            budget,
        }
    }

    /// Recovers every revision reachable before a structural limit is hit.
    ///
    /// Fails only with [`Error::MalformedDocument`].
    pub fn walk(&self) -> Result<RevisionWalk> {
        let boundaries = find_boundaries(self.pdf_bytes);
        if boundaries.is_empty() {
            return Err(Error::MalformedDocument.into());
        }

        let mut limit = None;
        let mut accepted = Vec::new();
        for (position, boundary) in boundaries.iter().enumerate().rev() {
            if accepted.len() == self.config.max_revisions {
                limit = Some(Error::StructuralLimitExceeded {
                    reason: format!("more than {} revisions", self.config.max_revisions),
                });
                break;
            }
            match self.check_xref_chain(boundary.startxref) {
                Ok(()) => accepted.push(position),
                Err(err @ Error::StructuralLimitExceeded { .. }) => {
                    warn!(
                        security = true,
                        domain = "pades.revision",
                        kind = "xref_chain_rejected",
                        startxref = boundary.startxref,
                        eof = boundary.end,
                        "Rejected revision: {err}"
                    );
                    let exhausted = self.budget.used() > self.config.max_traversal_steps
                        || self.budget.check_deadline().is_err();
                    limit = Some(err);
                    if exhausted {
                        break;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        accepted.reverse();

        let mut revisions = Vec::with_capacity(accepted.len());
        for position in accepted {
            let boundary = &boundaries[position];
            let start = match position {
                0 => 0,
                _ => boundaries[position - 1].end,
            };
            revisions.push(self.load_revision(revisions.len(), start, boundary));
        }

        if let Err(err) = self.attach_field_names(&mut revisions) {
            limit.get_or_insert(err);
        }
        let ends = boundaries.iter().map(|b| b.end).collect::<Vec<_>>();
        check_byte_ranges(self.pdf_bytes, &ends, &mut revisions);
        link_outer_revisions(&mut revisions);

        debug!(
            domain = "pades.revision",
            revisions = revisions.len(),
            steps = self.budget.used(),
            "Recovered revisions"
        );
        Ok(RevisionWalk { revisions, limit })
    }

    /// Follows the `/Prev` chain starting at `startxref`, rejecting loops.
    fn check_xref_chain(&self, startxref: usize) -> std::result::Result<(), Error> {
        let mut seen = HashSet::new();
        let mut next = Some(startxref);
        while let Some(offset) = next {
            self.budget.step()?;
            if !seen.insert(offset) {
                return Err(Error::StructuralLimitExceeded {
                    reason: format!("xref /Prev chain loops back to offset {offset}"),
                });
            }
            if offset >= self.pdf_bytes.len() {
                warn!(
                    security = true,
                    domain = "pades.revision",
                    kind = "xref_offset_oob",
                    offset,
                    bytes_len = self.pdf_bytes.len(),
                    "Xref offset out of range"
                );
                break;
            }
            next = prev_offset(self.pdf_bytes, offset);
        }
        Ok(())
    }

    fn load_revision(&self, index: RevisionId, start: usize, boundary: &Boundary) -> PdfRevision {
        let mut revision = PdfRevision {
            index,
            start,
            boundary: boundary.end,
            startxref: boundary.startxref,
            signatures: Vec::new(),
            dss: None,
            vri: None,
            outer_revisions: Vec::new(),
            parse_error: None,
            document: None,
        };

        let doc = match Document::load_mem(&self.pdf_bytes[..boundary.end]) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(
                    domain = "pades.revision",
                    kind = "revision_unparseable",
                    revision = index,
                    eof = boundary.end,
                    "Revision could not be parsed: {e}"
                );
                revision.parse_error = Some(e.to_string());
                return revision;
            }
        };

        revision.signatures = introduced_objects(&doc, start..boundary.end)
            .filter_map(|(id, obj)| match obj {
                Object::Dictionary(dict) if is_signature_dictionary(dict) => {
                    Some(read_signature_dictionary(&doc, id, dict))
                }
                _ => None,
            })
            .collect();

        match read_dss(&doc) {
            Ok((dss, vri)) => {
                revision.dss = dss;
                revision.vri = vri;
            }
            Err(e) => {
                warn!(
                    domain = "pades.revision",
                    kind = "dss_unreadable",
                    revision = index,
                    "DSS dictionary could not be read: {e}"
                );
            }
        }

        revision.document = Some(doc);
        revision
    }

    /// Names come from the revision's own form and from the latest parsed
    /// one, since fields can be renamed or created after the signature.
    fn attach_field_names(&self, revisions: &mut [PdfRevision]) -> std::result::Result<(), Error> {
        let latest = match revisions.iter().rev().find_map(|r| r.document()) {
            Some(doc) => collect_fields(doc, self.budget)?,
            None => return Ok(()),
        };
        for revision in revisions.iter_mut() {
            if revision.signatures.is_empty() {
                continue;
            }
            let own = match revision.document() {
                Some(doc) => collect_fields(doc, self.budget)?,
                None => Vec::new(),
            };
            for sig in revision.signatures.iter_mut() {
                for field in own.iter().chain(latest.iter()) {
                    if field.value == Some(sig.object_id)
                        && !sig.field_names.contains(&field.full_name)
                    {
                        sig.field_names.push(field.full_name.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Convenience wrapper raising the structural limit, if one was hit.
pub fn extract_revisions(pdf_bytes: &[u8], config: &ValidationConfig) -> Result<Vec<PdfRevision>> {
    let budget = config.budget();
    let walk = RevisionWalker::new(pdf_bytes, config, &budget).walk()?;
    match walk.limit {
        Some(err) => Err(err.into()),
        None => Ok(walk.revisions),
    }
}

fn find_boundaries(pdf_bytes: &[u8]) -> Vec<Boundary> {
    BOUNDARY_REGEX
        .captures_iter(pdf_bytes)
        .filter_map(|caps| {
            let startxref = parse_offset(caps.get(1)?.as_bytes())?;
            Some(Boundary {
                startxref,
                end: caps.get(0)?.end(),
            })
        })
        .collect()
}

fn parse_offset(digits: &[u8]) -> Option<usize> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Reads the `/Prev` entry of the trailer or xref stream at `offset`.
fn prev_offset(pdf_bytes: &[u8], offset: usize) -> Option<usize> {
    let section = &pdf_bytes[offset..];
    let section = match find(section, b"startxref") {
        Some(end) => &section[..end],
        None => section,
    };
    let dict = if section.starts_with(b"xref") {
        &section[find(section, b"trailer")?..]
    } else {
        section
    };
    // Xref streams carry /Prev in the stream dictionary, before the data.
    let dict = match find(dict, b"stream") {
        Some(end) => &dict[..end],
        None => dict,
    };
    let caps = PREV_REGEX.captures(dict)?;
    parse_offset(caps.get(1)?.as_bytes())
}

/// Objects whose definition starts inside `span`.
fn introduced_objects(
    doc: &Document,
    span: Range<usize>,
) -> impl Iterator<Item = (ObjectId, &Object)> + '_ {
    doc.objects.iter().filter_map(move |(id, obj)| {
        let offset = object_offset(doc, id.0)?;
        span.contains(&offset).then_some((*id, obj))
    })
}

fn object_offset(doc: &Document, number: u32) -> Option<usize> {
    match doc.reference_table.entries.get(&number)? {
        XrefEntry::Normal { offset, .. } => Some(*offset as usize),
        XrefEntry::Compressed { container, .. } => {
            match doc.reference_table.entries.get(container)? {
                XrefEntry::Normal { offset, .. } => Some(*offset as usize),
                _ => None,
            }
        }
        _ => None,
    }
}

fn is_signature_dictionary(dict: &Dictionary) -> bool {
    match dict.get(b"Type").and_then(Object::as_name) {
        Ok(t) => t == b"Sig" || t == b"DocTimeStamp",
        Err(_) => dict.has(b"ByteRange") && dict.has(b"Contents") && dict.has(b"Filter"),
    }
}

fn read_signature_dictionary(
    doc: &Document,
    object_id: ObjectId,
    dict: &Dictionary,
) -> SignatureDictionary {
    let byte_range = dict
        .get_deref(b"ByteRange", doc)
        .and_then(Object::as_array)
        .ok()
        .and_then(|array| {
            array
                .iter()
                .map(|r| doc.dereference(r).and_then(|(_, r)| r.as_i64()))
                .collect::<lopdf::Result<ExactArrayOrNone<i64, 4>>>()
                .ok()
        })
        .and_then(|exact| exact.0)
        .map(ByteRange::new);

    let contents = dict
        .get_deref(b"Contents", doc)
        .and_then(Object::as_str)
        .map(<[u8]>::to_vec)
        .unwrap_or_default();

    SignatureDictionary {
        object_id,
        dict_type: name_entry(dict, b"Type"),
        filter: name_entry(dict, b"Filter"),
        sub_filter: name_entry(dict, b"SubFilter"),
        contents,
        byte_range,
        reason: text_entry(doc, dict, b"Reason"),
        location: text_entry(doc, dict, b"Location"),
        contact_info: text_entry(doc, dict, b"ContactInfo"),
        signing_date: text_entry(doc, dict, b"M"),
        name: text_entry(doc, dict, b"Name"),
        field_names: Vec::new(),
        issues: match byte_range {
            Some(_) => Vec::new(),
            None => vec![ByteRangeIssue::Malformed],
        },
    }
}

pub(crate) fn name_entry(dict: &Dictionary, key: &[u8]) -> Option<String> {
    dict.get(key)
        .and_then(Object::as_name)
        .ok()
        .map(|n| String::from_utf8_lossy(n).into_owned())
}

fn text_entry(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    dict.get_deref(key, doc)
        .and_then(Object::as_str)
        .ok()
        .map(decode_text_string)
}

/// Decodes a PDF text string, either UTF-16BE with a byte order mark or
/// PDFDocEncoding (approximated as Latin-1).
pub(crate) fn decode_text_string(bytes: &[u8]) -> String {
    match bytes.strip_prefix(&[0xfe, 0xff]) {
        Some(utf16) => {
            let units = utf16
                .chunks(2)
                .map(|pair| u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)]))
                .collect::<Vec<_>>();
            String::from_utf16_lossy(&units)
        }
        None => bytes.iter().map(|&b| b as char).collect(),
    }
}

pub(crate) fn stream_bytes(stream: &Stream) -> Option<Vec<u8>> {
    if stream.dict.has(b"Filter") {
        stream.decompressed_content().ok()
    } else {
        Some(stream.content.clone())
    }
}

fn read_dss(doc: &Document) -> Result<(Option<DssDictionary>, Option<VriDictionary>)> {
    let catalog = doc.catalog()?;
    let dss = match catalog.get_deref(b"DSS", doc) {
        Ok(obj) => obj.as_dict()?,
        Err(lopdf::Error::DictKey) => return Ok((None, None)),
        Err(e) => return Err(e.into()),
    };

    let dss_dict = DssDictionary {
        certs: read_streams(doc, dss, b"Certs"),
        crls: read_streams(doc, dss, b"CRLs"),
        ocsps: read_streams(doc, dss, b"OCSPs"),
    };

    let vri = match dss.get_deref(b"VRI", doc).and_then(Object::as_dict) {
        Ok(vri) => {
            let mut entries = BTreeMap::new();
            for (key, value) in vri.iter() {
                let Ok(entry) = doc.dereference(value).and_then(|(_, v)| v.as_dict()) else {
                    warn!(
                        domain = "pades.revision",
                        kind = "vri_entry_not_dict",
                        "Skipping VRI entry"
                    );
                    continue;
                };
                let ts = entry
                    .get(b"TS")
                    .ok()
                    .and_then(|ts| doc.dereference(ts).ok())
                    .and_then(|(_, ts)| ts.as_stream().ok())
                    .and_then(stream_bytes);
                entries.insert(
                    String::from_utf8_lossy(key).to_ascii_uppercase(),
                    VriEntry {
                        certs: read_streams(doc, entry, b"Cert"),
                        crls: read_streams(doc, entry, b"CRL"),
                        ocsps: read_streams(doc, entry, b"OCSP"),
                        tu: text_entry(doc, entry, b"TU"),
                        ts,
                    },
                );
            }
            Some(VriDictionary { entries })
        }
        Err(_) => None,
    };

    Ok((Some(dss_dict), vri))
}

fn read_streams(doc: &Document, dict: &Dictionary, key: &[u8]) -> ValidationStreams {
    let mut streams = BTreeMap::new();
    let Ok(array) = dict.get_deref(key, doc).and_then(Object::as_array) else {
        return streams;
    };
    for item in array {
        let Ok(id) = item.as_reference() else {
            warn!(
                domain = "pades.revision",
                kind = "validation_data_not_reference",
                key = %String::from_utf8_lossy(key),
                "Validation data entry is not an indirect stream"
            );
            continue;
        };
        let bytes = doc
            .get_object(id)
            .and_then(Object::as_stream)
            .ok()
            .and_then(stream_bytes);
        streams.insert(id.0, bytes);
    }
    streams
}

/// A terminal form field.
#[derive(Debug, Clone)]
pub(crate) struct FieldNode {
    pub id: Option<ObjectId>,
    pub full_name: String,
    /// Indirect `/V` value, when present.
    pub value: Option<ObjectId>,
}

/// Walks the AcroForm field tree. Loops are cut, every visited node costs one
/// budget step.
pub(crate) fn collect_fields(
    doc: &Document,
    budget: &TraversalBudget,
) -> std::result::Result<Vec<FieldNode>, Error> {
    let mut fields = Vec::new();
    let Ok(acro_form) = doc
        .catalog()
        .and_then(|catalog| catalog.get_deref(b"AcroForm", doc))
        .and_then(Object::as_dict)
    else {
        return Ok(fields);
    };
    let Ok(roots) = acro_form.get_deref(b"Fields", doc).and_then(Object::as_array) else {
        return Ok(fields);
    };

    let mut visited = HashSet::new();
    let mut stack = roots
        .iter()
        .rev()
        .map(|f| (f, String::new()))
        .collect::<Vec<_>>();
    while let Some((node, parent_name)) = stack.pop() {
        budget.step()?;
        let Ok((id, Object::Dictionary(dict))) = doc.dereference(node) else {
            continue;
        };
        if let Some(id) = id {
            if !visited.insert(id) {
                warn!(
                    security = true,
                    domain = "pades.revision",
                    kind = "field_loop",
                    object = ?id,
                    "Field tree loop"
                );
                continue;
            }
        }

        let partial = dict
            .get_deref(b"T", doc)
            .and_then(Object::as_str)
            .ok()
            .map(decode_text_string);
        let full_name = match (&partial, parent_name.is_empty()) {
            (Some(p), true) => p.clone(),
            (Some(p), false) => format!("{parent_name}.{p}"),
            (None, _) => parent_name.clone(),
        };
        let kids = dict.get_deref(b"Kids", doc).and_then(Object::as_array).ok();
        // Widget kids without /T are the same field.
        let has_field_kids = kids.is_some_and(|kids| {
            kids.iter().any(|k| {
                doc.dereference(k)
                    .and_then(|(_, k)| k.as_dict())
                    .is_ok_and(|k| k.has(b"T"))
            })
        });
        match kids {
            Some(kids) if has_field_kids => {
                for kid in kids.iter().rev() {
                    stack.push((kid, full_name.clone()));
                }
            }
            _ => fields.push(FieldNode {
                id,
                full_name,
                value: dict.get(b"V").and_then(Object::as_reference).ok(),
            }),
        }
    }
    Ok(fields)
}

fn check_byte_ranges(pdf_bytes: &[u8], boundaries: &[usize], revisions: &mut [PdfRevision]) {
    for revision in revisions.iter_mut() {
        let start = revision.start;
        for sig in revision.signatures.iter_mut() {
            let Some(range) = sig.byte_range else {
                continue;
            };
            if let Err(issue) = range.check_bounds(pdf_bytes.len()) {
                sig.issues.push(issue);
                continue;
            }
            let gap = range.gap();
            let contents = decode_pdf_hex_string(&pdf_bytes[gap.clone()]);
            if contents.as_deref() != Some(sig.contents.as_slice()) {
                sig.issues.push(ByteRangeIssue::ContentsMismatch);
            }
            let end = range.covered_end();
            if !boundaries.contains(&end) && !pdf_ends_with_eof(&pdf_bytes[..end]) {
                sig.issues.push(ByteRangeIssue::NotAtBoundary);
            }
            if gap.start < start {
                sig.issues.push(ByteRangeIssue::OutsideOwnRevision);
            }
        }
    }

    // Earlier dictionaries win; the later one of an overlapping pair is flagged.
    let mut gaps: Vec<Range<usize>> = Vec::new();
    for sig in revisions.iter_mut().flat_map(|r| r.signatures.iter_mut()) {
        let Some(range) = sig.byte_range.filter(|_| sig.issues.is_empty()) else {
            continue;
        };
        let gap = range.gap();
        if gaps.iter().any(|other| other.start < gap.end && gap.start < other.end) {
            sig.issues.push(ByteRangeIssue::OverlapsOtherGap);
        } else {
            gaps.push(gap);
        }
    }

    for sig in revisions.iter().flat_map(|r| r.signatures.iter()) {
        if !sig.issues.is_empty() {
            warn!(
                security = true,
                domain = "pades.revision",
                kind = "inconsistent_byte_range",
                object = ?sig.object_id,
                byte_range = ?sig.byte_range.map(|r| r.values()),
                issues = ?sig.issues,
                "Signature dictionary has an inconsistent /ByteRange"
            );
        }
    }
}

fn link_outer_revisions(revisions: &mut [PdfRevision]) {
    let covered_ends = revisions
        .iter()
        .map(|r| {
            r.signatures
                .iter()
                .filter_map(SignatureDictionary::consistent_byte_range)
                .map(|range| range.covered_end())
                .max()
        })
        .collect::<Vec<_>>();
    for (index, revision) in revisions.iter_mut().enumerate() {
        revision.outer_revisions = covered_ends
            .iter()
            .enumerate()
            .skip(index + 1)
            .filter(|(_, end)| end.is_some_and(|end| end >= revision.boundary))
            .map(|(later, _)| later)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PdfBuilder;

    fn signed_once() -> (Vec<u8>, usize) {
        let mut pdf = PdfBuilder::new();
        pdf.base_document();
        pdf.end_revision(1);
        pdf.object(5, "<< /FT /Sig /T (Signature1) /V 6 0 R >>")
            .object(
                1,
                "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [5 0 R] /SigFlags 3 >> >>",
            )
            .signature(
                6,
                "/Type /Sig /Filter /Adobe.PPKLite /SubFilter /ETSI.CAdES.detached",
                b"SIG-1",
            );
        let end = pdf.end_revision(1);
        (pdf.into_bytes(), end)
    }

    #[test]
    fn single_signature_revision() {
        let (bytes, end) = signed_once();
        let revisions = extract_revisions(&bytes, &ValidationConfig::default()).unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[1].boundary, end);
        assert!(revisions[0].signatures.is_empty());

        let sig = revisions[1].signature_dictionary().unwrap();
        assert!(sig.is_consistent(), "issues: {:?}", sig.issues);
        assert_eq!(sig.field_names, vec!["Signature1".to_string()]);
        assert_eq!(sig.sub_filter.as_deref(), Some("ETSI.CAdES.detached"));
        assert!(sig.contents.starts_with(b"SIG-1"));

        let values = sig.byte_range.unwrap().values();
        assert_eq!(values.len(), 4);
        assert_eq!(values[0], 0);
        assert!(values[1] <= values[2]);
        assert_eq!((values[2] + values[3]) as usize, end);
    }

    #[test]
    fn byte_range_values_are_reported_verbatim() {
        let range = ByteRange::new([0, 840, 960, 1200]);
        assert_eq!(range.values(), [0, 840, 960, 1200]);
        assert!(range.check_bounds(2160).is_ok());
        assert_eq!(range.gap(), 840..960);
        assert_eq!(range.covered_end(), 2160);
        assert_eq!(range.check_bounds(2159), Err(ByteRangeIssue::OutOfBounds));
        assert_eq!(
            ByteRange::new([10, 840, 960, 1200]).check_bounds(4000),
            Err(ByteRangeIssue::NotFromStart)
        );
        assert_eq!(
            ByteRange::new([0, 960, 840, 1200]).check_bounds(4000),
            Err(ByteRangeIssue::Unordered)
        );
        assert_eq!(
            ByteRange::new([0, -1, 840, 1200]).check_bounds(4000),
            Err(ByteRangeIssue::Unordered)
        );
    }

    #[test]
    fn tampered_byte_range_is_flagged_not_raised() {
        let (mut bytes, _) = signed_once();
        // Shift the end of the first signed segment: the dictionary must still
        // be reported, only marked inconsistent.
        let marker = find(&bytes, b"/ByteRange [0 ").unwrap() + b"/ByteRange [0 ".len();
        bytes[marker] = if bytes[marker] == b'1' { b'2' } else { b'1' };
        let revisions = extract_revisions(&bytes, &ValidationConfig::default()).unwrap();
        let sig = revisions[1].signature_dictionary().unwrap();
        assert!(!sig.is_consistent());
    }

    #[test]
    fn missing_marker_is_malformed() {
        let bytes = b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n";
        let err = extract_revisions(bytes, &ValidationConfig::default()).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::MalformedDocument)));
    }

    #[test]
    fn self_referencing_prev_terminates() {
        let mut pdf = PdfBuilder::new();
        pdf.base_document();
        pdf.end_revision(1);
        pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
        pdf.end_revision_with_prev_loop(1);
        let bytes = pdf.into_bytes();

        let config = ValidationConfig {
            max_traversal_steps: 1_000,
            ..Default::default()
        };
        let err = extract_revisions(&bytes, &config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::StructuralLimitExceeded { .. })
        ));

        // The untouched first revision is still recovered.
        let budget = config.budget();
        let walk = RevisionWalker::new(&bytes, &config, &budget).walk().unwrap();
        assert_eq!(walk.revisions.len(), 1);
        assert!(walk.limit.is_some());
    }

    #[test]
    fn revision_count_is_bounded() {
        let mut pdf = PdfBuilder::new();
        pdf.base_document();
        pdf.end_revision(1);
        for _ in 0..4 {
            pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
            pdf.end_revision(1);
        }
        let bytes = pdf.into_bytes();
        let config = ValidationConfig {
            max_revisions: 3,
            ..Default::default()
        };
        let budget = config.budget();
        let walk = RevisionWalker::new(&bytes, &config, &budget).walk().unwrap();
        assert_eq!(walk.revisions.len(), 3);
        assert!(matches!(walk.limit, Some(Error::StructuralLimitExceeded { .. })));
    }

    #[test]
    fn dss_entries_are_keyed_by_object_number() {
        let mut pdf = PdfBuilder::new();
        pdf.base_document();
        pdf.end_revision(1);
        pdf.stream(20, "", b"CERT-A")
            .stream(26, "", b"CERT-A")
            .stream(21, "", b"CRL-A")
            .object(
                30,
                "<< /Certs [20 0 R 26 0 R 99 0 R] /CRLs [21 0 R] \
                 /VRI << /ABCDEF << /Cert [26 0 R] /TU (D:20240101120000+02'00') >> >> >>",
            )
            .object(1, "<< /Type /Catalog /Pages 2 0 R /DSS 30 0 R >>");
        pdf.end_revision(1);
        let bytes = pdf.into_bytes();

        let revisions = extract_revisions(&bytes, &ValidationConfig::default()).unwrap();
        let dss = revisions[1].dss.as_ref().unwrap();
        assert_eq!(dss.certs.len(), 3);
        assert_eq!(dss.certs[&20].as_deref(), Some(b"CERT-A".as_slice()));
        assert_eq!(dss.certs[&99], None);
        assert_eq!(dss.crls.len(), 1);
        assert!(revisions[0].dss.is_none());

        let vri = revisions[1].vri.as_ref().unwrap();
        let entry = &vri.entries["ABCDEF"];
        assert_eq!(entry.certs.len(), 1);
        assert_eq!(entry.tu.as_deref(), Some("D:20240101120000+02'00'"));
        assert_eq!(
            entry.validation_time(),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn pdf_dates() {
        let at = |y, mo, d, h, mi, s| Some(Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap());
        assert_eq!(parse_pdf_date("D:20240315093000Z"), at(2024, 3, 15, 9, 30, 0));
        assert_eq!(parse_pdf_date("D:20240315093000-05'30'"), at(2024, 3, 15, 15, 0, 0));
        assert_eq!(parse_pdf_date("D:20240315093000+01"), at(2024, 3, 15, 8, 30, 0));
        assert_eq!(parse_pdf_date("D:2024"), at(2024, 1, 1, 0, 0, 0));
        assert_eq!(parse_pdf_date("20240315"), at(2024, 3, 15, 0, 0, 0));
        assert_eq!(parse_pdf_date("D:20241315"), None);
        assert_eq!(parse_pdf_date("D:202403150930005"), None);
        assert_eq!(parse_pdf_date("D:20240315093000+99'00'"), None);
        assert_eq!(parse_pdf_date("yesterday"), None);
    }

    #[test]
    fn text_strings_decode_utf16() {
        assert_eq!(decode_text_string(&[0xfe, 0xff, 0x00, 0x41, 0x00, 0xe9]), "Aé");
        assert_eq!(decode_text_string(b"plain"), "plain");
    }
}
