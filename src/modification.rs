//! Object-level differences between two revisions.
//!
//! Both revisions are reduced to the set of indirect objects reachable from
//! the trailer, each with a fingerprint of its canonical serialization. Objects
//! only reachable in the newer revision are creations, objects only reachable
//! in the older one deletions, and objects whose fingerprint changed are
//! modifications. Every change is then put in exactly one category.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{NumericComparison, TraversalBudget, ValidationConfig};
use crate::revision::{collect_fields, name_entry, PdfRevision};
use crate::{Error, ExactArrayOrNone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModificationCategory {
    /// DSS, extensions, document timestamps and document information.
    Extension,
    SignatureOrFormFill,
    Annotation,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModificationAction {
    Creation,
    Deletion,
    Modification,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModificationEntry {
    pub category: ModificationCategory,
    pub action: ModificationAction,
    pub object_id: ObjectId,
    /// Keys followed from the trailer when the object was first reached.
    pub key_path: Vec<String>,
    pub object_type: Option<String>,
    pub field_name: Option<String>,
    /// 1-based page number the object belongs to.
    pub page: Option<u32>,
    /// Dictionary keys whose values differ. Empty unless both versions are
    /// dictionaries or streams.
    pub changed_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModificationSet {
    pub entries: Vec<ModificationEntry>,
    /// Pages present in only one of the two revisions.
    pub page_difference_concerned_pages: BTreeSet<u32>,
    /// Pages of the newer revision where two annotation rectangles intersect.
    pub annotations_overlap_concerned_pages: BTreeSet<u32>,
}

impl ModificationSet {
    pub fn by_category(
        &self,
        category: ModificationCategory,
    ) -> impl Iterator<Item = &ModificationEntry> {
        self.entries.iter().filter(move |e| e.category == category)
    }

    pub fn has_undefined(&self) -> bool {
        self.by_category(ModificationCategory::Undefined).next().is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status")]
pub enum ObjectModifications {
    Determined(ModificationSet),
    /// The object graph of a revision could not be walked.
    Undetermined { reason: String },
}

impl ObjectModifications {
    pub fn determined(&self) -> Option<&ModificationSet> {
        match self {
            ObjectModifications::Determined(set) => Some(set),
            ObjectModifications::Undetermined { .. } => None,
        }
    }

    /// True when the change cannot be explained by a permitted operation.
    pub fn is_suspicious(&self) -> bool {
        self.determined().map_or(true, ModificationSet::has_undefined)
    }
}

const EXTENSION_CATALOG_KEYS: &[&str] = &["DSS", "Extensions", "Version"];
const FORM_CATALOG_KEYS: &[&str] =
    &["AcroForm", "Metadata", "PieceInfo", "Names", "OutputIntents", "Perms"];
const ACRO_FORM_KEYS: &[&str] = &["Fields", "SigFlags", "DA", "DR", "NeedAppearances"];
const FIELD_FILL_KEYS: &[&str] = &["V", "AP", "AS", "Kids", "MK", "Lock", "SV"];
const STREAM_KEY: &str = "(stream)";

/// What an object is, as far as modification categories care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Role {
    Document,
    Info,
    Dss,
    AcroForm,
    Field,
    Widget,
    Annotation,
    Page,
}

impl Role {
    /// Higher is stricter. An object shared between several parts of the
    /// document is judged by the strictest part it belongs to.
    fn restriction(self) -> u8 {
        match self {
            Role::Dss | Role::Info => 0,
            Role::AcroForm => 1,
            Role::Field | Role::Widget => 2,
            Role::Annotation => 3,
            Role::Document => 4,
            Role::Page => 5,
        }
    }
}

struct Node {
    path: Vec<String>,
    role: Role,
    fingerprint: [u8; 32],
}

/// The reachable objects of one revision.
struct Closure<'a> {
    doc: &'a Document,
    nodes: BTreeMap<ObjectId, Node>,
}

fn dict_of(object: &Object) -> Option<&Dictionary> {
    match object {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// DSS and AcroForm markers only count directly below the catalog, so a page
/// or annotation subtree cannot relabel itself.
fn own_role(object: &Object, path: &[String], inherited: Role) -> Role {
    let top_level = inherited == Role::Document;
    match path.last().map(String::as_str) {
        Some("DSS") if top_level => return Role::Dss,
        Some("AcroForm") if top_level => return Role::AcroForm,
        _ => {}
    }
    let Object::Dictionary(dict) = object else {
        return inherited;
    };
    let subtype = name_entry(dict, b"Subtype");
    match name_entry(dict, b"Type").as_deref() {
        Some("Page") | Some("Pages") => return Role::Page,
        Some("DSS") if top_level => return Role::Dss,
        _ => {}
    }
    if dict.has(b"FT") || (dict.has(b"T") && matches!(inherited, Role::AcroForm | Role::Field)) {
        return Role::Field;
    }
    match subtype.as_deref() {
        Some("Widget") => Role::Widget,
        Some(_) if dict.has(b"Rect") => Role::Annotation,
        _ => inherited,
    }
}

/// Hashes a canonical serialization of objects, collecting the references it
/// meets together with the key they were found under.
struct Fingerprinter {
    mode: NumericComparison,
    max_depth: usize,
    refs: Vec<(String, ObjectId)>,
}

impl Fingerprinter {
    fn new(config: &ValidationConfig) -> Self {
        Self {
            mode: config.numeric_comparison,
            max_depth: config.max_object_depth,
            refs: Vec::new(),
        }
    }

    fn digest(&mut self, object: &Object, key: &str) -> Result<[u8; 32], Error> {
        let mut hasher = Sha256::new();
        self.write(object, key, 0, &mut hasher)?;
        Ok(hasher.finalize().into())
    }

    fn write(
        &mut self,
        object: &Object,
        key: &str,
        depth: usize,
        out: &mut Sha256,
    ) -> Result<(), Error> {
        if depth > self.max_depth {
            return Err(Error::StructuralLimitExceeded {
                reason: format!("object nesting deeper than {}", self.max_depth),
            });
        }
        match object {
            Object::Null => out.update(b"n"),
            Object::Boolean(value) => out.update(if *value { b"t" } else { b"f" }),
            Object::Integer(value) => match self.mode {
                NumericComparison::Lax => out.update(lax_number(*value as f64).as_bytes()),
                NumericComparison::Strict => out.update(format!("i{value};").as_bytes()),
            },
            Object::Real(value) => match self.mode {
                NumericComparison::Lax => out.update(lax_number(f64::from(*value)).as_bytes()),
                NumericComparison::Strict => {
                    out.update(format!("r{:x};", value.to_bits()).as_bytes())
                }
            },
            Object::Name(name) => {
                out.update(format!("/{}:", name.len()).as_bytes());
                out.update(name);
            }
            Object::String(bytes, _) => {
                out.update(format!("({}:", bytes.len()).as_bytes());
                out.update(bytes);
            }
            Object::Array(items) => {
                out.update(b"[");
                for item in items {
                    self.write(item, key, depth + 1, out)?;
                }
                out.update(b"]");
            }
            Object::Dictionary(dict) => self.write_dict(dict, depth, out)?,
            Object::Stream(stream) => {
                self.write_dict(&stream.dict, depth, out)?;
                out.update(b"stream");
                out.update(Sha256::digest(&stream.content));
            }
            Object::Reference(id) => {
                out.update(format!("R{} {};", id.0, id.1).as_bytes());
                self.refs.push((key.to_string(), *id));
            }
        }
        Ok(())
    }

    fn write_dict(
        &mut self,
        dict: &Dictionary,
        depth: usize,
        out: &mut Sha256,
    ) -> Result<(), Error> {
        let mut entries = dict.iter().collect::<Vec<_>>();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        out.update(b"<<");
        for (key, value) in entries {
            out.update(format!("/{}:", key.len()).as_bytes());
            out.update(key);
            self.write(value, &String::from_utf8_lossy(key), depth + 1, out)?;
        }
        out.update(b">>");
        Ok(())
    }
}

fn lax_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("#{};", value as i64)
    } else {
        format!("#{value};")
    }
}

impl<'a> Closure<'a> {
    /// Every path from the trailer is followed, once per role. An object keeps
    /// the key path it was first reached by and the most restrictive role of
    /// all its paths.
    fn build(
        doc: &'a Document,
        config: &ValidationConfig,
        budget: &TraversalBudget,
    ) -> Result<Self, Error> {
        let mut nodes: BTreeMap<ObjectId, Node> = BTreeMap::new();
        let mut children: HashMap<ObjectId, Vec<(String, ObjectId)>> = HashMap::new();
        let mut visited = HashSet::new();
        let mut expanded = HashSet::new();
        let mut queue = VecDeque::new();
        for (key, name, role) in [
            (b"Root".as_slice(), "Catalog", Role::Document),
            (b"Info".as_slice(), "Info", Role::Info),
        ] {
            if let Ok(id) = doc.trailer.get(key).and_then(Object::as_reference) {
                queue.push_back((id, vec![name.to_string()], role));
            }
        }

        while let Some((id, path, inherited)) = queue.pop_front() {
            let key = path.last().cloned().unwrap_or_default();
            if !visited.insert((id, key, inherited)) {
                continue;
            }
            budget.step()?;
            let Ok(object) = doc.get_object(id) else {
                debug!(
                    domain = "pades.modification",
                    kind = "dangling_reference",
                    object = ?id,
                    "Skipping missing object"
                );
                continue;
            };
            let role = if path.len() == 1 {
                inherited
            } else {
                own_role(object, &path, inherited)
            };
            match nodes.get_mut(&id) {
                Some(node) => {
                    if role.restriction() > node.role.restriction() {
                        node.role = role;
                    }
                }
                None => {
                    let mut fingerprinter = Fingerprinter::new(config);
                    let fingerprint =
                        fingerprinter.digest(object, path.last().map_or("", String::as_str))?;
                    children.insert(id, fingerprinter.refs);
                    nodes.insert(
                        id,
                        Node {
                            path: path.clone(),
                            role,
                            fingerprint,
                        },
                    );
                }
            }
            if !expanded.insert((id, role)) {
                continue;
            }
            for (key, child) in children.get(&id).into_iter().flatten() {
                if !visited.contains(&(*child, key.clone(), role)) {
                    let mut child_path = path.clone();
                    child_path.push(key.clone());
                    queue.push_back((*child, child_path, role));
                }
            }
        }
        Ok(Closure { doc, nodes })
    }
}

/// Leaf page objects in document order. Loops in the page tree are cut.
pub(crate) fn collect_pages(
    doc: &Document,
    budget: &TraversalBudget,
) -> Result<Vec<ObjectId>, Error> {
    let mut pages = Vec::new();
    let Ok(root) = doc
        .catalog()
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(Object::as_reference)
    else {
        return Ok(pages);
    };
    let mut visited = HashSet::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        budget.step()?;
        if !visited.insert(id) {
            warn!(
                security = true,
                domain = "pades.modification",
                kind = "page_tree_loop",
                object = ?id,
                "Page tree loop"
            );
            continue;
        }
        let Ok(dict) = doc.get_dictionary(id) else {
            continue;
        };
        match dict.get(b"Kids").and_then(Object::as_array) {
            Ok(kids) if name_entry(dict, b"Type").as_deref() != Some("Page") => {
                for kid in kids.iter().rev() {
                    if let Ok(kid) = kid.as_reference() {
                        stack.push(kid);
                    }
                }
            }
            _ => pages.push(id),
        }
    }
    Ok(pages)
}

fn annotation_refs(doc: &Document, page: &Object) -> BTreeSet<ObjectId> {
    let annots = match page {
        Object::Array(items) => Some(items),
        other => dict_of(other)
            .and_then(|dict| dict.get_deref(b"Annots", doc).and_then(Object::as_array).ok()),
    };
    annots
        .into_iter()
        .flatten()
        .filter_map(|item| item.as_reference().ok())
        .collect()
}

fn is_widget(doc: &Document, id: ObjectId) -> bool {
    doc.get_dictionary(id)
        .is_ok_and(|dict| name_entry(dict, b"Subtype").as_deref() == Some("Widget"))
}

/// Normalized `[llx lly urx ury]`, or `None` when missing or empty.
fn annotation_rect(doc: &Document, annot: &Dictionary) -> Option<[f32; 4]> {
    let rect = annot.get_deref(b"Rect", doc).and_then(Object::as_array).ok()?;
    let [x1, y1, x2, y2] = rect
        .iter()
        .map(|r| doc.dereference(r).and_then(|(_, r)| r.as_float()))
        .collect::<lopdf::Result<ExactArrayOrNone<f32, 4>>>()
        .ok()?
        .0?;
    let rect = [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)];
    (rect[2] > rect[0] && rect[3] > rect[1]).then_some(rect)
}

fn rects_overlap(a: &[f32; 4], b: &[f32; 4]) -> bool {
    a[0] < b[2] && b[0] < a[2] && a[1] < b[3] && b[1] < a[3]
}

fn overlapping_pages(doc: &Document, pages: &[ObjectId]) -> BTreeSet<u32> {
    let mut concerned = BTreeSet::new();
    for (index, &page) in pages.iter().enumerate() {
        let Ok(page) = doc.get_object(page) else {
            continue;
        };
        let rects = annotation_refs(doc, page)
            .into_iter()
            .filter_map(|id| doc.get_dictionary(id).ok())
            .filter_map(|annot| annotation_rect(doc, annot))
            .collect::<Vec<_>>();
        let overlap = rects
            .iter()
            .enumerate()
            .any(|(i, a)| rects[i + 1..].iter().any(|b| rects_overlap(a, b)));
        if overlap {
            concerned.insert(index as u32 + 1);
        }
    }
    concerned
}

/// Page and field context shared by every entry of one side of the diff.
struct Locator {
    pages: HashMap<ObjectId, u32>,
    annotations: HashMap<ObjectId, u32>,
    fields: HashMap<ObjectId, String>,
}

impl Locator {
    fn new(doc: &Document, pages: &[ObjectId], budget: &TraversalBudget) -> Result<Self, Error> {
        let mut locator = Locator {
            pages: HashMap::new(),
            annotations: HashMap::new(),
            fields: HashMap::new(),
        };
        for (index, &id) in pages.iter().enumerate() {
            let number = index as u32 + 1;
            locator.pages.insert(id, number);
            if let Ok(page) = doc.get_object(id) {
                for annot in annotation_refs(doc, page) {
                    locator.annotations.entry(annot).or_insert(number);
                }
            }
        }
        for field in collect_fields(doc, budget)? {
            if let Some(id) = field.id {
                locator.fields.insert(id, field.full_name.clone());
            }
            if let Some(value) = field.value {
                locator.fields.entry(value).or_insert(field.full_name);
            }
        }
        Ok(locator)
    }

    fn page_of(&self, id: ObjectId, object: &Object) -> Option<u32> {
        self.pages
            .get(&id)
            .or_else(|| self.annotations.get(&id))
            .copied()
            .or_else(|| {
                let parent = dict_of(object)?.get(b"P").and_then(Object::as_reference).ok()?;
                self.pages.get(&parent).copied()
            })
    }

    fn field_of(&self, id: ObjectId, object: &Object) -> Option<String> {
        self.fields.get(&id).cloned().or_else(|| {
            let parent = dict_of(object)?.get(b"Parent").and_then(Object::as_reference).ok()?;
            self.fields.get(&parent).cloned()
        })
    }
}

fn changed_keys(
    old: &Object,
    new: &Object,
    config: &ValidationConfig,
) -> Result<Vec<String>, Error> {
    let (Some(old_dict), Some(new_dict)) = (dict_of(old), dict_of(new)) else {
        return Ok(Vec::new());
    };
    let keys = old_dict
        .iter()
        .chain(new_dict.iter())
        .map(|(key, _)| key.clone())
        .collect::<BTreeSet<_>>();
    let mut changed = Vec::new();
    for key in keys {
        let old_value = old_dict.get(&key).ok();
        let new_value = new_dict.get(&key).ok();
        let differs = match (old_value, new_value) {
            (Some(a), Some(b)) => {
                let before = Fingerprinter::new(config).digest(a, "")?;
                before != Fingerprinter::new(config).digest(b, "")?
            }
            _ => true,
        };
        if differs {
            changed.push(String::from_utf8_lossy(&key).into_owned());
        }
    }
    if let (Object::Stream(a), Object::Stream(b)) = (old, new) {
        if a.content != b.content {
            changed.push(STREAM_KEY.to_string());
        }
    }
    Ok(changed)
}

fn subset_of(keys: &[String], allowed: &[&str]) -> bool {
    keys.iter().all(|k| allowed.contains(&k.as_str()))
}

struct Change<'c> {
    action: ModificationAction,
    node: &'c Node,
    object: &'c Object,
    /// The older version, for modifications.
    previous: Option<&'c Object>,
    changed_keys: &'c [String],
}

/// Categorizes one change. First matching rule wins.
fn categorize(change: &Change, old_doc: &Document, new_doc: &Document) -> ModificationCategory {
    use ModificationAction::*;
    use ModificationCategory::*;

    let dict = dict_of(change.object);
    let object_type = dict.and_then(|d| name_entry(d, b"Type"));
    let is_catalog = change.node.path.len() == 1 && change.node.role == Role::Document;

    let extension_marker = matches!(object_type.as_deref(), Some("DSS") | Some("DocTimeStamp"))
        || change.node.path.iter().any(|k| k == "Extensions");
    if matches!(change.node.role, Role::Dss | Role::Info)
        || (extension_marker
            && !is_catalog
            && !matches!(change.node.role, Role::Page | Role::Annotation))
    {
        return Extension;
    }
    if is_catalog {
        return match change.action {
            Modification if subset_of(change.changed_keys, EXTENSION_CATALOG_KEYS) => Extension,
            Modification
                if change.changed_keys.iter().all(|k| {
                    EXTENSION_CATALOG_KEYS.contains(&k.as_str())
                        || FORM_CATALOG_KEYS.contains(&k.as_str())
                }) =>
            {
                SignatureOrFormFill
            }
            _ => Undefined,
        };
    }
    if object_type.as_deref() == Some("Sig") {
        return if change.action == Deletion { Undefined } else { SignatureOrFormFill };
    }

    // The field, widget or form dictionary itself, as opposed to objects
    // hanging below it such as appearance streams.
    let is_acro_form = change.node.path.last().map(String::as_str) == Some("AcroForm");
    let is_field_or_widget = dict.is_some_and(|d| {
        d.has(b"FT") || d.has(b"T") || name_entry(d, b"Subtype").as_deref() == Some("Widget")
    });
    match change.node.role {
        Role::AcroForm => {
            let allowed = change.action != Deletion
                && (!is_acro_form || subset_of(change.changed_keys, ACRO_FORM_KEYS));
            if allowed { SignatureOrFormFill } else { Undefined }
        }
        Role::Field | Role::Widget => {
            let allowed = match change.action {
                Deletion => false,
                Creation => true,
                Modification => {
                    !is_field_or_widget || subset_of(change.changed_keys, FIELD_FILL_KEYS)
                }
            };
            if allowed { SignatureOrFormFill } else { Undefined }
        }
        Role::Annotation => Annotation,
        Role::Page => {
            let annots_only = change.action == Modification
                && !change.changed_keys.is_empty()
                && subset_of(change.changed_keys, &["Annots"]);
            let annots_array = matches!(change.object, Object::Array(_))
                && change.node.path.last().map(String::as_str) == Some("Annots")
                && change.action == Modification;
            match change.previous {
                Some(previous) if annots_only || annots_array => {
                    annots_delta(previous, change.object, old_doc, new_doc)
                }
                _ => Undefined,
            }
        }
        Role::Document => {
            let form_related = change.node.path.len() >= 2
                && change.node.path[0] == "Catalog"
                && FORM_CATALOG_KEYS[1..].contains(&change.node.path[1].as_str());
            if form_related && change.action != Deletion { SignatureOrFormFill } else { Undefined }
        }
        Role::Dss | Role::Info => Extension,
    }
}

fn annots_delta(
    previous: &Object,
    current: &Object,
    old_doc: &Document,
    new_doc: &Document,
) -> ModificationCategory {
    let before = annotation_refs(old_doc, previous);
    let after = annotation_refs(new_doc, current);
    if before.difference(&after).any(|&id| is_widget(old_doc, id)) {
        return ModificationCategory::Undefined;
    }
    if after.difference(&before).all(|&id| is_widget(new_doc, id)) && before.is_subset(&after) {
        ModificationCategory::SignatureOrFormFill
    } else {
        ModificationCategory::Annotation
    }
}

/// Object modifications from `previous` to `current`.
pub fn diff(
    previous: &PdfRevision,
    current: &PdfRevision,
    config: &ValidationConfig,
    budget: &TraversalBudget,
) -> ObjectModifications {
    let (Some(old_doc), Some(new_doc)) = (previous.document(), current.document()) else {
        return ObjectModifications::Undetermined {
            reason: format!(
                "revision {} could not be parsed",
                if previous.document().is_none() { previous.index } else { current.index }
            ),
        };
    };
    match diff_documents(old_doc, new_doc, config, budget) {
        Ok(set) => ObjectModifications::Determined(set),
        Err(e) => ObjectModifications::Undetermined { reason: e.to_string() },
    }
}

pub fn diff_documents(
    old_doc: &Document,
    new_doc: &Document,
    config: &ValidationConfig,
    budget: &TraversalBudget,
) -> Result<ModificationSet, Error> {
    let old = Closure::build(old_doc, config, budget)?;
    let new = Closure::build(new_doc, config, budget)?;
    let old_pages = collect_pages(old_doc, budget)?;
    let new_pages = collect_pages(new_doc, budget)?;
    let old_locator = Locator::new(old_doc, &old_pages, budget)?;
    let new_locator = Locator::new(new_doc, &new_pages, budget)?;

    let mut set = ModificationSet::default();
    let ids = old.nodes.keys().chain(new.nodes.keys()).copied().collect::<BTreeSet<_>>();
    for id in ids {
        let found = (old.nodes.get(&id), new.nodes.get(&id));
        let (action, node, previous, closure, locator) = match found {
            (None, Some(node)) => (ModificationAction::Creation, node, None, &new, &new_locator),
            (Some(node), None) => (ModificationAction::Deletion, node, None, &old, &old_locator),
            (Some(before), Some(after)) if before.fingerprint != after.fingerprint => {
                let previous = old_doc.get_object(id).ok();
                (ModificationAction::Modification, after, previous, &new, &new_locator)
            }
            _ => continue,
        };
        let Ok(object) = closure.doc.get_object(id) else {
            continue;
        };
        let changed = match previous {
            Some(previous) => changed_keys(previous, object, config)?,
            None => Vec::new(),
        };
        let change = Change {
            action,
            node,
            object,
            previous,
            changed_keys: &changed,
        };
        let category = categorize(&change, old_doc, new_doc);
        set.entries.push(ModificationEntry {
            category,
            action,
            object_id: id,
            key_path: node.path.clone(),
            object_type: dict_of(object)
                .and_then(|d| name_entry(d, b"Type").or_else(|| name_entry(d, b"Subtype"))),
            field_name: locator.field_of(id, object),
            page: locator.page_of(id, object),
            changed_keys: changed,
        });
    }

    let fewer = old_pages.len().min(new_pages.len());
    let more = old_pages.len().max(new_pages.len());
    set.page_difference_concerned_pages = (fewer as u32 + 1..=more as u32).collect();
    set.annotations_overlap_concerned_pages = overlapping_pages(new_doc, &new_pages);

    debug!(
        domain = "pades.modification",
        changes = set.entries.len(),
        undefined = set.by_category(ModificationCategory::Undefined).count(),
        "Compared revisions"
    );
    Ok(set)
}
