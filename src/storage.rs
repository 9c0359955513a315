//! Compact string storage for tags and fragments
//!
//! The storage form is the only representation that leaves the library. It
//! is not meant to be human-readable: records are delimited by C1 control
//! characters that never occur in extracted content, and the whole string
//! can be base64-armored for transport through channels that mangle
//! control characters.
//!
//! Two tag layouts are readable:
//!
//! - the **current** layout: ten fields per tag, optional fields carrying
//!   an explicit presence prefix (`+value` or `-`), annotation payloads
//!   carrying a type discriminator;
//! - the **legacy** layout: seven or eight fields, optional fields using a
//!   bare `null` sentinel, composite annotation payloads identified only by
//!   their kind name.
//!
//! Which layout a record uses is decided by structural inspection (field
//! count and optional-field shape), never by a version flag; old data has
//! none to offer. Writing always produces the current layout, and the
//! byte output is deterministic for a given logical value.

use base64::Engine;
use log::debug;

use crate::annotation::{FieldValue, GenericAnnotations, InlineAnnotation};
use crate::codec::CodecError;
use crate::fragment::{Fragment, TagRegistry};
use crate::tag::{Tag, TagType, GENERIC_KIND};

/// Separates fields within one tag record.
pub const SEP_FIELD: char = '\u{009C}';
/// Terminates one tag record.
pub const SEP_TAG: char = '\u{009D}';
/// Separates an annotation kind from its payload.
pub const SEP_ANNO_KEY: char = '\u{009E}';
/// Terminates one annotation entry.
pub const SEP_ANNO_VALUE: char = '\u{009F}';
/// Starts one field-set entry inside a composite payload.
pub const SEP_ENTRY: char = '\u{009A}';
/// Separates fields inside a field-set entry.
pub const SEP_FIELDS: char = '\u{009B}';
/// Separates the parts (name, type, value) of one field.
pub const SEP_PART: char = '\u{0099}';
/// Separates the coded text from the tag slots in fragment storage.
pub const SEP_FRAGMENT: char = '\u{E092}';

/// Bare sentinel the legacy layout uses for an absent optional field.
const NULL_SENTINEL: &str = "null";
/// Current-layout marker for an absent optional field (also a tombstone
/// slot in fragment storage).
const ABSENT: &str = "-";
/// Current-layout prefix for a plain-text annotation payload. Legacy
/// payloads carry no prefix at all.
const TEXT_PAYLOAD_PREFIX: char = 't';

/// Deserialization failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The record matches neither the current nor any known legacy layout.
    Layout { fields: usize },
    /// A field value could not be parsed.
    Field { field: &'static str, value: String },
    /// The armored wrapper is not valid base64/UTF-8.
    Armor { reason: String },
    /// A stored fragment's coded text and tags disagree.
    Codec(CodecError),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Layout { fields } => {
                write!(f, "record with {} fields matches no known storage layout", fields)
            }
            StorageError::Field { field, value } => {
                write!(f, "cannot parse {} field from '{}'", field, value)
            }
            StorageError::Armor { reason } => write!(f, "invalid armored storage: {}", reason),
            StorageError::Codec(err) => write!(f, "stored fragment is inconsistent: {}", err),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CodecError> for StorageError {
    fn from(err: CodecError) -> Self {
        StorageError::Codec(err)
    }
}

fn generic_discriminator() -> String {
    format!("{}{}{}", SEP_ENTRY, GENERIC_KIND, SEP_ENTRY)
}

fn push_opt(out: &mut String, value: Option<&str>) {
    match value {
        Some(v) => {
            out.push('+');
            out.push_str(v);
        }
        None => out.push('-'),
    }
}

fn parse_opt<'a>(field: &'a str, name: &'static str) -> Result<Option<&'a str>, StorageError> {
    if field == ABSENT {
        Ok(None)
    } else if let Some(rest) = field.strip_prefix('+') {
        Ok(Some(rest))
    } else {
        Err(StorageError::Field { field: name, value: field.to_string() })
    }
}

fn generic_to_string(payload: &GenericAnnotations) -> String {
    let mut out = String::new();
    for set in payload.sets() {
        out.push(SEP_ENTRY);
        out.push_str(set.set_type());
        for (name, value) in set.fields() {
            out.push(SEP_FIELDS);
            out.push_str(name);
            out.push(SEP_PART);
            match value {
                FieldValue::Str(s) => {
                    out.push('s');
                    out.push(SEP_PART);
                    out.push_str(s);
                }
                FieldValue::Bool(b) => {
                    out.push('b');
                    out.push(SEP_PART);
                    out.push_str(if *b { "true" } else { "false" });
                }
                FieldValue::Int(i) => {
                    out.push('i');
                    out.push(SEP_PART);
                    out.push_str(&i.to_string());
                }
            }
        }
    }
    out
}

fn parse_generic(entries: &str) -> Result<GenericAnnotations, StorageError> {
    let mut payload = GenericAnnotations::new();
    for entry in entries.split(SEP_ENTRY) {
        if entry.is_empty() {
            continue;
        }
        let mut parts = entry.split(SEP_FIELDS);
        // At least one part exists: split never yields nothing.
        let set_type = parts.next().unwrap_or_default();
        let set = payload.add(set_type);
        for field in parts {
            let mut pieces = field.splitn(3, SEP_PART);
            let name = pieces.next().unwrap_or_default();
            let kind = pieces
                .next()
                .ok_or_else(|| StorageError::Field { field: "annotation-field", value: field.to_string() })?;
            let value = pieces
                .next()
                .ok_or_else(|| StorageError::Field { field: "annotation-field", value: field.to_string() })?;
            match kind {
                "s" => {
                    set.set_str(name, value);
                }
                "b" => {
                    let parsed = match value {
                        "true" => true,
                        "false" => false,
                        _ => {
                            return Err(StorageError::Field { field: "annotation-bool", value: value.to_string() })
                        }
                    };
                    set.set_bool(name, parsed);
                }
                "i" => {
                    let parsed = value
                        .parse::<i64>()
                        .map_err(|_| StorageError::Field { field: "annotation-int", value: value.to_string() })?;
                    set.set_int(name, parsed);
                }
                _ => {
                    return Err(StorageError::Field { field: "annotation-type", value: kind.to_string() });
                }
            }
        }
    }
    Ok(payload)
}

fn payload_to_string(payload: Option<&InlineAnnotation>) -> String {
    match payload {
        None => String::new(),
        Some(InlineAnnotation::Text(s)) => format!("{}{}", TEXT_PAYLOAD_PREFIX, s),
        Some(InlineAnnotation::Generic(g)) => format!("{}{}", generic_discriminator(), generic_to_string(g)),
    }
}

fn parse_payload(kind: &str, payload: &str, current: bool) -> Result<Option<InlineAnnotation>, StorageError> {
    if payload.is_empty() {
        return Ok(None);
    }
    let discriminator = generic_discriminator();
    if let Some(rest) = payload.strip_prefix(&discriminator) {
        return Ok(Some(InlineAnnotation::Generic(parse_generic(rest)?)));
    }
    if current {
        match payload.strip_prefix(TEXT_PAYLOAD_PREFIX) {
            Some(rest) => Ok(Some(InlineAnnotation::text(rest))),
            None => Err(StorageError::Field { field: "annotation-payload", value: payload.to_string() }),
        }
    } else if kind == GENERIC_KIND && payload.starts_with(SEP_ENTRY) {
        // Old composite payloads carried no discriminator; the kind name is
        // the only clue, and it is a reliable one for that generation.
        debug!("legacy composite annotation payload for kind '{}'", kind);
        Ok(Some(InlineAnnotation::Generic(parse_generic(payload)?)))
    } else {
        Ok(Some(InlineAnnotation::text(payload)))
    }
}

fn annotations_to_string(tag: &Tag) -> String {
    let mut out = String::new();
    for (kind, payload) in tag.annotation_entries() {
        out.push_str(kind);
        out.push(SEP_ANNO_KEY);
        out.push_str(&payload_to_string(payload));
        out.push(SEP_ANNO_VALUE);
    }
    out
}

fn parse_annotations(tag: &mut Tag, input: &str, current: bool) -> Result<(), StorageError> {
    for entry in input.split(SEP_ANNO_VALUE) {
        if entry.is_empty() {
            continue;
        }
        let mut pair = entry.splitn(2, SEP_ANNO_KEY);
        let kind = pair.next().unwrap_or_default();
        let payload = match pair.next() {
            Some(p) => parse_payload(kind, p, current)?,
            None => None,
        };
        tag.set_annotation(kind, payload);
    }
    Ok(())
}

fn tag_record(tag: &Tag) -> String {
    let mut out = String::new();
    out.push_str(tag.tag_type().as_str());
    out.push(SEP_FIELD);
    out.push_str(&tag.id().to_string());
    out.push(SEP_FIELD);
    out.push_str(tag.category());
    out.push(SEP_FIELD);
    out.push_str(tag.data());
    out.push(SEP_FIELD);
    out.push_str(&tag.flags().to_string());
    out.push(SEP_FIELD);
    push_opt(&mut out, tag.original_id());
    out.push(SEP_FIELD);
    push_opt(&mut out, tag.outer_data_slot());
    out.push(SEP_FIELD);
    push_opt(&mut out, tag.merged_data());
    out.push(SEP_FIELD);
    push_opt(&mut out, tag.display_text());
    out.push(SEP_FIELD);
    if tag.has_annotations() {
        out.push('+');
        out.push_str(&annotations_to_string(tag));
    } else {
        out.push('-');
    }
    out
}

fn parse_common(fields: &[&str]) -> Result<Tag, StorageError> {
    let tag_type = TagType::parse(fields[0])
        .ok_or_else(|| StorageError::Field { field: "tag-type", value: fields[0].to_string() })?;
    let id = fields[1]
        .parse::<i32>()
        .map_err(|_| StorageError::Field { field: "id", value: fields[1].to_string() })?;
    let flags = fields[4]
        .parse::<u32>()
        .map_err(|_| StorageError::Field { field: "flags", value: fields[4].to_string() })?;
    let mut tag = Tag::new(tag_type, fields[2], fields[3]);
    tag.set_id(id);
    // Raw bits round-trip exactly, including bits this crate does not name.
    tag.set_flags(flags);
    Ok(tag)
}

fn parse_record(record: &str) -> Result<Tag, StorageError> {
    let fields: Vec<&str> = record.split(SEP_FIELD).collect();
    match fields.len() {
        10 => {
            let mut tag = parse_common(&fields)?;
            tag.set_original_id(parse_opt(fields[5], "original-id")?.map(str::to_string));
            tag.set_outer_data(parse_opt(fields[6], "outer-data")?.map(str::to_string));
            tag.set_merged_data(parse_opt(fields[7], "merged-data")?.map(str::to_string));
            tag.set_display_text(parse_opt(fields[8], "display-text")?.map(str::to_string));
            if let Some(annotations) = parse_opt(fields[9], "annotations")? {
                parse_annotations(&mut tag, annotations, true)?;
            }
            Ok(tag)
        }
        7 | 8 => {
            debug!("detected legacy tag layout ({} fields)", fields.len());
            let mut tag = parse_common(&fields)?;
            let (outer_idx, anno_idx) = if fields.len() == 8 {
                if fields[5] != NULL_SENTINEL {
                    tag.set_original_id(Some(fields[5].to_string()));
                }
                (6, 7)
            } else {
                (5, 6)
            };
            if fields[outer_idx] != NULL_SENTINEL {
                tag.set_outer_data(Some(fields[outer_idx].to_string()));
            }
            if fields[anno_idx] != NULL_SENTINEL {
                parse_annotations(&mut tag, fields[anno_idx], false)?;
            }
            Ok(tag)
        }
        n => Err(StorageError::Layout { fields: n }),
    }
}

/// Serialize a list of tags. Deterministic for a given logical value;
/// identical adjacent tags stay identical adjacent records.
pub fn tags_to_string(tags: &[Tag]) -> String {
    let mut out = String::new();
    for tag in tags {
        out.push_str(&tag_record(tag));
        out.push(SEP_TAG);
    }
    out
}

/// Parse a tag list from storage, accepting both layouts.
pub fn string_to_tags(input: &str) -> Result<Vec<Tag>, StorageError> {
    let mut tags = Vec::new();
    for record in input.split(SEP_TAG) {
        if record.is_empty() {
            continue;
        }
        tags.push(parse_record(record)?);
    }
    Ok(tags)
}

/// Serialize a fragment: its coded text plus every registry slot,
/// tombstones included, so handles encoded in the text stay valid.
pub fn fragment_to_string(fragment: &Fragment) -> String {
    let mut out = String::new();
    out.push_str(fragment.coded_text());
    out.push(SEP_FRAGMENT);
    for slot in fragment.registry().slots() {
        match slot {
            Some(tag) => out.push_str(&tag_record(tag)),
            None => out.push_str(ABSENT),
        }
        out.push(SEP_TAG);
    }
    out
}

/// Rebuild a fragment from storage, validating text/registry agreement.
pub fn string_to_fragment(input: &str) -> Result<Fragment, StorageError> {
    let (ctext, slots_str) = match input.find(SEP_FRAGMENT) {
        Some(pos) => (&input[..pos], &input[pos + SEP_FRAGMENT.len_utf8()..]),
        None => return Err(StorageError::Layout { fields: 0 }),
    };
    let mut slots: Vec<Option<Tag>> = Vec::new();
    for record in slots_str.split(SEP_TAG) {
        if record.is_empty() {
            continue;
        }
        if record == ABSENT {
            slots.push(None);
        } else {
            slots.push(Some(parse_record(record)?));
        }
    }
    let registry = TagRegistry::from_slots(slots)?;
    Ok(Fragment::from_parts(ctext.to_string(), registry)?)
}

/// Wrap a storage string in base64 for transport through channels that
/// cannot carry control characters.
pub fn to_armored(storage: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(storage.as_bytes())
}

/// Unwrap an armored storage string. Line breaks inside the armor are
/// tolerated.
pub fn from_armored(armored: &str) -> Result<String, StorageError> {
    let filtered: String = armored.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(filtered.as_bytes())
        .map_err(|e| StorageError::Armor { reason: e.to_string() })?;
    String::from_utf8(bytes).map_err(|e| StorageError::Armor { reason: e.to_string() })
}
