//! Inline tag data structures
//!
//! A [`Tag`] is one out-of-band inline markup unit: a formatting start or
//! end, a placeholder, or an annotation span boundary. Tags never live in
//! the text itself; the coded text references them through the marker
//! scheme in [`crate::codec`].

use std::collections::BTreeMap;

use crate::annotation::{GenericAnnotations, InlineAnnotation};

/// Reserved category for tags that were given no category.
///
/// A tag category is never absent, so comparisons stay cheap; this constant
/// stands in for "no category".
pub const CATEGORY_NULL: &str = "null";

/// Annotation kind holding the composite [`GenericAnnotations`] payload.
///
/// This kind obeys the additive merge rule of [`Tag::set_annotation`].
pub const GENERIC_KIND: &str = "generic";

/// Annotation kind marking a tag as an annotation-span boundary and holding
/// its optional `value` / `ref` / `translate` attributes.
pub const MARKER_KIND: &str = "marker";

/// Start of a cross-reference marker sequence inside tag payload text.
pub const REF_MARKER_START: &str = "[#$";
/// End of a cross-reference marker sequence.
pub const REF_MARKER_END: &str = "]";

/// Tag has a cross-reference marker in its payload.
const FLAG_HAS_REFERENCE: u32 = 0x01;
/// Tag may be duplicated in the text.
pub const FLAG_CLONEABLE: u32 = 0x02;
/// Tag may be removed from the text.
pub const FLAG_DELETEABLE: u32 = 0x04;
/// Tag masks a reserved marker character.
pub const FLAG_MARKER_MASKING: u32 = 0x20;

/// Kind of inline tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagType {
    /// Start of a paired span.
    Opening,
    /// End of a paired span.
    Closing,
    /// Point content standing in for native markup.
    Placeholder,
    /// Self-contained tag that never pairs.
    Standalone,
}

impl TagType {
    /// Storage name for the tag type.
    pub fn as_str(self) -> &'static str {
        match self {
            TagType::Opening => "OPENING",
            TagType::Closing => "CLOSING",
            TagType::Placeholder => "PLACEHOLDER",
            TagType::Standalone => "STANDALONE",
        }
    }

    /// Parse a storage name back to a tag type.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "OPENING" => Some(TagType::Opening),
            "CLOSING" => Some(TagType::Closing),
            "PLACEHOLDER" => Some(TagType::Placeholder),
            "STANDALONE" => Some(TagType::Standalone),
            _ => None,
        }
    }
}

/// One inline markup unit referenced from a fragment's coded text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub(crate) id: i32,
    original_id: Option<String>,
    tag_type: TagType,
    category: String,
    data: String,
    outer_data: Option<String>,
    merged_data: Option<String>,
    display_text: Option<String>,
    flags: u32,
    annotations: BTreeMap<String, Option<InlineAnnotation>>,
}

impl Default for Tag {
    fn default() -> Self {
        Self::new(TagType::Placeholder, CATEGORY_NULL, "")
    }
}

impl Tag {
    /// Create a tag. The id starts out unassigned (-1).
    ///
    /// A payload containing the cross-reference marker sequence sets the
    /// reference flag immediately.
    pub fn new(tag_type: TagType, category: impl Into<String>, data: impl Into<String>) -> Self {
        let category = category.into();
        let mut tag = Self {
            id: -1,
            original_id: None,
            tag_type,
            category: if category.is_empty() { CATEGORY_NULL.to_string() } else { category },
            data: String::new(),
            outer_data: None,
            merged_data: None,
            display_text: None,
            flags: 0,
            annotations: BTreeMap::new(),
        };
        tag.set_data(data);
        tag
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Set the display id. Ids are caller-visible and may intentionally
    /// collide (pair grouping); negative values are legal and preserved.
    pub fn set_id(&mut self, id: i32) {
        self.id = id;
    }

    pub fn original_id(&self) -> Option<&str> {
        self.original_id.as_deref()
    }

    pub fn set_original_id(&mut self, original_id: Option<String>) {
        self.original_id = original_id;
    }

    pub fn tag_type(&self) -> TagType {
        self.tag_type
    }

    pub fn set_tag_type(&mut self, tag_type: TagType) {
        self.tag_type = tag_type;
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Set the category; an empty value maps to [`CATEGORY_NULL`].
    pub fn set_category(&mut self, category: impl Into<String>) {
        let category = category.into();
        self.category = if category.is_empty() { CATEGORY_NULL.to_string() } else { category };
    }

    /// Canonical payload text.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Replace the payload, re-deriving the reference flag from the new
    /// content. A previously-set outer payload is left untouched.
    pub fn set_data(&mut self, data: impl Into<String>) {
        self.data = data.into();
        self.set_flag(FLAG_HAS_REFERENCE, self.data.contains(REF_MARKER_START));
    }

    /// Append to the payload; the reference flag is set if the appended text
    /// carries a cross-reference marker.
    pub fn append_data(&mut self, data: &str) {
        self.data.push_str(data);
        if data.contains(REF_MARKER_START) {
            self.set_flag(FLAG_HAS_REFERENCE, true);
        }
    }

    /// Append a cross-reference marker for a sub-flow resource.
    pub fn append_reference(&mut self, resource_id: &str) {
        self.data.push_str(REF_MARKER_START);
        self.data.push_str(resource_id);
        self.data.push_str(REF_MARKER_END);
        self.set_flag(FLAG_HAS_REFERENCE, true);
    }

    /// Original-document payload, falling back to the canonical payload when
    /// none was set. Use [`Tag::has_outer_data`] to tell the two apart.
    pub fn outer_data(&self) -> &str {
        self.outer_data.as_deref().unwrap_or(&self.data)
    }

    pub fn has_outer_data(&self) -> bool {
        self.outer_data.as_deref().is_some_and(|d| !d.is_empty())
    }

    pub fn set_outer_data(&mut self, outer_data: Option<String>) {
        self.outer_data = outer_data;
    }

    /// The outer-data slot itself, without the fallback to `data`.
    pub fn outer_data_slot(&self) -> Option<&str> {
        self.outer_data.as_deref()
    }

    pub fn merged_data(&self) -> Option<&str> {
        self.merged_data.as_deref()
    }

    pub fn set_merged_data(&mut self, merged_data: Option<String>) {
        self.merged_data = merged_data;
    }

    pub fn display_text(&self) -> Option<&str> {
        self.display_text.as_deref()
    }

    pub fn set_display_text(&mut self, display_text: Option<String>) {
        self.display_text = display_text;
    }

    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn has_original_id(&self) -> bool {
        self.original_id.as_deref().is_some_and(|d| !d.is_empty())
    }

    /// Raw flag bits. Unknown bits read from storage are preserved here.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    fn set_flag(&mut self, bit: u32, value: bool) {
        if value {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }

    /// Payload carries at least one cross-reference (sub-flow) marker.
    pub fn has_reference(&self) -> bool {
        self.flags & FLAG_HAS_REFERENCE != 0
    }

    pub fn set_reference_flag(&mut self, value: bool) {
        self.set_flag(FLAG_HAS_REFERENCE, value);
    }

    pub fn is_cloneable(&self) -> bool {
        self.flags & FLAG_CLONEABLE != 0
    }

    pub fn set_cloneable(&mut self, value: bool) {
        self.set_flag(FLAG_CLONEABLE, value);
    }

    pub fn is_deleteable(&self) -> bool {
        self.flags & FLAG_DELETEABLE != 0
    }

    pub fn set_deleteable(&mut self, value: bool) {
        self.set_flag(FLAG_DELETEABLE, value);
    }

    pub fn is_marker_masking(&self) -> bool {
        self.flags & FLAG_MARKER_MASKING != 0
    }

    pub fn set_marker_masking(&mut self, value: bool) {
        self.set_flag(FLAG_MARKER_MASKING, value);
    }

    /// Attach an annotation under a kind name.
    ///
    /// The payload may be `None` when the kind is used as a bare mark.
    /// Setting [`GENERIC_KIND`] when a composite payload is already present
    /// merges instead of replacing: incoming field-sets append, and no
    /// field value already stored is overwritten. The silent resolution is
    /// the content-preservation policy, not an error.
    pub fn set_annotation(&mut self, kind: impl Into<String>, annotation: Option<InlineAnnotation>) {
        let kind = kind.into();
        let stored = if kind == GENERIC_KIND {
            match (self.annotations.remove(&kind), annotation) {
                (
                    Some(Some(InlineAnnotation::Generic(mut current))),
                    Some(InlineAnnotation::Generic(incoming)),
                ) => {
                    current.merge(incoming);
                    Some(InlineAnnotation::Generic(current))
                }
                (_, incoming) => incoming,
            }
        } else {
            annotation
        };
        self.annotations.insert(kind, stored);
    }

    /// Annotation payload of a kind, when one is attached.
    pub fn annotation(&self, kind: &str) -> Option<&InlineAnnotation> {
        self.annotations.get(kind).and_then(|a| a.as_ref())
    }

    /// True when the kind is attached, payload or not.
    pub fn has_annotation(&self, kind: &str) -> bool {
        self.annotations.contains_key(kind)
    }

    pub fn has_annotations(&self) -> bool {
        !self.annotations.is_empty()
    }

    /// Kind names of all attached annotations, in stored order.
    pub fn annotation_kinds(&self) -> Vec<&str> {
        self.annotations.keys().map(String::as_str).collect()
    }

    pub fn remove_annotation(&mut self, kind: &str) {
        self.annotations.remove(kind);
    }

    pub fn remove_annotations(&mut self) {
        self.annotations.clear();
    }

    /// The composite payload under [`GENERIC_KIND`], if any.
    pub fn generic_annotations(&self) -> Option<&GenericAnnotations> {
        self.annotation(GENERIC_KIND).and_then(InlineAnnotation::as_generic)
    }

    /// String field of the first generic field-set of a type. Later entries
    /// of the same type are not consulted: first write wins.
    pub fn generic_string(&self, set_type: &str, field: &str) -> Option<&str> {
        self.generic_annotations()?.first_of(set_type)?.string(field)
    }

    /// Entries of the annotation map, for storage.
    pub(crate) fn annotation_entries(&self) -> impl Iterator<Item = (&str, Option<&InlineAnnotation>)> {
        self.annotations.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// True when this tag is an annotation-span boundary rather than a
    /// structural code.
    pub fn is_annotation_marker(&self) -> bool {
        self.has_annotation(MARKER_KIND)
    }

    /// String attribute of the annotation-span payload (e.g. `value`, `ref`),
    /// when this tag is an annotation marker carrying one.
    pub fn marker_string(&self, field: &str) -> Option<&str> {
        self.annotation(MARKER_KIND)?.as_generic()?.first_of(MARKER_KIND)?.string(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_constructed(tag: &Tag, data: &str, flags: u32, tag_type: TagType, category: &str) {
        assert_eq!(tag.id(), -1);
        assert_eq!(tag.original_id(), None);
        assert_eq!(tag.merged_data(), None);
        assert_eq!(tag.display_text(), None);
        assert!(!tag.has_outer_data());
        assert_eq!(tag.data(), data);
        assert_eq!(tag.flags(), flags);
        assert_eq!(tag.tag_type(), tag_type);
        assert_eq!(tag.category(), category);
    }

    #[test]
    fn test_constructors() {
        check_constructed(&Tag::default(), "", 0, TagType::Placeholder, CATEGORY_NULL);
        check_constructed(&Tag::new(TagType::Placeholder, "", ""), "", 0, TagType::Placeholder, CATEGORY_NULL);
        check_constructed(&Tag::new(TagType::Placeholder, "break", ""), "", 0, TagType::Placeholder, "break");
        check_constructed(
            &Tag::new(TagType::Placeholder, "break", "<br/>"),
            "<br/>",
            0,
            TagType::Placeholder,
            "break",
        );

        // A payload with a cross-reference marker raises the flag at birth.
        let with_ref = "with [#$sf1] marker";
        let tag = Tag::new(TagType::Placeholder, "img", with_ref);
        check_constructed(&tag, with_ref, 0x01, TagType::Placeholder, "img");

        let mut tag = Tag::new(TagType::Placeholder, "img", "");
        check_constructed(&tag, "", 0, TagType::Placeholder, "img");
        tag.set_data(with_ref);
        assert!(tag.has_reference());
        tag.set_data("plain again");
        assert!(!tag.has_reference());
    }

    #[test]
    fn test_outer_data_is_a_distinct_slot() {
        let mut tag = Tag::new(TagType::Opening, "bold", "<b>");
        assert_eq!(tag.outer_data(), "<b>"); // falls back to data
        assert!(!tag.has_outer_data());

        tag.set_outer_data(Some("<bpt id=\"1\">&lt;b&gt;</bpt>".to_string()));
        assert!(tag.has_outer_data());
        assert_eq!(tag.outer_data(), "<bpt id=\"1\">&lt;b&gt;</bpt>");

        // Mutating data must not retroactively change the stored outer data.
        tag.set_data("<strong>");
        assert_eq!(tag.data(), "<strong>");
        assert_eq!(tag.outer_data(), "<bpt id=\"1\">&lt;b&gt;</bpt>");
    }

    #[test]
    fn test_flags() {
        let mut tag = Tag::new(TagType::Opening, "bold", "<b>");
        assert!(!tag.is_cloneable());
        assert!(!tag.is_deleteable());
        assert!(!tag.has_reference());
        assert!(!tag.is_marker_masking());
        tag.set_cloneable(true);
        tag.set_deleteable(true);
        tag.set_reference_flag(true);
        tag.set_marker_masking(true);
        assert!(tag.is_cloneable());
        assert!(tag.is_deleteable());
        assert!(tag.has_reference());
        assert!(tag.is_marker_masking());
        assert_eq!(tag.flags(), 0x01 | 0x02 | 0x04 | 0x20);
    }

    #[test]
    fn test_append_reference() {
        let mut tag = Tag::new(TagType::Placeholder, "img", "<img alt='");
        assert!(!tag.has_reference());
        tag.append_reference("alt-flow-3");
        assert!(tag.has_reference());
        assert_eq!(tag.data(), "<img alt='[#$alt-flow-3]");
    }

    #[test]
    fn test_clone_does_not_alias_buffers() {
        let mut tag = Tag::new(TagType::Opening, "bold", "<b>");
        tag.set_outer_data(Some("<bpt>x</bpt>".to_string()));
        let copy = tag.clone();
        assert_eq!(tag, copy);
        // Same content, different buffers.
        assert_ne!(tag.data().as_ptr(), copy.data().as_ptr());
        assert_ne!(tag.outer_data().as_ptr(), copy.outer_data().as_ptr());
    }

    #[test]
    fn test_simple_annotation_access() {
        let mut tag = Tag::new(TagType::Opening, "bold", "<b>");
        tag.set_annotation("displayText", Some(InlineAnnotation::text("[display]")));
        assert_eq!(tag.annotation("displayText").and_then(InlineAnnotation::as_text), Some("[display]"));
        assert!(tag.has_annotation("displayText"));
        assert!(!tag.has_annotation("other"));

        // A kind can be attached with no payload, as a bare mark.
        tag.set_annotation("protected", None);
        assert!(tag.has_annotation("protected"));
        assert!(tag.annotation("protected").is_none());
        assert_eq!(tag.annotation_kinds(), vec!["displayText", "protected"]);
    }

    #[test]
    fn test_generic_merge_appends_and_keeps_first_value() {
        let mut tag = Tag::new(TagType::Placeholder, "z", "");

        let mut first = GenericAnnotations::new();
        first.add("type1").set_str("name1", "v1");
        first.add("type1").set_str("name2", "v2-not-over");
        tag.set_annotation(GENERIC_KIND, Some(first.clone().into()));
        assert_eq!(tag.generic_annotations(), Some(&first));

        let mut second = GenericAnnotations::new();
        second.add("type1").set_str("name3", "v3");
        second.add("type1").set_str("name2", "another name2");
        tag.set_annotation(GENERIC_KIND, Some(second.into()));

        let merged = tag.generic_annotations().unwrap();
        assert_eq!(merged.sets_of("type1").count(), 4);
        let entries: Vec<_> = merged.sets_of("type1").collect();
        assert_eq!(entries[1].string("name2"), Some("v2-not-over"));
        // First-write-wins readout.
        assert_eq!(tag.generic_string("type1", "name2"), Some("v2-not-over"));
    }

    #[test]
    fn test_non_generic_kind_replaces() {
        let mut tag = Tag::new(TagType::Placeholder, "z", "");
        tag.set_annotation("note", Some(InlineAnnotation::text("first")));
        tag.set_annotation("note", Some(InlineAnnotation::text("second")));
        assert_eq!(tag.annotation("note").and_then(InlineAnnotation::as_text), Some("second"));
    }
}
