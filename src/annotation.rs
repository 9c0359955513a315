//! Inline annotation payloads
//!
//! Annotations ride on tags as out-of-band commentary: review notes,
//! terminology hits, match-span metadata. A payload is either a plain text
//! value or a composite [`GenericAnnotations`] bag: an ordered list of typed
//! field-sets, each carrying a mapping of field name to a typed value.
//!
//! Equality is content-based everywhere; the wire form lives in
//! [`crate::storage`].

use std::collections::BTreeMap;

/// A typed field value inside a field-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Str(String),
    Bool(bool),
    Int(i64),
}

impl FieldValue {
    /// String content, when this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

/// One typed field-set: a type name plus named, typed fields.
///
/// Field order is not significant; the map is kept sorted so the stored form
/// is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldSet {
    set_type: String,
    fields: BTreeMap<String, FieldValue>,
}

impl FieldSet {
    /// Create an empty field-set of the given type.
    pub fn new(set_type: impl Into<String>) -> Self {
        Self { set_type: set_type.into(), fields: BTreeMap::new() }
    }

    pub fn set_type(&self) -> &str {
        &self.set_type
    }

    /// Set a string field, replacing any previous value of the name.
    pub fn set_str(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(name.into(), FieldValue::Str(value.into()));
        self
    }

    pub fn set_bool(&mut self, name: impl Into<String>, value: bool) -> &mut Self {
        self.fields.insert(name.into(), FieldValue::Bool(value));
        self
    }

    pub fn set_int(&mut self, name: impl Into<String>, value: i64) -> &mut Self {
        self.fields.insert(name.into(), FieldValue::Int(value));
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// String value of a field, when present and a string.
    pub fn string(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_str)
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.field(name).and_then(FieldValue::as_bool)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.field(name).and_then(FieldValue::as_int)
    }

    /// Fields in stored (sorted) order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Ordered, multi-entry composite annotation payload.
///
/// Several field-sets may share a type name; they accumulate in order and
/// are never folded together. Lookups by type return the first entry, which
/// is what makes the merge policy first-write-wins for readers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenericAnnotations {
    sets: Vec<FieldSet>,
}

impl GenericAnnotations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new empty field-set of the given type and return it for
    /// field population.
    pub fn add(&mut self, set_type: impl Into<String>) -> &mut FieldSet {
        self.sets.push(FieldSet::new(set_type));
        // Just pushed, so the vector is non-empty.
        let last = self.sets.len() - 1;
        &mut self.sets[last]
    }

    /// Append an already-built field-set.
    pub fn push(&mut self, set: FieldSet) {
        self.sets.push(set);
    }

    /// Merge another payload into this one.
    ///
    /// Entries append in order; entries under an already-present type extend
    /// that type's list, and no existing field value is ever touched.
    pub fn merge(&mut self, other: GenericAnnotations) {
        self.sets.extend(other.sets);
    }

    /// All field-sets, in order.
    pub fn sets(&self) -> &[FieldSet] {
        &self.sets
    }

    /// Field-sets of one type, in order.
    pub fn sets_of<'a>(&'a self, set_type: &'a str) -> impl Iterator<Item = &'a FieldSet> {
        self.sets.iter().filter(move |s| s.set_type == set_type)
    }

    /// First field-set of a type, if any.
    pub fn first_of(&self, set_type: &str) -> Option<&FieldSet> {
        self.sets.iter().find(|s| s.set_type == set_type)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// An annotation payload attached to a tag under a kind name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineAnnotation {
    /// Plain text payload; its meaning depends on the kind it is stored under.
    Text(String),
    /// Composite payload of typed field-sets.
    Generic(GenericAnnotations),
}

impl InlineAnnotation {
    /// Plain-text payload constructor.
    pub fn text(data: impl Into<String>) -> Self {
        InlineAnnotation::Text(data.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            InlineAnnotation::Text(s) => Some(s),
            InlineAnnotation::Generic(_) => None,
        }
    }

    pub fn as_generic(&self) -> Option<&GenericAnnotations> {
        match self {
            InlineAnnotation::Generic(g) => Some(g),
            InlineAnnotation::Text(_) => None,
        }
    }
}

impl From<GenericAnnotations> for InlineAnnotation {
    fn from(value: GenericAnnotations) -> Self {
        InlineAnnotation::Generic(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_set_typed_values() {
        let mut set = FieldSet::new("match");
        set.set_str("origin", "tm").set_int("score", 95).set_bool("exact", false);

        assert_eq!(set.string("origin"), Some("tm"));
        assert_eq!(set.integer("score"), Some(95));
        assert_eq!(set.boolean("exact"), Some(false));
        // Wrong-type reads come back empty rather than coerced.
        assert_eq!(set.string("score"), None);
        assert_eq!(set.integer("missing"), None);
    }

    #[test]
    fn test_merge_appends_same_type_entries() {
        let mut first = GenericAnnotations::new();
        first.add("type1").set_str("name1", "v1");
        first.add("type1").set_str("name2", "v2-not-over");

        let mut second = GenericAnnotations::new();
        second.add("type1").set_str("name3", "v3");
        second.add("type1").set_str("name2", "another name2");

        first.merge(second);
        assert_eq!(first.sets_of("type1").count(), 4);
        // The earlier entry keeps its value; the later write landed in a new
        // entry instead of clobbering it.
        let entries: Vec<_> = first.sets_of("type1").collect();
        assert_eq!(entries[1].string("name2"), Some("v2-not-over"));
        assert_eq!(entries[3].string("name2"), Some("another name2"));
        // Readers following first-of semantics see the first write.
        assert_eq!(first.first_of("type1").unwrap().string("name1"), Some("v1"));
    }

    #[test]
    fn test_content_equality() {
        let mut a = GenericAnnotations::new();
        a.add("term").set_str("ref", "r1");
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(InlineAnnotation::Generic(a), InlineAnnotation::Generic(b));
        assert_eq!(InlineAnnotation::text("x"), InlineAnnotation::Text("x".to_string()));
    }
}
