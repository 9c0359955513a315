//! Tag pairing and status classification
//!
//! Before a fragment is rendered, each tag gets a transient status telling
//! the renderer whether a pair can collapse into one combined element, must
//! stay as two split elements, or stands alone. The map is recomputed for
//! every render and is bound to the exact fragment state it was derived
//! from; it is never persisted.

use std::collections::BTreeMap;

use log::debug;

use crate::codec::{CodecError, TagHandle};
use crate::fragment::Fragment;
use crate::tag::{Tag, TagType};

/// Pairing status of one tag within a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagStatus {
    /// No counterpart in the fragment; placeholders and standalone tags are
    /// always here.
    Isolated,
    /// A counterpart exists, but the pair cannot collapse (overlapping or
    /// crossing spans).
    KeptSeparate,
    /// A well-formed pair that a spanning target element can represent.
    Collapsible,
}

/// Transient classification of every tag in one fragment state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMap {
    statuses: BTreeMap<TagHandle, TagStatus>,
    snapshot: u64,
}

impl StatusMap {
    pub fn status(&self, handle: TagHandle) -> Option<TagStatus> {
        self.statuses.get(&handle).copied()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TagHandle, TagStatus)> + '_ {
        self.statuses.iter().map(|(h, s)| (*h, *s))
    }

    pub(crate) fn snapshot(&self) -> u64 {
        self.snapshot
    }
}

/// Pairing problems the classifier refuses to guess around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingError {
    /// A closing tag's declared opening appears after it in the text.
    ReversedPair { category: String, id: i32 },
    /// An opening tag duplicates an id already open in the same scope.
    DuplicateOpenId { category: String, id: i32 },
    /// The coded text itself is malformed.
    Codec(CodecError),
}

impl std::fmt::Display for PairingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingError::ReversedPair { category, id } => {
                write!(f, "closing tag (category '{}', id {}) precedes its opening tag", category, id)
            }
            PairingError::DuplicateOpenId { category, id } => {
                write!(f, "duplicate unresolved id {} for category '{}' in the same scope", id, category)
            }
            PairingError::Codec(err) => write!(f, "malformed coded text: {}", err),
        }
    }
}

impl std::error::Error for PairingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PairingError::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CodecError> for PairingError {
    fn from(err: CodecError) -> Self {
        PairingError::Codec(err)
    }
}

fn matches(opening: &Tag, closing: &Tag) -> bool {
    if closing.id() != -1 && opening.id() != -1 {
        opening.id() == closing.id() && opening.category() == closing.category()
    } else {
        // Unassigned ids pair by nesting order within a category.
        opening.category() == closing.category()
    }
}

/// Find the well-formed closing tag for the opening at `open_pos`.
///
/// Scans forward keeping a depth stack of tags opened inside the span. The
/// matching closing only counts when that stack is empty; a foreign closing
/// arriving at depth zero means the span is crossed and cannot collapse.
fn well_formed_closing(
    sequence: &[(TagHandle, &Tag)],
    open_pos: usize,
    claimed: &[bool],
) -> Option<usize> {
    let opening = sequence[open_pos].1;
    let mut depth: Vec<&Tag> = Vec::new();
    for (q, &(_, tag)) in sequence.iter().enumerate().skip(open_pos + 1) {
        match tag.tag_type() {
            TagType::Opening => depth.push(tag),
            TagType::Closing => {
                if !claimed[q] && matches(opening, tag) {
                    return if depth.is_empty() { Some(q) } else { None };
                }
                if depth.is_empty() {
                    // A foreign closing crossing the span.
                    return None;
                }
                if let Some(at) = depth.iter().rposition(|open| matches(open, tag)) {
                    depth.remove(at);
                }
            }
            _ => {}
        }
    }
    None
}

/// Compute the pairing status of every tag in the fragment.
///
/// Annotation-span tags go through the same pass under the same rules as
/// structural tags; only their render vocabulary differs. Duplicate tags
/// are classified as found; deduplication is a collaborator's business and
/// is never assumed here.
pub fn classify(fragment: &Fragment) -> Result<StatusMap, PairingError> {
    let sequence = fragment.tag_sequence()?;
    let mut statuses: BTreeMap<TagHandle, TagStatus> = BTreeMap::new();

    // Error pass: duplicate ids open in the same scope, and declared pairs
    // whose closing precedes their opening. Neither is guessed around.
    let mut scope: Vec<&Tag> = Vec::new();
    for (pos, &(_, tag)) in sequence.iter().enumerate() {
        match tag.tag_type() {
            TagType::Opening => {
                if tag.id() != -1
                    && scope.iter().any(|open| open.id() == tag.id() && open.category() == tag.category())
                {
                    return Err(PairingError::DuplicateOpenId {
                        category: tag.category().to_string(),
                        id: tag.id(),
                    });
                }
                scope.push(tag);
            }
            TagType::Closing => {
                if let Some(at) = scope.iter().rposition(|open| matches(open, tag)) {
                    scope.remove(at);
                } else if tag.id() != -1 {
                    let declared_opening = |other: &Tag| {
                        other.tag_type() == TagType::Opening
                            && other.id() == tag.id()
                            && other.category() == tag.category()
                    };
                    let earlier = sequence.iter().take(pos).any(|(_, t)| declared_opening(t));
                    let later = sequence.iter().skip(pos + 1).any(|(_, t)| declared_opening(t));
                    if !earlier && later {
                        return Err(PairingError::ReversedPair {
                            category: tag.category().to_string(),
                            id: tag.id(),
                        });
                    }
                }
            }
            _ => {}
        }
    }

    // Status pass. Closings claimed by a well-formed opening are settled at
    // the opening's position; everything else pairs loosely or not at all.
    let mut claimed = vec![false; sequence.len()];
    for (pos, &(handle, tag)) in sequence.iter().enumerate() {
        match tag.tag_type() {
            TagType::Placeholder | TagType::Standalone => {
                statuses.insert(handle, TagStatus::Isolated);
            }
            TagType::Opening => {
                if let Some(q) = well_formed_closing(&sequence, pos, &claimed) {
                    claimed[q] = true;
                    statuses.insert(handle, TagStatus::Collapsible);
                    statuses.insert(sequence[q].0, TagStatus::Collapsible);
                } else if sequence
                    .iter()
                    .enumerate()
                    .any(|(q, (_, t))| !claimed[q] && t.tag_type() == TagType::Closing && matches(tag, t))
                {
                    statuses.insert(handle, TagStatus::KeptSeparate);
                } else {
                    statuses.insert(handle, TagStatus::Isolated);
                }
            }
            TagType::Closing => {
                if claimed[pos] {
                    continue; // already settled as one side of a collapsible pair
                }
                let has_opening = sequence
                    .iter()
                    .any(|(_, t)| t.tag_type() == TagType::Opening && matches(t, tag));
                statuses.insert(
                    handle,
                    if has_opening { TagStatus::KeptSeparate } else { TagStatus::Isolated },
                );
            }
        }
    }

    debug!("classified {} tags", statuses.len());
    Ok(StatusMap { statuses, snapshot: fragment.snapshot() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_pair_is_collapsible() {
        let mut f = Fragment::new();
        f.append_text("Text in ");
        f.append_tag_with_id(TagType::Opening, "b", "<B>", 1).unwrap();
        f.append_text("bold");
        f.append_tag_with_id(TagType::Closing, "b", "</B>", 1).unwrap();
        f.append_text(" and &");

        let map = classify(&f).unwrap();
        for (handle, _) in f.tag_sequence().unwrap() {
            assert_eq!(map.status(handle), Some(TagStatus::Collapsible));
        }
    }

    #[test]
    fn test_unmatched_tags_are_isolated() {
        let mut f = Fragment::new();
        f.append_tag_with_id(TagType::Opening, "b", "<b>", 1).unwrap();
        f.append_text("never closed");
        f.append_tag_with_id(TagType::Closing, "i", "</i>", 9).unwrap();

        let map = classify(&f).unwrap();
        let seq = f.tag_sequence().unwrap();
        assert_eq!(map.status(seq[0].0), Some(TagStatus::Isolated));
        assert_eq!(map.status(seq[1].0), Some(TagStatus::Isolated));
    }

    #[test]
    fn test_crossing_spans_are_kept_separate() {
        // <b> <i> </b> </i>: both pairs exist but neither can collapse.
        let mut f = Fragment::new();
        f.append_tag_with_id(TagType::Opening, "b", "<b>", 1).unwrap();
        f.append_text("x");
        f.append_tag_with_id(TagType::Opening, "i", "<i>", 2).unwrap();
        f.append_text("y");
        f.append_tag_with_id(TagType::Closing, "b", "</b>", 1).unwrap();
        f.append_text("z");
        f.append_tag_with_id(TagType::Closing, "i", "</i>", 2).unwrap();

        let map = classify(&f).unwrap();
        for (handle, _) in f.tag_sequence().unwrap() {
            assert_eq!(map.status(handle), Some(TagStatus::KeptSeparate));
        }
    }

    #[test]
    fn test_nested_pairs_collapse_independently() {
        let mut f = Fragment::new();
        f.append_tag_with_id(TagType::Opening, "b", "<b>", 1).unwrap();
        f.append_tag_with_id(TagType::Opening, "i", "<i>", 2).unwrap();
        f.append_text("deep");
        f.append_tag_with_id(TagType::Closing, "i", "</i>", 2).unwrap();
        f.append_tag_with_id(TagType::Closing, "b", "</b>", 1).unwrap();

        let map = classify(&f).unwrap();
        for (handle, _) in f.tag_sequence().unwrap() {
            assert_eq!(map.status(handle), Some(TagStatus::Collapsible));
        }
    }

    #[test]
    fn test_placeholders_classify_independently() {
        // Two adjacent identical placeholders both classify; nothing is
        // folded together.
        let mut f = Fragment::new();
        f.append_tag_with_id(TagType::Placeholder, "br", "<br/>", 1).unwrap();
        f.append_tag_with_id(TagType::Placeholder, "br", "<br/>", 1).unwrap();
        f.append_tag_with_id(TagType::Standalone, "img", "<img/>", 2).unwrap();

        let map = classify(&f).unwrap();
        assert_eq!(map.len(), 3);
        for (handle, _) in f.tag_sequence().unwrap() {
            assert_eq!(map.status(handle), Some(TagStatus::Isolated));
        }
    }

    #[test]
    fn test_reversed_pair_is_an_error() {
        let mut f = Fragment::new();
        f.append_tag_with_id(TagType::Closing, "b", "</b>", 4).unwrap();
        f.append_text("backwards");
        f.append_tag_with_id(TagType::Opening, "b", "<b>", 4).unwrap();

        let err = classify(&f).unwrap_err();
        assert_eq!(err, PairingError::ReversedPair { category: "b".to_string(), id: 4 });
    }

    #[test]
    fn test_duplicate_open_id_in_scope_is_an_error() {
        let mut f = Fragment::new();
        f.append_tag_with_id(TagType::Opening, "b", "<b>", 3).unwrap();
        f.append_tag_with_id(TagType::Opening, "b", "<b>", 3).unwrap();

        let err = classify(&f).unwrap_err();
        assert_eq!(err, PairingError::DuplicateOpenId { category: "b".to_string(), id: 3 });
    }

    #[test]
    fn test_unassigned_ids_pair_by_nesting_order() {
        let mut f = Fragment::new();
        f.push_tag(Tag::new(TagType::Opening, "b", "<b>")).unwrap();
        f.append_text("x");
        f.push_tag(Tag::new(TagType::Closing, "b", "</b>")).unwrap();

        let map = classify(&f).unwrap();
        for (handle, _) in f.tag_sequence().unwrap() {
            assert_eq!(map.status(handle), Some(TagStatus::Collapsible));
        }
    }

    #[test]
    fn test_classification_is_idempotent() {
        let mut f = Fragment::new();
        f.append_tag_with_id(TagType::Opening, "b", "<b>", 1).unwrap();
        f.append_tag_with_id(TagType::Opening, "i", "<i>", 2).unwrap();
        f.append_text("y");
        f.append_tag_with_id(TagType::Closing, "b", "</b>", 1).unwrap();
        f.append_tag_with_id(TagType::Placeholder, "br", "<br/>", 3).unwrap();

        let first = classify(&f).unwrap();
        let second = classify(&f).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_annotation_spans_classify_like_structural_tags() {
        // Decision under test: annotation spans run through the same pairing
        // pass as structural tags, not an independent one. A structural pair
        // nested inside an annotation span collapses on its own.
        let mut f = Fragment::with_text("pick a word here");
        f.annotate(5, 11, "comment", Some("check"), None).unwrap();
        let mut inner = Fragment::new();
        inner.append_tag_with_id(TagType::Opening, "b", "<b>", 10).unwrap();
        inner.append_text("!");
        inner.append_tag_with_id(TagType::Closing, "b", "</b>", 10).unwrap();
        f.append_fragment(&inner).unwrap();

        let map = classify(&f).unwrap();
        for (handle, _) in f.tag_sequence().unwrap() {
            assert_eq!(map.status(handle), Some(TagStatus::Collapsible));
        }
    }
}
