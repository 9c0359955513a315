//! Coded-text marker scheme
//!
//! A fragment's text value is ordinary `char` content in which a tag is
//! represented by a two-character reference: one reserved marker (selected
//! by the tag type) followed by one index character. The index character
//! resolves to a slot in the fragment's own [`TagRegistry`], so the text can
//! be stored, searched and sliced like plain text while the tags live out
//! of band.
//!
//! All reserved characters sit in the private-use area, away from any
//! content a filter can legitimately extract. Everything else, including
//! supplementary-plane content, is opaque literal text to the scheme.
//!
//! [`TagRegistry`]: crate::fragment::TagRegistry

use crate::tag::TagType;

/// Marker for the opening tag of a paired code.
pub const MARKER_OPENING: char = '\u{E101}';
/// Marker for the closing tag of a paired code.
pub const MARKER_CLOSING: char = '\u{E102}';
/// Marker for a placeholder code.
pub const MARKER_PLACEHOLDER: char = '\u{E103}';
/// Marker for a standalone code.
pub const MARKER_STANDALONE: char = '\u{E104}';
/// Marker reserved for hidden protected content.
///
/// Not part of the tag scheme: this crate never produces it, but a
/// collaborator may fold non-translatable content behind it. Scanning and
/// rendering must recognize it so the pair is skipped, never corrupted.
pub const MARKER_PROTECTED: char = '\u{E106}';

/// First code point used for index characters.
pub const INDEX_BASE: u32 = 0xE110;
/// Last code point usable as an index character.
pub const INDEX_CEILING: u32 = 0xF8FF;
/// Highest registry slot representable by a single index character: 6127.
pub const MAX_INDEX: usize = (INDEX_CEILING - INDEX_BASE) as usize;

/// Opaque handle to a slot in a fragment's tag registry.
///
/// Handles are what the index character of a tag reference encodes. They are
/// only meaningful against the registry of the fragment that issued them;
/// the newtype exists so a handle cannot be confused with a display id or a
/// handle from another fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagHandle(pub(crate) usize);

impl TagHandle {
    /// Raw slot index behind this handle.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for TagHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fatal encoding errors.
///
/// None of these are recoverable locally: an unrepresentable index must be
/// rejected at append time, and a malformed reference means the coded text
/// and the registry have diverged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Registry slot beyond what one index character can encode.
    IndexOverflow { index: usize },
    /// Marker found as the last character, with no index character after it.
    TruncatedRef { pos: usize },
    /// The character at the position is not a tag marker.
    NotAMarker { pos: usize },
    /// The character following a marker is outside the index range.
    BadIndexChar { pos: usize, ch: char },
    /// A reference resolves to a slot with no live tag.
    DeadHandle { index: usize },
    /// A text edit position is out of range or splits a tag reference.
    InvalidPosition { pos: usize },
    /// Marker count and live registry entries disagree.
    RegistryMismatch { markers: usize, live: usize },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::IndexOverflow { index } => {
                write!(f, "tag index {} exceeds the single-character limit of {}", index, MAX_INDEX)
            }
            CodecError::TruncatedRef { pos } => {
                write!(f, "marker at position {} has no index character", pos)
            }
            CodecError::NotAMarker { pos } => {
                write!(f, "no tag marker at position {}", pos)
            }
            CodecError::BadIndexChar { pos, ch } => {
                write!(f, "character {:?} at position {} is not a valid index character", ch, pos)
            }
            CodecError::DeadHandle { index } => {
                write!(f, "reference to registry slot {} which holds no tag", index)
            }
            CodecError::InvalidPosition { pos } => {
                write!(f, "position {} is out of range or inside a tag reference", pos)
            }
            CodecError::RegistryMismatch { markers, live } => {
                write!(f, "coded text has {} tag markers but the registry has {} live tags", markers, live)
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Marker character for a tag type.
pub fn marker_for(tag_type: TagType) -> char {
    match tag_type {
        TagType::Opening => MARKER_OPENING,
        TagType::Closing => MARKER_CLOSING,
        TagType::Placeholder => MARKER_PLACEHOLDER,
        TagType::Standalone => MARKER_STANDALONE,
    }
}

/// Tag type encoded by a marker character, if it is one.
pub fn tag_type_for(ch: char) -> Option<TagType> {
    match ch {
        MARKER_OPENING => Some(TagType::Opening),
        MARKER_CLOSING => Some(TagType::Closing),
        MARKER_PLACEHOLDER => Some(TagType::Placeholder),
        MARKER_STANDALONE => Some(TagType::Standalone),
        _ => None,
    }
}

/// True for the four tag markers.
pub fn is_marker(ch: char) -> bool {
    tag_type_for(ch).is_some()
}

/// True for any character the scheme reserves: the four tag markers plus the
/// protected-content marker.
pub fn is_reserved(ch: char) -> bool {
    is_marker(ch) || ch == MARKER_PROTECTED
}

/// Encode a registry handle as a single index character.
///
/// An index beyond [`MAX_INDEX`] is a fatal error: the caller must reserve
/// additional slots, a silent clamp would re-point the reference at an
/// unrelated tag.
pub fn index_char(handle: TagHandle) -> Result<char, CodecError> {
    if handle.0 > MAX_INDEX {
        return Err(CodecError::IndexOverflow { index: handle.0 });
    }
    // The whole INDEX_BASE..=INDEX_CEILING range is valid scalar values.
    char::from_u32(INDEX_BASE + handle.0 as u32).ok_or(CodecError::IndexOverflow { index: handle.0 })
}

/// Decode an index character back to a registry handle.
pub fn char_index(ch: char) -> Option<TagHandle> {
    let cp = ch as u32;
    if (INDEX_BASE..=INDEX_CEILING).contains(&cp) {
        Some(TagHandle((cp - INDEX_BASE) as usize))
    } else {
        None
    }
}

/// Encode a full two-character tag reference.
pub fn encode_ref(tag_type: TagType, handle: TagHandle) -> Result<[char; 2], CodecError> {
    Ok([marker_for(tag_type), index_char(handle)?])
}

/// Decode the tag reference starting at a character position.
///
/// The result is a pure function of the two characters at the position; any
/// surrounding content, supplementary code points included, plays no part.
pub fn decode_ref(coded: &str, char_pos: usize) -> Result<(TagType, TagHandle), CodecError> {
    let mut chars = coded.chars().skip(char_pos);
    let first = chars.next().ok_or(CodecError::NotAMarker { pos: char_pos })?;
    let tag_type = tag_type_for(first).ok_or(CodecError::NotAMarker { pos: char_pos })?;
    let second = chars.next().ok_or(CodecError::TruncatedRef { pos: char_pos })?;
    let handle = char_index(second).ok_or(CodecError::BadIndexChar { pos: char_pos + 1, ch: second })?;
    Ok((tag_type, handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_ref_round_trip() {
        let [m, ix] = encode_ref(TagType::Opening, TagHandle(0)).unwrap();
        assert_eq!(m, MARKER_OPENING);
        assert_eq!(ix, '\u{E110}');

        let coded: String = [m, ix].iter().collect();
        let (tt, handle) = decode_ref(&coded, 0).unwrap();
        assert_eq!(tt, TagType::Opening);
        assert_eq!(handle, TagHandle(0));
    }

    #[test]
    fn test_index_range() {
        // Hundreds of tags fit in one character; the ceiling is 6127.
        assert_eq!(index_char(TagHandle(300)).unwrap(), char::from_u32(0xE110 + 300).unwrap());
        assert_eq!(index_char(TagHandle(MAX_INDEX)).unwrap(), '\u{F8FF}');
        assert_eq!(char_index('\u{F8FF}'), Some(TagHandle(MAX_INDEX)));
    }

    #[test]
    fn test_index_overflow_is_fatal() {
        let err = index_char(TagHandle(MAX_INDEX + 1)).unwrap_err();
        assert_eq!(err, CodecError::IndexOverflow { index: MAX_INDEX + 1 });
    }

    #[test]
    fn test_decode_not_a_marker() {
        let err = decode_ref("plain", 0).unwrap_err();
        assert_eq!(err, CodecError::NotAMarker { pos: 0 });
    }

    #[test]
    fn test_decode_truncated_ref() {
        let coded: String = [MARKER_CLOSING].iter().collect();
        let err = decode_ref(&coded, 0).unwrap_err();
        assert_eq!(err, CodecError::TruncatedRef { pos: 0 });
    }

    #[test]
    fn test_decode_bad_index_char() {
        let coded: String = [MARKER_PLACEHOLDER, 'x'].iter().collect();
        let err = decode_ref(&coded, 0).unwrap_err();
        assert_eq!(err, CodecError::BadIndexChar { pos: 1, ch: 'x' });
    }

    #[test]
    fn test_decode_after_supplementary_literal() {
        // A supplementary code point before the reference is one char; the
        // decode position counts it as exactly one step.
        let mut coded = String::from("a\u{1F600}");
        coded.push(MARKER_STANDALONE);
        coded.push(index_char(TagHandle(2)).unwrap());
        let (tt, handle) = decode_ref(&coded, 2).unwrap();
        assert_eq!(tt, TagType::Standalone);
        assert_eq!(handle, TagHandle(2));
    }

    #[test]
    fn test_reserved_classification() {
        assert!(is_marker(MARKER_OPENING));
        assert!(is_marker(MARKER_STANDALONE));
        assert!(!is_marker(MARKER_PROTECTED));
        assert!(is_reserved(MARKER_PROTECTED));
        assert!(!is_reserved('a'));
        // Index characters themselves are not reserved markers.
        assert!(!is_reserved('\u{E110}'));
    }
}
