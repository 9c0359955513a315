//! Fragments and their tag registries
//!
//! A [`Fragment`] owns two things: the coded text and a [`TagRegistry`].
//! The registry is an arena of tag slots; every two-character tag reference
//! in the coded text encodes a slot handle. Removal leaves a tombstone so
//! the handles encoded in the text never shift, which is what keeps marker
//! references stable under edits that do not touch the registry.
//!
//! Fragments are single-owner value objects. Cloning deep-copies both the
//! text and the registry; two live fragments never share a mutable buffer
//! or a tag. That guarantee stands in for any locking discipline when a
//! surrounding pipeline later shares fragments read-only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use crate::annotation::{GenericAnnotations, InlineAnnotation};
use crate::codec::{self, CodecError, TagHandle, MARKER_PROTECTED};
use crate::tag::{Tag, TagType, MARKER_KIND};

static NEXT_SNAPSHOT: AtomicU64 = AtomicU64::new(1);

fn next_snapshot() -> u64 {
    NEXT_SNAPSHOT.fetch_add(1, Ordering::Relaxed)
}

/// Ordered, per-fragment arena of tags.
///
/// Slots are addressed by [`TagHandle`]. Removing a tag tombstones its slot;
/// later slots keep their positions, so handles already encoded in coded
/// text stay valid. Display ids are not unique here, only handles are.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagRegistry {
    slots: Vec<Option<Tag>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tag, returning its handle.
    ///
    /// Fails with [`CodecError::IndexOverflow`] when the new slot could not
    /// be encoded as a single index character.
    pub fn append(&mut self, tag: Tag) -> Result<TagHandle, CodecError> {
        if self.slots.len() > codec::MAX_INDEX {
            return Err(CodecError::IndexOverflow { index: self.slots.len() });
        }
        self.slots.push(Some(tag));
        Ok(TagHandle(self.slots.len() - 1))
    }

    pub fn get(&self, handle: TagHandle) -> Option<&Tag> {
        self.slots.get(handle.0).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, handle: TagHandle) -> Option<&mut Tag> {
        self.slots.get_mut(handle.0).and_then(|slot| slot.as_mut())
    }

    /// Remove a tag, leaving a tombstone so later handles stay stable.
    pub fn remove(&mut self, handle: TagHandle) -> Option<Tag> {
        self.slots.get_mut(handle.0).and_then(|slot| slot.take())
    }

    /// Live tags in slot order.
    pub fn live(&self) -> impl Iterator<Item = (TagHandle, &Tag)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|tag| (TagHandle(i), tag)))
    }

    /// Number of live tags.
    pub fn len_live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Total slot count, tombstones included.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len_live() == 0
    }

    /// True when a live opening tag with the id and category exists.
    pub fn has_opening(&self, category: &str, id: i32) -> bool {
        self.live()
            .any(|(_, t)| t.tag_type() == TagType::Opening && t.id() == id && t.category() == category)
    }

    /// True when a live closing tag with the id and category exists.
    pub fn has_closing(&self, category: &str, id: i32) -> bool {
        self.live()
            .any(|(_, t)| t.tag_type() == TagType::Closing && t.id() == id && t.category() == category)
    }

    pub(crate) fn slots(&self) -> &[Option<Tag>] {
        &self.slots
    }

    pub(crate) fn from_slots(slots: Vec<Option<Tag>>) -> Result<Self, CodecError> {
        if slots.len() > codec::MAX_INDEX + 1 {
            return Err(CodecError::IndexOverflow { index: slots.len() - 1 });
        }
        Ok(Self { slots })
    }
}

/// One element of a fragment's content, in text order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentPiece<'a> {
    /// A run of literal text.
    Text(&'a str),
    /// A tag reference and the tag it resolves to.
    Tag(TagHandle, &'a Tag),
    /// A hidden protected-content pair, passed through verbatim.
    Hidden(&'a str),
}

/// A translatable text value interleaved with out-of-band inline tags.
#[derive(Debug)]
pub struct Fragment {
    ctext: String,
    tags: TagRegistry,
    snapshot: u64,
    last_auto_id: i32,
}

impl Clone for Fragment {
    fn clone(&self) -> Self {
        // A clone is a distinct snapshot: status maps computed against the
        // original must not be accepted for the copy.
        Self {
            ctext: self.ctext.clone(),
            tags: self.tags.clone(),
            snapshot: next_snapshot(),
            last_auto_id: self.last_auto_id,
        }
    }
}

impl PartialEq for Fragment {
    fn eq(&self, other: &Self) -> bool {
        self.ctext == other.ctext && self.tags == other.tags
    }
}

impl Eq for Fragment {}

impl Default for Fragment {
    fn default() -> Self {
        Self::new()
    }
}

impl Fragment {
    /// Create an empty fragment.
    pub fn new() -> Self {
        Self {
            ctext: String::new(),
            tags: TagRegistry::new(),
            snapshot: next_snapshot(),
            last_auto_id: 0,
        }
    }

    /// Create a fragment with initial plain text.
    pub fn with_text(text: impl Into<String>) -> Self {
        let mut fragment = Self::new();
        fragment.ctext = text.into();
        fragment
    }

    /// Rebuild a fragment from a coded text and its registry, validating
    /// that every marker resolves to exactly one live tag.
    pub fn from_parts(ctext: String, tags: TagRegistry) -> Result<Self, CodecError> {
        validate_coded(&ctext, &tags)?;
        let last_auto_id = tags.live().map(|(_, t)| t.id()).filter(|&id| id > 0).max().unwrap_or(0);
        Ok(Self { ctext, tags, snapshot: next_snapshot(), last_auto_id })
    }

    pub(crate) fn snapshot(&self) -> u64 {
        self.snapshot
    }

    fn touch(&mut self) {
        self.snapshot = next_snapshot();
    }

    /// The coded text, verbatim. Safe to store in a skeleton buffer for
    /// exact reconstruction.
    pub fn coded_text(&self) -> &str {
        &self.ctext
    }

    /// Replace the coded text, validating it against the current registry.
    pub fn set_coded_text(&mut self, ctext: String) -> Result<(), CodecError> {
        validate_coded(&ctext, &self.tags)?;
        self.ctext = ctext;
        self.touch();
        Ok(())
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.tags
    }

    pub fn tag(&self, handle: TagHandle) -> Option<&Tag> {
        self.tags.get(handle)
    }

    /// Mutable access to a tag. Any status map computed earlier becomes
    /// stale, whether or not the tag is actually modified.
    pub fn tag_mut(&mut self, handle: TagHandle) -> Option<&mut Tag> {
        self.touch();
        self.tags.get_mut(handle)
    }

    pub fn is_empty(&self) -> bool {
        self.ctext.is_empty()
    }

    /// True when the coded text references at least one tag.
    pub fn has_tags(&self) -> bool {
        self.ctext.chars().any(codec::is_marker)
    }

    /// Length of the coded text in characters.
    pub fn char_len(&self) -> usize {
        self.ctext.chars().count()
    }

    /// Append plain text.
    pub fn append_text(&mut self, text: &str) {
        self.ctext.push_str(text);
        self.touch();
    }

    /// Append a prepared tag, encoding its reference at the end of the text.
    pub fn push_tag(&mut self, tag: Tag) -> Result<TagHandle, CodecError> {
        let tag_type = tag.tag_type();
        let prospective = TagHandle(self.tags.slot_count());
        let [marker, index] = codec::encode_ref(tag_type, prospective)?;
        let handle = self.tags.append(tag)?;
        self.ctext.push(marker);
        self.ctext.push(index);
        self.touch();
        Ok(handle)
    }

    /// Append a tag with an automatically assigned id.
    ///
    /// Opening, placeholder and standalone tags take the next sequential id.
    /// A closing tag adopts the id of the nearest unclosed opening of the
    /// same category, and stays unassigned (-1) when there is none.
    pub fn append_tag(
        &mut self,
        tag_type: TagType,
        category: impl Into<String>,
        data: impl Into<String>,
    ) -> Result<TagHandle, CodecError> {
        let mut tag = Tag::new(tag_type, category, data);
        let id = match tag_type {
            TagType::Closing => self.auto_closing_id(tag.category())?,
            _ => {
                self.last_auto_id += 1;
                self.last_auto_id
            }
        };
        tag.set_id(id);
        self.push_tag(tag)
    }

    /// Append a tag with a caller-assigned id, used verbatim. Negative ids
    /// are legal (callers may group by magnitude).
    pub fn append_tag_with_id(
        &mut self,
        tag_type: TagType,
        category: impl Into<String>,
        data: impl Into<String>,
        id: i32,
    ) -> Result<TagHandle, CodecError> {
        let mut tag = Tag::new(tag_type, category, data);
        tag.set_id(id);
        if id > self.last_auto_id {
            self.last_auto_id = id;
        }
        self.push_tag(tag)
    }

    fn auto_closing_id(&self, category: &str) -> Result<i32, CodecError> {
        let mut open: Vec<i32> = Vec::new();
        for (_, tag) in self.tag_sequence()? {
            if tag.category() != category {
                continue;
            }
            match tag.tag_type() {
                TagType::Opening => open.push(tag.id()),
                TagType::Closing => {
                    if let Some(pos) = open.iter().rposition(|&id| id == tag.id()) {
                        open.remove(pos);
                    }
                }
                _ => {}
            }
        }
        Ok(open.last().copied().unwrap_or(-1))
    }

    /// Append the content of another fragment, deep-copying its tags into
    /// this fragment's registry. Hidden protected pairs copy verbatim.
    pub fn append_fragment(&mut self, other: &Fragment) -> Result<(), CodecError> {
        for piece in other.pieces()? {
            match piece {
                FragmentPiece::Text(t) => self.ctext.push_str(t),
                FragmentPiece::Tag(_, tag) => {
                    self.push_tag(tag.clone())?;
                }
                FragmentPiece::Hidden(raw) => self.ctext.push_str(raw),
            }
        }
        self.touch();
        Ok(())
    }

    /// The fragment's content split into literal runs, tags and hidden
    /// pairs, in text order.
    pub fn pieces(&self) -> Result<Vec<FragmentPiece<'_>>, CodecError> {
        let mut out = Vec::new();
        let mut run_start = 0usize;
        let mut char_pos = 0usize;
        let mut iter = self.ctext.char_indices();
        while let Some((byte, ch)) = iter.next() {
            if !codec::is_reserved(ch) {
                char_pos += 1;
                continue;
            }
            if byte > run_start {
                out.push(FragmentPiece::Text(&self.ctext[run_start..byte]));
            }
            let (second_byte, second) = iter.next().ok_or(CodecError::TruncatedRef { pos: char_pos })?;
            let end = second_byte + second.len_utf8();
            if ch == MARKER_PROTECTED {
                out.push(FragmentPiece::Hidden(&self.ctext[byte..end]));
            } else {
                let handle = codec::char_index(second)
                    .ok_or(CodecError::BadIndexChar { pos: char_pos + 1, ch: second })?;
                let tag = self.tags.get(handle).ok_or(CodecError::DeadHandle { index: handle.index() })?;
                out.push(FragmentPiece::Tag(handle, tag));
            }
            run_start = end;
            char_pos += 2;
        }
        if run_start < self.ctext.len() {
            out.push(FragmentPiece::Text(&self.ctext[run_start..]));
        }
        Ok(out)
    }

    /// Tags referenced by the coded text, in text order.
    pub fn tag_sequence(&self) -> Result<Vec<(TagHandle, &Tag)>, CodecError> {
        Ok(self
            .pieces()?
            .into_iter()
            .filter_map(|piece| match piece {
                FragmentPiece::Tag(handle, tag) => Some((handle, tag)),
                _ => None,
            })
            .collect())
    }

    /// The text with all tag references and hidden pairs stripped out, for
    /// engines that cannot accept markup.
    pub fn plain_text(&self) -> String {
        let mut out = String::with_capacity(self.ctext.len());
        let mut skip_next = false;
        for ch in self.ctext.chars() {
            if skip_next {
                skip_next = false;
                continue;
            }
            if codec::is_reserved(ch) {
                skip_next = true;
                continue;
            }
            out.push(ch);
        }
        out
    }

    fn byte_offset(&self, char_pos: usize) -> Result<usize, CodecError> {
        let mut seen = 0usize;
        for (byte, _) in self.ctext.char_indices() {
            if seen == char_pos {
                return Ok(byte);
            }
            seen += 1;
        }
        if seen == char_pos {
            // One past the last character: the end of the text.
            return Ok(self.ctext.len());
        }
        Err(CodecError::InvalidPosition { pos: char_pos })
    }

    /// Reject positions that are out of range or would split a tag
    /// reference in two.
    pub fn check_position(&self, char_pos: usize) -> Result<(), CodecError> {
        if char_pos > self.char_len() {
            return Err(CodecError::InvalidPosition { pos: char_pos });
        }
        if char_pos > 0 {
            if let Some(prev) = self.ctext.chars().nth(char_pos - 1) {
                if codec::is_reserved(prev) {
                    return Err(CodecError::InvalidPosition { pos: char_pos });
                }
            }
        }
        Ok(())
    }

    /// Insert plain text at a character position.
    pub fn insert_text(&mut self, char_pos: usize, text: &str) -> Result<(), CodecError> {
        self.check_position(char_pos)?;
        let byte = self.byte_offset(char_pos)?;
        self.ctext.insert_str(byte, text);
        self.touch();
        Ok(())
    }

    /// Delete a character range, removing any tags whose references fall
    /// inside it.
    pub fn delete_range(&mut self, start: usize, end: usize) -> Result<(), CodecError> {
        if start > end {
            return Err(CodecError::InvalidPosition { pos: start });
        }
        self.check_position(start)?;
        self.check_position(end)?;
        let start_byte = self.byte_offset(start)?;
        let end_byte = self.byte_offset(end)?;

        // Drop the registry entries of references inside the range first.
        let mut doomed: Vec<TagHandle> = Vec::new();
        let mut char_pos = 0usize;
        let mut iter = self.ctext.chars();
        while let Some(ch) = iter.next() {
            if codec::is_reserved(ch) {
                let second = iter.next().ok_or(CodecError::TruncatedRef { pos: char_pos })?;
                if char_pos >= start && char_pos < end && codec::is_marker(ch) {
                    if let Some(handle) = codec::char_index(second) {
                        doomed.push(handle);
                    }
                }
                char_pos += 2;
            } else {
                char_pos += 1;
            }
        }
        for handle in doomed {
            self.tags.remove(handle);
        }
        self.ctext.replace_range(start_byte..end_byte, "");
        self.touch();
        Ok(())
    }

    /// Remove one tag: its reference leaves the text and its slot becomes a
    /// tombstone, so every other handle stays valid.
    pub fn remove_tag(&mut self, handle: TagHandle) -> Option<Tag> {
        let mut found: Option<(usize, usize)> = None;
        let mut iter = self.ctext.char_indices();
        while let Some((byte, ch)) = iter.next() {
            if codec::is_reserved(ch) {
                let (second_byte, second) = match iter.next() {
                    Some(pair) => pair,
                    None => break,
                };
                if codec::is_marker(ch) && codec::char_index(second) == Some(handle) {
                    found = Some((byte, second_byte + second.len_utf8()));
                    break;
                }
            }
        }
        let (start, end) = found?;
        self.ctext.replace_range(start..end, "");
        let tag = self.tags.remove(handle);
        self.touch();
        tag
    }

    /// Remove all tags and text.
    pub fn clear(&mut self) {
        self.ctext.clear();
        self.tags = TagRegistry::new();
        self.last_auto_id = 0;
        self.touch();
    }

    /// Wrap a span of the coded text in an annotation pair.
    ///
    /// The pair carries the reserved marker kind; `value` and `reference`
    /// become its typed attributes when present. Returns the opening tag's
    /// handle.
    pub fn annotate(
        &mut self,
        start: usize,
        end: usize,
        category: impl Into<String>,
        value: Option<&str>,
        reference: Option<&str>,
    ) -> Result<TagHandle, CodecError> {
        if start > end {
            return Err(CodecError::InvalidPosition { pos: start });
        }
        self.check_position(start)?;
        self.check_position(end)?;
        let category = category.into();

        self.last_auto_id += 1;
        let id = self.last_auto_id;

        let mut opening = Tag::new(TagType::Opening, category.clone(), "");
        opening.set_id(id);
        let mut marker_payload = GenericAnnotations::new();
        let set = marker_payload.add(MARKER_KIND);
        if let Some(value) = value {
            set.set_str("value", value);
        }
        if let Some(reference) = reference {
            set.set_str("ref", reference);
        }
        opening.set_annotation(MARKER_KIND, Some(InlineAnnotation::Generic(marker_payload)));

        let mut closing = Tag::new(TagType::Closing, category, "");
        closing.set_id(id);
        closing.set_annotation(MARKER_KIND, None);

        let opening_handle = TagHandle(self.tags.slot_count());
        let [om, oi] = codec::encode_ref(TagType::Opening, opening_handle)?;
        self.tags.append(opening)?;
        let closing_handle = TagHandle(self.tags.slot_count());
        let [cm, ci] = codec::encode_ref(TagType::Closing, closing_handle)?;
        self.tags.append(closing)?;

        let start_byte = self.byte_offset(start)?;
        let mut opening_ref = String::new();
        opening_ref.push(om);
        opening_ref.push(oi);
        self.ctext.insert_str(start_byte, &opening_ref);

        // The opening reference shifted everything after it by two chars.
        let end_byte = self.byte_offset(end + 2)?;
        let mut closing_ref = String::new();
        closing_ref.push(cm);
        closing_ref.push(ci);
        self.ctext.insert_str(end_byte, &closing_ref);

        self.touch();
        Ok(opening_handle)
    }

    /// Convert a plain-text position to the corresponding coded-text
    /// position. With `left_of_tag`, a position that lands on a tag
    /// reference resolves to its left side.
    pub fn coded_position_for_plain(&self, plain_pos: usize, left_of_tag: bool) -> usize {
        let mut ct = 0usize;
        let mut pt = 0usize;
        let mut skip_next = false;
        for ch in self.ctext.chars() {
            if skip_next {
                skip_next = false;
                ct += 1;
                continue;
            }
            if codec::is_reserved(ch) {
                if pt == plain_pos && left_of_tag {
                    return ct;
                }
                skip_next = true;
                ct += 1;
                continue;
            }
            if pt == plain_pos {
                return ct;
            }
            pt += 1;
            ct += 1;
        }
        ct
    }

    /// Reassign sequential display ids (1..n) in text order without
    /// disturbing tag identity. Tags sharing a category and id keep sharing
    /// one, so pairs stay paired; unassigned tags each get a fresh id.
    pub fn renumber(&mut self) -> Result<(), CodecError> {
        let order: Vec<TagHandle> = self.tag_sequence()?.into_iter().map(|(h, _)| h).collect();
        let mut next = 1i32;
        let mut assigned: HashMap<(String, i32), i32> = HashMap::new();
        for handle in order {
            let key = match self.tags.get(handle) {
                Some(tag) => (tag.category().to_string(), tag.id()),
                None => continue,
            };
            let new = if key.1 == -1 {
                let id = next;
                next += 1;
                id
            } else {
                match assigned.get(&key) {
                    Some(&id) => id,
                    None => {
                        let id = next;
                        next += 1;
                        assigned.insert(key, id);
                        id
                    }
                }
            };
            if let Some(tag) = self.tags.get_mut(handle) {
                tag.set_id(new);
            }
        }
        debug!("renumbered {} tags", next - 1);
        self.touch();
        Ok(())
    }
}

/// Check a coded text against a registry: every marker must resolve to a
/// distinct live tag, and every live tag must be referenced.
fn validate_coded(ctext: &str, tags: &TagRegistry) -> Result<(), CodecError> {
    let mut seen: Vec<TagHandle> = Vec::new();
    let mut char_pos = 0usize;
    let mut iter = ctext.chars();
    while let Some(ch) = iter.next() {
        if !codec::is_reserved(ch) {
            char_pos += 1;
            continue;
        }
        let second = iter.next().ok_or(CodecError::TruncatedRef { pos: char_pos })?;
        if codec::is_marker(ch) {
            let handle =
                codec::char_index(second).ok_or(CodecError::BadIndexChar { pos: char_pos + 1, ch: second })?;
            if tags.get(handle).is_none() {
                return Err(CodecError::DeadHandle { index: handle.index() });
            }
            if seen.contains(&handle) {
                return Err(CodecError::RegistryMismatch { markers: seen.len() + 1, live: tags.len_live() });
            }
            seen.push(handle);
        }
        char_pos += 2;
    }
    if seen.len() != tags.len_live() {
        return Err(CodecError::RegistryMismatch { markers: seen.len(), live: tags.len_live() });
    }
    Ok(())
}
