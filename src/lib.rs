//! # codetext
//!
//! Inline-markup text fragments for localization tooling.
//!
//! Extracted translatable content is rarely plain text: formatting tags,
//! placeholders and sub-flow references are interleaved with it and must
//! survive copy, merge, partial translation and storage round trips
//! byte-for-byte. This crate is that shared data model.
//!
//! ## Coded text
//!
//! A [`Fragment`] stores its content as *coded text*: ordinary characters
//! plus, for each inline tag, a two-character reference: one reserved
//! marker selecting the tag type, one index character resolving to the
//! fragment's [`TagRegistry`]:
//!
//! ```text
//! Text in {E101}{E110}bold{E102}{E111} and more
//!          ^opening ref   ^closing ref
//! ```
//!
//! The text can be sliced, searched and stored like a plain string while
//! the tags (payloads, flags, annotations) live out of band. Registry
//! slots are tombstoned on removal, so a reference never silently
//! re-points after an edit.
//!
//! ## From fragment to output
//!
//! ```rust
//! use codetext::{classify, render, Fragment, RenderSyntax, TagType};
//!
//! let mut fragment = Fragment::new();
//! fragment.append_text("Text in ");
//! fragment.append_tag(TagType::Opening, "b", "<B>")?;
//! fragment.append_text("bold");
//! fragment.append_tag(TagType::Closing, "b", "</B>")?;
//! fragment.append_text(" and &");
//!
//! assert_eq!(fragment.plain_text(), "Text in bold and &");
//!
//! let statuses = classify(&fragment)?;
//! let output = render(&fragment, &statuses, &RenderSyntax::default())?;
//! assert_eq!(output, "Text in <pc id=\"1\" type=\"b\">bold</pc> and &amp;");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The status map is transient: it is recomputed per render and bound to
//! the exact fragment state it came from. Rendering with a stale map is
//! rejected rather than guessed around.
//!
//! ## Storage
//!
//! [`storage`] flattens tags and fragments into a compact string form
//! delimited by control characters, optionally base64-armored. Reading
//! accepts both the current layout and the legacy layout older data was
//! written in; the distinction is made by structural inspection, never by
//! a version flag.

pub mod annotation;
pub mod classify;
pub mod codec;
pub mod fragment;
pub mod render;
pub mod storage;
pub mod tag;

pub use annotation::{FieldSet, FieldValue, GenericAnnotations, InlineAnnotation};
pub use classify::{classify, PairingError, StatusMap, TagStatus};
pub use codec::{CodecError, TagHandle};
pub use fragment::{Fragment, FragmentPiece, TagRegistry};
pub use render::{render, RenderError, RenderSyntax};
pub use storage::{
    fragment_to_string, from_armored, string_to_fragment, string_to_tags, tags_to_string, to_armored,
    StorageError,
};
pub use tag::{Tag, TagType, CATEGORY_NULL, GENERIC_KIND, MARKER_KIND};
