//! Fragment rendering
//!
//! Turns a fragment plus a freshly computed [`StatusMap`] into a concrete
//! inline syntax. The element and attribute names are configuration, not
//! data model: the default [`RenderSyntax`] speaks an XLIFF-2-like
//! vocabulary, but a writer for another format only has to swap the names.

use log::warn;

use crate::annotation::InlineAnnotation;
use crate::classify::{StatusMap, TagStatus};
use crate::codec::CodecError;
use crate::fragment::{Fragment, FragmentPiece};
use crate::tag::{Tag, TagType, CATEGORY_NULL, MARKER_KIND};

/// Element and attribute vocabulary for one target syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSyntax {
    /// Combined open+close element for a collapsible pair.
    pub paired_elem: String,
    /// Start element of a split pair.
    pub start_elem: String,
    /// End element of a split pair.
    pub end_elem: String,
    /// Self-contained element for placeholder and standalone tags.
    pub standalone_elem: String,
    /// Combined element for a collapsible annotation span.
    pub anno_paired_elem: String,
    /// Start element of a split annotation span.
    pub anno_start_elem: String,
    /// End element of a split annotation span.
    pub anno_end_elem: String,
    pub id_attr: String,
    /// Back-reference attribute linking an end element to its start.
    pub start_ref_attr: String,
    /// Attribute marking an element whose counterpart is absent.
    pub isolated_attr: String,
    pub category_attr: String,
    pub value_attr: String,
    pub ref_attr: String,
    pub translate_attr: String,
    /// Element standing in for characters the syntax cannot carry.
    pub escape_elem: String,
    pub escape_hex_attr: String,
    /// Emitted verbatim for a hidden protected-content pair; deliberately
    /// not valid output so the problem is visible downstream.
    pub protected_warning: String,
}

impl Default for RenderSyntax {
    fn default() -> Self {
        Self {
            paired_elem: "pc".to_string(),
            start_elem: "sc".to_string(),
            end_elem: "ec".to_string(),
            standalone_elem: "ph".to_string(),
            anno_paired_elem: "mrk".to_string(),
            anno_start_elem: "sm".to_string(),
            anno_end_elem: "em".to_string(),
            id_attr: "id".to_string(),
            start_ref_attr: "startRef".to_string(),
            isolated_attr: "isolated".to_string(),
            category_attr: "type".to_string(),
            value_attr: "value".to_string(),
            ref_attr: "ref".to_string(),
            translate_attr: "translate".to_string(),
            escape_elem: "cp".to_string(),
            escape_hex_attr: "hex".to_string(),
            protected_warning: "<WARNING:HIDDEN-PROTECTED-CONTENT/>".to_string(),
        }
    }
}

/// Rendering failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The status map was computed from a different fragment state than the
    /// one being rendered.
    StaleStatusMap,
    /// The coded text is malformed.
    Codec(CodecError),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::StaleStatusMap => {
                write!(f, "status map was not computed from this fragment state")
            }
            RenderError::Codec(err) => write!(f, "malformed coded text: {}", err),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CodecError> for RenderError {
    fn from(err: CodecError) -> Self {
        RenderError::Codec(err)
    }
}

fn escape_literal(out: &mut String, ch: char, syntax: &RenderSyntax) {
    match ch {
        '\r' => out.push_str("&#13;"),
        '<' => out.push_str("&lt;"),
        '&' => out.push_str("&amp;"),
        '\n' | '\t' => out.push(ch),
        _ => {
            let cp = ch as u32;
            if cp < 0x20 || cp == 0xFFFE || cp == 0xFFFF {
                // Characters the target's literal-text rule cannot carry.
                out.push_str(&format!("<{} {}=\"{:04X}\"/>", syntax.escape_elem, syntax.escape_hex_attr, cp));
            } else {
                out.push(ch);
            }
        }
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(ch),
        }
    }
    out
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&escape_attr(value));
    out.push('"');
}

fn push_category_attr(out: &mut String, tag: &Tag, syntax: &RenderSyntax) {
    if tag.category() != CATEGORY_NULL {
        push_attr(out, &syntax.category_attr, tag.category());
    }
}

fn push_marker_attrs(out: &mut String, tag: &Tag, syntax: &RenderSyntax) {
    let Some(set) = tag
        .annotation(MARKER_KIND)
        .and_then(InlineAnnotation::as_generic)
        .and_then(|g| g.first_of(MARKER_KIND))
    else {
        return;
    };
    if let Some(value) = set.string("value") {
        push_attr(out, &syntax.value_attr, value);
    }
    if let Some(reference) = set.string("ref") {
        push_attr(out, &syntax.ref_attr, reference);
    }
    if let Some(translate) = set.boolean("translate") {
        push_attr(out, &syntax.translate_attr, if translate { "yes" } else { "no" });
    }
}

/// Render a fragment into the target syntax.
///
/// The status map must have been computed from this exact fragment state;
/// a map derived from any other state (another fragment, a clone, or this
/// fragment before a mutation) is rejected.
pub fn render(fragment: &Fragment, statuses: &StatusMap, syntax: &RenderSyntax) -> Result<String, RenderError> {
    if statuses.snapshot() != fragment.snapshot() {
        return Err(RenderError::StaleStatusMap);
    }

    let mut out = String::with_capacity(fragment.coded_text().len());
    // Combined elements currently open; true for annotation vocabulary.
    let mut open_combined: Vec<bool> = Vec::new();

    for piece in fragment.pieces()? {
        match piece {
            FragmentPiece::Text(text) => {
                for ch in text.chars() {
                    escape_literal(&mut out, ch, syntax);
                }
            }
            FragmentPiece::Hidden(_) => {
                warn!("hidden protected content passed through as a diagnostic");
                out.push_str(&syntax.protected_warning);
            }
            FragmentPiece::Tag(handle, tag) => {
                let status = statuses.status(handle).unwrap_or(TagStatus::Isolated);
                let annotation = tag.is_annotation_marker();
                let id = tag.id().to_string();
                match tag.tag_type() {
                    TagType::Opening => {
                        let (combined, split) = if annotation {
                            (&syntax.anno_paired_elem, &syntax.anno_start_elem)
                        } else {
                            (&syntax.paired_elem, &syntax.start_elem)
                        };
                        match status {
                            TagStatus::Collapsible => {
                                out.push('<');
                                out.push_str(combined);
                                push_attr(&mut out, &syntax.id_attr, &id);
                                push_category_attr(&mut out, tag, syntax);
                                if annotation {
                                    push_marker_attrs(&mut out, tag, syntax);
                                }
                                out.push('>');
                                open_combined.push(annotation);
                            }
                            TagStatus::KeptSeparate | TagStatus::Isolated => {
                                out.push('<');
                                out.push_str(split);
                                push_attr(&mut out, &syntax.id_attr, &id);
                                push_category_attr(&mut out, tag, syntax);
                                if annotation {
                                    push_marker_attrs(&mut out, tag, syntax);
                                }
                                if status == TagStatus::Isolated {
                                    push_attr(&mut out, &syntax.isolated_attr, "yes");
                                }
                                out.push_str("/>");
                            }
                        }
                    }
                    TagType::Closing => {
                        let end_elem = if annotation { &syntax.anno_end_elem } else { &syntax.end_elem };
                        match status {
                            TagStatus::Collapsible => {
                                let was_annotation = open_combined.pop().unwrap_or(annotation);
                                let combined = if was_annotation {
                                    &syntax.anno_paired_elem
                                } else {
                                    &syntax.paired_elem
                                };
                                out.push_str("</");
                                out.push_str(combined);
                                out.push('>');
                            }
                            TagStatus::KeptSeparate => {
                                out.push('<');
                                out.push_str(end_elem);
                                push_attr(&mut out, &syntax.start_ref_attr, &id);
                                out.push_str("/>");
                            }
                            TagStatus::Isolated => {
                                out.push('<');
                                out.push_str(end_elem);
                                push_attr(&mut out, &syntax.id_attr, &id);
                                push_attr(&mut out, &syntax.isolated_attr, "yes");
                                out.push_str("/>");
                            }
                        }
                    }
                    TagType::Placeholder | TagType::Standalone => {
                        out.push('<');
                        out.push_str(&syntax.standalone_elem);
                        push_attr(&mut out, &syntax.id_attr, &id);
                        push_category_attr(&mut out, tag, syntax);
                        out.push_str("/>");
                    }
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::codec::{INDEX_BASE, MARKER_PROTECTED};

    fn bold_fragment() -> Fragment {
        let mut f = Fragment::new();
        f.append_text("Text in ");
        f.append_tag_with_id(TagType::Opening, "b", "<B>", 1).unwrap();
        f.append_text("bold");
        f.append_tag_with_id(TagType::Closing, "b", "</B>", 1).unwrap();
        f.append_text(" and &");
        f
    }

    #[test]
    fn test_collapsible_pair_renders_combined() {
        let f = bold_fragment();
        let map = classify(&f).unwrap();
        let output = render(&f, &map, &RenderSyntax::default()).unwrap();
        assert_eq!(output, "Text in <pc id=\"1\" type=\"b\">bold</pc> and &amp;");
    }

    #[test]
    fn test_crossing_pairs_render_split_with_back_reference() {
        let mut f = Fragment::new();
        f.append_tag_with_id(TagType::Opening, "b", "<b>", 1).unwrap();
        f.append_text("x");
        f.append_tag_with_id(TagType::Opening, "i", "<i>", 2).unwrap();
        f.append_text("y");
        f.append_tag_with_id(TagType::Closing, "b", "</b>", 1).unwrap();
        f.append_tag_with_id(TagType::Closing, "i", "</i>", 2).unwrap();

        let map = classify(&f).unwrap();
        let output = render(&f, &map, &RenderSyntax::default()).unwrap();
        assert_eq!(
            output,
            "<sc id=\"1\" type=\"b\"/>x<sc id=\"2\" type=\"i\"/>y<ec startRef=\"1\"/><ec startRef=\"2\"/>"
        );
    }

    #[test]
    fn test_isolated_tags_mark_themselves() {
        let mut f = Fragment::new();
        f.append_tag_with_id(TagType::Opening, "b", "<b>", 1).unwrap();
        f.append_text("x");
        f.append_tag_with_id(TagType::Closing, "i", "</i>", 9).unwrap();

        let map = classify(&f).unwrap();
        let output = render(&f, &map, &RenderSyntax::default()).unwrap();
        assert_eq!(output, "<sc id=\"1\" type=\"b\" isolated=\"yes\"/>x<ec id=\"9\" isolated=\"yes\"/>");
    }

    #[test]
    fn test_placeholders_render_self_contained() {
        let mut f = Fragment::new();
        f.append_tag_with_id(TagType::Placeholder, "break", "<br/>", 1).unwrap();
        f.append_tag_with_id(TagType::Standalone, "img", "<img/>", 2).unwrap();
        let map = classify(&f).unwrap();
        let output = render(&f, &map, &RenderSyntax::default()).unwrap();
        assert_eq!(output, "<ph id=\"1\" type=\"break\"/><ph id=\"2\" type=\"img\"/>");
    }

    #[test]
    fn test_annotation_span_uses_distinct_vocabulary() {
        let mut f = Fragment::with_text("check this term here");
        f.annotate(11, 15, "comment", Some("verify <it> & that"), Some("#n=1")).unwrap();
        let map = classify(&f).unwrap();
        let output = render(&f, &map, &RenderSyntax::default()).unwrap();
        assert_eq!(
            output,
            "check this <mrk id=\"1\" type=\"comment\" value=\"verify &lt;it> &amp; that\" ref=\"#n=1\">term</mrk> here"
        );
    }

    #[test]
    fn test_escaping_grid() {
        let mut f = Fragment::new();
        f.append_text("a<b&c\rd\te\nf");
        let map = classify(&f).unwrap();
        let output = render(&f, &map, &RenderSyntax::default()).unwrap();
        assert_eq!(output, "a&lt;b&amp;c&#13;d\te\nf");
    }

    #[test]
    fn test_invalid_characters_become_escape_elements() {
        let mut f = Fragment::new();
        f.append_text("x\u{0001}y\u{FFFF}z");
        let map = classify(&f).unwrap();
        let output = render(&f, &map, &RenderSyntax::default()).unwrap();
        assert_eq!(output, "x<cp hex=\"0001\"/>y<cp hex=\"FFFF\"/>z");
    }

    #[test]
    fn test_supplementary_literals_stay_whole() {
        let mut f = Fragment::new();
        f.append_text("a\u{1F600}b");
        let map = classify(&f).unwrap();
        let output = render(&f, &map, &RenderSyntax::default()).unwrap();
        assert_eq!(output, "a\u{1F600}b");
    }

    #[test]
    fn test_protected_content_becomes_diagnostic() {
        let mut text = String::from("x");
        text.push(MARKER_PROTECTED);
        text.push(char::from_u32(INDEX_BASE).unwrap());
        text.push('y');
        let f = Fragment::with_text(text);
        let map = classify(&f).unwrap();
        let output = render(&f, &map, &RenderSyntax::default()).unwrap();
        assert_eq!(output, "x<WARNING:HIDDEN-PROTECTED-CONTENT/>y");
    }

    #[test]
    fn test_negative_ids_render_verbatim() {
        let mut f = Fragment::new();
        f.append_tag_with_id(TagType::Opening, "b", "<b>", -123).unwrap();
        f.append_text("x");
        f.append_tag_with_id(TagType::Closing, "b", "</b>", -123).unwrap();
        let map = classify(&f).unwrap();
        let output = render(&f, &map, &RenderSyntax::default()).unwrap();
        assert_eq!(output, "<pc id=\"-123\" type=\"b\">x</pc>");
    }

    #[test]
    fn test_stale_status_map_is_rejected() {
        let mut f = bold_fragment();
        let map = classify(&f).unwrap();

        // Same fragment, later state.
        f.append_text("!");
        assert_eq!(render(&f, &map, &RenderSyntax::default()), Err(RenderError::StaleStatusMap));

        // A clone is a different instance even with equal content.
        let map = classify(&f).unwrap();
        let copy = f.clone();
        assert_eq!(render(&copy, &map, &RenderSyntax::default()), Err(RenderError::StaleStatusMap));
        assert!(render(&f, &map, &RenderSyntax::default()).is_ok());
    }

    #[test]
    fn test_custom_vocabulary() {
        let mut syntax = RenderSyntax::default();
        syntax.paired_elem = "g".to_string();
        syntax.standalone_elem = "x".to_string();

        let mut f = Fragment::new();
        f.append_tag_with_id(TagType::Opening, "b", "<b>", 1).unwrap();
        f.append_tag_with_id(TagType::Placeholder, "br", "<br/>", 2).unwrap();
        f.append_tag_with_id(TagType::Closing, "b", "</b>", 1).unwrap();
        let map = classify(&f).unwrap();
        let output = render(&f, &map, &syntax).unwrap();
        assert_eq!(output, "<g id=\"1\" type=\"b\"><x id=\"2\" type=\"br\"/></g>");
    }
}
