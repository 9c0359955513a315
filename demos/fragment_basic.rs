//! Example of building, classifying, rendering and storing a fragment

use codetext::{classify, render, Fragment, GenericAnnotations, InlineAnnotation, RenderSyntax, TagType, GENERIC_KIND};

fn main() -> anyhow::Result<()> {
    println!("=== Fragment Example ===\n");

    // Build a fragment the way a format filter would.
    let mut fragment = Fragment::new();
    fragment.append_text("Text in ");
    fragment.append_tag(TagType::Opening, "b", "<B>")?;
    fragment.append_text("bold");
    fragment.append_tag(TagType::Closing, "b", "</B>")?;
    fragment.append_text(" and &");

    // Attach a composite annotation to the opening tag.
    let (opening, _) = fragment.tag_sequence()?[0];
    let mut payload = GenericAnnotations::new();
    payload.add("match").set_str("origin", "tm").set_int("score", 95);
    if let Some(tag) = fragment.tag_mut(opening) {
        tag.set_annotation(GENERIC_KIND, Some(InlineAnnotation::Generic(payload)));
    }

    println!("plain text: {}", fragment.plain_text());

    // Classify and render with the default vocabulary.
    let statuses = classify(&fragment)?;
    let output = render(&fragment, &statuses, &RenderSyntax::default())?;
    println!("rendered:   {}", output);

    // Store and re-load, armored for safe transport.
    let armored = codetext::to_armored(&codetext::fragment_to_string(&fragment));
    println!("armored:    {}", armored);

    let restored = codetext::string_to_fragment(&codetext::from_armored(&armored)?)?;
    assert_eq!(restored, fragment);
    println!("\nround trip OK: {} tags restored", restored.registry().len_live());

    Ok(())
}
