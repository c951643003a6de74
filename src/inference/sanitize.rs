pub const START_OF_TEXT: &str = "<start_of_text>";
pub const END_OF_TEXT: &str = "<end_of_text>";

/// Strips the generation markers from a decoded caption.
///
/// Everything after the first end marker is dropped, then every start marker is removed
/// wherever it occurs. A caption without an end marker is kept whole.
pub fn sanitize(raw: &str) -> String {
    let caption = raw.split(END_OF_TEXT).next().unwrap_or_default();
    caption.replace(START_OF_TEXT, "")
}
