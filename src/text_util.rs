/// Maximum number of characters shown for a passage in previews.
pub const DEFAULT_PREVIEW_MAX_CHARS: usize = 200;

/// Shorten `text` to at most `max_chars` characters, appending "..." when
/// anything was cut. Never splits a character.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

/// Render passages as a numbered list, one block per passage.
///
/// `numbers` are the 1-based labels to show; missing labels fall back to the
/// passage's position in `passages`.
pub fn numbered_passages(
    passages: &[String],
    numbers: Option<&[usize]>,
    max_chars: Option<usize>,
) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, passage)| {
            let label = numbers.and_then(|n| n.get(i).copied()).unwrap_or(i + 1);
            let body = match max_chars {
                Some(max) => preview(passage, max),
                None => passage.clone(),
            };
            format!("[{label}] {body}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prefix every line after the first with `indent`, for multi-line values
/// printed after a label.
pub fn indent_continuation(text: &str, indent: &str) -> String {
    text.lines()
        .collect::<Vec<_>>()
        .join(&format!("\n{indent}"))
}
