//! Character-safe length handling for outbound Discord text.
//!
//! Discord limits are counted in characters, so every cut here happens on a
//! `char` boundary and lengths are measured with `chars().count()`.

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// First `max_chars` characters of `text`.
pub fn take_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Shortens `text` so the result, suffix included, fits in `cap` characters.
/// `margin` extra characters are kept free below the cap. Returns `None` when
/// `text` already fits.
pub fn truncate_with_suffix(text: &str, cap: usize, suffix: &str, margin: usize) -> Option<String> {
    if char_len(text) <= cap {
        return None;
    }
    let keep = cap.saturating_sub(char_len(suffix) + margin);
    let mut out = take_chars(text, keep).trim_end().to_string();
    out.push_str(suffix);
    // A suffix longer than the cap can only happen with a degenerate cap; cut hard.
    if char_len(&out) > cap {
        out = take_chars(&out, cap).to_string();
    }
    Some(out)
}

/// Wraps text in a plain code block, neutralising fences inside it.
pub fn code_block(text: &str) -> String {
    format!("```\n{}\n```", text.replace("```", "'''"))
}
