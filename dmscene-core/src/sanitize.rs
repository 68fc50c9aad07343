//! Text hygiene shared by the prompt builder and the response normalizer.
//!
//! Two directions:
//!   - outbound: free text from the store is flattened and entity-escaped
//!     before it is placed inside tagged prompt blocks
//!   - inbound: oracle output is stripped of control characters before it
//!     reaches the JSON parser, and again after parsing

/// Whether `c` is invisible formatting that should never survive sanitization.
fn is_invisible(c: char) -> bool {
    matches!(c, '\u{feff}' | '\u{200b}' | '\u{200e}' | '\u{200f}' | '\u{2028}' | '\u{2029}')
}

/// Remove control and invisible characters from oracle text.
///
/// Newlines, carriage returns and tabs become a single space so that token
/// boundaries in the JSON survive. Every other control character is dropped.
#[must_use]
pub fn strip_control_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' | '\r' | '\t' => out.push(' '),
            c if c.is_control() || is_invisible(c) => {}
            c => out.push(c),
        }
    }
    out
}

/// Collapse all whitespace and control characters into single spaces and trim.
#[must_use]
pub fn flatten(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_whitespace() || c.is_control() || is_invisible(c) {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }
    out
}

/// Flatten `text` and escape the characters that delimit prompt blocks.
///
/// After escaping, the text contains no `<`, `>`, `"` or raw newline, so it
/// can neither open nor close a `<dossier>` block nor end a quoted attribute.
#[must_use]
pub fn escape_block_text(text: &str) -> String {
    let flat = flatten(text);
    let mut out = String::with_capacity(flat.len());
    for c in flat.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// Remove an optional Markdown code fence around a payload.
///
/// Accepts ```` ```json {..} ``` ````, ```` ``` {..} ``` ```` or no fence at all.
/// Works on already-flattened text, where the fence and the payload share a line.
#[must_use]
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop a language tag such as `json` or `JSON`.
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}
