//! # Canonical text
//!
//! Cleartext signatures are computed over text whose lines carry no trailing
//! spaces or tabs. rPGP normalizes the line breaks, this module strips the
//! whitespace before the text is hashed.

/// Removes trailing spaces and tabs from every line, keeping the line breaks.
///
/// ```
/// use pgp_facade::normalize_lines::strip_trailing_whitespace;
///
/// assert_eq!(strip_trailing_whitespace("a  \r\nb\t\nc "), "a\r\nb\nc");
/// ```
pub fn strip_trailing_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\r', '\n']);
        out.push_str(content.trim_end_matches([' ', '\t']));
        out.push_str(&line[content.len()..]);
    }
    out
}
