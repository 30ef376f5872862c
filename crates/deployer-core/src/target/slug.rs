//! Filesystem-safe slugs for branch and project names.

/// Transliterate `input` to ASCII, lower-case it, and collapse every run of
/// non-alphanumeric characters into a single `-`. Apostrophes are dropped
/// rather than treated as separators. Leading and trailing separators are
/// trimmed, so `"Feature/Über Login!"` becomes `"feature-uber-login"`.
pub fn slugify(input: &str) -> String {
    let ascii = deunicode::deunicode(input);
    let mut out = String::with_capacity(ascii.len());
    let mut pending_separator = false;

    for ch in ascii.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('-');
            }
            pending_separator = false;
            out.push(ch.to_ascii_lowercase());
        } else if ch != '\'' {
            pending_separator = true;
        }
    }

    out
}
