//! Pure helpers available to the chat templates.

/// Strictly greater than.
pub fn gt(a: i64, b: i64) -> bool {
    a > b
}

pub fn eq<T: PartialEq + ?Sized>(a: &T, b: &T) -> bool {
    a == b
}

/// Whether `needle` is one of `haystack`'s entries (case-insensitive).
pub fn includes<S: AsRef<str>>(haystack: &[S], needle: &str) -> bool {
    haystack
        .iter()
        .any(|entry| entry.as_ref().eq_ignore_ascii_case(needle))
}

/// Uppercase the first character.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Sum of `values`, each scaled by `multiplier`, saturating at the `i64` bounds.
pub fn sum_with_multiplier(values: &[i64], multiplier: i64) -> i64 {
    values
        .iter()
        .map(|v| v.saturating_mul(multiplier))
        .fold(0, i64::saturating_add)
}

/// True when some face appears more than once ("doubles").
pub fn has_duplicates(faces: &[i64]) -> bool {
    let mut distinct = faces.to_vec();
    distinct.sort_unstable();
    distinct.dedup();
    distinct.len() < faces.len()
}

/// Escape text for inclusion in markup.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Render a value with an explicit sign, as shown in breakdowns.
pub fn signed(value: i64) -> String {
    if value < 0 {
        format!("-{}", value.unsigned_abs())
    } else {
        format!("+{value}")
    }
}
