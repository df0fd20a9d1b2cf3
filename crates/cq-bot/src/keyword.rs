//! Keyword trigger patterns.
//!
//! A keyword list compiles to one alternation anchored at the start of the
//! (trimmed) message. Case folding covers ASCII letters only, so U+212A
//! KELVIN SIGN never stands in for `k`. A keyword must be followed by
//! whitespace or end of input, so `quota` and `quota foo` match while
//! `quota123` does not. Whatever follows the whitespace is capture group 1.

use regex::Regex;

/// Never matches; used for an empty keyword list.
const NEVER: &str = r"[^\s\S]";

/// Escaped `keyword` with every ASCII letter turned into a two-case class.
fn fold_ascii(keyword: &str) -> String {
    let mut out = String::with_capacity(keyword.len() * 2);
    let mut buf = [0u8; 4];
    for c in keyword.chars() {
        if c.is_ascii_alphabetic() {
            out.push('[');
            out.push(c.to_ascii_lowercase());
            out.push(c.to_ascii_uppercase());
            out.push(']');
        } else {
            out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
        }
    }
    out
}

/// Folded alternation of `keywords`, longest first. `None` when the list
/// has no usable keyword.
fn alternation(keywords: &[&str]) -> Option<String> {
    let mut sorted: Vec<&str> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
    sorted.dedup();

    Some(
        sorted
            .iter()
            .map(|k| fold_ascii(k))
            .collect::<Vec<_>>()
            .join("|"),
    )
}

/// Regex source for `keywords`, alternatives ordered longest first.
pub fn keyword_pattern(keywords: &[&str]) -> String {
    match alternation(keywords) {
        Some(alternation) => format!(r"(?s)^(?:{alternation})(?:\s+(.*))?$"),
        None => NEVER.to_string(),
    }
}

pub fn keyword_regex(keywords: &[&str]) -> Result<Regex, regex::Error> {
    Regex::new(&keyword_pattern(keywords))
}

/// Pattern accepting exactly one of `keywords` with nothing after it.
pub fn exact_regex(keywords: &[&str]) -> Result<Regex, regex::Error> {
    match alternation(keywords) {
        Some(alternation) => Regex::new(&format!(r"^(?:{alternation})$")),
        None => Regex::new(NEVER),
    }
}
