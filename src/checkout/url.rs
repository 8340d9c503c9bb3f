//! Attribution query-string construction

use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Caller-supplied attribution parameters (UTM tags, click ids).
///
/// Ordered so that the same parameters always produce the same URL.
pub type Attribution = BTreeMap<String, String>;

/// Append every parameter with a non-empty key and value to `base`.
///
/// Joins with `?` when `base` has no query string yet, `&` otherwise. A
/// trailing `?` or `&` on `base` is reused rather than doubled, and a
/// `#fragment` stays at the end of the URL.
#[must_use]
pub fn append_attribution(base: &str, params: &Attribution) -> String {
    let pairs: Vec<String> = params
        .iter()
        .filter(|(k, v)| !k.trim().is_empty() && !v.trim().is_empty())
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect();

    if pairs.is_empty() {
        return base.to_string();
    }

    let (head, fragment) = base
        .split_once('#')
        .map_or((base, None), |(h, f)| (h, Some(f)));

    let separator = if head.ends_with('?') || head.ends_with('&') {
        ""
    } else if head.contains('?') {
        "&"
    } else {
        "?"
    };

    let mut url = format!("{head}{separator}{}", pairs.join("&"));
    if let Some(fragment) = fragment {
        url.push('#');
        url.push_str(fragment);
    }
    url
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
#[must_use]
pub fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Attribution {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_appends_with_question_mark() {
        let url = append_attribution(
            "https://pay.example.com/annual",
            &params(&[("utm_source", "facebook"), ("utm_medium", "cpc")]),
        );
        assert_eq!(
            url,
            "https://pay.example.com/annual?utm_medium=cpc&utm_source=facebook"
        );
    }

    #[test]
    fn test_appends_with_ampersand_to_existing_query() {
        let url = append_attribution(
            "https://pay.example.com/checkout?offer=annual",
            &params(&[("utm_source", "facebook")]),
        );
        assert_eq!(
            url,
            "https://pay.example.com/checkout?offer=annual&utm_source=facebook"
        );
    }

    #[test]
    fn test_skips_empty_values() {
        let url = append_attribution(
            "https://pay.example.com/annual",
            &params(&[
                ("utm_source", "facebook"),
                ("utm_campaign", ""),
                ("utm_term", "   "),
                ("", "orphan"),
            ]),
        );
        assert_eq!(url, "https://pay.example.com/annual?utm_source=facebook");
    }

    #[test]
    fn test_all_empty_leaves_base_untouched() {
        let url = append_attribution(
            "https://pay.example.com/annual",
            &params(&[("utm_source", ""), ("fbclid", "")]),
        );
        assert_eq!(url, "https://pay.example.com/annual");
    }

    #[test]
    fn test_reuses_trailing_separator() {
        let url = append_attribution(
            "https://pay.example.com/annual?",
            &params(&[("fbclid", "abc")]),
        );
        assert_eq!(url, "https://pay.example.com/annual?fbclid=abc");
    }

    #[test]
    fn test_keeps_fragment_last() {
        let url = append_attribution(
            "https://pay.example.com/annual?x=1#plans",
            &params(&[("fbclid", "abc")]),
        );
        assert_eq!(url, "https://pay.example.com/annual?x=1&fbclid=abc#plans");
    }

    #[test]
    fn test_encodes_reserved_characters() {
        let url = append_attribution(
            "https://pay.example.com/annual",
            &params(&[("utm_campaign", "spring sale&more=yes")]),
        );
        assert_eq!(
            url,
            "https://pay.example.com/annual?utm_campaign=spring%20sale%26more%3Dyes"
        );
    }

    #[test]
    fn test_encode_component_utf8() {
        assert_eq!(encode_component("ação"), "a%C3%A7%C3%A3o");
        assert_eq!(encode_component("a-b_c.d~e"), "a-b_c.d~e");
    }
}
