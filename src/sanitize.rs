//! Filter value sanitization
//!
//! The inference step occasionally emits filter literals with stray JSON
//! punctuation or full URLs where a bare domain is expected. Values are
//! cleaned here before they reach the record store query.

/// Characters that terminate a useful filter literal. Anything from the
/// first occurrence onward is dropped (ports, paths, query strings).
const CUT_CHARS: [char; 5] = [':', '/', '?', '#', '&'];

/// Trailing structural characters left behind by truncated JSON output.
const TRAILING_CHARS: [char; 7] = ['{', '}', '[', ']', ',', '"', '\''];

/// Clean a single filter literal.
///
/// Strips a leading `http://`/`https://` scheme, truncates at the first
/// `:`, `/`, `?`, `#` or `&`, removes trailing structural characters and
/// trims whitespace. Idempotent: `sanitize(sanitize(s)) == sanitize(s)`.
pub fn sanitize_filter_value(value: &str) -> String {
    let mut s = value.trim();

    for scheme in ["http://", "https://"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            s = rest;
            break;
        }
    }

    if let Some(idx) = s.find(CUT_CHARS) {
        s = &s[..idx];
    }

    s.trim_end_matches(TRAILING_CHARS).trim().to_string()
}

/// Sanitize an optional literal. Filters without a value (existence
/// checks) pass through untouched.
pub fn sanitize_optional(value: Option<&str>) -> Option<String> {
    value.map(sanitize_filter_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_trailing_json_punctuation() {
        assert_eq!(sanitize_filter_value("acme.com}]},{\""), "acme.com");
        assert_eq!(sanitize_filter_value("Acme Corp\","), "Acme Corp");
    }

    #[test]
    fn test_truncates_urls_to_bare_domain() {
        assert_eq!(sanitize_filter_value("https://acme.com/about"), "acme.com");
        assert_eq!(sanitize_filter_value("http://acme.com:8080"), "acme.com");
        assert_eq!(
            sanitize_filter_value("acme.com?utm_source=crm"),
            "acme.com"
        );
        assert_eq!(sanitize_filter_value("acme.com#contact"), "acme.com");
    }

    #[test]
    fn test_trims_whitespace() {
        assert_eq!(sanitize_filter_value("  Acme Corp  "), "Acme Corp");
    }

    #[test]
    fn test_plain_values_unchanged() {
        assert_eq!(sanitize_filter_value("Acme Corp"), "Acme Corp");
        assert_eq!(sanitize_filter_value("acme.com"), "acme.com");
        assert_eq!(sanitize_filter_value(""), "");
    }

    #[test]
    fn test_idempotent() {
        let cases = [
            "acme.com}]},{\"",
            "https://acme.com/about?x=1",
            "  Acme Corp, Inc.  ",
            "plain",
            "",
            "http://acme.com:443/path#frag",
        ];
        for case in cases {
            let once = sanitize_filter_value(case);
            let twice = sanitize_filter_value(&once);
            assert_eq!(once, twice, "not idempotent for {case:?}");
        }
    }

    #[test]
    fn test_optional_passthrough() {
        assert_eq!(sanitize_optional(None), None);
        assert_eq!(
            sanitize_optional(Some("acme.com}")),
            Some("acme.com".to_string())
        );
    }
}
