//! Masking of credentials in text that may end up in logs or errors.

use once_cell::sync::Lazy;
use regex::Regex;

static PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+", "Bearer ***"),
        (r"\b(sk|gsk|tk|fw)[-_][A-Za-z0-9_-]{6,}", "$1-***"),
        (
            r#"(?i)(api[_-]?key|authorization|token)("?\s*[=:]\s*"?)[^\s,"}&]+"#,
            "$1$2***",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Maximum length of a redacted body kept in an error.
pub const MAX_REDACTED_LEN: usize = 2048;

/// Replaces bearer tokens and API keys in `text` with `***`.
pub fn redact(text: &str) -> String {
    let mut result = text.to_string();
    for (re, replacement) in PATTERNS.iter() {
        result = re.replace_all(&result, *replacement).into_owned();
    }
    result
}

/// Redacts and truncates a response body for inclusion in an error.
pub fn redact_body(body: &str) -> String {
    let mut redacted = redact(body);
    if redacted.len() > MAX_REDACTED_LEN {
        let mut cut = MAX_REDACTED_LEN;
        while !redacted.is_char_boundary(cut) {
            cut -= 1;
        }
        redacted.truncate(cut);
        redacted.push_str("...");
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Authorization: Bearer abc.def-123", "abc.def-123" ; "bearer header")]
    #[test_case("key was sk-live_abcdef123456", "abcdef123456" ; "openai style key")]
    #[test_case(r#"{"api_key": "s3cr3t"}"#, "s3cr3t" ; "json api key")]
    #[test_case("url?token=s3cr3t&x=1", "s3cr3t" ; "query token")]
    fn test_redact_hides_secret(input: &str, secret: &str) {
        let output = redact(input);
        assert!(!output.contains(secret), "{} still contains {}", output, secret);
        assert!(output.contains("***"));
    }

    #[test]
    fn test_redact_leaves_plain_text() {
        let text = r#"{"error":{"message":"model not found"}}"#;
        assert_eq!(redact(text), text);
    }

    #[test]
    fn test_redact_body_truncates() {
        let body = "é".repeat(MAX_REDACTED_LEN);
        let out = redact_body(&body);
        assert!(out.len() <= MAX_REDACTED_LEN + 3);
        assert!(out.ends_with("..."));
    }
}
