//! Mandatory redaction of sensitive query and form fields

use url::form_urlencoded;

/// A field whose lowercased name contains any of these is sensitive
pub const SENSITIVE_FIELDS: &[&str] = &["pass", "pwd", "secret", "token", "key"];

/// Replacement stored instead of a sensitive value
pub const REDACTED: &str = "[REDACTED]";

pub fn is_sensitive(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    SENSITIVE_FIELDS.iter().any(|s| name.contains(s))
}

/// Redact decoded name/value pairs in place
pub fn redact_pairs(pairs: &mut [(String, String)]) {
    for (name, value) in pairs.iter_mut() {
        if is_sensitive(name) {
            *value = REDACTED.to_string();
        }
    }
}

/// Decode a urlencoded body or query string into redacted pairs
pub fn decode_redacted(raw: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect();
    redact_pairs(&mut pairs);
    pairs
}

/// Redact a raw query string, keeping every other segment byte-for-byte.
///
/// The field name is percent-decoded only to test it, so `p%61ss=x`
/// is caught while untouched segments keep their original encoding.
pub fn redact_query(raw: &str) -> String {
    raw.split('&')
        .map(|segment| {
            let (name, has_value) = match segment.split_once('=') {
                Some((name, _)) => (name, true),
                None => (segment, false),
            };
            let decoded: String = form_urlencoded::parse(name.as_bytes())
                .map(|(k, _)| k.into_owned())
                .collect();
            if has_value && is_sensitive(&decoded) {
                format!("{}={}", name, REDACTED)
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_sensitive() {
        for name in ["password", "PWD", "Passwd", "api_key", "csrf_token", "client_secret"] {
            assert!(is_sensitive(name), "{}", name);
        }
        for name in ["query", "q", "user", "email"] {
            assert!(!is_sensitive(name), "{}", name);
        }
    }

    #[test]
    fn test_redact_query_keeps_other_segments() {
        assert_eq!(
            redact_query("user=bob%40x.com&Password=hunter2&q=a+b"),
            "user=bob%40x.com&Password=[REDACTED]&q=a+b"
        );
        assert_eq!(redact_query("p%61ss=1&flag"), "p%61ss=[REDACTED]&flag");
        assert_eq!(redact_query(""), "");
    }

    #[test]
    fn test_decode_redacted() {
        let pairs = decode_redacted("username=alice&pwd=s3cret&query=cats+and+dogs");
        assert_eq!(
            pairs,
            vec![
                ("username".to_string(), "alice".to_string()),
                ("pwd".to_string(), REDACTED.to_string()),
                ("query".to_string(), "cats and dogs".to_string()),
            ]
        );
    }
}
