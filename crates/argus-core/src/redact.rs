//! Query-string redaction for captured request URLs.
//!
//! Values of known credential-bearing parameters are replaced with the
//! literal `redacted`; every other parameter keeps its key and loses its
//! value. URLs that do not parse are passed through untouched.

use url::Url;

/// Lowercased query keys whose values are replaced outright.
const SENSITIVE_KEYS: [&str; 7] = [
    "token",
    "access_token",
    "auth",
    "authorization",
    "code",
    "password",
    "pass",
];

pub fn redact_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_owned();
    };
    if url.query().is_none() {
        return raw.to_owned();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut editor = url.query_pairs_mut();
        editor.clear();
        for (key, _) in &pairs {
            if SENSITIVE_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
                editor.append_pair(key, "redacted");
            } else {
                editor.append_pair(key, "");
            }
        }
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_values_replaced() {
        let out = redact_url("https://api.example.com/v1?token=abc123&x=1");
        assert_eq!(out, "https://api.example.com/v1?token=redacted&x=");
    }

    #[test]
    fn key_match_is_case_insensitive() {
        let out = redact_url("https://e.com/?Authorization=Bearer+x");
        assert_eq!(out, "https://e.com/?Authorization=redacted");
    }

    #[test]
    fn other_params_keep_key_drop_value() {
        let out = redact_url("https://e.com/search?q=secret+stuff&page=2");
        assert_eq!(out, "https://e.com/search?q=&page=");
    }

    #[test]
    fn no_query_untouched() {
        assert_eq!(redact_url("https://e.com/path"), "https://e.com/path");
    }

    #[test]
    fn unparsable_passthrough() {
        assert_eq!(redact_url("not a url at all"), "not a url at all");
    }

    #[test]
    fn all_sensitive_keys_covered() {
        for key in SENSITIVE_KEYS {
            let raw = format!("https://e.com/?{key}=supersecret");
            let out = redact_url(&raw);
            assert!(
                out.contains(&format!("{key}=redacted")),
                "{key} should be redacted, got {out}"
            );
            assert!(!out.contains("supersecret"));
        }
    }
}
