//! Secret masking for every user-visible or logged string.

use std::sync::LazyLock;

use regex::Regex;

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"\b(?:ghp|gho|ghu|ghs|ghr)_[A-Za-z0-9]{36,}").expect("github token regex"),
            "[REDACTED_GITHUB_TOKEN]",
        ),
        (
            Regex::new(r"\bgithub_pat_[A-Za-z0-9_]{22,}").expect("github pat regex"),
            "[REDACTED_GITHUB_TOKEN]",
        ),
        (
            Regex::new(r"\bsk-[A-Za-z0-9_-]{20,}").expect("api key regex"),
            "[REDACTED_API_KEY]",
        ),
        (
            Regex::new(r"(?i)\b(token|api_key|apikey|access_token)=([^\s&]+)")
                .expect("query secret regex"),
            "${1}=[REDACTED]",
        ),
        (
            Regex::new(r"(?i)(Bearer\s+)[A-Za-z0-9._~+/=-]{8,}").expect("bearer regex"),
            "${1}[REDACTED]",
        ),
    ]
});

/// Masks registered credentials and well-known token shapes.
///
/// Built once at startup with the credentials in use and passed by reference
/// to anything that produces output. The registered set never changes.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    secrets: Vec<String>,
}

impl Sanitizer {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut secrets: Vec<String> = secrets
            .into_iter()
            .map(Into::into)
            .filter(|s| !s.trim().is_empty())
            .collect();
        // Longest first so a secret containing another is masked whole.
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        secrets.dedup();
        Self { secrets }
    }

    pub fn sanitize(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), &mask(secret));
            }
        }
        for (pattern, replacement) in SECRET_PATTERNS.iter() {
            out = pattern.replace_all(&out, *replacement).into_owned();
        }
        out
    }
}

fn mask(secret: &str) -> String {
    let len = secret.chars().count();
    if len > 8 {
        let prefix: String = secret.chars().take(4).collect();
        format!("{prefix}{}", "*".repeat(len - 4))
    } else {
        "***TOKEN***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_secret_keeps_four_char_prefix() {
        let sanitizer = Sanitizer::new(["supersecretvalue"]);
        assert_eq!(
            sanitizer.sanitize("auth failed for supersecretvalue"),
            "auth failed for supe************"
        );
    }

    #[test]
    fn short_registered_secret_is_fully_masked() {
        let sanitizer = Sanitizer::new(["abc123"]);
        assert_eq!(sanitizer.sanitize("key=abc123!"), "key=***TOKEN***!");
    }

    #[test]
    fn patterns_apply_without_registration() {
        let sanitizer = Sanitizer::default();
        let token = format!("ghp_{}", "a".repeat(36));
        let text = format!(
            "push with {token} and sk-{} then https://x/?token=abc&v=1 Authorization: Bearer abcdefghijk",
            "b".repeat(48)
        );
        let out = sanitizer.sanitize(&text);
        assert!(!out.contains(&token));
        assert!(out.contains("[REDACTED_GITHUB_TOKEN]"));
        assert!(out.contains("[REDACTED_API_KEY]"));
        assert!(out.contains("token=[REDACTED]&v=1"));
        assert!(out.contains("Bearer [REDACTED]"));
    }

    #[test]
    fn empty_secrets_are_ignored() {
        let sanitizer = Sanitizer::new(["", "  "]);
        assert_eq!(sanitizer.sanitize("plain text"), "plain text");
    }
}
