use std::{borrow::Cow, sync::OnceLock};

use anyhow::{bail, Result};
use regex::Regex;

/// Split an "owner/repo" string, validating both sides are non-empty.
/// Fails locally, before any network call is made.
pub fn split_repo(repo: &str) -> Result<(&str, &str)> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => bail!("Invalid repository name: {repo:?} (expected \"owner/repo\")"),
    }
}

const REDACTED: &str = "[redacted]";

fn redact_patterns() -> &'static [Regex; 4] {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Personal access tokens: ghp_, gho_, ghu_, ghs_
            Regex::new(r"(?i)gh[pous]_[A-Za-z0-9]{10,}").unwrap(),
            // Fine-grained personal access tokens
            Regex::new(r"(?i)github_pat_\w{10,}").unwrap(),
            Regex::new(r"(?i)(Authorization:\s*Bearer\s+)\S+").unwrap(),
            Regex::new(r"(?i)(token\s+)\w{10,}").unwrap(),
        ]
    })
}

/// Replace credential-shaped substrings with `[redacted]`. Idempotent:
/// the replacement text never matches any of the patterns.
pub fn redact(text: &str) -> Cow<'_, str> {
    let mut result = Cow::Borrowed(text);
    for (i, pattern) in redact_patterns().iter().enumerate() {
        // The first two patterns have no capture; the rest keep their prefix.
        let replacement = if i < 2 { REDACTED } else { "${1}[redacted]" };
        if pattern.is_match(&result) {
            let replaced = pattern.replace_all(&result, replacement).into_owned();
            result = Cow::Owned(replaced);
        }
    }
    result
}

pub const TRUNCATION_SUFFIX: &str = "... (truncated)";

/// Truncate to at most `max` characters, appending a marker when cut.
/// Returns the (possibly shortened) text and whether truncation occurred.
pub fn truncate_output(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((idx, _)) => (format!("{}{TRUNCATION_SUFFIX}", &text[..idx]), true),
        None => (text.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_repo() {
        let cases: &[(&str, Option<(&str, &str)>)] = &[
            ("foo/bar", Some(("foo", "bar"))),
            ("org/repo-name", Some(("org", "repo-name"))),
            ("foo", None),
            ("/bar", None),
            ("foo/", None),
            ("", None),
            ("a/b/c", None),
        ];
        for &(input, expected) in cases {
            assert_eq!(split_repo(input).ok(), expected, "input: {input:?}");
        }
    }

    #[test]
    fn test_redact_tokens() {
        let cases: &[(&str, &str)] = &[
            ("ghp_ABCDEFGHIJ12345", "[redacted]"),
            ("before gho_abcdefghijk after", "before [redacted] after"),
            ("github_pat_0123456789abc", "[redacted]"),
            ("Authorization: Bearer abc.def.ghi", "Authorization: Bearer [redacted]"),
            ("token abcdefghij123", "token [redacted]"),
            // Too short to be a token
            ("ghp_short", "ghp_short"),
            ("token abc", "token abc"),
        ];
        for &(input, expected) in cases {
            assert_eq!(redact(input), expected, "input: {input:?}");
        }
    }

    #[test]
    fn test_redact_case_insensitive() {
        assert_eq!(redact("AUTHORIZATION: bearer SECRETVALUE"), "AUTHORIZATION: bearer [redacted]");
        assert_eq!(redact("GHP_ABCDEFGHIJ12345"), "[redacted]");
    }

    #[test]
    fn test_redact_idempotent() {
        let inputs = [
            "ghp_ABCDEFGHIJ12345 and Authorization: Bearer xyz1234567890",
            "token abcdefghijklmnop",
            "nothing secret here",
        ];
        for input in inputs {
            let once = redact(input).into_owned();
            let twice = redact(&once).into_owned();
            assert_eq!(once, twice, "input: {input:?}");
        }
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("hello", 10), ("hello".to_string(), false));
        assert_eq!(truncate_output("hello", 5), ("hello".to_string(), false));
        assert_eq!(truncate_output("hello world", 5), ("hello... (truncated)".to_string(), true));
    }

    #[test]
    fn test_truncate_output_multibyte() {
        // Truncation counts characters, not bytes
        let text = "héllo wörld";
        let (out, truncated) = truncate_output(text, 6);
        assert!(truncated);
        assert_eq!(out, "héllo ... (truncated)");
    }
}
