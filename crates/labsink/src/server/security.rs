// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pattern-based rejection of payloads that look like injection attempts.
//!
//! A deny-list heuristic, not a parser. It runs before semantic validation
//! as a cheap first line of defense; false positives on legitimate payloads
//! containing these characters are an accepted trade-off.

use regex::Regex;
use std::sync::OnceLock;

fn deny_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r#"[;'"]"#,                                      // quotes / semicolons
            r"--|/\*|\*/",                                   // SQL comments
            r"(?i)\b(drop|delete|insert|update|select|union)\b", // SQL keywords
            r"[<>\\]",                                       // markup / escape
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    })
}

/// True when the payload matches any deny-list pattern.
pub fn is_suspicious(payload: &str) -> bool {
    deny_patterns().iter().any(|p| p.is_match(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_payload_passes() {
        assert!(!is_suspicious("PATIENT001|GLUCOSE|95.5|mg/dL"));
        assert!(!is_suspicious("PATIENT123|HEMOGLOBIN|14.2|g/dL"));
    }

    #[test]
    fn test_quotes_and_semicolons() {
        assert!(is_suspicious("PATIENT001'--"));
        assert!(is_suspicious(r#"a"b"#));
        assert!(is_suspicious("a;b"));
    }

    #[test]
    fn test_sql_comments() {
        assert!(is_suspicious("value --comment"));
        assert!(is_suspicious("a/*b*/c"));
    }

    #[test]
    fn test_sql_keywords_case_insensitive() {
        assert!(is_suspicious("DROP TABLE patients"));
        assert!(is_suspicious("drop table patients"));
        assert!(is_suspicious("1 UNION select 2"));
        assert!(is_suspicious("DELETE FROM x"));
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        // "dropped" and "updates" contain keywords but are not tokens.
        assert!(!is_suspicious("dropped"));
        assert!(!is_suspicious("updates"));
        assert!(!is_suspicious("unionized"));
    }

    #[test]
    fn test_angle_brackets_and_backslash() {
        assert!(is_suspicious("<script>"));
        assert!(is_suspicious("a\\b"));
        assert!(is_suspicious("1 > 0"));
    }
}
