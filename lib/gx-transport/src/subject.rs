//! Hierarchical subject names and wildcard matching
//!
//! Subjects are dot-separated tokens. Subscription patterns may use `*` to
//! match exactly one token and a trailing `>` to match one or more tokens.

use crate::{Result, TransportError};

/// Check that a subject used for publishing is well formed (no wildcards,
/// no empty tokens)
pub fn validate_subject(subject: &str) -> Result<()> {
    if subject.is_empty()
        || subject
            .split('.')
            .any(|token| token.is_empty() || token == "*" || token == ">" || token.contains(char::is_whitespace))
    {
        return Err(TransportError::InvalidSubject(subject.to_string()));
    }
    Ok(())
}

/// Check that a subscription pattern is well formed
pub fn validate_pattern(pattern: &str) -> Result<()> {
    let tokens: Vec<&str> = pattern.split('.').collect();
    let last = tokens.len() - 1;
    for (i, token) in tokens.iter().enumerate() {
        let bad = token.is_empty()
            || token.contains(char::is_whitespace)
            || (*token == ">" && i != last);
        if bad {
            return Err(TransportError::InvalidSubject(pattern.to_string()));
        }
    }
    Ok(())
}

/// Whether `subject` is matched by the subscription `pattern`
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
