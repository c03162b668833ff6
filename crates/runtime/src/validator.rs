//! Lexical pre-check run before a snippet is parsed. A hit fails the
//! execution with `CapabilityError` before the session is touched.

use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

/// Calls and modules a snippet may not mention.
const FORBIDDEN: [&str; 10] = [
    r"\bos\s*\.\s*system\b",
    r"\bsubprocess\b",
    r"\beval\s*\(",
    r"\bexec\s*\(",
    r"\b__import__\b",
    r"\bopen\s*\(",
    r"\bfile\s*\(",
    r"\binput\s*\(",
    r"\bcompile\s*\(",
    r"\.\s*__[a-z]+__\b",
];

static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    FORBIDDEN
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::error!(pattern, error = %e, "skipping invalid forbidden pattern");
                None
            }
        })
        .collect()
});

/// Reject code over `max_bytes` or containing a forbidden call.
pub fn validate(code: &str, max_bytes: usize) -> Result<()> {
    if code.len() > max_bytes {
        return Err(Error::CodeTooLong {
            size: code.len(),
            limit: max_bytes,
        });
    }
    if let Some(found) = PATTERNS.iter().find_map(|re| re.find(code)) {
        return Err(Error::Forbidden(found.as_str().to_string()));
    }
    Ok(())
}
