//! Input validation primitives.
//!
//! Failures surface as `validation.invalid_argument`.

use crate::error::{Error, Result};

/// Require a string to be non-empty after trimming.
///
/// Returns a reference to the trimmed string on success.
pub fn require_non_empty<'a>(value: &'a str, field: &str, message: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::validation_invalid_argument(field, message, None, None))
    } else {
        Ok(trimmed)
    }
}

/// Split a `KEY=VALUE` pair. The key must be non-empty; the value may be empty.
pub fn parse_key_value(pair: &str, field: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(Error::validation_invalid_argument(
            field,
            format!("Expected KEY=VALUE, got '{}'", pair),
            None,
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_non_empty_trims_whitespace() {
        let result = require_non_empty("  hello  ", "field", "msg");
        assert_eq!(result.unwrap(), "hello");
    }

    #[test]
    fn require_non_empty_fails_for_whitespace_only() {
        let result = require_non_empty("   ", "field", "Cannot be empty");
        assert!(result.is_err());
    }

    #[test]
    fn parse_key_value_splits_on_first_equals() {
        let (key, value) = parse_key_value("Flags=a=b", "define").unwrap();
        assert_eq!(key, "Flags");
        assert_eq!(value, "a=b");
    }

    #[test]
    fn parse_key_value_rejects_missing_key() {
        let err = parse_key_value("=1.0", "define").unwrap_err();
        assert_eq!(err.details["field"], "define");
        assert!(parse_key_value("Version", "define").is_err());
    }
}
