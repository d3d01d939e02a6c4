use crate::error::{Result, StrataError};

/// The single-level match-any token accepted in fetch patterns.
pub const WILDCARD: &str = "*";

/// Validate a concrete field tuple for Track/Ensure: non-empty, no empty
/// strings, no wildcard.
pub fn validate_fields(fields: &[String]) -> Result<()> {
    if fields.is_empty() {
        return Err(StrataError::NoWild);
    }
    for field in fields {
        if field.is_empty() || field == WILDCARD {
            return Err(StrataError::NoWild);
        }
    }
    Ok(())
}

/// Validate a fetch pattern: non-empty, no empty strings. `"*"` is allowed
/// and fans out over every child at that level.
pub fn validate_pattern(pattern: &[String]) -> Result<()> {
    if pattern.is_empty() {
        return Err(StrataError::NoWild);
    }
    for field in pattern {
        if field.is_empty() {
            return Err(StrataError::NoWild);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_validate_fields() {
        assert!(validate_fields(&tuple(&["a", "b", "c"])).is_ok());
        assert!(validate_fields(&[]).is_err());
        assert!(validate_fields(&tuple(&["a", ""])).is_err());
        assert!(validate_fields(&tuple(&["a", "*"])).is_err());
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern(&tuple(&["a", "*"])).is_ok());
        assert!(validate_pattern(&tuple(&["*"])).is_ok());
        assert!(validate_pattern(&[]).is_err());
        assert!(validate_pattern(&tuple(&["a", ""])).is_err());
    }

}
