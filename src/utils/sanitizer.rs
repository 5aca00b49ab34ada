//! Name validation for Azure Blob Storage compatibility
//!
//! Container and blob names are checked locally so that malformed names fail
//! fast as invalid arguments instead of as opaque service errors.

use crate::error::{Result, StowageError};
use regex::Regex;

const MIN_CONTAINER_NAME_LENGTH: usize = 3;
const MAX_CONTAINER_NAME_LENGTH: usize = 63;
const MAX_BLOB_NAME_LENGTH: usize = 1024;

/// Check if a name is a valid blob container name
pub fn is_valid_container_name(name: &str) -> bool {
    if name.len() < MIN_CONTAINER_NAME_LENGTH || name.len() > MAX_CONTAINER_NAME_LENGTH {
        return false;
    }

    if name.contains("--") {
        return false;
    }

    Regex::new(r"^[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$")
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// Check if a name is a valid blob name
///
/// `.` and `..` path segments are refused: URLs normalize them away, which
/// would address a different blob.
pub fn is_valid_blob_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name.chars().count() <= MAX_BLOB_NAME_LENGTH
        && !name.split('/').any(|segment| segment == "." || segment == "..")
}

pub fn validate_container_name(name: &str) -> Result<()> {
    if is_valid_container_name(name) {
        return Ok(());
    }

    Err(StowageError::invalid_argument(format!(
        "Invalid container name '{name}': container names must be 3-63 characters of lowercase letters, digits and single hyphens, starting and ending with a letter or digit"
    )))
}

pub fn validate_blob_name(name: &str) -> Result<()> {
    if is_valid_blob_name(name) {
        return Ok(());
    }

    Err(StowageError::invalid_argument(format!(
        "Invalid blob name '{name}': blob names must be 1-{MAX_BLOB_NAME_LENGTH} characters without '.' or '..' path segments"
    )))
}

/// Validate both halves of a blob address
pub fn validate_blob_address(container_name: &str, blob_name: &str) -> Result<()> {
    validate_container_name(container_name)?;
    validate_blob_name(blob_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_container_names() {
        let longest = "a".repeat(63);
        let valid_names = vec!["demo", "abc", "my-container-1", "a1b", longest.as_str()];

        for name in valid_names {
            assert!(is_valid_container_name(name), "Name '{}' should be valid", name);
        }
    }

    #[test]
    fn test_invalid_container_names() {
        let long_name = "a".repeat(64);
        let invalid_names = vec![
            "",             // Empty
            "ab",           // Too short
            "Demo",         // Uppercase
            "my_container", // Underscore
            "-demo",        // Starts with hyphen
            "demo-",        // Ends with hyphen
            "de--mo",       // Double hyphen
            "de mo",        // Space
            &long_name,     // Too long
        ];

        for name in invalid_names {
            assert!(
                !is_valid_container_name(name),
                "Name '{}' should be invalid",
                name
            );
        }
    }

    #[test]
    fn test_blob_names() {
        assert!(is_valid_blob_name("report.pdf"));
        assert!(is_valid_blob_name("nested/path/report.pdf"));
        assert!(!is_valid_blob_name(""));
        assert!(!is_valid_blob_name("   "));
        assert!(!is_valid_blob_name(&"x".repeat(1025)));
        assert!(is_valid_blob_name("report#1.pdf"));
        assert!(is_valid_blob_name("a..b/v1.2.txt"));
        assert!(!is_valid_blob_name("a/../b.txt"));
        assert!(!is_valid_blob_name("./b.txt"));
        assert!(!is_valid_blob_name(".."));
    }

    #[test]
    fn test_validate_blob_address() {
        assert!(validate_blob_address("demo", "report.pdf").is_ok());

        let err = validate_blob_address("Demo", "report.pdf").unwrap_err();
        assert!(matches!(err, StowageError::InvalidArgument(_)));

        let err = validate_blob_address("demo", "").unwrap_err();
        assert!(matches!(err, StowageError::InvalidArgument(_)));
    }
}
