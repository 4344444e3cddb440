//! Cache key validation.
//!
//! A key becomes the stem of a file directly under the cache root, so it has
//! to be exactly one ordinary path component.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path};

/// Prefix reserved for in-flight staging directories.
pub(crate) const STAGING_PREFIX: &str = ".staging-";

/// Validates a cache key.
///
/// Rejects empty keys, separators, `.`/`..`, NUL bytes and leading dots
/// (reserved for staging directories).
///
/// ```
/// use terracache_storage::validate_key;
/// assert!(validate_key("NDVI_2023-01-01_2023-12-31").is_ok());
/// assert!(validate_key("LST-0a1b2c3d4e5f6a7b").is_ok());
/// assert!(validate_key("../etc/passwd").is_err());
/// assert!(validate_key("a/b").is_err());
/// assert!(validate_key(".staging-x").is_err());
/// ```
pub fn validate(key: &str) -> Result<&str> {
    if key.is_empty() || key.starts_with('.') || key.contains(['\0', '/', '\\']) {
        exn::bail!(ErrorKind::InvalidKey(key.to_string()));
    }
    let mut components = Path::new(key).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(key),
        _ => exn::bail!(ErrorKind::InvalidKey(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("NDVI_2023")]
    #[case("NDVI_2023-01-01_2023-12-31")]
    #[case("LST-0a1b2c3d4e5f6a7b")]
    #[case("with.dots.inside")]
    fn test_valid_keys(#[case] key: &str) {
        assert_eq!(validate(key).unwrap(), key);
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("..")]
    #[case("../escape")]
    #[case("a/b")]
    #[case("a\\b")]
    #[case("/absolute")]
    #[case("a\0b")]
    #[case(".hidden")]
    #[case(".staging-abc")]
    fn test_invalid_keys(#[case] key: &str) {
        let err = validate(key).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidKey(_)));
    }
}
