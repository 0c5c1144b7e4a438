//! Versioned key naming: `{stem}_v{version}{.ext}`.
//!
//! The format is persisted and must stay bit-exact: versions are 1-based
//! decimal integers without leading zeros, and the stem/extension split is at
//! the last dot. A base name that already ends in `_v{digits}` before its
//! extension is ambiguous; decoding always takes the last marker.

use crate::errors::{VersioningError, VersioningResult};

const VERSION_MARKER: &str = "_v";
/// Longest object key a gateway accepts.
pub const MAX_KEY_LEN: usize = 1024;
/// Leaves room for `_v` plus the digits of any `u64` version.
pub const MAX_BASE_NAME_LEN: usize = MAX_KEY_LEN - VERSION_MARKER.len() - 20;

/// Split a file name at its last dot. No dot means an empty extension.
pub fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(idx) => file_name.split_at(idx),
        None => (file_name, ""),
    }
}

/// Versioned key for `base_file_name` at `version`.
pub fn encode(base_file_name: &str, version: u64) -> String {
    let (stem, extension) = split_extension(base_file_name);
    format!("{stem}{VERSION_MARKER}{version}{extension}")
}

/// Parse a versioned key back into `(base_file_name, version)`.
pub fn decode(versioned_key: &str) -> VersioningResult<(String, u64)> {
    let malformed = || VersioningError::MalformedKey(versioned_key.to_string());

    let (stem, extension) = split_extension(versioned_key);
    let marker = stem.rfind(VERSION_MARKER).ok_or_else(malformed)?;
    let digits = &stem[marker + VERSION_MARKER.len()..];
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(malformed());
    }
    let version = digits.parse::<u64>().map_err(|_| malformed())?;

    let base_file_name = format!("{}{extension}", &stem[..marker]);
    if base_file_name.is_empty() {
        return Err(malformed());
    }
    Ok((base_file_name, version))
}

/// Listing prefix shared by every versioned key of `base_file_name`.
///
/// Matches a superset: callers must still decode and compare base names.
pub fn version_prefix(base_file_name: &str) -> String {
    let (stem, _) = split_extension(base_file_name);
    format!("{stem}{VERSION_MARKER}")
}

/// Reject base names that cannot be stored as a flat key.
pub fn validate_base_name(base_file_name: &str) -> VersioningResult<()> {
    let invalid = |reason: &'static str| VersioningError::InvalidFileName {
        name: base_file_name.to_string(),
        reason,
    };

    if base_file_name.trim().is_empty() {
        return Err(invalid("must not be empty"));
    }
    if base_file_name.len() > MAX_BASE_NAME_LEN {
        return Err(invalid("must be at most 1002 bytes"));
    }
    if matches!(base_file_name, "." | "..") {
        return Err(invalid("must not be `.` or `..`"));
    }
    if base_file_name
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(invalid("must not contain path separators or control characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_before_extension() {
        assert_eq!(encode("invoice.pdf", 1), "invoice_v1.pdf");
        assert_eq!(encode("archive.tar.gz", 3), "archive.tar_v3.gz");
        assert_eq!(encode("README", 12), "README_v12");
    }

    #[test]
    fn decodes_versioned_keys() {
        assert_eq!(decode("invoice_v2.pdf").unwrap(), ("invoice.pdf".to_string(), 2));
        assert_eq!(decode("README_v12").unwrap(), ("README".to_string(), 12));
        assert_eq!(
            decode("archive.tar_v3.gz").unwrap(),
            ("archive.tar.gz".to_string(), 3)
        );
    }

    #[test]
    fn rejects_unversioned_and_noncanonical_keys() {
        for key in [
            "invoice.pdf",
            "invoice_v.pdf",
            "invoice_vx.pdf",
            "invoice_v01.pdf",
            "invoice_v0.pdf",
            "invoice_v1a.pdf",
            "_v1",
            "invoice_v99999999999999999999999.pdf",
        ] {
            assert!(
                matches!(decode(key), Err(VersioningError::MalformedKey(_))),
                "{key} should be malformed"
            );
        }
    }

    #[test]
    fn round_trips_names_and_versions() {
        let names = ["invoice.pdf", "README", "a.b", ".bashrc", "notes_v2.txt", "x_v"];
        for name in names {
            for version in [1, 2, 9, 10, 123, u64::from(u32::MAX) + 7] {
                let key = encode(name, version);
                assert_eq!(decode(&key).unwrap(), (name.to_string(), version), "{key}");
            }
        }
    }

    #[test]
    fn base_names_that_look_versioned_are_ambiguous() {
        // As a base name, `notes_v2.txt` round-trips through its own key...
        assert_eq!(encode("notes_v2.txt", 1), "notes_v2_v1.txt");
        assert_eq!(
            decode("notes_v2_v1.txt").unwrap(),
            ("notes_v2.txt".to_string(), 1)
        );
        // ...but the bare name reads as version 2 of `notes.txt`.
        assert_eq!(decode("notes_v2.txt").unwrap(), ("notes.txt".to_string(), 2));
    }

    #[test]
    fn version_prefix_covers_all_versions() {
        let prefix = version_prefix("invoice.pdf");
        assert_eq!(prefix, "invoice_v");
        assert!(encode("invoice.pdf", 42).starts_with(&prefix));
    }

    #[test]
    fn validates_base_names() {
        assert!(validate_base_name("invoice.pdf").is_ok());
        assert!(validate_base_name(".bashrc").is_ok());
        assert!(validate_base_name("draft..final.pdf").is_ok());
        assert!(validate_base_name("a..pdf").is_ok());
        for bad in ["", "  ", ".", "..", "a/b.pdf", "a\\b.pdf", "a\nb.pdf"] {
            assert!(validate_base_name(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn longest_base_name_still_fits_a_key() {
        let longest = format!("{}.pdf", "x".repeat(MAX_BASE_NAME_LEN - 4));
        assert!(validate_base_name(&longest).is_ok());
        assert!(encode(&longest, u64::MAX).len() <= MAX_KEY_LEN);
        assert!(validate_base_name(&format!("x{longest}")).is_err());
    }
}
