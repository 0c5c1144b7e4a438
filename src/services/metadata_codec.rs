//! StructuredMetadata <-> flat object header map.
//!
//! Keys are fixed, lower-case and hyphenated. Timestamps are RFC 3339 in UTC
//! with sub-second precision preserved. Decoding never fails: unknown headers
//! are ignored and unparseable timestamps are dropped.

use crate::models::{metadata::StructuredMetadata, object::HeaderMap};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

pub const DATE_CREATED: &str = "date-created";
pub const CREATED_BY: &str = "created-by";
pub const LIFECYCLE_CATEGORY: &str = "lifecycle-category";
pub const DATE_REVIEWED: &str = "date-reviewed";
pub const REVIEWED_BY: &str = "reviewed-by";
pub const TESTED_BY: &str = "tested-by";
pub const DATE_TESTED: &str = "date-tested";
pub const DATE_UPDATED: &str = "date-updated";
pub const UPDATED_BY: &str = "updated-by";

/// Prefix S3-compatible stores put in front of user metadata on the way back.
const USER_METADATA_PREFIX: &str = "x-amz-meta-";

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

pub fn encode(metadata: &StructuredMetadata) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut text = |key: &str, value: &Option<String>| {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            headers.insert(key.to_string(), value.to_string());
        }
    };
    text(CREATED_BY, &metadata.created_by);
    text(UPDATED_BY, &metadata.updated_by);
    text(LIFECYCLE_CATEGORY, &metadata.lifecycle_category);
    text(REVIEWED_BY, &metadata.reviewed_by);
    text(TESTED_BY, &metadata.tested_by);

    for (key, value) in [
        (DATE_CREATED, &metadata.date_created),
        (DATE_UPDATED, &metadata.date_updated),
        (DATE_REVIEWED, &metadata.date_reviewed),
        (DATE_TESTED, &metadata.date_tested),
    ] {
        if let Some(value) = value {
            headers.insert(key.to_string(), format_timestamp(value));
        }
    }
    headers
}

pub fn decode(headers: &HeaderMap) -> StructuredMetadata {
    let mut metadata = StructuredMetadata::default();
    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        let name = name.strip_prefix(USER_METADATA_PREFIX).unwrap_or(&name);
        let text = || Some(value.clone()).filter(|v| !v.is_empty());
        let timestamp = || {
            let parsed = parse_timestamp(value);
            if parsed.is_none() {
                debug!("dropping unparseable `{}` header value {:?}", name, value);
            }
            parsed
        };
        match name {
            DATE_CREATED => metadata.date_created = timestamp(),
            CREATED_BY => metadata.created_by = text(),
            DATE_UPDATED => metadata.date_updated = timestamp(),
            UPDATED_BY => metadata.updated_by = text(),
            LIFECYCLE_CATEGORY => metadata.lifecycle_category = text(),
            REVIEWED_BY => metadata.reviewed_by = text(),
            DATE_REVIEWED => metadata.date_reviewed = timestamp(),
            TESTED_BY => metadata.tested_by = text(),
            DATE_TESTED => metadata.date_tested = timestamp(),
            _ => {}
        }
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> StructuredMetadata {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        StructuredMetadata {
            date_created: Some(created),
            created_by: Some("ada@example.com".into()),
            lifecycle_category: Some("working".into()),
            reviewed_by: Some("grace@example.com".into()),
            date_reviewed: Some(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()),
            ..StructuredMetadata::default()
        }
    }

    #[test]
    fn encodes_only_set_fields_with_fixed_keys() {
        let headers = encode(&sample());
        let keys: Vec<&str> = headers.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![CREATED_BY, DATE_CREATED, DATE_REVIEWED, LIFECYCLE_CATEGORY, REVIEWED_BY]
        );
        assert_eq!(headers[DATE_CREATED], "2024-03-01T09:30:00.123456789Z");
        assert_eq!(headers[DATE_REVIEWED], "2024-03-02T00:00:00Z");
    }

    #[test]
    fn decode_restores_encoded_metadata() {
        let metadata = sample();
        assert_eq!(decode(&encode(&metadata)), metadata);
    }

    #[test]
    fn decode_is_lenient() {
        let headers = HeaderMap::from([
            ("X-Amz-Meta-Created-By".to_string(), "ada@example.com".to_string()),
            ("date-created".to_string(), "yesterday".to_string()),
            ("date-tested".to_string(), "2024-05-01T10:00:00+02:00".to_string()),
            ("content-language".to_string(), "en".to_string()),
        ]);
        let metadata = decode(&headers);
        assert_eq!(metadata.created_by.as_deref(), Some("ada@example.com"));
        assert_eq!(metadata.date_created, None);
        assert_eq!(
            metadata.date_tested,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap())
        );
        assert_eq!(metadata.tested_by, None);
    }
}
