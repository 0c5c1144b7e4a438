//! Structured lifecycle metadata carried by every document version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle metadata of one document version.
///
/// `date_created`/`created_by` and `date_updated`/`updated_by` are stamped by
/// the store from the clock and the authenticated author; the review and test
/// fields come from the caller.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StructuredMetadata {
    pub date_created: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub date_updated: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
    pub lifecycle_category: Option<String>,
    pub reviewed_by: Option<String>,
    pub date_reviewed: Option<DateTime<Utc>>,
    pub tested_by: Option<String>,
    pub date_tested: Option<DateTime<Utc>>,
}

/// Caller-supplied subset of [`StructuredMetadata`].
#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataFields {
    pub lifecycle_category: Option<String>,
    pub reviewed_by: Option<String>,
    pub date_reviewed: Option<DateTime<Utc>>,
    pub tested_by: Option<String>,
    pub date_tested: Option<DateTime<Utc>>,
}

impl MetadataFields {
    /// Category override, ignoring blank values.
    pub fn category(&self) -> Option<&str> {
        self.lifecycle_category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Seed a metadata record with the caller-supplied fields.
    pub fn into_metadata(self) -> StructuredMetadata {
        StructuredMetadata {
            lifecycle_category: self.lifecycle_category,
            reviewed_by: self.reviewed_by,
            date_reviewed: self.date_reviewed,
            tested_by: self.tested_by,
            date_tested: self.date_tested,
            ..StructuredMetadata::default()
        }
    }
}
