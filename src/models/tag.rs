//! Predefined tags: catalog entries whose names are copied onto objects.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Catalog entry for a tag name. Names are unique case-insensitively.
#[derive(Serialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PredefinedTag {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}
