//! Catalog of predefined tag names, stored in SQLite.
//!
//! Deleting a catalog entry first sweeps the tag off every object.

use crate::{
    models::tag::PredefinedTag,
    services::{
        storage_service::is_unique_violation,
        tag_cascade::{CascadeReport, TagCascadeCoordinator},
    },
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

const MAX_TAG_NAME_LEN: usize = 100;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("tag {0} not found")]
    TagNotFound(i64),
    #[error("invalid tag name `{name}`: {reason}")]
    InvalidTagName { name: String, reason: &'static str },
    #[error("tag `{0}` is not in the catalog")]
    UnknownTag(String),
    #[error("tag `{0}` already exists")]
    TagAlreadyExists(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Clone)]
pub struct TagCatalog {
    pub db: Arc<SqlitePool>,
}

impl TagCatalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn create(&self, name: &str) -> CatalogResult<PredefinedTag> {
        let name = validate_tag_name(name)?;
        let created_at = Utc::now();
        let inserted = sqlx::query("INSERT INTO predefined_tags (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(created_at)
            .execute(&*self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    CatalogError::TagAlreadyExists(name.to_string())
                } else {
                    err.into()
                }
            })?;

        info!("added tag `{}` to the catalog", name);
        Ok(PredefinedTag {
            id: inserted.last_insert_rowid(),
            name: name.to_string(),
            created_at,
        })
    }

    /// All entries, alphabetically (case-insensitive).
    pub async fn list(&self) -> CatalogResult<Vec<PredefinedTag>> {
        Ok(sqlx::query_as::<_, PredefinedTag>(
            "SELECT id, name, created_at FROM predefined_tags ORDER BY name COLLATE NOCASE, id",
        )
        .fetch_all(&*self.db)
        .await?)
    }

    pub async fn get(&self, id: i64) -> CatalogResult<PredefinedTag> {
        sqlx::query_as::<_, PredefinedTag>(
            "SELECT id, name, created_at FROM predefined_tags WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(CatalogError::TagNotFound(id))
    }

    /// Remove the tag from every object, then drop the catalog entry.
    ///
    /// The entry is dropped even when some objects could not be updated; the
    /// returned report names them.
    pub async fn delete(
        &self,
        id: i64,
        cascade: &TagCascadeCoordinator,
    ) -> CatalogResult<(PredefinedTag, CascadeReport)> {
        let tag = self.get(id).await?;
        let report = cascade.remove_tag_everywhere(&tag.name).await;

        sqlx::query("DELETE FROM predefined_tags WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        info!("removed tag `{}` from the catalog", tag.name);
        Ok((tag, report))
    }

    /// Fail with [`CatalogError::UnknownTag`] on the first name not in the
    /// catalog. Blank names are ignored.
    pub async fn ensure_known(&self, names: &[String]) -> CatalogResult<()> {
        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            let known: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM predefined_tags WHERE name = ?")
                    .bind(name)
                    .fetch_one(&*self.db)
                    .await?;
            if known == 0 {
                return Err(CatalogError::UnknownTag(name.to_string()));
            }
        }
        Ok(())
    }
}

/// Trim `name` and check it is usable as an object tag value.
pub fn validate_tag_name(name: &str) -> CatalogResult<&str> {
    let trimmed = name.trim();
    let invalid = |reason| CatalogError::InvalidTagName {
        name: name.to_string(),
        reason,
    };
    if trimmed.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if trimmed.chars().count() > MAX_TAG_NAME_LEN {
        return Err(invalid("must be at most 100 characters"));
    }
    // ASCII only: uniqueness and the cascade both fold case with ASCII rules.
    let allowed = |c: char| c.is_ascii_alphanumeric() || c == ' ' || "+-=._:/@".contains(c);
    if !trimmed.chars().all(allowed) {
        return Err(invalid(
            "may only contain ASCII letters, digits, spaces and + - = . _ : / @",
        ));
    }
    Ok(trimmed)
}
