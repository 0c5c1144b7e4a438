//! HTTP routing and the state shared by every handler.

pub mod routes;

use crate::{
    models::bucket::BucketNames,
    services::{
        gateway::ObjectStoreGateway, tag_cascade::TagCascadeCoordinator, tag_catalog::TagCatalog,
        versioned_store::VersionedStore,
    },
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: VersionedStore,
    pub catalog: TagCatalog,
    pub cascade: TagCascadeCoordinator,
}

impl AppState {
    pub fn new(
        gateway: Arc<dyn ObjectStoreGateway>,
        db: Arc<SqlitePool>,
        buckets: BucketNames,
        max_version_attempts: u32,
    ) -> Self {
        Self {
            store: VersionedStore::new(gateway.clone(), buckets.clone(), max_version_attempts),
            catalog: TagCatalog::new(db),
            cascade: TagCascadeCoordinator::new(gateway, buckets),
        }
    }
}
