//! Defines routes for the versioned document API.
//!
//! ## Structure
//! - **Logical documents** (addressed by base file name)
//!   - `POST   /files`: upload the first version (multipart)
//!   - `POST   /files/{base}/versions`: upload a further version (multipart)
//!   - `GET    /files/{base}/versions`: list versions, newest first
//!   - `DELETE /files/{base}/versions`: delete every version
//!   - `GET    /files/{base}/latest`: download the highest version
//!
//! - **Versions** (addressed by versioned file name, e.g. `invoice_v3.pdf`)
//!   - `GET    /objects/{name}`: download
//!   - `DELETE /objects/{name}`: delete
//!   - `GET|PUT|DELETE /objects/{name}/tags`: read, replace or clear tags
//!
//! - **Tag catalog**
//!   - `GET /tags`, `POST /tags`, `DELETE /tags/{id}` (delete cascades)
//!
//! Upload routes require the `x-user-email` header.

use crate::{
    handlers::{
        document_handlers::{
            create_version, delete_all_versions, delete_version, download, download_latest,
            list_versions, upload_new,
        },
        health_handlers::{healthz, readyz},
        tag_handlers::{
            create_tag, delete_object_tags, delete_tag, get_object_tags, list_tags,
            set_object_tags,
        },
    },
    routes::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build the router. Request bodies are capped at `max_upload_bytes`.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Logical documents
        .route("/files", post(upload_new))
        .route(
            "/files/{base_file_name}/versions",
            post(create_version)
                .get(list_versions)
                .delete(delete_all_versions),
        )
        .route("/files/{base_file_name}/latest", get(download_latest))
        // Versions
        .route("/objects/{file_name}", get(download).delete(delete_version))
        .route(
            "/objects/{file_name}/tags",
            get(get_object_tags)
                .put(set_object_tags)
                .delete(delete_object_tags),
        )
        // Tag catalog
        .route("/tags", get(list_tags).post(create_tag))
        .route("/tags/{id}", delete(delete_tag))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
