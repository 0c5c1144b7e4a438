//! Axum handlers, grouped by resource.

pub mod document_handlers;
pub mod health_handlers;
pub mod tag_handlers;
