//! Core data models for the versioned document store.
//!
//! Gateway-level records (`object`) describe raw stored objects; the
//! document-level records (`document`, `metadata`) describe the versioned view
//! built on top of them. `tag` maps to the relational tag catalog.

pub mod bucket;
pub mod document;
pub mod metadata;
pub mod object;
pub mod tag;
