//! Storage and versioning services.
//!
//! Layering, bottom up: `gateway` (trait) with its `storage_service` and
//! `memory_gateway` implementations; the pure codecs `key_codec`,
//! `metadata_codec` and `bucket_router`; then `version_resolver`,
//! `versioned_store`, `tag_cascade` and `tag_catalog`.

pub mod bucket_router;
pub mod gateway;
pub mod key_codec;
pub mod memory_gateway;
pub mod metadata_codec;
pub mod storage_service;
pub mod tag_cascade;
pub mod tag_catalog;
pub mod version_resolver;
pub mod versioned_store;
