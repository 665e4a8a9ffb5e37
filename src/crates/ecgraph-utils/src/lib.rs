//! Shared helpers for the ecgraph workspace.
//!
//! This crate carries the small, dependency-light pieces the engine leans on
//! everywhere: shape/emptiness predicates over [`serde_json::Value`] payloads
//! and unique-id / timestamp generation.

pub mod ids;
pub mod validators;

pub use ids::{current_timestamp_ms, generate_unique_id, generate_unique_id_with_max_length};
pub use validators::{is_empty_value, is_mapping, is_non_empty_string, is_sequence, is_url};
