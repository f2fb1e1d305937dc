//! Core domain types and shared logic for the Portrait photo assignment engine.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Identity and resource keys (normalization and validation)
//! - Storage filename derivation (sanitized and keyed fragments)
//! - Configuration for storage, metadata and the assignment engine

pub mod config;
pub mod error;
pub mod filename;
pub mod keys;

pub use error::{Error, Result};
pub use filename::{keyed_fragment, sanitize_fragment};
pub use keys::{IdentityKey, ResourceKey};
