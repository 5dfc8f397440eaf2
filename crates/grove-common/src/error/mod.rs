//! Error handling for GroveDB.
//!
//! This module provides a unified error type and result alias used across
//! all GroveDB components.

mod engine;

pub use engine::GroveError;

/// Result type alias for GroveDB operations.
pub type GroveResult<T> = std::result::Result<T, GroveError>;
