//! # grove-common
//!
//! Common types, errors, and configuration for GroveDB.
//!
//! This crate provides the foundational pieces shared by the storage and
//! engine crates:
//!
//! - **Types**: core identifiers (`PhysicalPageId`, `SegmentId`), the
//!   fixed-width `Key`, and the `Record`/`OpKind` write representation
//! - **Errors**: unified error handling with `GroveError`
//! - **Config**: engine configuration (`GroveOptions`)
//! - **Constants**: system-wide constants and limits

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::GroveOptions;
pub use error::{GroveError, GroveResult};
pub use types::{Key, OpKind, PhysicalPageId, Record, SegmentId};
