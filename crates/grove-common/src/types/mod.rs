//! Core types for GroveDB.

mod ids;
mod record;

pub use ids::{PhysicalPageId, SegmentId};
pub use record::{Key, OpKind, Record};
