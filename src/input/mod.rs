//! Physical input channels: kinds, deadzones, and the live value cache.

pub mod cache;
pub mod source;

pub use cache::SourceCache;
pub use source::{Source, SourceEvent, SourceId, SourceKind, CHANGE_EPSILON};
