//! Data models for uploads, stored objects, shares and sweeps.
//!
//! Everything here serializes naturally as JSON via `serde`; the manifest and
//! share records are persisted exactly as serialized.

pub mod object;
pub mod share;
pub mod sweep;
pub mod upload;
