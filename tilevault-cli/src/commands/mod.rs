//! CLI command implementations.
//!
//! - [`count`] - Tiles covered by a region
//! - [`download`] - Bulk cache a region
//! - [`fetch`] - Read a single tile cache-first
//! - [`cache`] - Cache management (clear, stats)

pub mod cache;
pub mod common;
pub mod count;
pub mod download;
pub mod fetch;
