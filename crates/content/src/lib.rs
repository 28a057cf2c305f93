//! Content domain module: posts and their per-platform publication entries.
//!
//! Holds the time-based publish transition as pure logic; sweeping and
//! persistence live in the infrastructure layer.

pub mod post;

pub use post::{PlatformEntry, Post, PublicationStatus};
