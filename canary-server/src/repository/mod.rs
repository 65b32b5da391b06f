//! Repository Module
//!
//! Data access layer for the server. Releases and test jobs share one
//! envelope layout, so a single repository serves both tables.

pub mod object;

// Re-export for convenience
pub use object as object_repository;
