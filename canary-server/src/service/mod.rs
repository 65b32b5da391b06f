//! Service Module
//!
//! Business logic layer for the server: generic object lifecycle plus the
//! per-kind validation rules.

pub mod object;
pub mod release;
pub mod test_job;

// Re-export for convenience
pub use object as object_service;
