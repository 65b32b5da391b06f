//! Core domain types
//!
//! Stored objects (releases and test jobs) and the workers the controller
//! materializes for them. Shared between the server (persistence), the
//! controller (reconciliation) and the client crates.

pub mod meta;
pub mod release;
pub mod test_job;
pub mod worker;
