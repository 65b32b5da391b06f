//! Service layer
//!
//! External collaborators of the reconcilers, each behind a trait with
//! one CLI-backed implementation:
//! - Helm: chart install, upgrade and uninstall
//! - Cleanup: namespace and image removal after a run
//! - Garbage collection: removal of workers whose job is gone

pub mod cleanup;
pub mod gc;
pub mod helm;

// Re-export traits
pub use cleanup::CleanupRunner;
pub use helm::ReleaseInstaller;

// Re-export implementations
pub use cleanup::KubectlCleanup;
pub use gc::OrphanSweeper;
pub use helm::HelmCli;
