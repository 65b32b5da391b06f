//! Reconcile scheduling
//!
//! The queue decides which objects are due; the poller lists objects,
//! feeds the queue and runs the reconcilers.

pub mod poller;
pub mod queue;

pub use poller::ReconcilePoller;
