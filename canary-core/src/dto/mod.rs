//! Data Transfer Objects for inter-service communication
//!
//! Request bodies and list summaries exchanged between the server, the
//! controller and the CLI.

use serde::{Deserialize, Serialize};

pub mod release;
pub mod test_job;

/// Compare-and-swap status write
///
/// The server applies `status` only if the stored object is still at
/// `resource_version`; otherwise it answers 409 Conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate<S> {
    pub resource_version: i64,
    pub status: S,
}
