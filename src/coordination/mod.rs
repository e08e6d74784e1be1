//! Coordination service seams for ephemeral group membership
//!
//! A member's presence is an ephemeral node under `prefix/group/member`
//! with one child entry per reporting process; the node outlives its
//! processes, the children do not. Backends plug in behind the
//! connector/session/monitor traits.

mod local;

pub use local::LocalCoordination;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from coordination backends
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The node is already there; idempotent creates treat this as fine
    #[error("Node already exists: {0}")]
    AlreadyExists(String),

    /// Session or backend failure
    #[error("Coordination backend error: {0}")]
    Backend(String),
}

/// Handle for one ephemeral membership node.
///
/// The node lives as long as the session that created it.
#[derive(Debug, Clone)]
pub struct MembershipHandle {
    /// Full member node path, `prefix/group/member`
    pub path: String,
    /// Tag identifying the process that created the node
    pub process_tag: String,
}

/// Liveness details for one member node
#[derive(Debug, Clone, Default)]
pub struct MemberDetails {
    /// Number of live process entries under the member node
    pub live_children: usize,
}

/// Factory for coordination sessions
#[async_trait]
pub trait CoordinationConnector: Send + Sync {
    /// Open a session against the configured endpoints
    async fn connect(
        &self,
        endpoints: &str,
        recv_timeout: Duration,
    ) -> Result<Arc<dyn CoordinationSession>, CoordinationError>;
}

/// One open session against the coordination service
#[async_trait]
pub trait CoordinationSession: Send + Sync {
    /// Create a persistent path; fails with `AlreadyExists` if present
    async fn create_path(&self, path: &str) -> Result<(), CoordinationError>;

    /// Create the member node at `path` (parents included) and an
    /// ephemeral process entry under it, tied to this session
    async fn create_ephemeral(
        &self,
        path: &str,
        process_tag: &str,
    ) -> Result<MembershipHandle, CoordinationError>;

    /// Attach a monitor to a group path
    async fn monitor(&self, path: &str) -> Result<Arc<dyn GroupMonitor>, CoordinationError>;
}

/// Cached view of one group's member nodes.
///
/// A freshly attached monitor may not have synced yet; `members`
/// returns `None` until the first sync completes. `Some(empty)` is a
/// real empty group, not an error.
pub trait GroupMonitor: Send + Sync {
    /// Current member names, or None before the first sync
    fn members(&self) -> Option<Vec<String>>;

    /// Details for one member, or None for unknown members
    fn member_details(&self, member: &str) -> Option<MemberDetails>;
}
