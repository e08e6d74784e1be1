//! In-process coordination backend
//!
//! Keeps the node tree in shared memory so single-node deployments and
//! tests get real session semantics without an external service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::{
    CoordinationConnector, CoordinationError, CoordinationSession, GroupMonitor, MemberDetails,
    MembershipHandle,
};

/// Node tree shared by every session of one `LocalCoordination`
#[derive(Default)]
struct SharedTree {
    /// Persistent nodes by full path
    persistent: DashMap<String, ()>,
    /// Ephemeral process entries by full path, tagged with the owning session
    ephemerals: DashMap<String, Uuid>,
}

/// Coordination backend living entirely in this process.
///
/// Every session opened from the same `LocalCoordination` shares one
/// node tree, so separate sessions stand in for separate processes.
/// Ephemeral entries vanish when their owning session is dropped.
#[derive(Clone, Default)]
pub struct LocalCoordination {
    tree: Arc<SharedTree>,
    sessions_opened: Arc<AtomicU64>,
}

impl LocalCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many sessions have been opened so far
    pub fn session_count(&self) -> u64 {
        self.sessions_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordinationConnector for LocalCoordination {
    async fn connect(
        &self,
        _endpoints: &str,
        _recv_timeout: Duration,
    ) -> Result<Arc<dyn CoordinationSession>, CoordinationError> {
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        let session = LocalSession {
            id: Uuid::new_v4(),
            tree: Arc::clone(&self.tree),
            owned: DashMap::new(),
        };
        debug!("Opened local coordination session {}", session.id);
        Ok(Arc::new(session))
    }
}

/// One open session, owning the ephemeral entries it created
struct LocalSession {
    id: Uuid,
    tree: Arc<SharedTree>,
    owned: DashMap<String, ()>,
}

#[async_trait]
impl CoordinationSession for LocalSession {
    async fn create_path(&self, path: &str) -> Result<(), CoordinationError> {
        if self.tree.persistent.insert(path.to_string(), ()).is_some() {
            return Err(CoordinationError::AlreadyExists(path.to_string()));
        }
        Ok(())
    }

    async fn create_ephemeral(
        &self,
        path: &str,
        process_tag: &str,
    ) -> Result<MembershipHandle, CoordinationError> {
        // Parents come into being with the node, like a makepath create
        for ancestor in ancestors_of(path) {
            self.tree.persistent.insert(ancestor, ());
        }
        self.tree.persistent.insert(path.to_string(), ());

        let entry = format!("{}/{}-{}", path, process_tag, self.id);
        self.tree.ephemerals.insert(entry.clone(), self.id);
        self.owned.insert(entry, ());

        Ok(MembershipHandle {
            path: path.to_string(),
            process_tag: process_tag.to_string(),
        })
    }

    async fn monitor(&self, path: &str) -> Result<Arc<dyn GroupMonitor>, CoordinationError> {
        Ok(Arc::new(LocalMonitor {
            tree: Arc::clone(&self.tree),
            path: path.to_string(),
        }))
    }
}

impl Drop for LocalSession {
    fn drop(&mut self) {
        for entry in self.owned.iter() {
            self.tree.ephemerals.remove(entry.key());
        }
        debug!("Closed local coordination session {}", self.id);
    }
}

/// View over the direct children of one group path
struct LocalMonitor {
    tree: Arc<SharedTree>,
    path: String,
}

impl GroupMonitor for LocalMonitor {
    fn members(&self) -> Option<Vec<String>> {
        // The shared tree is always in sync, so there is no pre-sync window
        let prefix = format!("{}/", self.path);
        let mut names: Vec<String> = self
            .tree
            .persistent
            .iter()
            .filter_map(|entry| {
                let rest = entry.key().strip_prefix(&prefix)?;
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect();
        names.sort();
        Some(names)
    }

    fn member_details(&self, member: &str) -> Option<MemberDetails> {
        let member_path = format!("{}/{}", self.path, member);
        if !self.tree.persistent.contains_key(&member_path) {
            return None;
        }

        let entry_prefix = format!("{}/", member_path);
        let live_children = self
            .tree
            .ephemerals
            .iter()
            .filter(|entry| entry.key().starts_with(&entry_prefix))
            .count();

        Some(MemberDetails { live_children })
    }
}

/// Every proper prefix of a slash-separated path
fn ancestors_of(path: &str) -> Vec<String> {
    path.match_indices('/')
        .filter(|(idx, _)| *idx > 0)
        .map(|(idx, _)| path[..idx].to_string())
        .collect()
}
