//! Service handles passed to drivers at join time

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::record::ServiceRecord;
use crate::timer::TimerGroup;

/// Observable backend connectivity of a reporting service.
///
/// Drivers flip this when heartbeat writes stop or resume reaching the
/// backend; the owning service reads it instead of having a field of
/// its own mutated from the outside. The mark methods return whether
/// the call changed the state, so transitions are logged exactly once.
#[derive(Clone, Default)]
pub struct Connectivity {
    disconnected: Arc<AtomicBool>,
}

impl Connectivity {
    /// Create a handle in the connected state
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the last report failed to reach the backend
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Mark the backend unreachable; true if this was the transition
    pub fn mark_disconnected(&self) -> bool {
        !self.disconnected.swap(true, Ordering::SeqCst)
    }

    /// Mark the backend reachable again; true if this was the transition
    pub fn mark_connected(&self) -> bool {
        self.disconnected.swap(false, Ordering::SeqCst)
    }
}

/// The service object a member hands to `join`.
///
/// Carries the reporting interval, the timer facility the driver
/// schedules on, the shared service record, and the connectivity
/// handle. Clones share all of it.
#[derive(Clone)]
pub struct ServiceHandle {
    report_interval: Duration,
    timer: TimerGroup,
    record: Arc<RwLock<ServiceRecord>>,
    connectivity: Connectivity,
}

impl ServiceHandle {
    /// Create a handle that reports every `report_interval`
    pub fn new(record: ServiceRecord, report_interval: Duration) -> Self {
        Self {
            report_interval,
            timer: TimerGroup::new(),
            record: Arc::new(RwLock::new(record)),
            connectivity: Connectivity::new(),
        }
    }

    /// How often this service reports liveness
    pub fn report_interval(&self) -> Duration {
        self.report_interval
    }

    /// The timer facility drivers schedule reporting on
    pub fn timer(&self) -> &TimerGroup {
        &self.timer
    }

    /// Shared access to the service record
    pub fn record(&self) -> Arc<RwLock<ServiceRecord>> {
        Arc::clone(&self.record)
    }

    /// Snapshot of the current record
    pub async fn record_snapshot(&self) -> ServiceRecord {
        self.record.read().await.clone()
    }

    /// The connectivity handle drivers mark and owners watch
    pub fn connectivity(&self) -> Connectivity {
        self.connectivity.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_transitions_report_once() {
        let connectivity = Connectivity::new();
        assert!(!connectivity.is_disconnected());

        // First disconnect is the transition, repeats are not
        assert!(connectivity.mark_disconnected());
        assert!(!connectivity.mark_disconnected());
        assert!(connectivity.is_disconnected());

        // Same for recovery
        assert!(connectivity.mark_connected());
        assert!(!connectivity.mark_connected());
        assert!(!connectivity.is_disconnected());
    }

    #[test]
    fn test_connectivity_clones_share_state() {
        let connectivity = Connectivity::new();
        let observer = connectivity.clone();

        connectivity.mark_disconnected();
        assert!(observer.is_disconnected());
    }

    #[tokio::test]
    async fn test_handle_clones_share_the_record() {
        let handle = ServiceHandle::new(
            ServiceRecord::new("compute", "node-1"),
            Duration::from_secs(10),
        );
        let clone = handle.clone();

        {
            let record = handle.record();
            let mut record = record.write().await;
            record.report_count = 3;
        }

        let snapshot = clone.record_snapshot().await;
        assert_eq!(snapshot.report_count, 3);
        assert_eq!(snapshot.liveness_key(), "compute:node-1");
    }
}
