//! Coordination-backed service group driver
//!
//! Membership is an ephemeral node per member: the node stays while a
//! session holds it and vanishes with the process, so liveness needs
//! no timestamps at all.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, warn};

use crate::config::RosterConfig;
use crate::coordination::{
    CoordinationConnector, CoordinationError, CoordinationSession, GroupMonitor, MembershipHandle,
};
use crate::record::ServiceRecord;
use crate::service::ServiceHandle;
use crate::types::{Result, RosterError};

use super::Driver;

/// Poll budget while a fresh monitor syncs its first membership data
const MONITOR_WARMUP_ATTEMPTS: u32 = 50;

/// Pause between warmup polls
const MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Monitor plus the dedicated session that keeps it alive
struct GroupWatch {
    monitor: Arc<dyn GroupMonitor>,
    _session: Arc<dyn CoordinationSession>,
}

/// Driver that tracks membership through ephemeral nodes
pub struct CoordinationDriver {
    endpoints: String,
    recv_timeout: Duration,
    prefix: String,
    retry_interval: Duration,
    connector: Arc<dyn CoordinationConnector>,
    session: OnceCell<Arc<dyn CoordinationSession>>,
    memberships: Mutex<HashMap<(String, String), MembershipHandle>>,
    monitors: RwLock<HashMap<String, GroupWatch>>,
}

impl CoordinationDriver {
    /// Build the driver over a coordination connector
    pub fn new(config: &RosterConfig, connector: Arc<dyn CoordinationConnector>) -> Self {
        Self {
            endpoints: config.coordination.endpoints.clone(),
            recv_timeout: config.coordination.recv_timeout,
            prefix: config.coordination.prefix.clone(),
            retry_interval: config.coordination.retry_interval,
            connector,
            session: OnceCell::new(),
            memberships: Mutex::new(HashMap::new()),
            monitors: RwLock::new(HashMap::new()),
        }
    }

    /// The shared join session, opened on first use.
    ///
    /// Worker processes race to create the membership prefix, so an
    /// existing prefix is fine.
    async fn session(&self) -> Result<&Arc<dyn CoordinationSession>> {
        self.session
            .get_or_try_init(|| async {
                let session = self
                    .connector
                    .connect(&self.endpoints, self.recv_timeout)
                    .await
                    .map_err(|err| {
                        RosterError::Coordination(format!(
                            "unable to open a coordination session: {}",
                            err
                        ))
                    })?;
                match session.create_path(&self.prefix).await {
                    Ok(()) | Err(CoordinationError::AlreadyExists(_)) => {}
                    Err(err) => {
                        return Err(RosterError::Coordination(format!(
                            "unable to create the membership prefix {}: {}",
                            self.prefix, err
                        )));
                    }
                }
                Ok(session)
            })
            .await
    }

    /// Monitor for a group, created once and reused
    async fn monitor_for(&self, group: &str) -> Result<Arc<dyn GroupMonitor>> {
        {
            let monitors = self.monitors.read().await;
            if let Some(watch) = monitors.get(group) {
                return Ok(Arc::clone(&watch.monitor));
            }
        }

        let mut monitors = self.monitors.write().await;
        if let Some(watch) = monitors.get(group) {
            return Ok(Arc::clone(&watch.monitor));
        }

        // The monitor gets its own session so it outlives any join churn
        let session = self
            .connector
            .connect(&self.endpoints, self.recv_timeout)
            .await
            .map_err(|err| {
                RosterError::Coordination(format!(
                    "unable to open a monitor session for the {} group: {}",
                    group, err
                ))
            })?;
        let path = format!("{}/{}", self.prefix, group);
        let monitor = session.monitor(&path).await.map_err(|err| {
            RosterError::Coordination(format!("unable to monitor the {} group: {}", group, err))
        })?;
        monitors.insert(
            group.to_string(),
            GroupWatch {
                monitor: Arc::clone(&monitor),
                _session: session,
            },
        );
        drop(monitors);

        // Give a fresh monitor a bounded window to sync before first use
        for _ in 0..MONITOR_WARMUP_ATTEMPTS {
            tokio::time::sleep(MONITOR_POLL_INTERVAL).await;
            if monitor.members().is_some() {
                return Ok(monitor);
            }
        }
        warn!(
            "Group monitor for {} has no membership data after {:?}",
            group,
            MONITOR_POLL_INTERVAL * MONITOR_WARMUP_ATTEMPTS
        );
        Ok(monitor)
    }
}

#[async_trait]
impl Driver for CoordinationDriver {
    async fn join(&self, member: &str, group: &str, service: Option<&ServiceHandle>) -> Result<()> {
        debug!(
            "Coordination driver: joining member {} to the {} group",
            member, group
        );
        service.ok_or_else(|| {
            RosterError::Configuration(
                "service is a mandatory argument for the coordination driver".to_string(),
            )
        })?;

        let mut memberships = self.memberships.lock().await;
        if memberships.contains_key(&(group.to_string(), member.to_string())) {
            // Already joined from this process
            return Ok(());
        }

        let session = self.session().await?;
        let path = format!("{}/{}/{}", self.prefix, group, member);
        let process_tag = std::process::id().to_string();

        let handle = match session.create_ephemeral(&path, &process_tag).await {
            Ok(handle) => handle,
            Err(first) => {
                warn!(
                    "Unable to join {} (possibly a stale node from an earlier run), retrying in {:?}: {}",
                    path, self.retry_interval, first
                );
                tokio::time::sleep(self.retry_interval).await;
                session
                    .create_ephemeral(&path, &process_tag)
                    .await
                    .map_err(|err| {
                        RosterError::Coordination(format!("unable to join {}: {}", path, err))
                    })?
            }
        };

        memberships.insert((group.to_string(), member.to_string()), handle);
        Ok(())
    }

    async fn is_up(&self, record: &ServiceRecord) -> Result<bool> {
        let members = self.get_all(&record.topic).await?;
        Ok(members.iter().any(|member| member == &record.host))
    }

    async fn get_all(&self, group: &str) -> Result<Vec<String>> {
        let monitor = self.monitor_for(group).await?;
        let Some(members) = monitor.members() else {
            return Err(RosterError::Unavailable {
                driver: "coordination",
            });
        };

        // A member node with no live process entries is a leftover, not a member
        Ok(members
            .into_iter()
            .filter(|member| {
                monitor
                    .member_details(member)
                    .unwrap_or_default()
                    .live_children
                    > 0
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{LocalCoordination, MemberDetails};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn coordination_config() -> RosterConfig {
        RosterConfig::default()
            .with_driver("coordination")
            .with_coordination_endpoints("127.0.0.1:2181")
    }

    fn service() -> ServiceHandle {
        ServiceHandle::new(
            ServiceRecord::new("compute", "node-1"),
            Duration::from_secs(10),
        )
    }

    /// Connector whose sessions fail ephemeral creation a set number of times
    struct FlakyCoordination {
        cluster: LocalCoordination,
        failures: Arc<AtomicU32>,
    }

    impl FlakyCoordination {
        fn failing(times: u32) -> Self {
            Self {
                cluster: LocalCoordination::new(),
                failures: Arc::new(AtomicU32::new(times)),
            }
        }
    }

    #[async_trait]
    impl CoordinationConnector for FlakyCoordination {
        async fn connect(
            &self,
            endpoints: &str,
            recv_timeout: Duration,
        ) -> std::result::Result<Arc<dyn CoordinationSession>, CoordinationError> {
            let inner = self.cluster.connect(endpoints, recv_timeout).await?;
            Ok(Arc::new(FlakySession {
                failures: Arc::clone(&self.failures),
                inner,
            }))
        }
    }

    struct FlakySession {
        failures: Arc<AtomicU32>,
        inner: Arc<dyn CoordinationSession>,
    }

    #[async_trait]
    impl CoordinationSession for FlakySession {
        async fn create_path(&self, path: &str) -> std::result::Result<(), CoordinationError> {
            self.inner.create_path(path).await
        }

        async fn create_ephemeral(
            &self,
            path: &str,
            process_tag: &str,
        ) -> std::result::Result<MembershipHandle, CoordinationError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(CoordinationError::Backend("node creation lost".to_string()));
            }
            self.inner.create_ephemeral(path, process_tag).await
        }

        async fn monitor(
            &self,
            path: &str,
        ) -> std::result::Result<Arc<dyn GroupMonitor>, CoordinationError> {
            self.inner.monitor(path).await
        }
    }

    /// Connector whose monitors never produce membership data
    struct NeverSyncedCoordination;

    #[async_trait]
    impl CoordinationConnector for NeverSyncedCoordination {
        async fn connect(
            &self,
            _endpoints: &str,
            _recv_timeout: Duration,
        ) -> std::result::Result<Arc<dyn CoordinationSession>, CoordinationError> {
            Ok(Arc::new(NeverSyncedSession))
        }
    }

    struct NeverSyncedSession;

    #[async_trait]
    impl CoordinationSession for NeverSyncedSession {
        async fn create_path(&self, _path: &str) -> std::result::Result<(), CoordinationError> {
            Ok(())
        }

        async fn create_ephemeral(
            &self,
            path: &str,
            process_tag: &str,
        ) -> std::result::Result<MembershipHandle, CoordinationError> {
            Ok(MembershipHandle {
                path: path.to_string(),
                process_tag: process_tag.to_string(),
            })
        }

        async fn monitor(
            &self,
            _path: &str,
        ) -> std::result::Result<Arc<dyn GroupMonitor>, CoordinationError> {
            Ok(Arc::new(NeverSyncedMonitor))
        }
    }

    struct NeverSyncedMonitor;

    impl GroupMonitor for NeverSyncedMonitor {
        fn members(&self) -> Option<Vec<String>> {
            None
        }

        fn member_details(&self, _member: &str) -> Option<MemberDetails> {
            None
        }
    }

    #[tokio::test]
    async fn test_session_opens_lazily_and_once() {
        let cluster = LocalCoordination::new();
        let driver =
            CoordinationDriver::new(&coordination_config(), Arc::new(cluster.clone()));
        assert_eq!(cluster.session_count(), 0);

        let handle = service();
        driver
            .join("node-1", "compute", Some(&handle))
            .await
            .expect("first join");
        driver
            .join("node-2", "compute", Some(&handle))
            .await
            .expect("second join");

        assert_eq!(cluster.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_is_idempotent_per_member() {
        let cluster = LocalCoordination::new();
        let driver =
            CoordinationDriver::new(&coordination_config(), Arc::new(cluster.clone()));

        let handle = service();
        driver
            .join("node-1", "compute", Some(&handle))
            .await
            .expect("first join");
        driver
            .join("node-1", "compute", Some(&handle))
            .await
            .expect("repeat join");

        let members = driver.get_all("compute").await.expect("listing succeeds");
        assert_eq!(members, vec!["node-1".to_string()]);
        assert_eq!(cluster.session_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_retries_once_after_failure() {
        let connector = FlakyCoordination::failing(1);
        let driver = CoordinationDriver::new(&coordination_config(), Arc::new(connector));

        driver
            .join("node-1", "compute", Some(&service()))
            .await
            .expect("retry lands the join");

        let members = driver.get_all("compute").await.expect("listing succeeds");
        assert_eq!(members, vec!["node-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_fails_after_retry_budget() {
        let connector = FlakyCoordination::failing(2);
        let driver = CoordinationDriver::new(&coordination_config(), Arc::new(connector));

        let err = driver
            .join("node-1", "compute", Some(&service()))
            .await
            .unwrap_err();
        assert!(matches!(err, RosterError::Coordination(_)));
        assert!(err.to_string().contains("unable to join"));
    }

    #[tokio::test]
    async fn test_join_requires_service() {
        let driver = CoordinationDriver::new(
            &coordination_config(),
            Arc::new(LocalCoordination::new()),
        );
        let err = driver.join("node-1", "compute", None).await.unwrap_err();
        assert!(matches!(err, RosterError::Configuration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_all_unavailable_without_sync() {
        let driver =
            CoordinationDriver::new(&coordination_config(), Arc::new(NeverSyncedCoordination));

        let err = driver.get_all("compute").await.unwrap_err();
        assert!(matches!(
            err,
            RosterError::Unavailable {
                driver: "coordination"
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_all_of_empty_group() {
        let driver = CoordinationDriver::new(
            &coordination_config(),
            Arc::new(LocalCoordination::new()),
        );
        let members = driver.get_all("nobody").await.expect("listing succeeds");
        assert!(members.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_all_filters_members_without_processes() {
        let cluster = LocalCoordination::new();
        let driver =
            CoordinationDriver::new(&coordination_config(), Arc::new(cluster.clone()));

        driver
            .join("node-live", "compute", Some(&service()))
            .await
            .expect("join succeeds");

        // A bare member node with no process entries under it
        let bystander = cluster
            .connect("127.0.0.1:2181", Duration::from_secs(4))
            .await
            .expect("local connect");
        bystander
            .create_path("/servicegroups/compute/node-gone")
            .await
            .expect("leftover node");

        let members = driver.get_all("compute").await.expect("listing succeeds");
        assert_eq!(members, vec!["node-live".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_up_through_membership() {
        let driver = CoordinationDriver::new(
            &coordination_config(),
            Arc::new(LocalCoordination::new()),
        );
        driver
            .join("node-1", "compute", Some(&service()))
            .await
            .expect("join succeeds");

        let joined = ServiceRecord::new("compute", "node-1");
        assert!(driver.is_up(&joined).await.expect("roster available"));

        let stranger = ServiceRecord::new("compute", "node-9");
        assert!(!driver.is_up(&stranger).await.expect("roster available"));
    }
}
