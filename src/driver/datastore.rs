//! Datastore-backed service group driver
//!
//! Liveness is judged from heartbeat timestamps persisted on the
//! service record: a member is up while its newest stamp is within the
//! service down time of now.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tracing::{debug, error, info, warn};

use crate::record::ServiceRecord;
use crate::service::ServiceHandle;
use crate::store::{RecordStore, StoreError};
use crate::types::{Result, RosterError};

use super::{Driver, INITIAL_REPORTING_DELAY};

/// Driver that heartbeats through a shared record store
pub struct DatastoreDriver {
    service_down_time: Duration,
    store: Arc<dyn RecordStore>,
}

impl DatastoreDriver {
    /// Build the driver over a record store
    pub fn new(service_down_time: Duration, store: Arc<dyn RecordStore>) -> Self {
        Self {
            service_down_time,
            store,
        }
    }

    /// One reporting round: bump the count and persist the record.
    ///
    /// Failures never surface; they flip the service's connectivity
    /// handle instead, and the next success flips it back.
    async fn report_state(store: &dyn RecordStore, service: &ServiceHandle) {
        let mut record = {
            let shared = service.record();
            let mut guard = shared.write().await;
            guard.report_count += 1;
            guard.clone()
        };

        match store.save(&mut record).await {
            Ok(()) => {
                // The save stamped the copy; push those stamps back
                let shared = service.record();
                let mut guard = shared.write().await;
                guard.updated_at = record.updated_at;
                guard.created_at = record.created_at;
                drop(guard);
                if service.connectivity().mark_connected() {
                    info!("Recovered from being unable to report status");
                }
            }
            Err(StoreError::Timeout(reason)) => {
                if service.connectivity().mark_disconnected() {
                    warn!(
                        "Lost connection to the datastore for reporting service status: {}",
                        reason
                    );
                }
            }
            Err(err) => {
                error!("Unexpected error while reporting service status: {}", err);
                service.connectivity().mark_disconnected();
            }
        }
    }

    /// Judge liveness from the record's heartbeat stamps
    fn record_is_up(&self, record: &ServiceRecord) -> bool {
        let Some(stamp) = record.last_heartbeat() else {
            debug!(
                "Service {} has no heartbeat evidence yet",
                record.liveness_key()
            );
            return false;
        };
        let Some(last_heartbeat) = stamp.naive() else {
            warn!(
                "Unreadable heartbeat stamp for service {}: {:?}",
                record.liveness_key(),
                stamp
            );
            return false;
        };

        let window = TimeDelta::from_std(self.service_down_time).unwrap_or(TimeDelta::MAX);
        // The absolute difference tolerates a future-skewed reporter clock
        let elapsed = Utc::now().naive_utc() - last_heartbeat;
        let up = elapsed.abs() <= window;
        if !up {
            debug!(
                "Seems service {} is down. Last heartbeat was {}. Elapsed time is {}",
                record.liveness_key(),
                last_heartbeat,
                elapsed
            );
        }
        up
    }
}

#[async_trait]
impl Driver for DatastoreDriver {
    async fn join(&self, member: &str, group: &str, service: Option<&ServiceHandle>) -> Result<()> {
        debug!(
            "Datastore driver: joining member {} to the {} group",
            member, group
        );
        let service = service.ok_or_else(|| {
            RosterError::Configuration(
                "service is a mandatory argument for the datastore driver".to_string(),
            )
        })?;

        let interval = service.report_interval();
        if interval.is_zero() {
            return Ok(());
        }

        let store = Arc::clone(&self.store);
        let handle = service.clone();
        service
            .timer()
            .add_timer(interval, INITIAL_REPORTING_DELAY, move || {
                let store = Arc::clone(&store);
                let handle = handle.clone();
                async move {
                    DatastoreDriver::report_state(store.as_ref(), &handle).await;
                }
            })
            .await;
        Ok(())
    }

    async fn is_up(&self, record: &ServiceRecord) -> Result<bool> {
        Ok(self.record_is_up(record))
    }

    async fn get_all(&self, group: &str) -> Result<Vec<String>> {
        let records = self.store.members_of(group).await.map_err(|err| {
            warn!("Unable to read members of the {} group: {}", group, err);
            RosterError::Unavailable {
                driver: "datastore",
            }
        })?;

        Ok(records
            .iter()
            .filter(|record| self.record_is_up(record))
            .map(|record| record.host.clone())
            .collect())
    }
}
