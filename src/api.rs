//! Service group facade
//!
//! Picks the driver from configuration and fronts it for callers, so
//! nothing outside this module cares which backend answers.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cache::{CacheBackend, MemoryCache};
use crate::config::RosterConfig;
use crate::coordination::{CoordinationConnector, LocalCoordination};
use crate::driver::{
    CacheDriver, CoordinationDriver, DatastoreDriver, Driver, DriverKind, RosterDriver,
};
use crate::record::ServiceRecord;
use crate::service::ServiceHandle;
use crate::store::{MemoryRecordStore, RecordStore};
use crate::types::Result;

/// Entry point for service group membership and liveness
pub struct Roster {
    driver: RosterDriver,
    service_down_time: Duration,
}

impl Roster {
    /// Build with the default in-process backends
    pub fn new(config: RosterConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Builder for plugging in real backends
    pub fn builder(config: RosterConfig) -> RosterBuilder {
        RosterBuilder {
            config,
            record_store: None,
            cache_backend: None,
            coordination: None,
        }
    }

    /// Which driver kind is active
    pub fn driver_kind(&self) -> DriverKind {
        self.driver.kind()
    }

    /// How old a heartbeat may be before a member counts as down
    pub fn service_down_time(&self) -> Duration {
        self.service_down_time
    }

    /// Add a member to a group and start its liveness reporting
    pub async fn join(
        &self,
        member: &str,
        group: &str,
        service: Option<&ServiceHandle>,
    ) -> Result<()> {
        self.driver.join(member, group, service).await
    }

    /// Whether the service behind a record is up.
    ///
    /// An operator-forced down state wins over any backend evidence.
    pub async fn service_is_up(&self, record: &ServiceRecord) -> Result<bool> {
        if record.forced_down {
            return Ok(false);
        }
        self.driver.is_up(record).await
    }

    /// All live members of a group
    pub async fn get_all(&self, group: &str) -> Result<Vec<String>> {
        debug!("Returning all members of the [{}] service group", group);
        self.driver.get_all(group).await
    }
}

/// Configures a `Roster` before its driver is constructed
pub struct RosterBuilder {
    config: RosterConfig,
    record_store: Option<Arc<dyn RecordStore>>,
    cache_backend: Option<Arc<dyn CacheBackend>>,
    coordination: Option<Arc<dyn CoordinationConnector>>,
}

impl RosterBuilder {
    /// Use this record store for the datastore driver
    pub fn with_record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.record_store = Some(store);
        self
    }

    /// Use this backend for the cache driver
    pub fn with_cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    /// Use this connector for the coordination driver
    pub fn with_coordination(mut self, connector: Arc<dyn CoordinationConnector>) -> Self {
        self.coordination = Some(connector);
        self
    }

    /// Normalize the config, resolve the driver name and build
    pub fn build(self) -> Result<Roster> {
        let config = self.config.normalized();
        let kind = DriverKind::from_str(&config.driver)?;

        let driver = match kind {
            DriverKind::Datastore => {
                let store = self
                    .record_store
                    .unwrap_or_else(|| Arc::new(MemoryRecordStore::new()));
                RosterDriver::Datastore(DatastoreDriver::new(config.service_down_time, store))
            }
            DriverKind::Cache => {
                let backend = self
                    .cache_backend
                    .unwrap_or_else(|| Arc::new(MemoryCache::new()));
                RosterDriver::Cache(CacheDriver::new(&config, backend)?)
            }
            DriverKind::Coordination => {
                let connector = self
                    .coordination
                    .unwrap_or_else(|| Arc::new(LocalCoordination::new()));
                RosterDriver::Coordination(CoordinationDriver::new(&config, connector))
            }
        };

        info!("Service group API initialized with the {} driver", kind);
        Ok(Roster {
            driver,
            service_down_time: config.service_down_time,
        })
    }
}
