//! Service group drivers
//!
//! Every driver speaks the same contract over a different backend:
//! members join a group and report liveness, and anyone can ask who is
//! up.

mod cache;
mod coordination;
mod datastore;

pub use cache::CacheDriver;
pub use coordination::CoordinationDriver;
pub use datastore::DatastoreDriver;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

use crate::record::ServiceRecord;
use crate::service::ServiceHandle;
use crate::types::{Result, RosterError};

/// Delay before the first liveness report after a join
pub const INITIAL_REPORTING_DELAY: Duration = Duration::from_secs(5);

/// Uniform contract the service group drivers fulfill
#[async_trait]
pub trait Driver: Send + Sync {
    /// Add a member to a group and arrange its periodic reporting.
    ///
    /// Every driver requires `service`; joining without one is a
    /// configuration error.
    async fn join(&self, member: &str, group: &str, service: Option<&ServiceHandle>)
        -> Result<()>;

    /// Judge liveness from the service's record
    async fn is_up(&self, record: &ServiceRecord) -> Result<bool>;

    /// Names of the group members currently considered alive
    async fn get_all(&self, group: &str) -> Result<Vec<String>>;
}

/// The closed set of driver names accepted in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Datastore,
    Cache,
    Coordination,
}

impl DriverKind {
    /// Canonical configuration name for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Datastore => "datastore",
            DriverKind::Cache => "cache",
            DriverKind::Coordination => "coordination",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = RosterError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "datastore" => Ok(DriverKind::Datastore),
            "cache" => Ok(DriverKind::Cache),
            "coordination" => Ok(DriverKind::Coordination),
            other => Err(RosterError::Configuration(format!(
                "unknown service group driver name: {}",
                other
            ))),
        }
    }
}

/// Closed dispatch over the driver implementations
pub enum RosterDriver {
    Datastore(DatastoreDriver),
    Cache(CacheDriver),
    Coordination(CoordinationDriver),
}

impl RosterDriver {
    /// Which kind of driver this is
    pub fn kind(&self) -> DriverKind {
        match self {
            RosterDriver::Datastore(_) => DriverKind::Datastore,
            RosterDriver::Cache(_) => DriverKind::Cache,
            RosterDriver::Coordination(_) => DriverKind::Coordination,
        }
    }
}

#[async_trait]
impl Driver for RosterDriver {
    async fn join(&self, member: &str, group: &str, service: Option<&ServiceHandle>) -> Result<()> {
        match self {
            RosterDriver::Datastore(driver) => driver.join(member, group, service).await,
            RosterDriver::Cache(driver) => driver.join(member, group, service).await,
            RosterDriver::Coordination(driver) => driver.join(member, group, service).await,
        }
    }

    async fn is_up(&self, record: &ServiceRecord) -> Result<bool> {
        match self {
            RosterDriver::Datastore(driver) => driver.is_up(record).await,
            RosterDriver::Cache(driver) => driver.is_up(record).await,
            RosterDriver::Coordination(driver) => driver.is_up(record).await,
        }
    }

    async fn get_all(&self, group: &str) -> Result<Vec<String>> {
        match self {
            RosterDriver::Datastore(driver) => driver.get_all(group).await,
            RosterDriver::Cache(driver) => driver.get_all(group).await,
            RosterDriver::Coordination(driver) => driver.get_all(group).await,
        }
    }
}
