//! Roster - service group membership and liveness
//!
//! "Am I my brother's keeper?" - Genesis 4:9
//!
//! Services join named groups and report liveness through one of three
//! drivers:
//!
//! - **datastore**: heartbeat timestamps on persisted service records
//! - **cache**: expiring keys the cache backend times out on its own
//! - **coordination**: ephemeral membership nodes tied to live sessions
//!
//! The `Roster` facade picks the driver from configuration, so callers
//! never care which backend answers.

pub mod api;
pub mod cache;
pub mod config;
pub mod coordination;
pub mod driver;
pub mod record;
pub mod service;
pub mod store;
pub mod timer;
pub mod types;

pub use api::{Roster, RosterBuilder};
pub use config::RosterConfig;
pub use driver::{Driver, DriverKind, INITIAL_REPORTING_DELAY};
pub use record::{HeartbeatStamp, ServiceRecord};
pub use service::{Connectivity, ServiceHandle};
pub use types::{Result, RosterError};
