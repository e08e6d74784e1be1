//! Service group configuration
//!
//! Plain structs with defaults and environment overrides. Loading from
//! files or CLI flags is the host process's job, not ours.

use std::time::Duration;

use tracing::warn;

/// Default interval between liveness reports
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Default window after which a silent member counts as down
pub const DEFAULT_SERVICE_DOWN_TIME: Duration = Duration::from_secs(60);

/// Factor applied to the report interval when the configured down time
/// is too small to ever observe a heartbeat
const DOWN_TIME_CORRECTION_FACTOR: f64 = 2.5;

/// Top-level service group configuration
#[derive(Debug, Clone)]
pub struct RosterConfig {
    /// Driver name: "datastore", "cache" or "coordination"
    pub driver: String,
    /// How often joined services report liveness
    pub report_interval: Duration,
    /// Maximum heartbeat age before a member counts as down
    pub service_down_time: Duration,
    /// Cache driver settings
    pub cache: CacheConfig,
    /// Coordination driver settings
    pub coordination: CoordinationConfig,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            driver: "datastore".to_string(),
            report_interval: DEFAULT_REPORT_INTERVAL,
            service_down_time: DEFAULT_SERVICE_DOWN_TIME,
            cache: CacheConfig::default(),
            coordination: CoordinationConfig::default(),
        }
    }
}

impl RosterConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ROSTER_DRIVER") {
            if !val.is_empty() {
                config.driver = val;
            }
        }

        if let Ok(val) = std::env::var("ROSTER_REPORT_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.report_interval = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("ROSTER_SERVICE_DOWN_TIME_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.service_down_time = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("ROSTER_CACHE_ENDPOINTS") {
            config.cache.endpoints = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(val) = std::env::var("ROSTER_COORDINATION_ENDPOINTS") {
            config.coordination.endpoints = val;
        }

        if let Ok(val) = std::env::var("ROSTER_COORDINATION_PREFIX") {
            if !val.is_empty() {
                config.coordination.prefix = val;
            }
        }

        if let Ok(val) = std::env::var("ROSTER_COORDINATION_RECV_TIMEOUT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.coordination.recv_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(val) = std::env::var("ROSTER_COORDINATION_RETRY_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.coordination.retry_interval = Duration::from_secs(secs);
            }
        }

        config
    }

    /// Select the driver by name
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Set the reporting interval
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Set the staleness window
    pub fn with_service_down_time(mut self, down_time: Duration) -> Self {
        self.service_down_time = down_time;
        self
    }

    /// Set the cache endpoint list
    pub fn with_cache_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.cache.endpoints = endpoints;
        self
    }

    /// Set the coordination endpoint address
    pub fn with_coordination_endpoints(mut self, endpoints: impl Into<String>) -> Self {
        self.coordination.endpoints = endpoints.into();
        self
    }

    /// Enforce the down-time invariant.
    ///
    /// The staleness window must exceed the reporting interval or no
    /// member could ever be seen alive; a misconfigured window is
    /// overridden to 2.5x the report interval.
    pub fn normalized(mut self) -> Self {
        if self.service_down_time <= self.report_interval {
            let corrected = self.report_interval.mul_f64(DOWN_TIME_CORRECTION_FACTOR);
            warn!(
                "Report interval must be less than service down time (service_down_time: {:?}, \
                 report_interval: {:?}), setting service_down_time to {:?}",
                self.service_down_time, self.report_interval, corrected
            );
            self.service_down_time = corrected;
        }
        self
    }
}

/// Settings for the cache driver
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Cache server addresses; the cache driver refuses to start
    /// without at least one
    pub endpoints: Vec<String>,
}

/// Settings for the coordination driver
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// Coordination service addresses, "host1:port,host2:port"
    pub endpoints: String,
    /// Receive timeout for coordination sessions
    pub recv_timeout: Duration,
    /// Path prefix the ephemeral member nodes live under
    pub prefix: String,
    /// How long to wait before the single join retry
    pub retry_interval: Duration,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            endpoints: String::new(),
            recv_timeout: Duration::from_millis(4000),
            prefix: "/servicegroups".to_string(),
            retry_interval: Duration::from_secs(5),
        }
    }
}
