//! Cache-backed service group driver
//!
//! Liveness is the presence of an expiring key: reporting rewrites the
//! key with a TTL of the service down time, and silence lets the
//! backend expire it on its own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheBackend, CacheError};
use crate::config::RosterConfig;
use crate::record::ServiceRecord;
use crate::service::ServiceHandle;
use crate::types::{Result, RosterError};

use super::{Driver, INITIAL_REPORTING_DELAY};

/// Driver that keeps liveness as expiring cache keys
pub struct CacheDriver {
    service_down_time: Duration,
    backend: Arc<dyn CacheBackend>,
}

impl CacheDriver {
    /// Build the driver; cache endpoints must be configured
    pub fn new(config: &RosterConfig, backend: Arc<dyn CacheBackend>) -> Result<Self> {
        if config.cache.endpoints.is_empty() {
            return Err(RosterError::Configuration(
                "cache.endpoints is required for the cache driver".to_string(),
            ));
        }
        Ok(Self {
            service_down_time: config.service_down_time,
            backend,
        })
    }

    /// One reporting round: refresh the liveness key
    async fn report_state(backend: &dyn CacheBackend, service: &ServiceHandle, ttl: Duration) {
        let key = {
            let shared = service.record();
            let guard = shared.read().await;
            guard.liveness_key()
        };

        match backend.set(&key, &Utc::now().to_rfc3339(), ttl).await {
            Ok(()) => {
                if service.connectivity().mark_connected() {
                    info!("Recovered from being unable to report status");
                }
            }
            Err(CacheError::Timeout(reason)) => {
                if service.connectivity().mark_disconnected() {
                    warn!(
                        "Lost connection to the cache for reporting service status: {}",
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
}

#[async_trait]
impl Driver for CacheDriver {
    async fn join(&self, member: &str, group: &str, service: Option<&ServiceHandle>) -> Result<()> {
        debug!(
            "Cache driver: joining member {} to the {} group",
            member, group
        );
        let service = service.ok_or_else(|| {
            RosterError::Configuration(
                "service is a mandatory argument for the cache driver".to_string(),
            )
        })?;

        let interval = service.report_interval();
        if interval.is_zero() {
            return Ok(());
        }

        let backend = Arc::clone(&self.backend);
        let handle = service.clone();
        let ttl = self.service_down_time;
        service
            .timer()
            .add_timer(interval, INITIAL_REPORTING_DELAY, move || {
                let backend = Arc::clone(&backend);
                let handle = handle.clone();
                async move {
                    CacheDriver::report_state(backend.as_ref(), &handle, ttl).await;
                }
            })
            .await;
        Ok(())
    }

    async fn is_up(&self, record: &ServiceRecord) -> Result<bool> {
        let key = record.liveness_key();
        let up = match self.backend.get(&key).await {
            Ok(value) => value.is_some(),
            Err(err) => {
                warn!("Unable to read liveness key {}: {}", key, err);
                false
            }
        };
        if !up {
            debug!("Seems service {} is down", key);
        }
        Ok(up)
    }

    async fn get_all(&self, _group: &str) -> Result<Vec<String>> {
        // The cache backend cannot enumerate keys
        Err(RosterError::Unsupported {
            driver: "cache",
            operation: "get_all",
        })
    }
}
