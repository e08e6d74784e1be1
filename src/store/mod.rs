//! Record persistence seam for the datastore driver
//!
//! Heartbeats are ordinary record saves; staleness falls out of the
//! bookkeeping stamps the store refreshes on every save.

mod memory;
mod mongo;

pub use memory::MemoryRecordStore;
pub use mongo::{MongoRecordStore, ServiceDoc, SERVICE_COLLECTION};

use async_trait::async_trait;
use thiserror::Error;

use crate::record::ServiceRecord;

/// Errors from record store backends
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend did not answer within its deadline
    #[error("Store operation timed out: {0}")]
    Timeout(String),

    /// Any other backend failure
    #[error("Store operation failed: {0}")]
    Backend(String),
}

/// Persistence backend for service records.
///
/// `save` refreshes `updated_at` (and fills `created_at` on the first
/// save) on both the stored copy and the caller's record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist the record, refreshing its bookkeeping stamps
    async fn save(&self, record: &mut ServiceRecord) -> Result<(), StoreError>;

    /// All records registered under a topic
    async fn members_of(&self, topic: &str) -> Result<Vec<ServiceRecord>, StoreError>;
}
