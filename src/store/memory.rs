//! In-process record store

use async_trait::async_trait;
use dashmap::DashMap;

use super::{RecordStore, StoreError};
use crate::record::{HeartbeatStamp, ServiceRecord};

/// Record store backed by a process-local map.
///
/// Useful for single-node deployments and tests; nothing survives a
/// restart.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<(String, String), ServiceRecord>,
}

impl MemoryRecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fetch one stored record
    pub fn get(&self, topic: &str, host: &str) -> Option<ServiceRecord> {
        self.records
            .get(&(topic.to_string(), host.to_string()))
            .map(|entry| entry.clone())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save(&self, record: &mut ServiceRecord) -> Result<(), StoreError> {
        let now = HeartbeatStamp::now();
        if record.created_at.is_none() {
            record.created_at = Some(now.clone());
        }
        record.updated_at = Some(now);

        self.records.insert(
            (record.topic.clone(), record.host.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn members_of(&self, topic: &str) -> Result<Vec<ServiceRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.key().0 == topic)
            .map(|entry| entry.value().clone())
            .collect())
    }
}
