//! MongoDB record store

use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, DateTime};
use mongodb::{options::IndexOptions, Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{RecordStore, StoreError};
use crate::record::{HeartbeatStamp, ServiceRecord};

/// Collection name for service records
pub const SERVICE_COLLECTION: &str = "services";

/// Default deadline for a single store operation
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Service record document stored in MongoDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Logical group the member reports under
    pub topic: String,

    /// Host the member runs on
    pub host: String,

    /// Number of reports persisted so far
    #[serde(default)]
    pub report_count: i64,

    /// Administrative override flag
    #[serde(default)]
    pub forced_down: bool,

    /// Explicit liveness stamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_up: Option<DateTime>,

    /// Last save time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    /// First save time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl ServiceDoc {
    /// Build a document from a caller record
    pub fn from_record(record: &ServiceRecord) -> Self {
        Self {
            _id: None,
            topic: record.topic.clone(),
            host: record.host.clone(),
            report_count: record.report_count as i64,
            forced_down: record.forced_down,
            last_seen_up: stamp_to_bson(record.last_seen_up.as_ref()),
            updated_at: stamp_to_bson(record.updated_at.as_ref()),
            created_at: stamp_to_bson(record.created_at.as_ref()),
        }
    }

    /// Convert back into a caller record
    pub fn into_record(self) -> ServiceRecord {
        ServiceRecord {
            topic: self.topic,
            host: self.host,
            report_count: u64::try_from(self.report_count).unwrap_or_default(),
            forced_down: self.forced_down,
            last_seen_up: self.last_seen_up.map(bson_to_stamp),
            updated_at: self.updated_at.map(bson_to_stamp),
            created_at: self.created_at.map(bson_to_stamp),
        }
    }
}

fn stamp_to_bson(stamp: Option<&HeartbeatStamp>) -> Option<DateTime> {
    stamp.and_then(|s| s.to_utc()).map(DateTime::from_chrono)
}

fn bson_to_stamp(dt: DateTime) -> HeartbeatStamp {
    HeartbeatStamp::Structured(dt.to_chrono())
}

/// Record store backed by MongoDB
#[derive(Clone)]
pub struct MongoRecordStore {
    collection: Collection<ServiceDoc>,
    op_timeout: Duration,
}

impl MongoRecordStore {
    /// Connect and ping, then apply the schema indexes
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        info!("Connecting to MongoDB at {}", uri);

        // serverSelectionTimeoutMS keeps startup from hanging on an
        // unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect to MongoDB: {}", e)))?;

        // Verify connection before handing the store out
        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Backend(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        let collection = client
            .database(db_name)
            .collection::<ServiceDoc>(SERVICE_COLLECTION);

        let store = Self {
            collection,
            op_timeout: DEFAULT_OP_TIMEOUT,
        };
        store.apply_indexes().await?;

        Ok(store)
    }

    /// Apply the schema indexes
    async fn apply_indexes(&self) -> Result<(), StoreError> {
        let indices = vec![
            // One record per (topic, host) member
            IndexModel::builder()
                .keys(doc! { "topic": 1, "host": 1 })
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .name("topic_host_unique".to_string())
                        .build(),
                )
                .build(),
        ];

        self.collection
            .create_indexes(indices)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl RecordStore for MongoRecordStore {
    async fn save(&self, record: &mut ServiceRecord) -> Result<(), StoreError> {
        let now = DateTime::now();
        let filter = doc! { "topic": &record.topic, "host": &record.host };

        // The whole save flow shares one deadline so a stalled backend
        // classifies as a timeout, not a generic failure
        let existing_created = tokio::time::timeout(self.op_timeout, async {
            if let Some(existing) = self
                .collection
                .find_one(filter.clone())
                .await
                .map_err(|e| StoreError::Backend(format!("Find failed: {}", e)))?
            {
                let mut set = doc! {
                    "report_count": record.report_count as i64,
                    "forced_down": record.forced_down,
                    "updated_at": now,
                };
                if let Some(seen) = stamp_to_bson(record.last_seen_up.as_ref()) {
                    set.insert("last_seen_up", seen);
                }

                self.collection
                    .update_one(filter.clone(), doc! { "$set": set })
                    .await
                    .map_err(|e| StoreError::Backend(format!("Update failed: {}", e)))?;

                Ok(existing.created_at)
            } else {
                let mut doc = ServiceDoc::from_record(record);
                doc.created_at = Some(now);
                doc.updated_at = Some(now);

                self.collection
                    .insert_one(doc)
                    .await
                    .map_err(|e| StoreError::Backend(format!("Insert failed: {}", e)))?;

                Ok(None)
            }
        })
        .await
        .map_err(|_| {
            StoreError::Timeout(format!("Save for '{}' timed out", record.liveness_key()))
        })??;

        // Stamp the caller's record the way the stored copy was stamped
        let saved_at = bson_to_stamp(now);
        if record.created_at.is_none() {
            record.created_at = Some(
                existing_created
                    .map(bson_to_stamp)
                    .unwrap_or_else(|| saved_at.clone()),
            );
        }
        record.updated_at = Some(saved_at);

        Ok(())
    }

    async fn members_of(&self, topic: &str) -> Result<Vec<ServiceRecord>, StoreError> {
        use futures_util::StreamExt;

        let cursor = tokio::time::timeout(self.op_timeout, self.collection.find(doc! { "topic": topic }))
            .await
            .map_err(|_| StoreError::Timeout(format!("Find for topic '{}' timed out", topic)))?
            .map_err(|e| StoreError::Backend(format!("Find failed: {}", e)))?;

        let docs: Vec<ServiceDoc> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading service document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(docs.into_iter().map(ServiceDoc::into_record).collect())
    }
}
