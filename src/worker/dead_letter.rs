//! # Dead-Letter Store
//!
//! Terminal records for jobs that exhausted their retry or stall budget.
//! Retained for operator inspection, never automatically reprocessed.
//! The in-process map serves the stats and inspection surfaces; each
//! record is also written through the persistence collaborator so it
//! survives restarts. It is the one durable artifact this core owns.

use crate::constants::Tier;
use crate::queue::Job;
use crate::services::PersistenceStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

/// Collection name used for write-through persistence.
pub const DEAD_LETTER_COLLECTION: &str = "dead_letters";

/// Terminal record for a job whose retries (or stall budget) ran out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub job_id: Uuid,
    pub tier: Tier,
    pub payload: Value,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub attempts_made: u32,
}

/// In-process dead-letter index with best-effort persistent write-through.
#[derive(Debug)]
pub struct DeadLetterStore {
    records: DashMap<Uuid, DeadLetterRecord>,
    persistence: Option<Arc<dyn PersistenceStore>>,
}

impl DeadLetterStore {
    pub fn new(persistence: Option<Arc<dyn PersistenceStore>>) -> Self {
        Self {
            records: DashMap::new(),
            persistence,
        }
    }

    /// Record a dead-lettered job. The persistent write is best-effort:
    /// a store outage must not take down the worker that is reporting the
    /// failure.
    pub async fn record(&self, job: &Job, error: &str, failed_at: DateTime<Utc>) {
        let record = DeadLetterRecord {
            job_id: job.id,
            tier: job.tier,
            payload: job.payload.clone(),
            error: error.to_string(),
            failed_at,
            attempts_made: job.attempts_made(),
        };

        warn!(
            tier = %record.tier,
            job_id = %record.job_id,
            attempts_made = record.attempts_made,
            error = %record.error,
            "💀 Job dead-lettered"
        );

        if let Some(persistence) = &self.persistence {
            let document = serde_json::to_value(&record).unwrap_or_else(|_| Value::Null);
            if let Err(e) = persistence.save(DEAD_LETTER_COLLECTION, document).await {
                error!(
                    job_id = %record.job_id,
                    error = %e,
                    "Failed to persist dead-letter record"
                );
            }
        }

        self.records.insert(record.job_id, record);
    }

    pub fn get(&self, job_id: Uuid) -> Option<DeadLetterRecord> {
        self.records.get(&job_id).map(|entry| entry.value().clone())
    }

    pub fn all(&self) -> Vec<DeadLetterRecord> {
        self.records
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn for_tier(&self, tier: Tier) -> Vec<DeadLetterRecord> {
        self.records
            .iter()
            .filter(|entry| entry.value().tier == tier)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierSettings;
    use crate::queue::JobOptions;
    use crate::services::InMemoryPersistence;
    use serde_json::json;

    fn exhausted_job() -> Job {
        let settings = TierSettings::default();
        let mut job = Job::new(
            Tier::Standard,
            json!({"doomed": true}),
            settings.for_tier(Tier::Standard),
            &JobOptions::default(),
            Utc::now(),
        );
        job.retries_remaining = 0;
        job
    }

    #[tokio::test]
    async fn test_record_and_inspect() {
        let store = DeadLetterStore::new(None);
        let job = exhausted_job();
        store.record(&job, "handler exploded", Utc::now()).await;

        assert_eq!(store.len(), 1);
        let record = store.get(job.id).unwrap();
        assert_eq!(record.attempts_made, job.max_retries);
        assert_eq!(record.error, "handler exploded");
        assert_eq!(store.for_tier(Tier::Standard).len(), 1);
        assert!(store.for_tier(Tier::Email).is_empty());
    }

    #[tokio::test]
    async fn test_write_through_to_persistence() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let store = DeadLetterStore::new(Some(persistence.clone()));
        store.record(&exhausted_job(), "boom", Utc::now()).await;

        assert_eq!(persistence.len(DEAD_LETTER_COLLECTION), 1);
    }
}
