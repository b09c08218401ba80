//! # Persistence Collaborator
//!
//! Interface to the platform's document store. The core writes report
//! records, degraded emergency records, and dead-letter records through
//! this seam; the store's schema and implementation belong to the wider
//! platform, not to this crate.

use crate::error::{AegisError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Document store seam: `save` returns the record id, `find` matches on a
/// flat field-equality query.
#[async_trait]
pub trait PersistenceStore: Send + Sync + fmt::Debug {
    async fn save(&self, collection: &str, record: Value) -> Result<Uuid>;

    async fn find(&self, collection: &str, query: Value) -> Result<Vec<Value>>;
}

/// In-process store for tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    collections: DashMap<String, Vec<Value>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map_or(0, |records| records.len())
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl PersistenceStore for InMemoryPersistence {
    async fn save(&self, collection: &str, mut record: Value) -> Result<Uuid> {
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        if let Some(fields) = record.as_object_mut() {
            fields.insert("id".to_string(), Value::String(id.to_string()));
        } else {
            return Err(AegisError::DatabaseError(
                "record must be a JSON object".to_string(),
            ));
        }

        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(record);
        Ok(id)
    }

    async fn find(&self, collection: &str, query: Value) -> Result<Vec<Value>> {
        let Some(records) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let criteria = query.as_object().cloned().unwrap_or_default();

        Ok(records
            .iter()
            .filter(|record| {
                criteria
                    .iter()
                    .all(|(key, expected)| record.get(key) == Some(expected))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_assigns_id() {
        let store = InMemoryPersistence::new();
        let id = store
            .save("reports", json!({"description": "test"}))
            .await
            .unwrap();
        let found = store
            .find("reports", json!({"id": id.to_string()}))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_find_matches_all_query_fields() {
        let store = InMemoryPersistence::new();
        store
            .save("reports", json!({"tier": "emergency", "status": "open"}))
            .await
            .unwrap();
        store
            .save("reports", json!({"tier": "standard", "status": "open"}))
            .await
            .unwrap();

        let found = store
            .find("reports", json!({"tier": "emergency", "status": "open"}))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let all_open = store.find("reports", json!({"status": "open"})).await.unwrap();
        assert_eq!(all_open.len(), 2);
    }

    #[tokio::test]
    async fn test_non_object_record_rejected() {
        let store = InMemoryPersistence::new();
        let result = store.save("reports", json!("scalar")).await;
        assert!(result.is_err());
    }
}
