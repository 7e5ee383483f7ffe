use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use opsgate_core::domain::workflow::{WorkflowId, WorkflowRecord};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("workflow `{workflow_id}` was not found")]
    NotFound { workflow_id: String },
    #[error(
        "workflow `{workflow_id}` was modified concurrently: \
         expected version {expected}, found {actual}"
    )]
    VersionConflict { workflow_id: String, expected: u32, actual: u32 },
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("stored workflow could not be decoded: {0}")]
    Decode(String),
}

/// Persistence seam for workflows and their steps. A record is always read
/// and written whole; `save` carries the version the caller loaded so lost
/// updates surface as `VersionConflict` instead of silent overwrites.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn insert(&self, record: WorkflowRecord) -> Result<(), StoreError>;

    async fn find(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>, StoreError>;

    async fn save(&self, record: WorkflowRecord, expected_version: u32)
        -> Result<(), StoreError>;

    /// Non-terminal workflows, oldest first.
    async fn list_open(&self) -> Result<Vec<WorkflowRecord>, StoreError>;

    async fn list_all(&self) -> Result<Vec<WorkflowRecord>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    records: RwLock<HashMap<String, WorkflowRecord>>,
}

impl InMemoryWorkflowStore {
    fn sorted(mut records: Vec<WorkflowRecord>) -> Vec<WorkflowRecord> {
        records.sort_by(|a, b| {
            a.workflow
                .created_at
                .cmp(&b.workflow.created_at)
                .then_with(|| a.workflow.id.0.cmp(&b.workflow.id.0))
        });
        records
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn insert(&self, record: WorkflowRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let key = record.workflow.id.0.clone();
        if records.contains_key(&key) {
            return Err(StoreError::Backend(format!("workflow `{key}` already exists")));
        }
        records.insert(key, record);
        Ok(())
    }

    async fn find(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(&id.0).cloned())
    }

    async fn save(
        &self,
        record: WorkflowRecord,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let key = record.workflow.id.0.clone();
        let Some(current) = records.get(&key) else {
            return Err(StoreError::NotFound { workflow_id: key });
        };
        if current.workflow.state_version != expected_version {
            return Err(StoreError::VersionConflict {
                workflow_id: key,
                expected: expected_version,
                actual: current.workflow.state_version,
            });
        }
        records.insert(key, record);
        Ok(())
    }

    async fn list_open(&self) -> Result<Vec<WorkflowRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(Self::sorted(
            records.values().filter(|record| !record.workflow.status.is_terminal()).cloned().collect(),
        ))
    }

    async fn list_all(&self) -> Result<Vec<WorkflowRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(Self::sorted(records.values().cloned().collect()))
    }
}
