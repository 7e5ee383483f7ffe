use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use opsgate_core::audit::AuditEvent;
use opsgate_core::domain::workflow::WorkflowId;
use opsgate_core::ledger::ApprovalLedger;
use opsgate_core::notify::WorkflowNotification;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("sink failure: {0}")]
pub struct SinkError(pub String);

/// Write side of the audit trail. Implementations must tolerate replays:
/// the engine retries nothing, but operators may re-drive events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), SinkError>;
}

/// Read side of the audit trail, oldest event first.
#[async_trait]
pub trait AuditQuery: Send + Sync {
    async fn events_for_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<AuditEvent>, SinkError>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, notification: &WorkflowNotification) -> Result<(), SinkError>;
}

#[derive(Default)]
pub struct InMemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let mut events = self.events.write().await;
        events.push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl AuditQuery for InMemoryAuditSink {
    async fn events_for_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<AuditEvent>, SinkError> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|event| &event.workflow_id == workflow_id).cloned().collect())
    }
}

/// Delivers every event to every sink. All sinks are attempted even when an
/// earlier one fails; failures are reported together.
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AuditSink for FanoutAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(error) = sink.record(event).await {
                failures.push(error.0);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SinkError(failures.join("; ")))
        }
    }
}

/// Feeds audit events into the tamper-evident ledger chain.
pub struct LedgerAuditSink {
    ledger: Arc<ApprovalLedger>,
}

impl LedgerAuditSink {
    pub fn new(ledger: Arc<ApprovalLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl AuditSink for LedgerAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.ledger.record(event);
        Ok(())
    }
}

pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn publish(&self, _notification: &WorkflowNotification) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryNotificationSink {
    published: RwLock<Vec<WorkflowNotification>>,
}

impl InMemoryNotificationSink {
    pub async fn published(&self) -> Vec<WorkflowNotification> {
        self.published.read().await.clone()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn publish(&self, notification: &WorkflowNotification) -> Result<(), SinkError> {
        let mut published = self.published.write().await;
        published.push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use opsgate_core::audit::{AuditAction, AuditEvent};
    use opsgate_core::domain::workflow::WorkflowId;
    use opsgate_core::ledger::ApprovalLedger;

    use super::{
        AuditQuery, AuditSink, FanoutAuditSink, InMemoryAuditSink, LedgerAuditSink, SinkError,
    };

    struct FailingAuditSink;

    #[async_trait]
    impl AuditSink for FailingAuditSink {
        async fn record(&self, _event: &AuditEvent) -> Result<(), SinkError> {
            Err(SinkError("downstream unavailable".to_string()))
        }
    }

    fn sample_event(workflow_id: &str) -> AuditEvent {
        AuditEvent::new(
            WorkflowId(workflow_id.to_string()),
            None,
            AuditAction::Created,
            "u-op",
            Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn fanout_delivers_to_every_sink_despite_failures() {
        let memory = Arc::new(InMemoryAuditSink::default());
        let fanout = FanoutAuditSink::new(vec![
            Arc::new(FailingAuditSink),
            memory.clone() as Arc<dyn AuditSink>,
        ]);

        let error = fanout.record(&sample_event("wf-1")).await.expect_err("failure reported");
        assert!(error.0.contains("downstream unavailable"));
        assert_eq!(memory.events().await.len(), 1);
    }

    #[tokio::test]
    async fn ledger_sink_appends_chain_entries() {
        let ledger = Arc::new(ApprovalLedger::new("secret-key"));
        let sink = LedgerAuditSink::new(ledger.clone());

        sink.record(&sample_event("wf-1")).await.expect("record");
        sink.record(&sample_event("wf-1")).await.expect("record");

        let entries = ledger.entries_for_workflow(&WorkflowId("wf-1".to_string()));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].prev_hash, Some(entries[0].entry_hash.clone()));
    }

    #[tokio::test]
    async fn audit_query_filters_by_workflow() {
        let sink = InMemoryAuditSink::default();
        sink.record(&sample_event("wf-1")).await.expect("record");
        sink.record(&sample_event("wf-2")).await.expect("record");
        sink.record(&sample_event("wf-1")).await.expect("record");

        let events =
            sink.events_for_workflow(&WorkflowId("wf-1".to_string())).await.expect("query");
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.workflow_id.0 == "wf-1"));
    }
}
