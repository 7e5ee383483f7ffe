use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use opsgate_core::audit::{AuditAction, AuditEvent};
use opsgate_core::config::EngineConfig;
use opsgate_core::domain::action::RiskScore;
use opsgate_core::domain::workflow::{WorkflowId, WorkflowRecord};
use opsgate_core::errors::DecisionError;
use opsgate_core::roles::{ApproverRole, RolePolicyTable};
use opsgate_core::stats::{StatisticsAggregator, StatisticsSnapshot, WorkflowSummary};
use opsgate_core::steps::{DecisionOutcome, DecisionRequest, StepProcessor};
use opsgate_core::templates::{CreateWorkflowRequest, RoutingPolicy, TemplateSelector};

use crate::sinks::{AuditQuery, AuditSink, NotificationSink, SinkError};
use crate::store::{StoreError, WorkflowStore};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Decision(#[from] DecisionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("audit query failed: {0}")]
    Audit(#[from] SinkError),
    #[error("workflow `{workflow_id}` is locked by another decision after {attempts} attempts")]
    LockContention { workflow_id: String, attempts: u32 },
}

/// Orchestrates workflow creation and decisions over pluggable storage and
/// sinks. State transitions themselves stay in `opsgate_core`; this type owns
/// the per-workflow serialization, persistence ordering, and emission.
pub struct WorkflowService {
    store: Arc<dyn WorkflowStore>,
    audit_sink: Arc<dyn AuditSink>,
    audit_query: Arc<dyn AuditQuery>,
    notifier: Arc<dyn NotificationSink>,
    selector: TemplateSelector,
    processor: StepProcessor,
    aggregator: StatisticsAggregator,
    policy: RoutingPolicy,
    roles: RolePolicyTable,
    engine: EngineConfig,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkflowService {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        audit_sink: Arc<dyn AuditSink>,
        audit_query: Arc<dyn AuditQuery>,
        notifier: Arc<dyn NotificationSink>,
        policy: RoutingPolicy,
        roles: RolePolicyTable,
        engine: EngineConfig,
    ) -> Self {
        Self {
            store,
            audit_sink,
            audit_query,
            notifier,
            selector: TemplateSelector::new(policy.clone(), roles.clone()),
            processor: StepProcessor::new(roles.clone()),
            aggregator: StatisticsAggregator::new(policy.clone()),
            policy,
            roles,
            engine,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Below the configured threshold the originator may execute unattended;
    /// everything else must come through `create_workflow`.
    pub fn requires_approval(&self, risk: RiskScore) -> bool {
        self.policy.requires_approval(risk)
    }

    pub async fn create_workflow(
        &self,
        request: CreateWorkflowRequest,
        requested_by: &str,
    ) -> Result<WorkflowRecord, EngineError> {
        let now = Utc::now();
        let record = self.selector.instantiate(&request, now);
        self.store.insert(record.clone()).await?;

        let event = AuditEvent::new(
            record.workflow.id.clone(),
            None,
            AuditAction::Created,
            requested_by,
            now,
        )
        .with_metadata("risk_score", record.workflow.risk_score.value().to_string())
        .with_metadata("environment", record.workflow.environment.as_str())
        .with_metadata("server_criticality", record.workflow.server_criticality.as_str())
        .with_metadata("total_steps", record.workflow.total_steps.to_string());
        self.record_audit(&event).await;

        Ok(record)
    }

    /// Applies one approval, rejection, or escalation under the per-workflow
    /// lock. The audit event and notification are emitted only after the
    /// state change is persisted; emission failures are logged and never roll
    /// the decision back.
    pub async fn decide(&self, request: DecisionRequest) -> Result<DecisionOutcome, EngineError> {
        let lock = self.lock_for(&request.workflow_id).await;
        let _guard = self.acquire(&lock, &request.workflow_id).await?;

        let record = self.store.find(&request.workflow_id).await?.ok_or_else(|| {
            DecisionError::WorkflowNotFound { workflow_id: request.workflow_id.clone() }
        })?;

        let expected_version = record.workflow.state_version;
        let outcome = self.processor.apply(record, &request, Utc::now())?;
        self.store.save(outcome.record.clone(), expected_version).await?;

        self.record_audit(&outcome.audit_event).await;
        if let Some(notification) = &outcome.notification {
            if let Err(error) = self.notifier.publish(notification).await {
                warn!(
                    workflow_id = %notification.workflow_id.0,
                    %error,
                    "notification sink rejected event",
                );
            }
        }

        Ok(outcome)
    }

    pub async fn get_workflow(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<WorkflowRecord>, EngineError> {
        Ok(self.store.find(id).await?)
    }

    pub async fn open_workflows(&self) -> Result<Vec<WorkflowRecord>, EngineError> {
        Ok(self.store.list_open().await?)
    }

    pub async fn audit_trail(&self, id: &WorkflowId) -> Result<Vec<AuditEvent>, EngineError> {
        Ok(self.audit_query.events_for_workflow(id).await?)
    }

    pub async fn statistics(&self) -> Result<StatisticsSnapshot, EngineError> {
        let records = self.store.list_all().await?;
        let workflows: Vec<_> = records.into_iter().map(|record| record.workflow).collect();
        Ok(self.aggregator.compute(&workflows, Utc::now()))
    }

    /// Open workflows whose active step the given role can decide right now.
    pub async fn actionable_for(
        &self,
        role: ApproverRole,
    ) -> Result<Vec<WorkflowSummary>, EngineError> {
        let records = self.store.list_open().await?;
        Ok(self.aggregator.actionable(&records, role, &self.roles))
    }

    async fn record_audit(&self, event: &AuditEvent) {
        if let Err(error) = self.audit_sink.record(event).await {
            warn!(workflow_id = %event.workflow_id.0, %error, "audit sink rejected event");
        }
    }

    async fn lock_for(&self, workflow_id: &WorkflowId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(workflow_id.0.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn acquire<'a>(
        &self,
        lock: &'a Mutex<()>,
        workflow_id: &WorkflowId,
    ) -> Result<MutexGuard<'a, ()>, EngineError> {
        let mut attempt = 0u32;
        loop {
            match lock.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(_) => {
                    attempt += 1;
                    if attempt >= self.engine.lock_retry_attempts {
                        return Err(EngineError::LockContention {
                            workflow_id: workflow_id.0.clone(),
                            attempts: attempt,
                        });
                    }
                    let backoff = Duration::from_millis(
                        self.engine.lock_retry_base_delay_ms.saturating_mul(u64::from(attempt)),
                    );
                    debug!(workflow_id = %workflow_id.0, attempt, "workflow lock busy, backing off");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
