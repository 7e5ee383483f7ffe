use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::workflow::{StepId, StepStatus, WorkflowId};
use crate::roles::ApproverRole;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Approved,
    Rejected,
    Escalated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "created" => Some(Self::Created),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }
}

/// One audit record per successful transition: who acted, on which step, and
/// the step status before and after. Creation events carry no step or status
/// pair. Timestamps are supplied by the caller so replays and tests stay
/// deterministic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub workflow_id: WorkflowId,
    pub step_id: Option<StepId>,
    pub action: AuditAction,
    pub actor: String,
    pub approver_role: Option<ApproverRole>,
    pub before_status: Option<StepStatus>,
    pub after_status: Option<StepStatus>,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        workflow_id: WorkflowId,
        step_id: Option<StepId>,
        action: AuditAction,
        actor: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            workflow_id,
            step_id,
            action,
            actor: actor.into(),
            approver_role: None,
            before_status: None,
            after_status: None,
            metadata: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn with_role(mut self, role: ApproverRole) -> Self {
        self.approver_role = Some(role);
        self
    }

    pub fn with_status_change(mut self, before: StepStatus, after: StepStatus) -> Self {
        self.before_status = Some(before);
        self.after_status = Some(after);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Canonical byte material the signed audit chain hashes. Field order is
    /// part of the chain format; changing it invalidates existing chains.
    pub fn chain_material(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.event_id,
            self.workflow_id.0,
            self.step_id.as_ref().map(|id| id.0.as_str()).unwrap_or("-"),
            self.action.as_str(),
            self.actor,
            self.before_status.map(|status| status.as_str()).unwrap_or("-"),
            self.after_status.map(|status| status.as_str()).unwrap_or("-"),
            self.occurred_at.to_rfc3339(),
        )
    }
}
