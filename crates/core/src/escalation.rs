//! Timeout-driven escalation.
//!
//! The monitor holds no privileged path into the state machine: it selects
//! overdue steps here and then submits ordinary escalation decisions under
//! the system actor. Everything else (locking, preconditions, audit) is the
//! same as for a human caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::workflow::{StepId, StepStatus, WorkflowId, WorkflowRecord, WorkflowStep};
use crate::roles::ApproverRole;
use crate::steps::{DecisionAction, DecisionRequest};

/// Actor recorded on monitor-initiated escalations.
pub const SYSTEM_ESCALATION_ACTOR: &str = "system-auto-escalation";

/// A step is overdue once strictly past its deadline. Escalated steps are
/// not overdue: they already got their role raise, which is what makes a
/// repeated sweep a no-op.
pub fn escalation_due(step: &WorkflowStep, now: DateTime<Utc>) -> bool {
    step.status == StepStatus::Pending
        && step.metadata.auto_escalate
        && now > step.escalation_deadline()
}

/// Only the active step of an open workflow is a sweep candidate.
pub fn due_step<'a>(record: &'a WorkflowRecord, now: DateTime<Utc>) -> Option<&'a WorkflowStep> {
    if record.workflow.status.is_terminal() {
        return None;
    }
    record.active_step().filter(|step| escalation_due(step, now))
}

pub fn escalation_request(record: &WorkflowRecord, step: &WorkflowStep) -> DecisionRequest {
    DecisionRequest {
        workflow_id: record.workflow.id.clone(),
        step_id: step.id.clone(),
        action: DecisionAction::Escalated,
        approver_user_id: SYSTEM_ESCALATION_ACTOR.to_owned(),
        approver_role: step.required_role,
        comments: Some(format!(
            "approval timeout of {}h exceeded",
            step.metadata.timeout_hours
        )),
    }
}

/// Per-candidate outcome of one sweep pass. `Escalated` is the productive
/// case; `Superseded` covers races the preconditions absorbed; `NoHigherRole`
/// needs operator attention; `Contended` and `Failed` are transient and
/// infrastructure failures respectively.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SweepAction {
    Escalated {
        workflow_id: WorkflowId,
        step_id: StepId,
        step_number: u32,
        raised_to: ApproverRole,
    },
    NoHigherRole {
        workflow_id: WorkflowId,
        step_id: StepId,
        role: ApproverRole,
    },
    Superseded {
        workflow_id: WorkflowId,
        detail: String,
    },
    Contended {
        workflow_id: WorkflowId,
    },
    Failed {
        workflow_id: WorkflowId,
        detail: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub due: usize,
    pub escalated: usize,
    pub actions: Vec<SweepAction>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
