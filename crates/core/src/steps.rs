//! The one transition function for approval decisions.
//!
//! Every caller goes through `StepProcessor::apply`: interactive approvers,
//! the bulk coordinator, and the escalation monitor. The function is pure
//! and by-value; callers own loading, locking, and persisting the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditAction, AuditEvent};
use crate::domain::workflow::{
    StepApproval, StepId, StepStatus, WorkflowId, WorkflowRecord, WorkflowStatus,
};
use crate::errors::DecisionError;
use crate::notify::{NotificationKind, WorkflowNotification};
use crate::roles::{ApproverRole, RolePolicyTable};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approved,
    Rejected,
    Escalated,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    pub fn audit_action(&self) -> AuditAction {
        match self {
            Self::Approved => AuditAction::Approved,
            Self::Rejected => AuditAction::Rejected,
            Self::Escalated => AuditAction::Escalated,
        }
    }
}

/// Identity fields are caller-supplied and trusted; authentication happens
/// upstream of the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub workflow_id: WorkflowId,
    pub step_id: StepId,
    pub action: DecisionAction,
    pub approver_user_id: String,
    pub approver_role: ApproverRole,
    pub comments: Option<String>,
}

/// What changed, for callers that log or render the result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTransition {
    pub step_id: StepId,
    pub step_number: u32,
    pub action: DecisionAction,
    pub before_step_status: StepStatus,
    pub after_step_status: StepStatus,
    pub before_workflow_status: WorkflowStatus,
    pub after_workflow_status: WorkflowStatus,
    pub quorum_progress: Option<(u32, u32)>,
    pub escalated_to: Option<ApproverRole>,
}

#[derive(Clone, Debug)]
pub struct DecisionOutcome {
    pub record: WorkflowRecord,
    pub transition: StepTransition,
    pub audit_event: AuditEvent,
    pub notification: Option<WorkflowNotification>,
}

#[derive(Clone, Debug, Default)]
pub struct StepProcessor {
    roles: RolePolicyTable,
}

impl StepProcessor {
    pub fn new(roles: RolePolicyTable) -> Self {
        Self { roles }
    }

    /// Applies one decision to the active step.
    ///
    /// Precondition order is part of the contract: a closed workflow reports
    /// `WorkflowClosed` even if the step id is also stale, and a stale step
    /// id reports `StepNotActive` before any authority check.
    pub fn apply(
        &self,
        record: WorkflowRecord,
        request: &DecisionRequest,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, DecisionError> {
        let WorkflowRecord { mut workflow, mut steps } = record;

        if workflow.status.is_terminal() {
            return Err(DecisionError::WorkflowClosed {
                workflow_id: workflow.id.clone(),
                status: workflow.status,
            });
        }

        let index = workflow.current_step_index as usize;
        let Some(active) = steps.get(index) else {
            return Err(DecisionError::StepNotActive {
                workflow_id: workflow.id.clone(),
                step_id: request.step_id.clone(),
            });
        };
        if active.id != request.step_id || !active.status.is_addressable() {
            return Err(DecisionError::StepNotActive {
                workflow_id: workflow.id.clone(),
                step_id: request.step_id.clone(),
            });
        }
        let required_role = active.required_role;
        if !self.roles.satisfies(request.approver_role, required_role) {
            return Err(DecisionError::InsufficientAuthority {
                approver_role: request.approver_role,
                required_role,
            });
        }

        let before_step_status = active.status;
        let before_workflow_status = workflow.status;
        let is_last = index + 1 == steps.len();
        let mut quorum_progress = None;
        let mut escalated_to = None;

        match request.action {
            DecisionAction::Approved => {
                let step = &mut steps[index];
                if step.metadata.parallel_approval {
                    if step.has_approval_from(&request.approver_user_id) {
                        return Err(DecisionError::DuplicateApproval {
                            step_id: step.id.clone(),
                            approver_user_id: request.approver_user_id.clone(),
                        });
                    }
                    step.approvals.push(StepApproval {
                        approver_user_id: request.approver_user_id.clone(),
                        approver_role: request.approver_role,
                        comments: request.comments.clone(),
                        approved_at: now,
                    });
                    let (recorded, quorum) = step.quorum_progress();
                    quorum_progress = Some((recorded, quorum));
                    if recorded >= quorum {
                        step.status = StepStatus::Approved;
                        step.approved_by = Some(request.approver_user_id.clone());
                        step.completed_at = Some(now);
                        if !is_last {
                            workflow.current_step_index += 1;
                        }
                    }
                } else {
                    step.status = StepStatus::Approved;
                    step.approved_by = Some(request.approver_user_id.clone());
                    step.comments = request.comments.clone();
                    step.completed_at = Some(now);
                    if !is_last {
                        workflow.current_step_index += 1;
                    }
                }
            }
            DecisionAction::Rejected => {
                let step = &mut steps[index];
                step.status = StepStatus::Rejected;
                step.approved_by = Some(request.approver_user_id.clone());
                step.comments = request.comments.clone();
                step.completed_at = Some(now);
            }
            DecisionAction::Escalated => {
                let step = &mut steps[index];
                let next = self
                    .roles
                    .escalation_target(step.required_role)
                    .ok_or(DecisionError::NoHigherRoleAvailable { role: step.required_role })?;
                step.required_role = next;
                step.status = StepStatus::Escalated;
                escalated_to = Some(next);
                workflow.escalation_reason = Some(
                    request
                        .comments
                        .clone()
                        .unwrap_or_else(|| format!("required role raised to {}", next.as_str())),
                );
            }
        }

        let mut record = WorkflowRecord { workflow, steps };
        let after_workflow_status = record.derived_status();
        record.workflow.status = after_workflow_status;
        record.workflow.updated_at = now;
        record.workflow.state_version += 1;

        let acted = &record.steps[index];
        let transition = StepTransition {
            step_id: acted.id.clone(),
            step_number: acted.step_number,
            action: request.action,
            before_step_status,
            after_step_status: acted.status,
            before_workflow_status,
            after_workflow_status,
            quorum_progress,
            escalated_to,
        };

        let mut audit_event = AuditEvent::new(
            record.workflow.id.clone(),
            Some(acted.id.clone()),
            request.action.audit_action(),
            request.approver_user_id.clone(),
            now,
        )
        .with_role(request.approver_role)
        .with_status_change(before_step_status, acted.status)
        .with_metadata("step_type", acted.step_type.as_str())
        .with_metadata("workflow_status_before", before_workflow_status.as_str())
        .with_metadata("workflow_status_after", after_workflow_status.as_str());
        if let Some((recorded, quorum)) = quorum_progress {
            audit_event = audit_event.with_metadata("quorum_progress", format!("{recorded}/{quorum}"));
        }
        if let Some(role) = escalated_to {
            audit_event = audit_event.with_metadata("escalated_to", role.as_str());
        }
        if let Some(comments) = &request.comments {
            audit_event = audit_event.with_metadata("comments", comments.clone());
        }

        let notification_kind = match after_workflow_status {
            WorkflowStatus::Escalated => {
                escalated_to.map(|role| NotificationKind::Escalated { required_role: role })
            }
            WorkflowStatus::Approved => Some(NotificationKind::Approved),
            WorkflowStatus::Rejected => Some(NotificationKind::Rejected),
            WorkflowStatus::Pending | WorkflowStatus::InProgress => None,
        };
        let notification = notification_kind.map(|kind| WorkflowNotification {
            workflow_id: record.workflow.id.clone(),
            action_id: record.workflow.action_id.clone(),
            kind,
            occurred_at: now,
        });

        Ok(DecisionOutcome { record, transition, audit_event, notification })
    }
}
