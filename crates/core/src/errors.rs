use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::workflow::{StepId, WorkflowId, WorkflowStatus};
use crate::roles::ApproverRole;

/// Failures during template selection and policy input parsing. Unknown
/// enum inputs are refused rather than defaulted; silent defaulting would
/// mask a misconfigured caller and under-approve a production change.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyError {
    #[error("risk score {risk_score} is outside the allowed range 0..=100")]
    InvalidRiskScore { risk_score: i64 },
    #[error("invalid policy input for `{field}`: `{value}`")]
    InvalidPolicyInput { field: String, value: String },
}

/// Failures during decision application. Each precondition in the step
/// processor maps to exactly one variant; all are permanent for the call
/// that produced them.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionError {
    #[error("workflow `{workflow_id:?}` not found")]
    WorkflowNotFound { workflow_id: WorkflowId },
    #[error("step `{step_id:?}` is not the active step of workflow `{workflow_id:?}`")]
    StepNotActive { workflow_id: WorkflowId, step_id: StepId },
    #[error("role {approver_role:?} is below the required role {required_role:?}")]
    InsufficientAuthority { approver_role: ApproverRole, required_role: ApproverRole },
    #[error("workflow `{workflow_id:?}` is closed with terminal status {status:?}")]
    WorkflowClosed { workflow_id: WorkflowId, status: WorkflowStatus },
    #[error("no role ranks above {role:?}; escalation is not possible")]
    NoHigherRoleAvailable { role: ApproverRole },
    #[error("approver `{approver_user_id}` already recorded an approval on step `{step_id:?}`")]
    DuplicateApproval { step_id: StepId, approver_user_id: String },
}

impl DecisionError {
    /// Idempotence signals are the expected outcome when the escalation
    /// sweep loses a race with a human decision; callers log them at debug
    /// rather than treating them as faults.
    pub fn is_idempotence_signal(&self) -> bool {
        matches!(
            self,
            Self::StepNotActive { .. }
                | Self::InsufficientAuthority { .. }
                | Self::WorkflowClosed { .. }
        )
    }
}
