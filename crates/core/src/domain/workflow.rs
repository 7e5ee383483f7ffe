use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::action::{ActionId, Environment, RiskScore, ServerCriticality};
use crate::roles::ApproverRole;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Escalated,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    /// Terminal workflows are immutable; `Escalated` is explicitly not
    /// terminal, it reopens the active step under a higher role.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
    Escalated,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    /// An addressable step can still receive a decision: pending, or
    /// escalated and waiting for the raised role to act.
    pub fn is_addressable(&self) -> bool {
        matches!(self, Self::Pending | Self::Escalated)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    BasicApproval,
    ComplianceCheck,
    ImpactAssessment,
    SecurityReview,
    ChangeBoard,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BasicApproval => "basic_approval",
            Self::ComplianceCheck => "compliance_check",
            Self::ImpactAssessment => "impact_assessment",
            Self::SecurityReview => "security_review",
            Self::ChangeBoard => "change_board",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "basic_approval" => Some(Self::BasicApproval),
            "compliance_check" => Some(Self::ComplianceCheck),
            "impact_assessment" => Some(Self::ImpactAssessment),
            "security_review" => Some(Self::SecurityReview),
            "change_board" => Some(Self::ChangeBoard),
            _ => None,
        }
    }
}

/// Per-step routing metadata, fixed when the template is instantiated.
/// `quorum` is 1 for sequential steps; `conditions` is an extension point for
/// future rule data and is carried opaquely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepMetadata {
    pub timeout_hours: i64,
    pub auto_escalate: bool,
    pub parallel_approval: bool,
    pub quorum: u32,
    #[serde(default)]
    pub conditions: BTreeMap<String, serde_json::Value>,
}

impl StepMetadata {
    pub fn sequential(timeout_hours: i64, auto_escalate: bool) -> Self {
        Self {
            timeout_hours,
            auto_escalate,
            parallel_approval: false,
            quorum: 1,
            conditions: BTreeMap::new(),
        }
    }

    pub fn parallel(timeout_hours: i64, auto_escalate: bool, quorum: u32) -> Self {
        Self {
            timeout_hours,
            auto_escalate,
            parallel_approval: true,
            quorum,
            conditions: BTreeMap::new(),
        }
    }
}

/// One recorded approval inside a parallel-quorum step. Stored as a sub-list
/// of the step, not as extra steps, so the current-step pointer stays
/// single-valued.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepApproval {
    pub approver_user_id: String,
    pub approver_role: ApproverRole,
    pub comments: Option<String>,
    pub approved_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: StepId,
    pub workflow_id: WorkflowId,
    pub step_number: u32,
    pub step_type: StepType,
    pub required_role: ApproverRole,
    pub status: StepStatus,
    pub assigned_to: Option<String>,
    pub approved_by: Option<String>,
    pub comments: Option<String>,
    pub approvals: Vec<StepApproval>,
    pub metadata: StepMetadata,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStep {
    pub fn escalation_deadline(&self) -> DateTime<Utc> {
        self.created_at + Duration::hours(self.metadata.timeout_hours)
    }

    pub fn quorum_progress(&self) -> (u32, u32) {
        (self.approvals.len() as u32, self.metadata.quorum.max(1))
    }

    pub fn has_approval_from(&self, approver_user_id: &str) -> bool {
        self.approvals.iter().any(|approval| approval.approver_user_id == approver_user_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: WorkflowId,
    pub action_id: ActionId,
    pub risk_score: RiskScore,
    pub environment: Environment,
    pub server_criticality: ServerCriticality,
    pub impact_assessment: String,
    pub business_justification: String,
    pub escalation_reason: Option<String>,
    pub status: WorkflowStatus,
    pub current_step_index: u32,
    pub total_steps: u32,
    pub required_approvals: u32,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A workflow together with its ordered steps, the unit the store loads and
/// saves and the step processor transitions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub workflow: ApprovalWorkflow,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowRecord {
    pub fn active_step(&self) -> Option<&WorkflowStep> {
        self.steps.get(self.workflow.current_step_index as usize)
    }

    /// The workflow status is a pure function of step state; transitions
    /// recompute it through here instead of mutating it directly.
    pub fn derived_status(&self) -> WorkflowStatus {
        if self.steps.iter().any(|step| step.status == StepStatus::Rejected) {
            return WorkflowStatus::Rejected;
        }
        if !self.steps.is_empty() && self.steps.iter().all(|step| step.status == StepStatus::Approved)
        {
            return WorkflowStatus::Approved;
        }
        if self.active_step().is_some_and(|step| step.status == StepStatus::Escalated) {
            return WorkflowStatus::Escalated;
        }
        let decision_recorded = self
            .steps
            .iter()
            .any(|step| step.status != StepStatus::Pending || !step.approvals.is_empty());
        if decision_recorded {
            WorkflowStatus::InProgress
        } else {
            WorkflowStatus::Pending
        }
    }
}
