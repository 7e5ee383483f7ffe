pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod escalation;
pub mod ledger;
pub mod notify;
pub mod roles;
pub mod stats;
pub mod steps;
pub mod templates;

pub use domain::action::{ActionId, Environment, RiskScore, ServerCriticality};
pub use domain::workflow::{
    ApprovalWorkflow, StepApproval, StepId, StepMetadata, StepStatus, StepType, WorkflowId,
    WorkflowRecord, WorkflowStatus, WorkflowStep,
};
pub use errors::{DecisionError, PolicyError};
pub use escalation::{SweepAction, SweepReport, SYSTEM_ESCALATION_ACTOR};
pub use ledger::{ApprovalLedger, ChainStatus, LedgerEntry};
pub use notify::{NotificationKind, WorkflowNotification};
pub use roles::{ApproverRole, RoleAuthority, RolePolicyTable};
pub use stats::{StatisticsAggregator, StatisticsSnapshot, WorkflowSummary};
pub use steps::{DecisionAction, DecisionOutcome, DecisionRequest, StepProcessor, StepTransition};
pub use templates::{
    CreateWorkflowRequest, RiskBand, RoutingPolicy, StepBlueprint, TemplateSelector,
};
