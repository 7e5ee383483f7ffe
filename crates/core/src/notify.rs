use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::action::ActionId;
use crate::domain::workflow::WorkflowId;
use crate::roles::ApproverRole;

/// Notifications fire on the transitions a human needs to hear about:
/// escalations and terminal outcomes. Delivery is a collaborator concern;
/// the engine only produces the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    Escalated { required_role: ApproverRole },
    Approved,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowNotification {
    pub workflow_id: WorkflowId,
    pub action_id: ActionId,
    #[serde(flatten)]
    pub kind: NotificationKind,
    pub occurred_at: DateTime<Utc>,
}
