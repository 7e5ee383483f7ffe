use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::warn;

use opsgate_core::domain::workflow::WorkflowId;
use opsgate_core::errors::DecisionError;
use opsgate_core::roles::ApproverRole;
use opsgate_core::steps::{DecisionAction, DecisionRequest, StepTransition};

use crate::service::{EngineError, WorkflowService};

/// One decision to replay across many workflows, e.g. a supervisor clearing
/// the morning queue after an incident review.
#[derive(Clone, Debug, Serialize)]
pub struct BulkDecision {
    pub action: DecisionAction,
    pub approver_user_id: String,
    pub approver_role: ApproverRole,
    pub comments: Option<String>,
}

/// Per-workflow result of a bulk run. A refusal on one workflow carries no
/// implication for any other; callers render the list as-is.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BulkItemOutcome {
    Applied { workflow_id: WorkflowId, transition: StepTransition },
    Refused { workflow_id: WorkflowId, reason: DecisionError },
    Failed { workflow_id: WorkflowId, detail: String },
}

impl BulkItemOutcome {
    pub fn workflow_id(&self) -> &WorkflowId {
        match self {
            Self::Applied { workflow_id, .. }
            | Self::Refused { workflow_id, .. }
            | Self::Failed { workflow_id, .. } => workflow_id,
        }
    }
}

impl WorkflowService {
    /// Applies the same decision to each workflow concurrently. Every item
    /// still goes through `decide` and therefore takes its own workflow
    /// lock; the fan-out only removes the queueing between unrelated
    /// workflows. Outcomes come back in input order.
    pub async fn apply_bulk(
        self: &Arc<Self>,
        decision: BulkDecision,
        workflow_ids: Vec<WorkflowId>,
    ) -> Vec<BulkItemOutcome> {
        let mut outcomes: Vec<BulkItemOutcome> = workflow_ids
            .iter()
            .map(|id| BulkItemOutcome::Failed {
                workflow_id: id.clone(),
                detail: "bulk task did not complete".to_owned(),
            })
            .collect();

        let mut tasks = JoinSet::new();
        for (index, workflow_id) in workflow_ids.into_iter().enumerate() {
            let service = Arc::clone(self);
            let decision = decision.clone();
            tasks.spawn(async move { (index, service.bulk_item(decision, workflow_id).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = outcome,
                Err(error) => warn!(%error, "bulk decision task aborted"),
            }
        }
        outcomes
    }

    async fn bulk_item(&self, decision: BulkDecision, workflow_id: WorkflowId) -> BulkItemOutcome {
        let record = match self.get_workflow(&workflow_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return BulkItemOutcome::Refused {
                    reason: DecisionError::WorkflowNotFound { workflow_id: workflow_id.clone() },
                    workflow_id,
                }
            }
            Err(error) => {
                return BulkItemOutcome::Failed { workflow_id, detail: error.to_string() }
            }
        };

        let Some(step) = record.active_step() else {
            return BulkItemOutcome::Refused {
                reason: DecisionError::WorkflowClosed {
                    workflow_id: workflow_id.clone(),
                    status: record.workflow.status,
                },
                workflow_id,
            };
        };

        let request = DecisionRequest {
            workflow_id: workflow_id.clone(),
            step_id: step.id.clone(),
            action: decision.action,
            approver_user_id: decision.approver_user_id,
            approver_role: decision.approver_role,
            comments: decision.comments,
        };

        match self.decide(request).await {
            Ok(outcome) => BulkItemOutcome::Applied { workflow_id, transition: outcome.transition },
            Err(EngineError::Decision(reason)) => BulkItemOutcome::Refused { workflow_id, reason },
            Err(error) => BulkItemOutcome::Failed { workflow_id, detail: error.to_string() },
        }
    }
}
