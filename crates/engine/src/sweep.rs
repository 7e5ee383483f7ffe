use chrono::Utc;
use tracing::{debug, info, warn};

use opsgate_core::errors::DecisionError;
use opsgate_core::escalation::{self, SweepAction, SweepReport};

use crate::service::{EngineError, WorkflowService};

impl WorkflowService {
    /// One pass of the escalation monitor. Candidates are selected against a
    /// single timestamp and then escalated through `decide`, so a sweep
    /// racing a human approver loses cleanly and records the step as
    /// superseded. Running the sweep twice in a row escalates nothing the
    /// second time.
    pub async fn run_escalation_sweep(&self) -> Result<SweepReport, EngineError> {
        let started_at = Utc::now();
        let open = self.open_workflows().await?;
        let scanned = open.len();
        let mut due = 0usize;
        let mut escalated = 0usize;
        let mut actions = Vec::new();

        for record in &open {
            let Some(step) = escalation::due_step(record, started_at) else {
                continue;
            };
            due += 1;
            let workflow_id = record.workflow.id.clone();
            let step_id = step.id.clone();
            let step_number = step.step_number;

            let action = match self.decide(escalation::escalation_request(record, step)).await {
                Ok(outcome) => match outcome.transition.escalated_to {
                    Some(raised_to) => {
                        escalated += 1;
                        info!(
                            workflow_id = %workflow_id.0,
                            step_number,
                            raised_to = raised_to.as_str(),
                            "escalated overdue step",
                        );
                        SweepAction::Escalated { workflow_id, step_id, step_number, raised_to }
                    }
                    None => SweepAction::Failed {
                        workflow_id,
                        detail: "escalation decision produced no role change".to_owned(),
                    },
                },
                Err(EngineError::Decision(DecisionError::NoHigherRoleAvailable { role })) => {
                    warn!(
                        workflow_id = %workflow_id.0,
                        role = role.as_str(),
                        "overdue step already at the top of the role chain",
                    );
                    SweepAction::NoHigherRole { workflow_id, step_id, role }
                }
                Err(EngineError::Decision(reason)) if reason.is_idempotence_signal() => {
                    debug!(workflow_id = %workflow_id.0, %reason, "sweep candidate superseded");
                    SweepAction::Superseded { workflow_id, detail: reason.to_string() }
                }
                Err(EngineError::LockContention { .. }) => {
                    debug!(workflow_id = %workflow_id.0, "sweep candidate locked, deferring");
                    SweepAction::Contended { workflow_id }
                }
                Err(error) => {
                    warn!(workflow_id = %workflow_id.0, %error, "sweep escalation failed");
                    SweepAction::Failed { workflow_id, detail: error.to_string() }
                }
            };
            actions.push(action);
        }

        Ok(SweepReport { scanned, due, escalated, actions, started_at, finished_at: Utc::now() })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use opsgate_core::config::EngineConfig;
    use opsgate_core::domain::action::{ActionId, Environment, RiskScore, ServerCriticality};
    use opsgate_core::domain::workflow::{StepStatus, WorkflowRecord};
    use opsgate_core::escalation::{SweepAction, SYSTEM_ESCALATION_ACTOR};
    use opsgate_core::roles::{ApproverRole, RolePolicyTable};
    use opsgate_core::steps::{DecisionAction, DecisionRequest};
    use opsgate_core::templates::{CreateWorkflowRequest, RoutingPolicy, TemplateSelector};

    use crate::service::WorkflowService;
    use crate::sinks::{InMemoryAuditSink, InMemoryNotificationSink};
    use crate::store::{InMemoryWorkflowStore, WorkflowStore};

    fn harness() -> (Arc<WorkflowService>, Arc<InMemoryWorkflowStore>, Arc<InMemoryAuditSink>) {
        let store = Arc::new(InMemoryWorkflowStore::default());
        let audit = Arc::new(InMemoryAuditSink::default());
        let service = Arc::new(WorkflowService::new(
            store.clone(),
            audit.clone(),
            audit.clone(),
            Arc::new(InMemoryNotificationSink::default()),
            RoutingPolicy::default(),
            RolePolicyTable::builtin(),
            EngineConfig {
                lock_retry_attempts: 5,
                lock_retry_base_delay_ms: 1,
                sweep_interval_secs: 300,
            },
        ));
        (service, store, audit)
    }

    fn overdue_record(action: &str, risk: i64, hours_late: i64) -> WorkflowRecord {
        let selector = TemplateSelector::new(RoutingPolicy::default(), RolePolicyTable::builtin());
        selector.instantiate(
            &CreateWorkflowRequest {
                action_id: ActionId(action.to_owned()),
                risk_score: RiskScore::new(risk).unwrap(),
                environment: Environment::Staging,
                server_criticality: ServerCriticality::Medium,
                impact_assessment: "cache flush".to_owned(),
                business_justification: "stale config".to_owned(),
            },
            Utc::now() - Duration::hours(24 + hours_late),
        )
    }

    #[tokio::test]
    async fn overdue_steps_are_escalated_exactly_once() {
        let (service, store, audit) = harness();
        let record = overdue_record("ra-1", 40, 6);
        store.insert(record.clone()).await.unwrap();

        let report = service.run_escalation_sweep().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.due, 1);
        assert_eq!(report.escalated, 1);
        assert!(matches!(
            report.actions[0],
            SweepAction::Escalated { step_number: 1, raised_to: ApproverRole::Supervisor, .. }
        ));

        let swept = store.find(&record.workflow.id).await.unwrap().unwrap();
        assert_eq!(swept.steps[0].status, StepStatus::Escalated);
        assert_eq!(swept.steps[0].required_role, ApproverRole::Supervisor);

        let events = audit.events().await;
        assert_eq!(events.last().unwrap().actor, SYSTEM_ESCALATION_ACTOR);

        // Escalated steps are out of the candidate set, so the next pass
        // finds nothing to do.
        let repeat = service.run_escalation_sweep().await.unwrap();
        assert_eq!(repeat.due, 0);
        assert_eq!(repeat.escalated, 0);
        assert!(repeat.actions.is_empty());
    }

    #[tokio::test]
    async fn top_of_chain_steps_are_reported_without_blocking_others() {
        let (service, store, _) = harness();
        let mut stuck = overdue_record("ra-stuck", 40, 6);
        stuck.steps[0].required_role = ApproverRole::ComplianceOfficer;
        store.insert(stuck.clone()).await.unwrap();
        let normal = overdue_record("ra-normal", 40, 6);
        store.insert(normal.clone()).await.unwrap();

        let report = service.run_escalation_sweep().await.unwrap();
        assert_eq!(report.due, 2);
        assert_eq!(report.escalated, 1);

        let stuck_action = report
            .actions
            .iter()
            .find(|action| matches!(action, SweepAction::NoHigherRole { .. }))
            .expect("stuck step reported");
        assert!(matches!(
            stuck_action,
            SweepAction::NoHigherRole { role: ApproverRole::ComplianceOfficer, .. }
        ));
        assert!(report
            .actions
            .iter()
            .any(|action| matches!(action, SweepAction::Escalated { .. })));

        // The stuck step stays pending at its current role for an operator
        // to resolve by hand.
        let reloaded = store.find(&stuck.workflow.id).await.unwrap().unwrap();
        assert_eq!(reloaded.steps[0].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn steps_inside_their_window_are_left_alone() {
        let (service, _, _) = harness();
        service
            .create_workflow(
                CreateWorkflowRequest {
                    action_id: ActionId("ra-fresh".to_owned()),
                    risk_score: RiskScore::new(40).unwrap(),
                    environment: Environment::Staging,
                    server_criticality: ServerCriticality::Medium,
                    impact_assessment: "cache flush".to_owned(),
                    business_justification: "stale config".to_owned(),
                },
                "u-originator",
            )
            .await
            .unwrap();

        let report = service.run_escalation_sweep().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.due, 0);
        assert!(report.actions.is_empty());
    }

    #[tokio::test]
    async fn closed_workflows_are_outside_the_scan() {
        let (service, store, _) = harness();
        let record = overdue_record("ra-closed", 15, 6);
        store.insert(record.clone()).await.unwrap();
        let step = record.active_step().unwrap();
        service
            .decide(DecisionRequest {
                workflow_id: record.workflow.id.clone(),
                step_id: step.id.clone(),
                action: DecisionAction::Rejected,
                approver_user_id: "u-op".to_owned(),
                approver_role: ApproverRole::Operator,
                comments: None,
            })
            .await
            .unwrap();

        let report = service.run_escalation_sweep().await.unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(report.due, 0);
    }
}
