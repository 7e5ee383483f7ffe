//! Derived read models: dashboard rollups and the per-role work queue.
//!
//! Everything here is recomputed from workflow state on read. Nothing is a
//! source of truth and nothing here mutates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::action::{ActionId, Environment, ServerCriticality};
use crate::domain::workflow::{
    ApprovalWorkflow, StepType, WorkflowId, WorkflowRecord, WorkflowStatus,
};
use crate::roles::{ApproverRole, RolePolicyTable};
use crate::templates::{RiskBand, RoutingPolicy};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub total: u64,
    pub open: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_risk_band: BTreeMap<String, u64>,
    pub by_environment: BTreeMap<String, u64>,
    pub by_criticality: BTreeMap<String, u64>,
    pub generated_at: DateTime<Utc>,
}

/// One row of the actionable-workflow listing: workflow status as a derived
/// projection plus the active step a caller could act on right now.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub workflow_id: WorkflowId,
    pub action_id: ActionId,
    pub risk_score: u8,
    pub risk_band: RiskBand,
    pub environment: Environment,
    pub server_criticality: ServerCriticality,
    pub status: WorkflowStatus,
    pub step_number: u32,
    pub total_steps: u32,
    pub step_type: StepType,
    pub required_role: ApproverRole,
    pub waiting_since: DateTime<Utc>,
    pub escalation_deadline: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct StatisticsAggregator {
    policy: RoutingPolicy,
}

impl StatisticsAggregator {
    pub fn new(policy: RoutingPolicy) -> Self {
        Self { policy }
    }

    pub fn compute(
        &self,
        workflows: &[ApprovalWorkflow],
        now: DateTime<Utc>,
    ) -> StatisticsSnapshot {
        let mut by_status = BTreeMap::new();
        let mut by_risk_band = BTreeMap::new();
        let mut by_environment = BTreeMap::new();
        let mut by_criticality = BTreeMap::new();
        let mut open = 0u64;

        for workflow in workflows {
            *by_status.entry(workflow.status.as_str().to_owned()).or_insert(0) += 1;
            let band = self.policy.risk_band(workflow.risk_score);
            *by_risk_band.entry(band.as_str().to_owned()).or_insert(0) += 1;
            *by_environment.entry(workflow.environment.as_str().to_owned()).or_insert(0) += 1;
            *by_criticality.entry(workflow.server_criticality.as_str().to_owned()).or_insert(0) +=
                1;
            if !workflow.status.is_terminal() {
                open += 1;
            }
        }

        StatisticsSnapshot {
            total: workflows.len() as u64,
            open,
            by_status,
            by_risk_band,
            by_environment,
            by_criticality,
            generated_at: now,
        }
    }

    /// Work queue for one caller: open workflows whose active step the
    /// caller's role may act on, within the role's authority limits.
    /// Ordered highest risk first, then longest waiting.
    pub fn actionable(
        &self,
        records: &[WorkflowRecord],
        role: ApproverRole,
        table: &RolePolicyTable,
    ) -> Vec<WorkflowSummary> {
        let mut summaries: Vec<WorkflowSummary> = records
            .iter()
            .filter(|record| !record.workflow.status.is_terminal())
            .filter_map(|record| {
                let step = record.active_step()?;
                if !step.status.is_addressable() {
                    return None;
                }
                if role < step.required_role {
                    return None;
                }
                if !table.can_act_on(role, record.workflow.risk_score, record.workflow.environment)
                {
                    return None;
                }
                Some(WorkflowSummary {
                    workflow_id: record.workflow.id.clone(),
                    action_id: record.workflow.action_id.clone(),
                    risk_score: record.workflow.risk_score.value(),
                    risk_band: self.policy.risk_band(record.workflow.risk_score),
                    environment: record.workflow.environment,
                    server_criticality: record.workflow.server_criticality,
                    status: record.workflow.status,
                    step_number: step.step_number,
                    total_steps: record.workflow.total_steps,
                    step_type: step.step_type,
                    required_role: step.required_role,
                    waiting_since: step.created_at,
                    escalation_deadline: step.escalation_deadline(),
                })
            })
            .collect();

        summaries.sort_by(|a, b| {
            b.risk_score.cmp(&a.risk_score).then(a.waiting_since.cmp(&b.waiting_since))
        });
        summaries
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::StatisticsAggregator;
    use crate::domain::action::{ActionId, Environment, RiskScore, ServerCriticality};
    use crate::domain::workflow::{StepStatus, WorkflowRecord, WorkflowStatus};
    use crate::roles::{ApproverRole, RolePolicyTable};
    use crate::templates::{CreateWorkflowRequest, RoutingPolicy, TemplateSelector};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap()
    }

    fn record(
        action: &str,
        risk: i64,
        environment: Environment,
        criticality: ServerCriticality,
        created_at: DateTime<Utc>,
    ) -> WorkflowRecord {
        let selector = TemplateSelector::new(RoutingPolicy::default(), RolePolicyTable::builtin());
        selector.instantiate(
            &CreateWorkflowRequest {
                action_id: ActionId(action.to_owned()),
                risk_score: RiskScore::new(risk).unwrap(),
                environment,
                server_criticality: criticality,
                impact_assessment: "assessment".to_owned(),
                business_justification: "justification".to_owned(),
            },
            created_at,
        )
    }

    #[test]
    fn rollups_group_by_status_band_environment_and_criticality() {
        let aggregator = StatisticsAggregator::new(RoutingPolicy::default());
        let mut low = record("ra-1", 12, Environment::Development, ServerCriticality::Low, t0());
        let high =
            record("ra-2", 85, Environment::Production, ServerCriticality::High, t0());
        let moderate =
            record("ra-3", 35, Environment::Production, ServerCriticality::Medium, t0());
        low.workflow.status = WorkflowStatus::Approved;

        let workflows =
            vec![low.workflow.clone(), high.workflow.clone(), moderate.workflow.clone()];
        let snapshot = aggregator.compute(&workflows, t0());

        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.open, 2);
        assert_eq!(snapshot.by_status.get("approved"), Some(&1));
        assert_eq!(snapshot.by_status.get("pending"), Some(&2));
        assert_eq!(snapshot.by_risk_band.get("high"), Some(&1));
        assert_eq!(snapshot.by_risk_band.get("moderate"), Some(&1));
        assert_eq!(snapshot.by_risk_band.get("low"), Some(&1));
        assert_eq!(snapshot.by_environment.get("production"), Some(&2));
        assert_eq!(snapshot.by_criticality.get("high"), Some(&1));
    }

    #[test]
    fn work_queue_filters_by_the_active_step_required_role() {
        let aggregator = StatisticsAggregator::new(RoutingPolicy::default());
        let table = RolePolicyTable::builtin();

        // operator-level first step
        let fresh = record("ra-1", 85, Environment::Production, ServerCriticality::High, t0());
        // supervisor-level active step
        let mut advanced =
            record("ra-2", 40, Environment::Staging, ServerCriticality::Medium, t0());
        advanced.steps[0].status = StepStatus::Approved;
        advanced.workflow.current_step_index = 1;
        advanced.workflow.status = advanced.derived_status();

        let records = vec![fresh.clone(), advanced.clone()];

        let operator_queue = aggregator.actionable(&records, ApproverRole::Operator, &table);
        assert_eq!(operator_queue.len(), 1);
        assert_eq!(operator_queue[0].workflow_id, fresh.workflow.id);

        let supervisor_queue = aggregator.actionable(&records, ApproverRole::Supervisor, &table);
        assert_eq!(supervisor_queue.len(), 2);
    }

    #[test]
    fn terminal_workflows_drop_out_of_the_queue() {
        let aggregator = StatisticsAggregator::new(RoutingPolicy::default());
        let table = RolePolicyTable::builtin();
        let mut rejected =
            record("ra-1", 60, Environment::Production, ServerCriticality::High, t0());
        rejected.steps[0].status = StepStatus::Rejected;
        rejected.workflow.status = rejected.derived_status();

        let queue =
            aggregator.actionable(&[rejected], ApproverRole::ComplianceOfficer, &table);
        assert!(queue.is_empty());
    }

    #[test]
    fn escalated_steps_surface_under_the_raised_role() {
        let aggregator = StatisticsAggregator::new(RoutingPolicy::default());
        let table = RolePolicyTable::builtin();
        let mut escalated =
            record("ra-1", 15, Environment::Development, ServerCriticality::Low, t0());
        escalated.steps[0].status = StepStatus::Escalated;
        escalated.steps[0].required_role = ApproverRole::Supervisor;
        escalated.workflow.status = escalated.derived_status();

        let records = vec![escalated.clone()];
        assert!(aggregator.actionable(&records, ApproverRole::Operator, &table).is_empty());

        let supervisor_queue = aggregator.actionable(&records, ApproverRole::Supervisor, &table);
        assert_eq!(supervisor_queue.len(), 1);
        assert_eq!(supervisor_queue[0].status, WorkflowStatus::Escalated);
        assert_eq!(supervisor_queue[0].required_role, ApproverRole::Supervisor);
    }

    #[test]
    fn queue_orders_by_risk_then_waiting_time() {
        let aggregator = StatisticsAggregator::new(RoutingPolicy::default());
        let table = RolePolicyTable::builtin();
        let older_low = record("ra-1", 20, Environment::Staging, ServerCriticality::Low, t0());
        let newer_high = record(
            "ra-2",
            90,
            Environment::Staging,
            ServerCriticality::High,
            t0() + Duration::hours(2),
        );
        let older_high =
            record("ra-3", 90, Environment::Staging, ServerCriticality::High, t0());

        let queue = aggregator.actionable(
            &[older_low.clone(), newer_high.clone(), older_high.clone()],
            ApproverRole::Operator,
            &table,
        );

        let order: Vec<_> = queue.iter().map(|summary| summary.action_id.0.as_str()).collect();
        assert_eq!(order, vec!["ra-3", "ra-2", "ra-1"]);
    }

    #[test]
    fn tightened_authority_limits_hide_workflows_from_the_queue() {
        let aggregator = StatisticsAggregator::new(RoutingPolicy::default());
        let table = RolePolicyTable::new(vec![crate::roles::RoleAuthority {
            role: ApproverRole::Operator,
            max_risk_score: 50,
            max_server_count: 5,
            allowed_environments: vec![Environment::Development],
        }]);
        let production = record("ra-1", 20, Environment::Production, ServerCriticality::Low, t0());
        let development =
            record("ra-2", 20, Environment::Development, ServerCriticality::Low, t0());

        let queue = aggregator.actionable(
            &[production, development.clone()],
            ApproverRole::Operator,
            &table,
        );

        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].workflow_id, development.workflow.id);
    }
}
