//! Risk-band routing: which approval steps a remediation action needs.
//!
//! The rule table is cumulative over risk bands, so for a fixed environment
//! and criticality a higher risk score can never produce fewer steps or a
//! lower-authority chain than a lower one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::action::{ActionId, Environment, RiskScore, ServerCriticality};
use crate::domain::workflow::{
    ApprovalWorkflow, StepId, StepMetadata, StepStatus, StepType, WorkflowId, WorkflowRecord,
    WorkflowStatus, WorkflowStep,
};
use crate::errors::PolicyError;
use crate::roles::{ApproverRole, RolePolicyTable};

/// Band thresholds and per-step-type routing defaults. Loaded from the
/// `[routing]` configuration section; the defaults below are the shipped
/// table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    /// Actions below this score may run unattended; the originator checks
    /// `requires_approval` before opening a workflow.
    pub auto_execute_below: u8,
    pub impact_review_min_risk: u8,
    pub compliance_min_risk: u8,
    pub security_min_risk: u8,
    pub basic_timeout_hours: i64,
    pub impact_timeout_hours: i64,
    pub compliance_timeout_hours: i64,
    pub security_timeout_hours: i64,
    pub change_board_timeout_hours: i64,
    pub change_board_quorum: u32,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            auto_execute_below: 10,
            impact_review_min_risk: 30,
            compliance_min_risk: 50,
            security_min_risk: 80,
            basic_timeout_hours: 24,
            impact_timeout_hours: 24,
            compliance_timeout_hours: 48,
            security_timeout_hours: 48,
            change_board_timeout_hours: 72,
            change_board_quorum: 2,
        }
    }
}

impl RoutingPolicy {
    pub fn requires_approval(&self, risk: RiskScore) -> bool {
        risk.value() >= self.auto_execute_below
    }

    pub fn risk_band(&self, risk: RiskScore) -> RiskBand {
        let value = risk.value();
        if value >= self.security_min_risk {
            RiskBand::High
        } else if value >= self.compliance_min_risk {
            RiskBand::Elevated
        } else if value >= self.impact_review_min_risk {
            RiskBand::Moderate
        } else {
            RiskBand::Low
        }
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if !(self.impact_review_min_risk < self.compliance_min_risk
            && self.compliance_min_risk < self.security_min_risk
            && self.security_min_risk <= 100)
        {
            return Err(PolicyError::InvalidPolicyInput {
                field: "routing.band_thresholds".to_owned(),
                value: format!(
                    "{}/{}/{}",
                    self.impact_review_min_risk, self.compliance_min_risk, self.security_min_risk
                ),
            });
        }
        if self.change_board_quorum < 1 {
            return Err(PolicyError::InvalidPolicyInput {
                field: "routing.change_board_quorum".to_owned(),
                value: self.change_board_quorum.to_string(),
            });
        }
        for (field, hours) in [
            ("routing.basic_timeout_hours", self.basic_timeout_hours),
            ("routing.impact_timeout_hours", self.impact_timeout_hours),
            ("routing.compliance_timeout_hours", self.compliance_timeout_hours),
            ("routing.security_timeout_hours", self.security_timeout_hours),
            ("routing.change_board_timeout_hours", self.change_board_timeout_hours),
        ] {
            if hours < 1 {
                return Err(PolicyError::InvalidPolicyInput {
                    field: field.to_owned(),
                    value: hours.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Rollup bands shared between routing and the statistics aggregator so the
/// dashboard's "high" matches the routing table's "high".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,
    Moderate,
    Elevated,
    High,
}

impl RiskBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::Elevated => "elevated",
            Self::High => "high",
        }
    }
}

/// One planned step before instantiation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepBlueprint {
    pub step_type: StepType,
    pub required_role: ApproverRole,
    pub timeout_hours: i64,
    pub parallel_approval: bool,
    pub quorum: u32,
}

impl StepBlueprint {
    fn sequential(step_type: StepType, required_role: ApproverRole, timeout_hours: i64) -> Self {
        Self { step_type, required_role, timeout_hours, parallel_approval: false, quorum: 1 }
    }
}

/// Inbound creation request. The typed fields make the range and enum checks
/// happen at the adapter boundary; by the time a request exists, its inputs
/// are valid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateWorkflowRequest {
    pub action_id: ActionId,
    pub risk_score: RiskScore,
    pub environment: Environment,
    pub server_criticality: ServerCriticality,
    pub impact_assessment: String,
    pub business_justification: String,
}

#[derive(Clone, Debug)]
pub struct TemplateSelector {
    policy: RoutingPolicy,
    roles: RolePolicyTable,
}

impl TemplateSelector {
    pub fn new(policy: RoutingPolicy, roles: RolePolicyTable) -> Self {
        Self { policy, roles }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// The deterministic rule table. Bands are cumulative:
    /// - every workflow starts with `basic_approval` (operator);
    /// - risk at or above the impact threshold adds `impact_assessment`
    ///   (supervisor);
    /// - risk at or above the compliance threshold adds `compliance_check`
    ///   (manager) for production changes;
    /// - risk at or above the security threshold, or a critical server,
    ///   adds `security_review` (director);
    /// - a critical production server in that top band additionally goes to
    ///   the `change_board` (compliance officer, parallel quorum).
    pub fn select(
        &self,
        risk: RiskScore,
        criticality: ServerCriticality,
        environment: Environment,
    ) -> Vec<StepBlueprint> {
        let value = risk.value();
        let mut blueprints = vec![StepBlueprint::sequential(
            StepType::BasicApproval,
            ApproverRole::Operator,
            self.policy.basic_timeout_hours,
        )];

        if value >= self.policy.impact_review_min_risk {
            blueprints.push(StepBlueprint::sequential(
                StepType::ImpactAssessment,
                ApproverRole::Supervisor,
                self.policy.impact_timeout_hours,
            ));
        }

        if value >= self.policy.compliance_min_risk && environment == Environment::Production {
            blueprints.push(StepBlueprint::sequential(
                StepType::ComplianceCheck,
                ApproverRole::Manager,
                self.policy.compliance_timeout_hours,
            ));
        }

        let top_band =
            value >= self.policy.security_min_risk || criticality == ServerCriticality::Critical;
        if top_band {
            blueprints.push(StepBlueprint::sequential(
                StepType::SecurityReview,
                ApproverRole::Director,
                self.policy.security_timeout_hours,
            ));
            if environment == Environment::Production && criticality == ServerCriticality::Critical
            {
                blueprints.push(StepBlueprint {
                    step_type: StepType::ChangeBoard,
                    required_role: ApproverRole::ComplianceOfficer,
                    timeout_hours: self.policy.change_board_timeout_hours,
                    parallel_approval: true,
                    quorum: self.policy.change_board_quorum,
                });
            }
        }

        blueprints
    }

    /// Builds the workflow record for a creation request: fresh ids, all
    /// steps pending, pointer at the first step. `required_approvals` is the
    /// sum of quorums, so a change-board workflow needs more sign-offs than
    /// it has steps.
    pub fn instantiate(&self, request: &CreateWorkflowRequest, now: DateTime<Utc>) -> WorkflowRecord {
        let blueprints =
            self.select(request.risk_score, request.server_criticality, request.environment);
        let workflow_id = WorkflowId(Uuid::new_v4().to_string());

        let steps: Vec<WorkflowStep> = blueprints
            .iter()
            .enumerate()
            .map(|(index, blueprint)| {
                let auto_escalate =
                    self.roles.escalation_target(blueprint.required_role).is_some();
                let metadata = if blueprint.parallel_approval {
                    StepMetadata::parallel(blueprint.timeout_hours, auto_escalate, blueprint.quorum)
                } else {
                    StepMetadata::sequential(blueprint.timeout_hours, auto_escalate)
                };
                WorkflowStep {
                    id: StepId(Uuid::new_v4().to_string()),
                    workflow_id: workflow_id.clone(),
                    step_number: index as u32 + 1,
                    step_type: blueprint.step_type,
                    required_role: blueprint.required_role,
                    status: StepStatus::Pending,
                    assigned_to: None,
                    approved_by: None,
                    comments: None,
                    approvals: Vec::new(),
                    metadata,
                    created_at: now,
                    completed_at: None,
                }
            })
            .collect();

        let required_approvals: u32 = steps.iter().map(|step| step.metadata.quorum.max(1)).sum();
        let workflow = ApprovalWorkflow {
            id: workflow_id,
            action_id: request.action_id.clone(),
            risk_score: request.risk_score,
            environment: request.environment,
            server_criticality: request.server_criticality,
            impact_assessment: request.impact_assessment.clone(),
            business_justification: request.business_justification.clone(),
            escalation_reason: None,
            status: WorkflowStatus::Pending,
            current_step_index: 0,
            total_steps: steps.len() as u32,
            required_approvals,
            state_version: 0,
            created_at: now,
            updated_at: now,
        };

        WorkflowRecord { workflow, steps }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{CreateWorkflowRequest, RiskBand, RoutingPolicy, TemplateSelector};
    use crate::domain::action::{ActionId, Environment, RiskScore, ServerCriticality};
    use crate::domain::workflow::StepType;
    use crate::roles::{ApproverRole, RolePolicyTable};

    fn selector() -> TemplateSelector {
        TemplateSelector::new(RoutingPolicy::default(), RolePolicyTable::builtin())
    }

    fn risk(value: i64) -> RiskScore {
        RiskScore::new(value).expect("test risk score in range")
    }

    #[test]
    fn low_risk_routes_to_a_single_operator_step() {
        let blueprints =
            selector().select(risk(12), ServerCriticality::Low, Environment::Development);
        assert_eq!(blueprints.len(), 1);
        assert_eq!(blueprints[0].step_type, StepType::BasicApproval);
        assert_eq!(blueprints[0].required_role, ApproverRole::Operator);
        assert_eq!(blueprints[0].timeout_hours, 24);
        assert!(!blueprints[0].parallel_approval);
    }

    #[test]
    fn moderate_risk_adds_a_supervisor_impact_review() {
        let blueprints = selector().select(risk(40), ServerCriticality::Medium, Environment::Staging);
        let chain: Vec<_> =
            blueprints.iter().map(|b| (b.step_type, b.required_role)).collect();
        assert_eq!(
            chain,
            vec![
                (StepType::BasicApproval, ApproverRole::Operator),
                (StepType::ImpactAssessment, ApproverRole::Supervisor),
            ]
        );
    }

    #[test]
    fn compliance_check_applies_only_to_production() {
        let production =
            selector().select(risk(60), ServerCriticality::Medium, Environment::Production);
        assert!(production.iter().any(|b| b.step_type == StepType::ComplianceCheck));

        let staging = selector().select(risk(60), ServerCriticality::Medium, Environment::Staging);
        assert!(!staging.iter().any(|b| b.step_type == StepType::ComplianceCheck));
    }

    #[test]
    fn high_risk_production_chain_matches_the_standard_route() {
        let blueprints =
            selector().select(risk(85), ServerCriticality::High, Environment::Production);
        let chain: Vec<_> =
            blueprints.iter().map(|b| (b.step_type, b.required_role)).collect();
        assert_eq!(
            chain,
            vec![
                (StepType::BasicApproval, ApproverRole::Operator),
                (StepType::ImpactAssessment, ApproverRole::Supervisor),
                (StepType::ComplianceCheck, ApproverRole::Manager),
                (StepType::SecurityReview, ApproverRole::Director),
            ]
        );
    }

    #[test]
    fn critical_production_servers_convene_the_change_board() {
        let blueprints =
            selector().select(risk(85), ServerCriticality::Critical, Environment::Production);
        let board = blueprints.last().expect("non-empty chain");
        assert_eq!(board.step_type, StepType::ChangeBoard);
        assert_eq!(board.required_role, ApproverRole::ComplianceOfficer);
        assert!(board.parallel_approval);
        assert_eq!(board.quorum, 2);
    }

    #[test]
    fn critical_server_forces_security_review_even_at_low_risk() {
        let blueprints =
            selector().select(risk(20), ServerCriticality::Critical, Environment::Staging);
        assert!(blueprints.iter().any(|b| b.step_type == StepType::SecurityReview));
    }

    #[test]
    fn routing_is_monotone_in_risk_for_fixed_environment_and_criticality() {
        let selector = selector();
        for environment in [Environment::Development, Environment::Staging, Environment::Production]
        {
            for criticality in [
                ServerCriticality::Low,
                ServerCriticality::Medium,
                ServerCriticality::High,
                ServerCriticality::Critical,
            ] {
                let mut previous_len = 0usize;
                let mut previous_max_role = ApproverRole::Operator;
                for value in 0..=100 {
                    let blueprints = selector.select(risk(value), criticality, environment);
                    let max_role = blueprints
                        .iter()
                        .map(|b| b.required_role)
                        .max()
                        .expect("chain never empty");
                    assert!(
                        blueprints.len() >= previous_len,
                        "step count shrank at risk {value} ({environment:?}, {criticality:?})"
                    );
                    assert!(
                        max_role >= previous_max_role,
                        "max role dropped at risk {value} ({environment:?}, {criticality:?})"
                    );
                    previous_len = blueprints.len();
                    previous_max_role = max_role;
                }
            }
        }
    }

    #[test]
    fn auto_escalate_is_disabled_only_at_the_top_role() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        let record = selector().instantiate(
            &CreateWorkflowRequest {
                action_id: ActionId("ra-1".to_owned()),
                risk_score: risk(90),
                environment: Environment::Production,
                server_criticality: ServerCriticality::Critical,
                impact_assessment: "full cluster failover".to_owned(),
                business_justification: "disk failure imminent".to_owned(),
            },
            now,
        );

        for step in &record.steps {
            let expected = step.required_role != ApproverRole::ComplianceOfficer;
            assert_eq!(step.metadata.auto_escalate, expected, "step {:?}", step.step_type);
        }
    }

    #[test]
    fn instantiation_sums_quorums_into_required_approvals() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        let record = selector().instantiate(
            &CreateWorkflowRequest {
                action_id: ActionId("ra-2".to_owned()),
                risk_score: risk(90),
                environment: Environment::Production,
                server_criticality: ServerCriticality::Critical,
                impact_assessment: "kernel patch rollout".to_owned(),
                business_justification: "cve mitigation".to_owned(),
            },
            now,
        );

        assert_eq!(record.workflow.total_steps, 5);
        // four sequential sign-offs plus a quorum of two on the board
        assert_eq!(record.workflow.required_approvals, 6);
        assert_eq!(record.workflow.current_step_index, 0);
        assert_eq!(record.steps[0].step_number, 1);
        assert!(record.steps.iter().all(|step| step.completed_at.is_none()));
    }

    #[test]
    fn risk_bands_follow_the_routing_thresholds() {
        let policy = RoutingPolicy::default();
        assert_eq!(policy.risk_band(risk(5)), RiskBand::Low);
        assert_eq!(policy.risk_band(risk(30)), RiskBand::Moderate);
        assert_eq!(policy.risk_band(risk(79)), RiskBand::Elevated);
        assert_eq!(policy.risk_band(risk(80)), RiskBand::High);
    }

    #[test]
    fn auto_execute_ceiling_gates_workflow_creation() {
        let policy = RoutingPolicy::default();
        assert!(!policy.requires_approval(risk(9)));
        assert!(policy.requires_approval(risk(10)));
    }

    #[test]
    fn validation_rejects_unordered_band_thresholds() {
        let policy = RoutingPolicy { compliance_min_risk: 25, ..RoutingPolicy::default() };
        assert!(policy.validate().is_err());
        assert!(RoutingPolicy::default().validate().is_ok());
    }
}
