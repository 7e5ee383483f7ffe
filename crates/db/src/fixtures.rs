use chrono::{Duration, Utc};

use opsgate_core::domain::action::{ActionId, Environment, RiskScore, ServerCriticality};
use opsgate_core::domain::workflow::{StepId, WorkflowId, WorkflowRecord};
use opsgate_core::roles::RolePolicyTable;
use opsgate_core::templates::{CreateWorkflowRequest, RoutingPolicy, TemplateSelector};

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, SqlWorkflowStore};

/// Canonical demo workflows, one per routing outcome the default policy can
/// produce. The moderate one is created outside its approval window so a
/// follow-up escalation sweep has something to do.
const SEED_WORKFLOWS: &[SeedWorkflowContract] = &[
    SeedWorkflowContract {
        workflow_id: "wf-seed-restart-api",
        action_id: "seed-restart-api",
        risk_score: 18,
        environment: "development",
        server_criticality: "low",
        impact_assessment: "rolling restart of the api tier, no user-visible downtime",
        business_justification: "connection pool exhaustion after deploy",
        hours_ago: 1,
        expected_steps: 1,
        expected_status: "pending",
        description: "low risk, single operator sign-off",
    },
    SeedWorkflowContract {
        workflow_id: "wf-seed-rotate-certs",
        action_id: "seed-rotate-certs",
        risk_score: 45,
        environment: "staging",
        server_criticality: "medium",
        impact_assessment: "tls certificate rotation on the staging ingress",
        business_justification: "certificates expire in six days",
        hours_ago: 30,
        expected_steps: 2,
        expected_status: "pending",
        description: "moderate risk, overdue for escalation",
    },
    SeedWorkflowContract {
        workflow_id: "wf-seed-failover-db",
        action_id: "seed-failover-db",
        risk_score: 65,
        environment: "production",
        server_criticality: "high",
        impact_assessment: "planned failover of the primary database",
        business_justification: "replica lag trending up on current primary",
        hours_ago: 2,
        expected_steps: 3,
        expected_status: "pending",
        description: "elevated risk, production compliance chain",
    },
    SeedWorkflowContract {
        workflow_id: "wf-seed-patch-kernel",
        action_id: "seed-patch-kernel",
        risk_score: 92,
        environment: "production",
        server_criticality: "critical",
        impact_assessment: "kernel patch and reboot of the payment gateway hosts",
        business_justification: "critical cve with a public exploit",
        hours_ago: 3,
        expected_steps: 5,
        expected_status: "pending",
        description: "high risk, full chain with change board quorum",
    },
];

/// Deterministic demo dataset for local runs and end-to-end checks. Loading
/// replaces any previous copy of itself and touches nothing else.
pub struct SeedDataset;

impl SeedDataset {
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        Self::clean(pool).await?;

        let selector = TemplateSelector::new(RoutingPolicy::default(), RolePolicyTable::builtin());
        let store = SqlWorkflowStore::new(pool.clone());
        let mut workflows_seeded = Vec::new();

        for contract in SEED_WORKFLOWS {
            let record = contract.instantiate(&selector)?;
            store.insert_record(&record).await?;
            workflows_seeded.push(SeedWorkflowInfo {
                workflow_id: contract.workflow_id,
                action_id: contract.action_id,
                description: contract.description,
            });
        }

        Ok(SeedResult { workflows_seeded })
    }

    /// Verify that the seeded rows exist and still match the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for contract in SEED_WORKFLOWS {
            let workflow_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM approval_workflow
                 WHERE id = ?1 AND action_id = ?2 AND risk_score = ?3 AND status = ?4)",
            )
            .bind(contract.workflow_id)
            .bind(contract.action_id)
            .bind(contract.risk_score)
            .bind(contract.expected_status)
            .fetch_one(pool)
            .await?;
            checks.push((format!("{}-workflow", contract.action_id), workflow_ok == 1));

            let step_count: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM workflow_step WHERE workflow_id = ?1")
                    .bind(contract.workflow_id)
                    .fetch_one(pool)
                    .await?;
            checks.push((
                format!("{}-step-count", contract.action_id),
                step_count == contract.expected_steps,
            ));

            let first_step_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM workflow_step
                 WHERE workflow_id = ?1 AND step_number = 1
                   AND required_role = 'operator' AND status = 'pending')",
            )
            .bind(contract.workflow_id)
            .fetch_one(pool)
            .await?;
            checks.push((format!("{}-first-step", contract.action_id), first_step_ok == 1));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Remove the seeded workflows and any audit rows a demo session wrote
    /// against them. Step and approval rows go with the workflow cascade.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let ids = sql_array_from_ids(
            &SEED_WORKFLOWS.iter().map(|c| c.workflow_id).collect::<Vec<_>>(),
        );
        sqlx::query(&format!("DELETE FROM audit_event WHERE workflow_id IN {ids}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM approval_workflow WHERE id IN {ids}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedWorkflowContract {
    workflow_id: &'static str,
    action_id: &'static str,
    risk_score: i64,
    environment: &'static str,
    server_criticality: &'static str,
    impact_assessment: &'static str,
    business_justification: &'static str,
    hours_ago: i64,
    expected_steps: i64,
    expected_status: &'static str,
    description: &'static str,
}

impl SeedWorkflowContract {
    fn instantiate(&self, selector: &TemplateSelector) -> Result<WorkflowRecord, RepositoryError> {
        let environment = Environment::parse(self.environment).ok_or_else(|| {
            RepositoryError::Decode(format!("seed environment `{}`", self.environment))
        })?;
        let server_criticality =
            ServerCriticality::parse(self.server_criticality).ok_or_else(|| {
                RepositoryError::Decode(format!("seed criticality `{}`", self.server_criticality))
            })?;
        let risk_score = RiskScore::new(self.risk_score)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        let request = CreateWorkflowRequest {
            action_id: ActionId(self.action_id.to_owned()),
            risk_score,
            environment,
            server_criticality,
            impact_assessment: self.impact_assessment.to_owned(),
            business_justification: self.business_justification.to_owned(),
        };
        let created_at = Utc::now() - Duration::hours(self.hours_ago);
        let mut record = selector.instantiate(&request, created_at);

        // Replace the generated ids so re-runs and docs refer to stable names.
        record.workflow.id = WorkflowId(self.workflow_id.to_owned());
        for (index, step) in record.steps.iter_mut().enumerate() {
            step.id = StepId(format!("{}-step-{}", self.workflow_id, index + 1));
            step.workflow_id = record.workflow.id.clone();
        }
        Ok(record)
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub workflows_seeded: Vec<SeedWorkflowInfo>,
}

#[derive(Debug)]
pub struct SeedWorkflowInfo {
    pub workflow_id: &'static str,
    pub action_id: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}
