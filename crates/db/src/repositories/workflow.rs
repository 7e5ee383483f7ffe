use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use opsgate_core::domain::action::{ActionId, Environment, RiskScore, ServerCriticality};
use opsgate_core::domain::workflow::{
    ApprovalWorkflow, StepApproval, StepId, StepMetadata, StepStatus, StepType, WorkflowId,
    WorkflowRecord, WorkflowStatus, WorkflowStep,
};
use opsgate_core::roles::ApproverRole;
use opsgate_engine::{StoreError, WorkflowStore};

use super::RepositoryError;
use crate::DbPool;

pub struct SqlWorkflowStore {
    pool: DbPool,
}

/// Outcome of the guarded workflow update, so the trait impl can tell a
/// missing row from a stale one without a second round trip.
enum SaveCheck {
    Applied,
    Missing,
    Stale { actual: u32 },
}

impl SqlWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert_record(&self, record: &WorkflowRecord) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let workflow = &record.workflow;
        sqlx::query(
            "INSERT INTO approval_workflow (id, action_id, risk_score, environment,
                                            server_criticality, impact_assessment,
                                            business_justification, escalation_reason, status,
                                            current_step_index, total_steps, required_approvals,
                                            state_version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&workflow.id.0)
        .bind(&workflow.action_id.0)
        .bind(i64::from(workflow.risk_score.value()))
        .bind(workflow.environment.as_str())
        .bind(workflow.server_criticality.as_str())
        .bind(&workflow.impact_assessment)
        .bind(&workflow.business_justification)
        .bind(&workflow.escalation_reason)
        .bind(workflow.status.as_str())
        .bind(workflow.current_step_index)
        .bind(workflow.total_steps)
        .bind(workflow.required_approvals)
        .bind(workflow.state_version)
        .bind(workflow.created_at.to_rfc3339())
        .bind(workflow.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for step in &record.steps {
            let conditions = serde_json::to_string(&step.metadata.conditions)
                .map_err(|error| RepositoryError::Decode(error.to_string()))?;
            sqlx::query(
                "INSERT INTO workflow_step (id, workflow_id, step_number, step_type,
                                            required_role, status, assigned_to, approved_by,
                                            comments, timeout_hours, auto_escalate,
                                            parallel_approval, quorum, conditions, created_at,
                                            completed_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&step.id.0)
            .bind(&step.workflow_id.0)
            .bind(step.step_number)
            .bind(step.step_type.as_str())
            .bind(step.required_role.as_str())
            .bind(step.status.as_str())
            .bind(&step.assigned_to)
            .bind(&step.approved_by)
            .bind(&step.comments)
            .bind(step.metadata.timeout_hours)
            .bind(step.metadata.auto_escalate)
            .bind(step.metadata.parallel_approval)
            .bind(step.metadata.quorum)
            .bind(conditions)
            .bind(step.created_at.to_rfc3339())
            .bind(step.completed_at.map(|at| at.to_rfc3339()))
            .execute(&mut *tx)
            .await?;

            for approval in &step.approvals {
                insert_approval(&mut tx, &step.id, approval).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn load_record(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<WorkflowRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, action_id, risk_score, environment, server_criticality,
                    impact_assessment, business_justification, escalation_reason, status,
                    current_step_index, total_steps, required_approvals, state_version,
                    created_at, updated_at
             FROM approval_workflow WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => {
                let workflow = row_to_workflow(row)?;
                let steps = self.load_steps(id).await?;
                Ok(Some(WorkflowRecord { workflow, steps }))
            }
            None => Ok(None),
        }
    }

    pub async fn list_records(&self, open_only: bool) -> Result<Vec<WorkflowRecord>, RepositoryError> {
        let base = "SELECT id, action_id, risk_score, environment, server_criticality,
                           impact_assessment, business_justification, escalation_reason, status,
                           current_step_index, total_steps, required_approvals, state_version,
                           created_at, updated_at
                    FROM approval_workflow";
        let rows: Vec<SqliteRow> = if open_only {
            sqlx::query(&format!(
                "{base} WHERE status NOT IN ('approved', 'rejected') ORDER BY created_at ASC, id ASC"
            ))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!("{base} ORDER BY created_at ASC, id ASC"))
                .fetch_all(&self.pool)
                .await?
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let workflow = row_to_workflow(row)?;
            let steps = self.load_steps(&workflow.id).await?;
            records.push(WorkflowRecord { workflow, steps });
        }
        Ok(records)
    }

    /// Applies the new state only when the stored `state_version` still
    /// matches what the caller read. Steps are upserted and approvals are
    /// append-only; re-inserting a recorded approval is a no-op.
    async fn update_record(
        &self,
        record: &WorkflowRecord,
        expected_version: u32,
    ) -> Result<SaveCheck, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let workflow = &record.workflow;
        let guarded = sqlx::query(
            "UPDATE approval_workflow
             SET escalation_reason = ?, status = ?, current_step_index = ?, state_version = ?,
                 updated_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(&workflow.escalation_reason)
        .bind(workflow.status.as_str())
        .bind(workflow.current_step_index)
        .bind(workflow.state_version)
        .bind(workflow.updated_at.to_rfc3339())
        .bind(&workflow.id.0)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if guarded.rows_affected() == 0 {
            let actual: Option<u32> =
                sqlx::query_scalar("SELECT state_version FROM approval_workflow WHERE id = ?")
                    .bind(&workflow.id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Ok(match actual {
                Some(actual) => SaveCheck::Stale { actual },
                None => SaveCheck::Missing,
            });
        }

        for step in &record.steps {
            sqlx::query(
                "UPDATE workflow_step
                 SET required_role = ?, status = ?, assigned_to = ?, approved_by = ?,
                     comments = ?, completed_at = ?
                 WHERE id = ?",
            )
            .bind(step.required_role.as_str())
            .bind(step.status.as_str())
            .bind(&step.assigned_to)
            .bind(&step.approved_by)
            .bind(&step.comments)
            .bind(step.completed_at.map(|at| at.to_rfc3339()))
            .bind(&step.id.0)
            .execute(&mut *tx)
            .await?;

            for approval in &step.approvals {
                insert_approval(&mut tx, &step.id, approval).await?;
            }
        }

        tx.commit().await?;
        Ok(SaveCheck::Applied)
    }

    async fn load_steps(&self, workflow_id: &WorkflowId) -> Result<Vec<WorkflowStep>, RepositoryError> {
        let step_rows: Vec<SqliteRow> = sqlx::query(
            "SELECT id, workflow_id, step_number, step_type, required_role, status, assigned_to,
                    approved_by, comments, timeout_hours, auto_escalate, parallel_approval,
                    quorum, conditions, created_at, completed_at
             FROM workflow_step WHERE workflow_id = ? ORDER BY step_number ASC",
        )
        .bind(&workflow_id.0)
        .fetch_all(&self.pool)
        .await?;

        let approval_rows: Vec<SqliteRow> = sqlx::query(
            "SELECT sa.step_id, sa.approver_user_id, sa.approver_role, sa.comments, sa.approved_at
             FROM step_approval sa
             JOIN workflow_step ws ON ws.id = sa.step_id
             WHERE ws.workflow_id = ?
             ORDER BY sa.approved_at ASC, sa.rowid ASC",
        )
        .bind(&workflow_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut approvals_by_step: HashMap<String, Vec<StepApproval>> = HashMap::new();
        for row in &approval_rows {
            let (step_id, approval) = row_to_approval(row)?;
            approvals_by_step.entry(step_id).or_default().push(approval);
        }

        let mut steps = Vec::with_capacity(step_rows.len());
        for row in &step_rows {
            let mut step = row_to_step(row)?;
            if let Some(approvals) = approvals_by_step.remove(&step.id.0) {
                step.approvals = approvals;
            }
            steps.push(step);
        }
        Ok(steps)
    }
}

#[async_trait]
impl WorkflowStore for SqlWorkflowStore {
    async fn insert(&self, record: WorkflowRecord) -> Result<(), StoreError> {
        self.insert_record(&record).await.map_err(Into::into)
    }

    async fn find(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>, StoreError> {
        self.load_record(id).await.map_err(Into::into)
    }

    async fn save(
        &self,
        record: WorkflowRecord,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        match self.update_record(&record, expected_version).await.map_err(StoreError::from)? {
            SaveCheck::Applied => Ok(()),
            SaveCheck::Missing => {
                Err(StoreError::NotFound { workflow_id: record.workflow.id.0.clone() })
            }
            SaveCheck::Stale { actual } => Err(StoreError::VersionConflict {
                workflow_id: record.workflow.id.0.clone(),
                expected: expected_version,
                actual,
            }),
        }
    }

    async fn list_open(&self) -> Result<Vec<WorkflowRecord>, StoreError> {
        self.list_records(true).await.map_err(Into::into)
    }

    async fn list_all(&self) -> Result<Vec<WorkflowRecord>, StoreError> {
        self.list_records(false).await.map_err(Into::into)
    }
}

async fn insert_approval(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    step_id: &StepId,
    approval: &StepApproval,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO step_approval (step_id, approver_user_id, approver_role, comments,
                                    approved_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(step_id, approver_user_id) DO NOTHING",
    )
    .bind(&step_id.0)
    .bind(&approval.approver_user_id)
    .bind(approval.approver_role.as_str())
    .bind(&approval.comments)
    .bind(approval.approved_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn decode_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("column `{column}`: {error}")))
}

fn row_to_workflow(row: &SqliteRow) -> Result<ApprovalWorkflow, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let action_id: String =
        row.try_get("action_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let risk_score_raw: i64 =
        row.try_get("risk_score").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let environment_str: String =
        row.try_get("environment").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let criticality_str: String =
        row.try_get("server_criticality").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let impact_assessment: String =
        row.try_get("impact_assessment").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let business_justification: String = row
        .try_get("business_justification")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let escalation_reason: Option<String> =
        row.try_get("escalation_reason").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status_str: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let current_step_index: u32 =
        row.try_get("current_step_index").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let total_steps: u32 =
        row.try_get("total_steps").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let required_approvals: u32 =
        row.try_get("required_approvals").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let state_version: u32 =
        row.try_get("state_version").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ApprovalWorkflow {
        id: WorkflowId(id),
        action_id: ActionId(action_id),
        risk_score: RiskScore::new(risk_score_raw)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?,
        environment: Environment::parse(&environment_str).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown environment `{environment_str}`"))
        })?,
        server_criticality: ServerCriticality::parse(&criticality_str).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown server criticality `{criticality_str}`"))
        })?,
        impact_assessment,
        business_justification,
        escalation_reason,
        status: WorkflowStatus::parse(&status_str).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown workflow status `{status_str}`"))
        })?,
        current_step_index,
        total_steps,
        required_approvals,
        state_version,
        created_at: decode_timestamp(&created_at_str, "created_at")?,
        updated_at: decode_timestamp(&updated_at_str, "updated_at")?,
    })
}

fn row_to_step(row: &SqliteRow) -> Result<WorkflowStep, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let workflow_id: String =
        row.try_get("workflow_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let step_number: u32 =
        row.try_get("step_number").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let step_type_str: String =
        row.try_get("step_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let required_role_str: String =
        row.try_get("required_role").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status_str: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let assigned_to: Option<String> =
        row.try_get("assigned_to").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approved_by: Option<String> =
        row.try_get("approved_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let comments: Option<String> =
        row.try_get("comments").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let timeout_hours: i64 =
        row.try_get("timeout_hours").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let auto_escalate: bool =
        row.try_get("auto_escalate").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let parallel_approval: bool =
        row.try_get("parallel_approval").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let quorum: u32 = row.try_get("quorum").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let conditions_json: String =
        row.try_get("conditions").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let completed_at_str: Option<String> =
        row.try_get("completed_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let conditions = serde_json::from_str(&conditions_json)
        .map_err(|error| RepositoryError::Decode(format!("column `conditions`: {error}")))?;
    let completed_at = match completed_at_str {
        Some(ref value) => Some(decode_timestamp(value, "completed_at")?),
        None => None,
    };

    Ok(WorkflowStep {
        id: StepId(id),
        workflow_id: WorkflowId(workflow_id),
        step_number,
        step_type: StepType::parse(&step_type_str).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown step type `{step_type_str}`"))
        })?,
        required_role: ApproverRole::parse(&required_role_str).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown approver role `{required_role_str}`"))
        })?,
        status: StepStatus::parse(&status_str)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown step status `{status_str}`")))?,
        assigned_to,
        approved_by,
        comments,
        approvals: Vec::new(),
        metadata: StepMetadata {
            timeout_hours,
            auto_escalate,
            parallel_approval,
            quorum,
            conditions,
        },
        created_at: decode_timestamp(&created_at_str, "created_at")?,
        completed_at,
    })
}

fn row_to_approval(row: &SqliteRow) -> Result<(String, StepApproval), RepositoryError> {
    let step_id: String =
        row.try_get("step_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approver_user_id: String =
        row.try_get("approver_user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approver_role_str: String =
        row.try_get("approver_role").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let comments: Option<String> =
        row.try_get("comments").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approved_at_str: String =
        row.try_get("approved_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let approval = StepApproval {
        approver_user_id,
        approver_role: ApproverRole::parse(&approver_role_str).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown approver role `{approver_role_str}`"))
        })?,
        comments,
        approved_at: decode_timestamp(&approved_at_str, "approved_at")?,
    };
    Ok((step_id, approval))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use opsgate_core::domain::action::{ActionId, Environment, RiskScore, ServerCriticality};
    use opsgate_core::domain::workflow::{StepApproval, WorkflowStatus};
    use opsgate_core::roles::{ApproverRole, RolePolicyTable};
    use opsgate_core::steps::{DecisionAction, DecisionRequest, StepProcessor};
    use opsgate_core::templates::{CreateWorkflowRequest, RoutingPolicy, TemplateSelector};
    use opsgate_engine::{StoreError, WorkflowStore};

    use super::SqlWorkflowStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_record(
        action: &str,
        risk: i64,
        environment: Environment,
        criticality: ServerCriticality,
    ) -> opsgate_core::domain::workflow::WorkflowRecord {
        let selector = TemplateSelector::new(RoutingPolicy::default(), RolePolicyTable::builtin());
        selector.instantiate(
            &CreateWorkflowRequest {
                action_id: ActionId(action.to_owned()),
                risk_score: RiskScore::new(risk).expect("risk in range"),
                environment,
                server_criticality: criticality,
                impact_assessment: "rolling restart of the api tier".to_owned(),
                business_justification: "connection pool exhaustion".to_owned(),
            },
            Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let store = SqlWorkflowStore::new(setup().await);
        let record = sample_record("ra-1", 45, Environment::Staging, ServerCriticality::Medium);

        store.insert(record.clone()).await.expect("insert");
        let found = store.find(&record.workflow.id).await.expect("find").expect("present");

        assert_eq!(found, record);
    }

    #[tokio::test]
    async fn find_unknown_workflow_returns_none() {
        let store = SqlWorkflowStore::new(setup().await);
        let missing = store
            .find(&opsgate_core::domain::workflow::WorkflowId("wf-missing".to_owned()))
            .await
            .expect("query");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn save_persists_a_step_transition_and_bumps_the_version() {
        let store = SqlWorkflowStore::new(setup().await);
        let record = sample_record("ra-1", 45, Environment::Staging, ServerCriticality::Medium);
        store.insert(record.clone()).await.expect("insert");

        let processor = StepProcessor::new(RolePolicyTable::builtin());
        let step = record.active_step().expect("active step");
        let request = DecisionRequest {
            workflow_id: record.workflow.id.clone(),
            step_id: step.id.clone(),
            action: DecisionAction::Approved,
            approver_user_id: "u-op".to_owned(),
            approver_role: ApproverRole::Operator,
            comments: Some("looks safe".to_owned()),
        };
        let outcome = processor
            .apply(record.clone(), &request, record.workflow.created_at + Duration::hours(1))
            .expect("approve");

        store.save(outcome.record.clone(), record.workflow.state_version).await.expect("save");

        let reloaded = store.find(&record.workflow.id).await.expect("find").expect("present");
        assert_eq!(reloaded, outcome.record);
        assert_eq!(reloaded.workflow.state_version, 1);
        assert_eq!(reloaded.workflow.status, WorkflowStatus::InProgress);
        assert_eq!(reloaded.steps[0].approvals.len(), 1);
    }

    #[tokio::test]
    async fn stale_saves_are_rejected_with_the_stored_version() {
        let store = SqlWorkflowStore::new(setup().await);
        let record = sample_record("ra-1", 15, Environment::Development, ServerCriticality::Low);
        store.insert(record.clone()).await.expect("insert");

        let error = store.save(record.clone(), 7).await.expect_err("stale");
        assert!(matches!(
            error,
            StoreError::VersionConflict { expected: 7, actual: 0, .. }
        ));
    }

    #[tokio::test]
    async fn saving_an_unknown_workflow_is_not_found() {
        let store = SqlWorkflowStore::new(setup().await);
        let record = sample_record("ra-1", 15, Environment::Development, ServerCriticality::Low);

        let error = store.save(record, 0).await.expect_err("missing row");
        assert!(matches!(error, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_open_skips_terminal_workflows_and_orders_oldest_first() {
        let store = SqlWorkflowStore::new(setup().await);
        let base = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();

        let mut oldest = sample_record("ra-old", 15, Environment::Development, ServerCriticality::Low);
        oldest.workflow.created_at = base;
        oldest.workflow.updated_at = base;
        let mut newer = sample_record("ra-new", 15, Environment::Development, ServerCriticality::Low);
        newer.workflow.created_at = base + Duration::minutes(5);
        newer.workflow.updated_at = base + Duration::minutes(5);
        let mut rejected =
            sample_record("ra-done", 15, Environment::Development, ServerCriticality::Low);
        rejected.workflow.created_at = base + Duration::minutes(10);
        rejected.workflow.updated_at = base + Duration::minutes(10);

        store.insert(newer.clone()).await.expect("insert newer");
        store.insert(oldest.clone()).await.expect("insert oldest");
        store.insert(rejected.clone()).await.expect("insert rejected");

        let processor = StepProcessor::new(RolePolicyTable::builtin());
        let step = rejected.active_step().expect("active step");
        let outcome = processor
            .apply(
                rejected.clone(),
                &DecisionRequest {
                    workflow_id: rejected.workflow.id.clone(),
                    step_id: step.id.clone(),
                    action: DecisionAction::Rejected,
                    approver_user_id: "u-op".to_owned(),
                    approver_role: ApproverRole::Operator,
                    comments: None,
                },
                base + Duration::minutes(15),
            )
            .expect("reject");
        store.save(outcome.record, 0).await.expect("save rejection");

        let open = store.list_open().await.expect("list open");
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].workflow.id, oldest.workflow.id);
        assert_eq!(open[1].workflow.id, newer.workflow.id);

        let all = store.list_all().await.expect("list all");
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn quorum_approvals_round_trip_in_recorded_order() {
        let store = SqlWorkflowStore::new(setup().await);
        let mut record =
            sample_record("ra-board", 92, Environment::Production, ServerCriticality::Critical);
        let board_index = record.steps.len() - 1;
        let board_created = record.steps[board_index].created_at;
        record.steps[board_index].approvals = vec![
            StepApproval {
                approver_user_id: "u-compliance-1".to_owned(),
                approver_role: ApproverRole::ComplianceOfficer,
                comments: Some("reviewed the rollback plan".to_owned()),
                approved_at: board_created + Duration::hours(1),
            },
            StepApproval {
                approver_user_id: "u-compliance-2".to_owned(),
                approver_role: ApproverRole::ComplianceOfficer,
                comments: None,
                approved_at: board_created + Duration::hours(2),
            },
        ];

        store.insert(record.clone()).await.expect("insert");
        let found = store.find(&record.workflow.id).await.expect("find").expect("present");

        assert_eq!(found.steps[board_index].approvals, record.steps[board_index].approvals);
        assert_eq!(found, record);
    }
}
