use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use opsgate_core::audit::{AuditAction, AuditEvent};
use opsgate_core::domain::workflow::{StepId, StepStatus, WorkflowId};
use opsgate_core::roles::ApproverRole;
use opsgate_engine::{AuditQuery, AuditSink, SinkError};

use super::RepositoryError;
use crate::DbPool;

/// Append-only audit table. Rows are never updated or deleted through this
/// type; the trail for a workflow is its full decision history.
pub struct SqlAuditLog {
    pool: DbPool,
}

impl SqlAuditLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_string(&event.metadata)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        sqlx::query(
            "INSERT INTO audit_event (id, workflow_id, step_id, action, actor, approver_role,
                                      before_status, after_status, metadata, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(&event.workflow_id.0)
        .bind(event.step_id.as_ref().map(|id| id.0.as_str()))
        .bind(event.action.as_str())
        .bind(&event.actor)
        .bind(event.approver_role.map(|role| role.as_str()))
        .bind(event.before_status.map(|status| status.as_str()))
        .bind(event.after_status.map(|status| status.as_str()))
        .bind(metadata)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(
            "SELECT id, workflow_id, step_id, action, actor, approver_role, before_status,
                    after_status, metadata, occurred_at
             FROM audit_event
             WHERE workflow_id = ?
             ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(&workflow_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect::<Result<Vec<_>, _>>()
    }
}

#[async_trait]
impl AuditSink for SqlAuditLog {
    async fn record(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.append(event).await.map_err(Into::into)
    }
}

#[async_trait]
impl AuditQuery for SqlAuditLog {
    async fn events_for_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<AuditEvent>, SinkError> {
        self.list_for_workflow(workflow_id).await.map_err(Into::into)
    }
}

fn row_to_event(row: &SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let event_id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let workflow_id: String =
        row.try_get("workflow_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let step_id: Option<String> =
        row.try_get("step_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let action_str: String =
        row.try_get("action").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let actor: String = row.try_get("actor").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approver_role_str: Option<String> =
        row.try_get("approver_role").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let before_status_str: Option<String> =
        row.try_get("before_status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let after_status_str: Option<String> =
        row.try_get("after_status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let metadata_json: String =
        row.try_get("metadata").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let occurred_at_str: String =
        row.try_get("occurred_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(AuditEvent {
        event_id,
        workflow_id: WorkflowId(workflow_id),
        step_id: step_id.map(StepId),
        action: AuditAction::parse(&action_str).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown audit action `{action_str}`"))
        })?,
        actor,
        approver_role: decode_enum(approver_role_str, "approver_role", ApproverRole::parse)?,
        before_status: decode_enum(before_status_str, "before_status", StepStatus::parse)?,
        after_status: decode_enum(after_status_str, "after_status", StepStatus::parse)?,
        metadata: serde_json::from_str(&metadata_json)
            .map_err(|error| RepositoryError::Decode(format!("column `metadata`: {error}")))?,
        occurred_at: DateTime::parse_from_rfc3339(&occurred_at_str)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|error| RepositoryError::Decode(format!("column `occurred_at`: {error}")))?,
    })
}

fn decode_enum<T>(
    value: Option<String>,
    column: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, RepositoryError> {
    match value {
        Some(raw) => parse(&raw)
            .map(Some)
            .ok_or_else(|| RepositoryError::Decode(format!("column `{column}`: unknown `{raw}`"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use opsgate_core::audit::{AuditAction, AuditEvent};
    use opsgate_core::domain::workflow::{StepId, StepStatus, WorkflowId};
    use opsgate_core::roles::ApproverRole;
    use opsgate_engine::{AuditQuery, AuditSink};

    use super::SqlAuditLog;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn events_round_trip_in_order() {
        let log = SqlAuditLog::new(setup().await);
        let t0 = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();

        let created = AuditEvent::new(
            WorkflowId("wf-1".to_owned()),
            None,
            AuditAction::Created,
            "u-originator",
            t0,
        )
        .with_metadata("risk_score", "45");
        let approved = AuditEvent::new(
            WorkflowId("wf-1".to_owned()),
            Some(StepId("st-1".to_owned())),
            AuditAction::Approved,
            "u-op",
            t0 + chrono::Duration::hours(1),
        )
        .with_role(ApproverRole::Operator)
        .with_status_change(StepStatus::Pending, StepStatus::Approved);

        log.record(&created).await.expect("record created");
        log.record(&approved).await.expect("record approved");

        let trail =
            log.events_for_workflow(&WorkflowId("wf-1".to_owned())).await.expect("trail");
        assert_eq!(trail, vec![created, approved]);
    }

    #[tokio::test]
    async fn trails_are_scoped_per_workflow() {
        let log = SqlAuditLog::new(setup().await);
        let t0 = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();

        for workflow in ["wf-a", "wf-b"] {
            let event = AuditEvent::new(
                WorkflowId(workflow.to_owned()),
                None,
                AuditAction::Created,
                "u-originator",
                t0,
            );
            log.record(&event).await.expect("record");
        }

        let trail = log.events_for_workflow(&WorkflowId("wf-a".to_owned())).await.expect("trail");
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].workflow_id.0, "wf-a");

        let empty =
            log.events_for_workflow(&WorkflowId("wf-unknown".to_owned())).await.expect("trail");
        assert!(empty.is_empty());
    }
}
