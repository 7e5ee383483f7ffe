use std::sync::Arc;

use opsgate_core::config::{AppConfig, ConfigError, LoadOptions};
use opsgate_core::ledger::ApprovalLedger;
use opsgate_core::roles::RolePolicyTable;
use opsgate_db::{connect_with_settings, migrations, DbPool, SqlAuditLog, SqlWorkflowStore};
use opsgate_engine::{
    AuditSink, FanoutAuditSink, LedgerAuditSink, NoopNotificationSink, NotificationSink,
    WorkflowService,
};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

use crate::notify::WebhookNotifier;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<WorkflowService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let service = build_service(&config, &db_pool);

    Ok(Application { config, db_pool, service })
}

/// Every audit event lands in SQLite and in the process-local signed ledger
/// chain. The webhook notifier is wired only when notifications are enabled;
/// validation has already required a URL in that case.
fn build_service(config: &AppConfig, db_pool: &DbPool) -> Arc<WorkflowService> {
    let store = Arc::new(SqlWorkflowStore::new(db_pool.clone()));
    let audit_log = Arc::new(SqlAuditLog::new(db_pool.clone()));
    let ledger = Arc::new(ApprovalLedger::new(config.audit.signing_key.expose_secret()));
    let audit_sink = Arc::new(FanoutAuditSink::new(vec![
        audit_log.clone() as Arc<dyn AuditSink>,
        Arc::new(LedgerAuditSink::new(ledger)),
    ]));

    let notifier: Arc<dyn NotificationSink> = match &config.notifications.webhook_url {
        Some(webhook_url) if config.notifications.enabled => {
            Arc::new(WebhookNotifier::new(webhook_url.clone(), &config.notifications))
        }
        _ => Arc::new(NoopNotificationSink),
    };

    Arc::new(WorkflowService::new(
        store,
        audit_sink,
        audit_log,
        notifier,
        config.routing.clone(),
        RolePolicyTable::builtin(),
        config.engine.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use opsgate_core::config::{ConfigOverrides, LoadOptions};
    use opsgate_core::domain::action::{ActionId, Environment, RiskScore, ServerCriticality};
    use opsgate_core::domain::workflow::WorkflowStatus;
    use opsgate_core::roles::ApproverRole;
    use opsgate_core::steps::{DecisionAction, DecisionRequest};
    use opsgate_core::templates::CreateWorkflowRequest;

    use crate::bootstrap::bootstrap;

    fn memory_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_config() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                notifications_enabled: Some(true),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("notifications.webhook_url"));
    }

    #[tokio::test]
    async fn integration_smoke_covers_startup_and_a_full_approval_path() {
        let app = bootstrap(memory_overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('approval_workflow', 'workflow_step', 'audit_event')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected workflow tables to be available after bootstrap");
        assert_eq!(table_count, 3, "bootstrap should expose baseline workflow tables");

        let record = app
            .service
            .create_workflow(
                CreateWorkflowRequest {
                    action_id: ActionId("ra-smoke".to_string()),
                    risk_score: RiskScore::new(15).expect("valid risk"),
                    environment: Environment::Development,
                    server_criticality: ServerCriticality::Low,
                    impact_assessment: "restart one api pod".to_string(),
                    business_justification: "memory leak mitigation".to_string(),
                },
                "u-originator",
            )
            .await
            .expect("create should persist through the sql store");
        assert_eq!(record.workflow.total_steps, 1);

        let step = record.active_step().expect("routed workflow has an active step");
        let outcome = app
            .service
            .decide(DecisionRequest {
                workflow_id: record.workflow.id.clone(),
                step_id: step.id.clone(),
                action: DecisionAction::Approved,
                approver_user_id: "u-op".to_string(),
                approver_role: ApproverRole::Operator,
                comments: Some("restart window confirmed".to_string()),
            })
            .await
            .expect("single approval should close the workflow");
        assert_eq!(outcome.record.workflow.status, WorkflowStatus::Approved);

        let trail = app
            .service
            .audit_trail(&record.workflow.id)
            .await
            .expect("audit trail should read back");
        assert!(trail.len() >= 2, "create and approve should both be audited");

        app.db_pool.close().await;
    }
}
