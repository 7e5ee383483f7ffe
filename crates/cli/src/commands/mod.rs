pub mod config;
pub mod doctor;
pub mod history;
pub mod migrate;
pub mod seed;
pub mod stats;
pub mod sweep;

use std::sync::Arc;

use opsgate_core::config::AppConfig;
use opsgate_core::roles::RolePolicyTable;
use opsgate_db::{DbPool, SqlAuditLog, SqlWorkflowStore};
use opsgate_engine::{NoopNotificationSink, WorkflowService};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Workflow service over an open pool. One-shot commands write audit rows to
/// SQLite but never push webhooks, and the signed ledger chain belongs to the
/// long-running server process, so the notifier is a no-op and the SQL audit
/// log serves as both sink and query side.
pub(crate) fn service_over(pool: &DbPool, config: &AppConfig) -> Arc<WorkflowService> {
    let store = Arc::new(SqlWorkflowStore::new(pool.clone()));
    let audit_log = Arc::new(SqlAuditLog::new(pool.clone()));
    Arc::new(WorkflowService::new(
        store,
        audit_log.clone(),
        audit_log,
        Arc::new(NoopNotificationSink),
        config.routing.clone(),
        RolePolicyTable::builtin(),
        config.engine.clone(),
    ))
}
