use crate::commands::{service_over, CommandResult};
use opsgate_core::audit::AuditEvent;
use opsgate_core::config::{AppConfig, LoadOptions};
use opsgate_core::domain::workflow::{WorkflowId, WorkflowRecord};
use opsgate_db::{connect, migrations};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct HistoryReport {
    workflow_id: String,
    action_id: String,
    status: String,
    risk_score: u8,
    current_step_index: u32,
    total_steps: u32,
    events: Vec<AuditEvent>,
}

pub fn run(workflow_id: &str, json_output: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "history",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "history",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let service = service_over(&pool, &config);
        let id = WorkflowId(workflow_id.to_owned());
        let record = service
            .get_workflow(&id)
            .await
            .map_err(|error| ("history_execution", error.to_string(), 5u8))?;

        let Some(record) = record else {
            pool.close().await;
            return Err((
                "workflow_not_found",
                format!("no workflow found with id `{workflow_id}`"),
                6u8,
            ));
        };

        let events = service
            .audit_trail(&id)
            .await
            .map_err(|error| ("history_execution", error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<(WorkflowRecord, Vec<AuditEvent>), (&'static str, String, u8)>((record, events))
    });

    match result {
        Ok((record, events)) => {
            let output = if json_output {
                let report = HistoryReport {
                    workflow_id: record.workflow.id.0.clone(),
                    action_id: record.workflow.action_id.0.clone(),
                    status: record.workflow.status.as_str().to_string(),
                    risk_score: record.workflow.risk_score.value(),
                    current_step_index: record.workflow.current_step_index,
                    total_steps: record.workflow.total_steps,
                    events,
                };
                serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
                    format!(
                        "{{\"error\":\"history serialization failed: {}\"}}",
                        error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
                    )
                })
            } else {
                render_human(&record, &events)
            };
            CommandResult { exit_code: 0, output }
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("history", error_class, message, exit_code)
        }
    }
}

fn render_human(record: &WorkflowRecord, events: &[AuditEvent]) -> String {
    let workflow = &record.workflow;
    let mut lines = Vec::new();
    lines.push(format!(
        "workflow {} ({}): risk {}, {} on {} server, step {}/{}, status {}",
        workflow.id.0,
        workflow.action_id.0,
        workflow.risk_score.value(),
        workflow.environment.as_str(),
        workflow.server_criticality.as_str(),
        workflow.current_step_index,
        workflow.total_steps,
        workflow.status.as_str(),
    ));

    if events.is_empty() {
        lines.push("no audit events recorded".to_string());
        return lines.join("\n");
    }

    for event in events {
        let mut line = format!(
            "- {} {} by {}",
            event.occurred_at.to_rfc3339(),
            event.action.as_str(),
            event.actor,
        );
        if let Some(step_id) = &event.step_id {
            line.push_str(&format!(" on step {}", step_id.0));
        }
        if let (Some(before), Some(after)) = (event.before_status, event.after_status) {
            line.push_str(&format!(" ({} -> {})", before.as_str(), after.as_str()));
        }
        lines.push(line);
    }

    lines.join("\n")
}
