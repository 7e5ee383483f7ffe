use std::collections::BTreeMap;

use crate::commands::{service_over, CommandResult};
use opsgate_core::config::{AppConfig, LoadOptions};
use opsgate_core::StatisticsSnapshot;
use opsgate_db::{connect, migrations};

pub fn run(json_output: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "stats",
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
                "stats",
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
        let snapshot = service
            .statistics()
            .await
            .map_err(|error| ("stats_execution", error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<StatisticsSnapshot, (&'static str, String, u8)>(snapshot)
    });

    match result {
        Ok(snapshot) => {
            let output = if json_output {
                serde_json::to_string_pretty(&snapshot).unwrap_or_else(|error| {
                    format!(
                        "{{\"error\":\"stats serialization failed: {}\"}}",
                        error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
                    )
                })
            } else {
                render_human(&snapshot)
            };
            CommandResult { exit_code: 0, output }
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("stats", error_class, message, exit_code)
        }
    }
}

fn render_human(snapshot: &StatisticsSnapshot) -> String {
    let mut lines = Vec::new();
    lines.push(format!("workflow statistics as of {}:", snapshot.generated_at.to_rfc3339()));
    lines.push(format!("- total: {} ({} open)", snapshot.total, snapshot.open));
    lines.push(render_group("by status", &snapshot.by_status));
    lines.push(render_group("by risk band", &snapshot.by_risk_band));
    lines.push(render_group("by environment", &snapshot.by_environment));
    lines.push(render_group("by criticality", &snapshot.by_criticality));
    lines.join("\n")
}

fn render_group(label: &str, counts: &BTreeMap<String, u64>) -> String {
    if counts.is_empty() {
        return format!("- {label}: none");
    }

    let parts: Vec<String> =
        counts.iter().map(|(key, count)| format!("{key}={count}")).collect();
    format!("- {label}: {}", parts.join(", "))
}
