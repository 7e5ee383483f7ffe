use std::time::Instant;

use crate::commands::{service_over, CommandResult};
use opsgate_core::config::{AppConfig, LoadOptions};
use opsgate_core::SweepReport;
use opsgate_db::{connect, migrations};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct SweepOutput {
    command: &'static str,
    status: &'static str,
    elapsed_ms: u64,
    report: SweepReport,
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
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
                "sweep",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let started = Instant::now();
    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let service = service_over(&pool, &config);
        let report = service
            .run_escalation_sweep()
            .await
            .map_err(|error| ("sweep_execution", error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<SweepReport, (&'static str, String, u8)>(report)
    });

    match result {
        Ok(report) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let human = format!(
                "sweep: {} open workflows scanned, {} due, {} escalated in {elapsed_ms}ms",
                report.scanned, report.due, report.escalated
            );
            let output = SweepOutput { command: "sweep", status: "ok", elapsed_ms, report };
            let machine = serde_json::to_string(&output).unwrap_or_else(|error| {
                format!(
                    "{{\"command\":\"sweep\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
                    error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
                )
            });
            CommandResult { exit_code: 0, output: format!("{human}\n{machine}") }
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}
