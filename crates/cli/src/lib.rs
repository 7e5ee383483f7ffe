pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "opsgate",
    about = "Opsgate operator CLI",
    long_about = "Operate Opsgate migrations, demo data, escalation sweeps, and workflow inspection.",
    after_help = "Examples:\n  opsgate doctor --json\n  opsgate seed\n  opsgate history wf-seed-rotate-certs"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load deterministic demo workflows covering every routing band")]
    Seed,
    #[command(about = "Run one escalation pass over open workflows and report what it did")]
    Sweep,
    #[command(about = "Print the workflow rollup: totals by status, risk band, and environment")]
    Stats {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the audit trail for one workflow")]
    History {
        #[arg(value_name = "WORKFLOW_ID", help = "Workflow id, for example wf-seed-rotate-certs")]
        workflow_id: String,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database connectivity, and migration state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Sweep => commands::sweep::run(),
        Command::Stats { json } => commands::stats::run(json),
        Command::History { workflow_id, json } => commands::history::run(&workflow_id, json),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
