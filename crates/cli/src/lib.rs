pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "slotbook",
    about = "Slotbook operator CLI",
    long_about = "Inspect slotbook configuration, check ledger readiness, and list slot availability.",
    after_help = "Examples:\n  slotbook doctor --json\n  slotbook config\n  slotbook slots --day 2026-02-12"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, bot token shape, and ledger reachability")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List free and taken slots from a fresh ledger read")]
    Slots {
        #[arg(long, value_name = "YYYY-MM-DD", help = "Only show this day")]
        day: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => commands::CommandResult::text(commands::config::run()),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Slots { day } => commands::slots::run(day.as_deref()),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
