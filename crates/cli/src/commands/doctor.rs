use secrecy::ExposeSecret;
use serde::Serialize;
use slotbook_core::config::{AppConfig, ConfigError, LedgerBackend, LoadOptions};
use slotbook_core::ledger::LedgerClient;
use slotbook_db::open_ledger;

use super::{current_thread_runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report(AppConfig::load(LoadOptions::default()), check_ledger_connectivity);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(
    loaded: Result<AppConfig, ConfigError>,
    ledger_check: impl FnOnce(&AppConfig) -> DoctorCheck,
) -> DoctorReport {
    let mut checks = Vec::new();

    match loaded {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_bot_token(&config));
            checks.push(ledger_check(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["telegram_token_format", "ledger_connectivity"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_bot_token(config: &AppConfig) -> DoctorCheck {
    // shape is enforced during validation; only the public bot id is echoed back
    let token = config.telegram.bot_token.expose_secret();
    match token.split_once(':') {
        Some((bot_id, _)) => DoctorCheck {
            name: "telegram_token_format",
            status: CheckStatus::Pass,
            details: format!("token issued for bot id {bot_id}"),
        },
        None => DoctorCheck {
            name: "telegram_token_format",
            status: CheckStatus::Fail,
            details: "token is not in `<bot id>:<secret>` form".to_string(),
        },
    }
}

fn check_ledger_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(details) => {
            return DoctorCheck { name: "ledger_connectivity", status: CheckStatus::Fail, details };
        }
    };

    let result = runtime.block_on(async {
        let ledger = open_ledger(&config.ledger)
            .await
            .map_err(|error| format!("failed to open ledger: {error}"))?;
        ledger.read_all().await.map_err(|error| format!("ledger read failed: {error}"))
    });

    match result {
        Ok(records) => DoctorCheck {
            name: "ledger_connectivity",
            status: CheckStatus::Pass,
            details: format!(
                "{} ledger readable ({} records)",
                backend_label(config.ledger.backend),
                records.len()
            ),
        },
        Err(details) => DoctorCheck { name: "ledger_connectivity", status: CheckStatus::Fail, details },
    }
}

fn backend_label(backend: LedgerBackend) -> &'static str {
    match backend {
        LedgerBackend::Sheets => "sheets",
        LedgerBackend::Sqlite => "sqlite",
        LedgerBackend::Memory => "memory",
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
