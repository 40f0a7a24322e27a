use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use slotbook_core::ledger::LedgerClient;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    ledger: Arc<dyn LedgerClient>,
}

impl HealthState {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub ledger: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    ledger: Arc<dyn LedgerClient>,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(HealthState::new(ledger))).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let ledger = ledger_check(state.ledger.as_ref()).await;
    let ready = ledger.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "slotbook-server runtime initialized".to_string(),
        },
        ledger,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn ledger_check(ledger: &dyn LedgerClient) -> HealthCheck {
    match ledger.read_all().await {
        Ok(records) => HealthCheck {
            status: "ready",
            detail: format!("ledger read succeeded ({} records)", records.len()),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("ledger read failed: {error}") }
        }
    }
}
