//! Component health checks and the health endpoints.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::state::AppState;

const RPC_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Overall health state of a component or the entire system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Component is functioning normally
    Healthy,
    /// Component has issues but is still functional
    Degraded,
    /// Component is not functional
    Unhealthy,
}

/// Health status for an individual component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthState,
    pub message: Option<String>,
    pub last_check: DateTime<Utc>,
    pub check_duration_ms: Option<u64>,
}

impl ComponentHealth {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthState::Healthy,
            message: Some(message.into()),
            last_check: Utc::now(),
            check_duration_ms: None,
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthState::Degraded,
            message: Some(message.into()),
            last_check: Utc::now(),
            check_duration_ms: None,
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthState::Unhealthy,
            message: Some(message.into()),
            last_check: Utc::now(),
            check_duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.check_duration_ms = Some(duration.as_millis() as u64);
        self
    }
}

#[derive(Debug, Serialize)]
pub struct SystemHealth {
    pub status: HealthState,
    pub uptime_secs: u64,
    pub components: HashMap<String, ComponentHealth>,
}

async fn check_components(state: &AppState) -> SystemHealth {
    let mut components = HashMap::new();

    let invoice_count = state.store().count().await;
    components.insert(
        "invoice_store".to_string(),
        ComponentHealth::healthy(format!("{} invoices stored", invoice_count)),
    );

    let started = std::time::Instant::now();
    let rpc_health = match timeout(RPC_PROBE_TIMEOUT, state.rpc().health()).await {
        Ok(Ok(())) => ComponentHealth::healthy("Ledger provider reachable"),
        Ok(Err(e)) => ComponentHealth::unhealthy(format!("Ledger provider error: {}", e)),
        Err(_) => ComponentHealth::degraded("Ledger provider slow to respond"),
    };
    components.insert(
        "ledger_rpc".to_string(),
        rpc_health.with_duration(started.elapsed()),
    );

    let bus_stats = state.event_bus().stats().await;
    components.insert(
        "event_bus".to_string(),
        ComponentHealth::healthy(format!("{} handlers registered", bus_stats.handler_count)),
    );

    let status = if components
        .values()
        .any(|c| c.status == HealthState::Unhealthy)
    {
        HealthState::Unhealthy
    } else if components
        .values()
        .any(|c| c.status == HealthState::Degraded)
    {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    };

    SystemHealth {
        status,
        uptime_secs: state.uptime().as_secs(),
        components,
    }
}

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<SystemHealth>) {
    let health = check_components(&state).await;
    let status_code = match health.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status_code, Json(health))
}

/// Process liveness: answering at all means alive.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Readiness: the store is in-process, so serving requests only needs the
/// process up; the ledger probe is reported by `/health` instead.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    let _ = state.store().count().await;
    StatusCode::OK
}
