//! `/health`: database, configuration and Drive sync checks rolled into one status.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use fedbd_pipeline::DRIVE_SYNC_KIND;
use serde::Serialize;
use tracing::error;

use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub status: CheckStatus,
    pub message: String,
}

impl Check {
    fn new(status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: BTreeMap<&'static str, Check>,
    pub timestamp: DateTime<Utc>,
}

/// Any error makes the whole report unhealthy; otherwise any warning degrades it.
pub fn overall_status<'a>(checks: impl IntoIterator<Item = &'a Check>) -> HealthStatus {
    let mut status = HealthStatus::Healthy;
    for check in checks {
        match check.status {
            CheckStatus::Error => return HealthStatus::Unhealthy,
            CheckStatus::Warn => status = HealthStatus::Degraded,
            CheckStatus::Ok => {}
        }
    }
    status
}

pub async fn run_checks(state: &AppState) -> HealthReport {
    let mut checks = BTreeMap::new();

    let database = match state.store.ping().await {
        Ok(()) => Check::new(CheckStatus::Ok, "connected"),
        Err(err) => {
            error!(error = %err, "health check: database ping failed");
            Check::new(CheckStatus::Error, "database unreachable")
        }
    };
    checks.insert("database", database);

    let missing = state.config.missing_required();
    let config = if missing.is_empty() {
        Check::new(CheckStatus::Ok, "all required keys present")
    } else {
        Check::new(CheckStatus::Warn, format!("missing: {}", missing.join(", ")))
    };
    checks.insert("config", config);

    checks.insert("drive_sync", drive_check(state).await);

    HealthReport {
        status: overall_status(checks.values()),
        checks,
        timestamp: Utc::now(),
    }
}

async fn drive_check(state: &AppState) -> Check {
    if !state.drive_configured() {
        return Check::new(CheckStatus::Warn, "Drive sync is not configured");
    }
    match state.store.last_sync(DRIVE_SYNC_KIND).await {
        Ok(None) => Check::new(CheckStatus::Ok, "no sync has run yet"),
        Ok(Some(last)) if last.status == "success" => Check::new(
            CheckStatus::Ok,
            format!("last sync {}", last.started_at.to_rfc3339()),
        ),
        Ok(Some(last)) => Check::new(
            CheckStatus::Warn,
            format!("last sync {} at {}", last.status, last.started_at.to_rfc3339()),
        ),
        Err(err) => {
            error!(error = %err, "health check: reading sync log failed");
            Check::new(CheckStatus::Error, "sync log unreadable")
        }
    }
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = run_checks(&state).await;
    let code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (code, Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_beats_warn_beats_ok() {
        let ok = Check::new(CheckStatus::Ok, "");
        let warn = Check::new(CheckStatus::Warn, "");
        let err = Check::new(CheckStatus::Error, "");
        assert_eq!(overall_status([&ok, &ok]), HealthStatus::Healthy);
        assert_eq!(overall_status([&ok, &warn]), HealthStatus::Degraded);
        assert_eq!(overall_status([&warn, &err, &ok]), HealthStatus::Unhealthy);
        assert_eq!(overall_status(std::iter::empty::<&Check>()), HealthStatus::Healthy);
    }
}
