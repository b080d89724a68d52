//! JSON endpoints. Every response body is either a success object or `{"error": ...}`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use fedbd_adapters::{parse_close_date, AdapterError};
use fedbd_core::Role;
use fedbd_pipeline::{DriveSync, DriveSyncOutcome};
use fedbd_storage::{CalendarEvent, StoreError};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::auth::{RequestContext, CSRF_HEADER};
use crate::mail::OutboundMail;
use crate::AppState;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("Invalid CSRF token")]
    Csrf,
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Drive sync ran recently; retry in {retry_after_secs}s")]
    CoolingDown { retry_after_secs: i64 },
    #[error("Internal server error")]
    Internal(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden | ApiError::Csrf => StatusCode::FORBIDDEN,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::CoolingDown { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.into())
    }
}

impl From<AdapterError> for ApiError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Store(err) => err.into(),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        match self {
            ApiError::Internal(err) => {
                let detail = format!("{err:#}");
                error!(error = %detail, "api request failed");
                (status, Json(json!({ "error": message }))).into_response()
            }
            ApiError::CoolingDown { retry_after_secs } => {
                let mut resp = (
                    status,
                    Json(json!({ "error": message, "retry_after_secs": retry_after_secs })),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    resp.headers_mut().insert(header::RETRY_AFTER, value);
                }
                resp
            }
            _ => (status, Json(json!({ "error": message }))).into_response(),
        }
    }
}

/// Role and CSRF gate shared by every API handler.
fn authorize(ctx: &RequestContext, headers: &HeaderMap, required: Role) -> Result<(), ApiError> {
    if !ctx.has_role(required) {
        return Err(ApiError::Forbidden);
    }
    let provided = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());
    if !ctx.csrf_ok(provided) {
        warn!(user = %ctx.user.email, "api request rejected: bad CSRF token");
        return Err(ApiError::Csrf);
    }
    Ok(())
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
pub struct CalendarRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub opp_no: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn calendar_create(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    headers: HeaderMap,
    payload: Result<Json<CalendarRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    authorize(&ctx, &headers, Role::Ops)?;
    let req = json_body(payload)?;

    let title = req.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("title is required".into()));
    }
    let event_date = parse_close_date(&req.date)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid date: {}", req.date.trim())))?;

    let event_id = state
        .store
        .insert_calendar_event(&CalendarEvent {
            title: title.to_string(),
            event_date,
            event_time: non_blank(req.time),
            opp_no: non_blank(req.opp_no),
            notes: non_blank(req.notes),
            created_by: ctx.user.email.clone(),
        })
        .await?;
    info!(event_id, user = %ctx.user.email, "calendar event created");
    Ok(Json(json!({ "success": true, "event_id": event_id })))
}

#[derive(Debug, Deserialize)]
pub struct OutreachRequest {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub program: Option<String>,
}

pub async fn outreach_send(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    headers: HeaderMap,
    payload: Result<Json<OutreachRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    authorize(&ctx, &headers, Role::Ops)?;
    let req = json_body(payload)?;

    let subject = req.subject.trim();
    let body = req.body.trim();
    if subject.is_empty() || body.is_empty() {
        return Err(ApiError::BadRequest("subject and body are required".into()));
    }
    let program = state
        .registry
        .normalize_code(req.program.as_deref().unwrap_or_default())?;

    let mut sent = 0usize;
    for subscriber in state.store.reachable_subscribers(program).await? {
        let mail = OutboundMail {
            to: subscriber.email.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        match state.mailer.send(&mail).await {
            Ok(()) => sent += 1,
            Err(err) => {
                let message = format!("{err:#}");
                warn!(to = %subscriber.email, error = %message, "outreach delivery failed");
            }
        }
    }
    state
        .store
        .record_outreach(subject, program, sent, &ctx.user.email)
        .await?;
    info!(recipients = sent, program = ?program, "outreach sent");
    Ok(Json(json!({ "success": true, "recipients": sent })))
}

pub async fn drive_sync(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&ctx, &headers, Role::Admin)?;
    let (Some(client), Some(folder_id)) = (state.drive.clone(), state.config.google_drive_folder_id.clone())
    else {
        return Err(ApiError::BadRequest("Drive sync is not configured".into()));
    };

    let sync = DriveSync::new(
        state.store.clone(),
        client,
        folder_id,
        state.config.drive_sync_cooldown_secs,
    );
    match sync.run().await.map_err(ApiError::Internal)? {
        DriveSyncOutcome::Completed { created, updated } => Ok(Json(json!({
            "success": true,
            "created": created,
            "updated": updated,
        }))),
        DriveSyncOutcome::CoolingDown { retry_after_secs } => {
            Err(ApiError::CoolingDown { retry_after_secs })
        }
    }
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}
