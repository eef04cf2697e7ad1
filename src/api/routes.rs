//! REST endpoints: blacklist management and batch control.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use super::ws::ws_handler;
use crate::cadence::{
    CadenceController, Candidate, ChatThread, OutreachBatch, ReminderBatch, spawn_outreach_batch,
    spawn_reminder_batch,
};
use crate::error::{BatchError, BlacklistError};

/// Build the Axum router with REST and WebSocket routes.
pub fn api_routes(controller: Arc<CadenceController>) -> Router {
    let state = AppState::new(controller);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/blacklist", get(list_blacklist).post(add_blacklist))
        .route("/api/blacklist/{subject}", delete(remove_blacklist))
        .route("/api/batches", get(list_batches))
        .route("/api/batches/reminders", post(start_reminders))
        .route("/api/batches/outreach", post(start_outreach))
        .route("/api/batches/stop", post(stop_batches))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `today` is read here, at the edge, when the caller does not pin it.
fn today_or_now(today: Option<NaiveDate>) -> NaiveDate {
    today.unwrap_or_else(|| chrono::Utc::now().date_naive())
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "contact-cadence"
    }))
}

// ── Blacklist ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct BlacklistRequest {
    subject: String,
}

async fn list_blacklist(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.blacklist_list().await {
        Ok(subjects) => (StatusCode::OK, Json(json!({ "subjects": subjects }))),
        Err(e) => {
            warn!(error = %e, "Failed to read blacklist");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn add_blacklist(
    State(state): State<AppState>,
    Json(body): Json<BlacklistRequest>,
) -> impl IntoResponse {
    blacklist_response(state.controller.blacklist_add(&body.subject).await)
}

async fn remove_blacklist(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> impl IntoResponse {
    blacklist_response(state.controller.blacklist_remove(&subject).await)
}

fn blacklist_response(
    result: Result<crate::cadence::BlacklistChange, BlacklistError>,
) -> (StatusCode, Json<serde_json::Value>) {
    match result {
        Ok(change) => (StatusCode::OK, Json(json!({ "change": change }))),
        Err(e) => {
            let status = match e {
                BlacklistError::EmptySubject => StatusCode::BAD_REQUEST,
                BlacklistError::InFlight { .. } => StatusCode::CONFLICT,
                BlacklistError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, Json(json!({ "error": e.to_string() })))
        }
    }
}

// ── Batches ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ReminderRequest {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    threads: Vec<ChatThread>,
    #[serde(default)]
    counterparts: Vec<String>,
    cadence_days: Option<u32>,
    message: Option<String>,
    today: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct OutreachRequest {
    recipients: Vec<Candidate>,
    message: String,
    today: Option<NaiveDate>,
}

#[derive(Deserialize, Default)]
struct StopRequest {
    batch_id: Option<Uuid>,
}

async fn list_batches(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "active": state.active_batches().await }))
}

async fn start_reminders(
    State(state): State<AppState>,
    Json(body): Json<ReminderRequest>,
) -> impl IntoResponse {
    if body.cadence_days == Some(0) {
        return batch_error(BatchError::InvalidCadence(0));
    }
    let batch = ReminderBatch {
        candidates: body.candidates,
        threads: body.threads,
        counterparts: body.counterparts,
        cadence_days: body.cadence_days,
        message: body.message,
        today: today_or_now(body.today),
    };

    match spawn_reminder_batch(Arc::clone(&state.controller), batch) {
        Ok(handle) => {
            let batch_id = state.track(handle).await;
            info!(batch_id = %batch_id, "Reminder batch accepted");
            (
                StatusCode::ACCEPTED,
                Json(json!({ "batch_id": batch_id, "kind": "reminders" })),
            )
        }
        Err(e) => batch_error(e),
    }
}

async fn start_outreach(
    State(state): State<AppState>,
    Json(body): Json<OutreachRequest>,
) -> impl IntoResponse {
    let batch = OutreachBatch {
        recipients: body.recipients,
        message: body.message,
        today: today_or_now(body.today),
    };

    match spawn_outreach_batch(Arc::clone(&state.controller), batch) {
        Ok(handle) => {
            let batch_id = state.track(handle).await;
            info!(batch_id = %batch_id, "Outreach batch accepted");
            (
                StatusCode::ACCEPTED,
                Json(json!({ "batch_id": batch_id, "kind": "outreach" })),
            )
        }
        Err(e) => batch_error(e),
    }
}

async fn stop_batches(
    State(state): State<AppState>,
    body: Bytes,
) -> impl IntoResponse {
    // An empty body stops every running batch.
    let request: StopRequest = if body.is_empty() {
        StopRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("Invalid stop request: {e}") })),
                );
            }
        }
    };
    let stopped = state.stop(request.batch_id).await;
    (StatusCode::OK, Json(json!({ "stopped": stopped })))
}

fn batch_error(e: BatchError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        BatchError::InFlight { .. } => StatusCode::CONFLICT,
        BatchError::InvalidCadence(_) => StatusCode::BAD_REQUEST,
        BatchError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    warn!(error = %e, "Batch rejected");
    (status, Json(json!({ "error": e.to_string() })))
}
