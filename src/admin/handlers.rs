//! Admin API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, TimeDelta, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::AdminState;
use crate::coordinator::CoordinatorError;
use crate::messages::{
    BatchId, CreateBatch, Envelope, MessageMetadata, OutgoingSms, PauseSchedule, ResumeSchedule,
    ScheduleId, ScheduledEntry, SendConfirmed, SendOutcome, TricklePolicy,
};
use crate::router::{RouterError, RouterStatsSnapshot};
use crate::store::{StoreError, StoreStats};

// ============================================================================
// Errors
// ============================================================================

/// Error body returned by every endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    pub error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
        }
    }

    fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{} {} not found", what, id))
    }

    fn draining() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "server is draining")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = if e.is_transient() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, e.to_string())
    }
}

impl From<RouterError> for ApiError {
    fn from(e: RouterError) -> Self {
        match e {
            RouterError::Closed => Self::draining(),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

/// Hand an envelope to the router unless the server is draining.
async fn submit(state: &AdminState, envelope: Envelope) -> Result<(), ApiError> {
    if !state.is_accepting() {
        return Err(ApiError::draining());
    }
    debug!(kind = envelope.kind(), correlation_id = %envelope.correlation_id(), "envelope submitted");
    state.inbox.send(envelope).await?;
    Ok(())
}

// ============================================================================
// Health, metrics, stats
// ============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check handler.
pub async fn health_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: if state.is_healthy() { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    if state.is_healthy() {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Ready handler (for Kubernetes). Not ready while draining.
pub async fn ready_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Live handler (for Kubernetes).
pub async fn live_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Metrics handler (Prometheus format).
pub async fn metrics_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let rendered = match &state.metrics {
        Some(metrics) => metrics.render().map_err(|e| e.to_string()),
        None => {
            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            encoder
                .encode(&prometheus::gather(), &mut buffer)
                .map_err(|e| e.to_string())
                .map(|()| String::from_utf8_lossy(&buffer).into_owned())
        }
    };

    match rendered {
        Ok(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            output,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Error encoding metrics: {}", e),
        ),
    }
}

/// Stats response.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub accepting: bool,
    /// Envelopes submitted and not yet finished
    pub in_flight: u64,
    pub timers_pending: usize,
    pub store: StoreStats,
    pub router: RouterStatsSnapshot,
}

/// Stats handler.
pub async fn stats_handler(
    State(state): State<Arc<AdminState>>,
) -> Result<Json<StatsResponse>, ApiError> {
    Ok(Json(StatsResponse {
        uptime_seconds: state.uptime().as_secs(),
        accepting: state.is_accepting(),
        in_flight: state.inbox.in_flight(),
        timers_pending: state.timer.pending(),
        store: state.storage.stats()?,
        router: state.router.stats().snapshot(),
    }))
}

// ============================================================================
// Batches
// ============================================================================

/// Body of `POST /batches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBatchRequest {
    /// Caller-chosen id; generated when absent
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    pub messages: Vec<OutgoingSms>,
    pub policy: TricklePolicy,
    /// Defaults to now
    #[serde(default)]
    pub start_at_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(default)]
    pub confirmation_email: Option<String>,
}

/// Response of `POST /batches`: the batch id and the planned sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAccepted {
    pub batch_id: BatchId,
    pub schedules: Vec<ScheduledEntry>,
}

/// Create batch handler.
///
/// POST /batches - Validate, compute the plan, and submit the batch
///
/// An existing batch id answers 200 with the stored plan. The command is still
/// submitted so an interrupted fan-out is routed again.
pub async fn create_batch_handler(
    State(state): State<Arc<AdminState>>,
    Json(request): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<BatchAccepted>), ApiError> {
    let batch_id = request.batch_id.unwrap_or_default();
    let start_at_utc = request.start_at_utc.unwrap_or_else(Utc::now);

    if request.messages.is_empty() {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            CoordinatorError::EmptyBatch(batch_id).to_string(),
        ));
    }

    if let Some(existing) = state.storage.load_batch(batch_id)? {
        let batch = existing.record;
        submit(
            &state,
            Envelope::CreateBatch(CreateBatch {
                batch_id,
                messages: request.messages,
                policy: batch.policy,
                start_at_utc,
                metadata: batch.metadata.clone(),
                confirmation_email: batch.confirmation_email.clone(),
            }),
        )
        .await?;

        info!(batch_id = %batch_id, status = ?batch.status, "batch already exists, returning stored plan");
        return Ok((
            StatusCode::OK,
            Json(BatchAccepted {
                batch_id,
                schedules: batch
                    .per_message
                    .iter()
                    .map(|m| ScheduledEntry {
                        schedule_id: m.schedule_id,
                        target_address: m.target_address.clone(),
                        scheduled_at_utc: m.scheduled_at_utc,
                    })
                    .collect(),
            }),
        ));
    }

    let times = request
        .policy
        .timestamps(start_at_utc, request.messages.len())
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    let schedules = request
        .messages
        .iter()
        .zip(times)
        .enumerate()
        .map(|(index, (sms, at))| ScheduledEntry {
            schedule_id: ScheduleId::for_batch_message(batch_id, index),
            target_address: sms.target_address.clone(),
            scheduled_at_utc: at,
        })
        .collect();

    let messages = request.messages.len();
    submit(
        &state,
        Envelope::CreateBatch(CreateBatch {
            batch_id,
            messages: request.messages,
            policy: request.policy,
            start_at_utc,
            metadata: request.metadata,
            confirmation_email: request.confirmation_email,
        }),
    )
    .await?;

    info!(batch_id = %batch_id, messages, policy = request.policy.name(), "batch accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchAccepted {
            batch_id,
            schedules,
        }),
    ))
}

/// GET /batches/:id - Current batch state and version
pub async fn get_batch_handler(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<BatchId>,
) -> Result<impl IntoResponse, ApiError> {
    match state.storage.load_batch(id)? {
        Some(batch) => Ok(Json(batch)),
        None => Err(ApiError::not_found("batch", id)),
    }
}

/// POST /batches/:id/pause - Not supported
pub async fn pause_batch_handler(Path(_id): Path<BatchId>) -> ApiError {
    unsupported("batch pause")
}

/// POST /batches/:id/resume - Not supported
pub async fn resume_batch_handler(Path(_id): Path<BatchId>) -> ApiError {
    unsupported("batch resume")
}

fn unsupported(operation: &'static str) -> ApiError {
    ApiError::new(
        StatusCode::NOT_IMPLEMENTED,
        CoordinatorError::Unsupported { operation }.to_string(),
    )
}

// ============================================================================
// Scheduled messages
// ============================================================================

/// Body of `POST /schedules/:id/pause`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PauseRequest {
    /// Defaults to now
    #[serde(default)]
    pub request_at_utc: Option<DateTime<Utc>>,
}

/// Body of `POST /schedules/:id/resume`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeRequest {
    /// Offset from the original send time, may be negative
    #[serde(default)]
    pub offset_ms: i64,
    /// Defaults to now
    #[serde(default)]
    pub request_at_utc: Option<DateTime<Utc>>,
}

/// Response of the schedule control endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleAccepted {
    pub schedule_id: ScheduleId,
    pub kind: String,
}

/// GET /schedules/:id - Current scheduled message state and version
pub async fn get_schedule_handler(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<ScheduleId>,
) -> Result<impl IntoResponse, ApiError> {
    match state.storage.load_schedule(id)? {
        Some(schedule) => Ok(Json(schedule)),
        None => Err(ApiError::not_found("schedule", id)),
    }
}

/// POST /schedules/:id/pause - Suspend a scheduled message
pub async fn pause_schedule_handler(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<ScheduleId>,
    body: Option<Json<PauseRequest>>,
) -> Result<(StatusCode, Json<ScheduleAccepted>), ApiError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    ensure_schedule(&state, id)?;

    let envelope = Envelope::PauseSchedule(PauseSchedule {
        schedule_id: id,
        request_at_utc: request.request_at_utc.unwrap_or_else(Utc::now),
    });
    accepted(&state, id, envelope).await
}

/// POST /schedules/:id/resume - Resume at original send time + offset
pub async fn resume_schedule_handler(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<ScheduleId>,
    body: Option<Json<ResumeRequest>>,
) -> Result<(StatusCode, Json<ScheduleAccepted>), ApiError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let offset = TimeDelta::try_milliseconds(request.offset_ms).ok_or_else(|| {
        ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("offset out of range: {}ms", request.offset_ms),
        )
    })?;
    ensure_schedule(&state, id)?;

    let envelope = Envelope::ResumeSchedule(ResumeSchedule {
        schedule_id: id,
        offset,
        request_at_utc: request.request_at_utc.unwrap_or_else(Utc::now),
    });
    accepted(&state, id, envelope).await
}

/// POST /schedules/:id/confirmations - Transport delivery report
pub async fn confirm_schedule_handler(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<ScheduleId>,
    Json(outcome): Json<SendOutcome>,
) -> Result<(StatusCode, Json<ScheduleAccepted>), ApiError> {
    ensure_schedule(&state, id)?;

    let envelope = Envelope::SendConfirmed(SendConfirmed {
        schedule_id: id,
        outcome,
    });
    accepted(&state, id, envelope).await
}

fn ensure_schedule(state: &AdminState, id: ScheduleId) -> Result<(), ApiError> {
    match state.storage.load_schedule(id)? {
        Some(_) => Ok(()),
        None => Err(ApiError::not_found("schedule", id)),
    }
}

async fn accepted(
    state: &AdminState,
    schedule_id: ScheduleId,
    envelope: Envelope,
) -> Result<(StatusCode, Json<ScheduleAccepted>), ApiError> {
    let kind = envelope.kind().to_string();
    submit(state, envelope).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ScheduleAccepted { schedule_id, kind }),
    ))
}
