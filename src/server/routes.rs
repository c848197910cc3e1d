/// REST API routes for the audit ledger.
///
/// Capture is synchronous only up to durable persistence: the event is
/// hashed and stored as `pending`, and the response returns immediately.
/// Batching and anchoring happen asynchronously in the worker.
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::AppState;
use crate::error::AuditError;
use crate::store::models::{
    AnchorRecord, BatchStats, Event, EventStats, EventStatus, EventType, MerkleBatch, Module,
};
use crate::store::repository::{self, EventDraft, EventFilter};
use crate::verify::{self, IntegrityReport, VerificationResult};

/// Error payload returned by every failing endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: AuditError) -> ApiError {
    let status = match &e {
        AuditError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        AuditError::NotFound(_) => StatusCode::NOT_FOUND,
        AuditError::AnchorUnavailable(_) => StatusCode::BAD_GATEWAY,
        AuditError::ConfirmationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse { error: e.to_string() }))
}

// ─── Health ──────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    network: String,
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        network: state.anchor.network().to_string(),
    })
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

// ─── Events ──────────────────────────────────────────────

/// Request to capture an audit event.
#[derive(Debug, Deserialize)]
struct CaptureRequest {
    event_type: EventType,
    module: Module,
    actor_id: Option<String>,
    subject_type: String,
    subject_id: String,
    /// Non-empty JSON object describing what happened.
    payload: Map<String, Value>,
    /// Defaults to the server clock when omitted.
    occurred_at: Option<DateTime<Utc>>,
}

/// POST /api/events — Capture an audit event.
async fn capture_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CaptureRequest>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let event = repository::capture(
        state.db.pool(),
        state.config.hash_algorithm,
        EventDraft {
            event_type: req.event_type,
            module: req.module,
            actor_id: req.actor_id,
            subject_type: req.subject_type,
            subject_id: req.subject_id,
            payload: req.payload,
            occurred_at: req.occurred_at,
        },
    )
    .await
    .map_err(api_error)?;

    Ok((StatusCode::CREATED, Json(event)))
}

/// Shared filter parameters for event reads. `type` is accepted as a
/// short form of `event_type`.
#[derive(Debug, Default, Deserialize)]
struct EventQuery {
    #[serde(alias = "type")]
    event_type: Option<EventType>,
    module: Option<Module>,
    status: Option<EventStatus>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl EventQuery {
    fn into_filter(self) -> EventFilter {
        EventFilter {
            event_type: self.event_type,
            module: self.module,
            status: self.status,
            from: self.from,
            to: self.to,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// GET /api/events — List events, newest first.
async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let mut filter = query.into_filter();
    filter.limit = Some(filter.limit.unwrap_or(50).clamp(1, 500));

    let events = repository::list_events(state.db.pool(), &filter)
        .await
        .map_err(api_error)?;
    Ok(Json(events))
}

/// GET /api/events/{id}
async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Event>, ApiError> {
    let event = repository::require_event(state.db.pool(), id)
        .await
        .map_err(api_error)?;
    Ok(Json(event))
}

#[derive(Debug, Default, Deserialize)]
struct VerifyQuery {
    /// Also read the anchored root back from the chain.
    #[serde(default)]
    on_chain: bool,
}

/// GET /api/events/{id}/verify — Run the integrity checks on one event.
async fn verify_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<VerificationResult>, ApiError> {
    let result = verify::verify_event(
        state.db.pool(),
        state.config.hash_algorithm,
        &state.anchor,
        id,
        query.on_chain,
    )
    .await
    .map_err(api_error)?;
    Ok(Json(result))
}

/// Paginated audit log page.
#[derive(Debug, Serialize)]
struct AuditPage {
    events: Vec<Event>,
    page: i64,
    page_size: i64,
    has_next: bool,
    has_previous: bool,
}

#[derive(Debug, Default, Deserialize)]
struct AuditQuery {
    #[serde(alias = "type")]
    event_type: Option<EventType>,
    module: Option<Module>,
    status: Option<EventStatus>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    page: Option<i64>,
    page_size: Option<i64>,
}

/// GET /api/audit — Page through the audit log, newest first.
async fn audit_log(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditPage>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(25).clamp(1, 200);

    // Fetch one extra row to detect a next page without a COUNT query.
    let filter = EventFilter {
        event_type: query.event_type,
        module: query.module,
        status: query.status,
        from: query.from,
        to: query.to,
        limit: Some(page_size + 1),
        offset: Some((page - 1) * page_size),
    };

    let mut events = repository::list_events(state.db.pool(), &filter)
        .await
        .map_err(api_error)?;

    let has_next = events.len() as i64 > page_size;
    events.truncate(page_size as usize);

    Ok(Json(AuditPage {
        events,
        page,
        page_size,
        has_next,
        has_previous: page > 1,
    }))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    events: EventStats,
    batches: BatchStats,
    network: String,
}

/// GET /api/stats — Aggregate pipeline counts.
async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, ApiError> {
    let events = repository::event_stats(state.db.pool())
        .await
        .map_err(api_error)?;
    let batches = repository::batch_stats(state.db.pool())
        .await
        .map_err(api_error)?;
    Ok(Json(StatsResponse {
        events,
        batches,
        network: state.anchor.network().to_string(),
    }))
}

pub fn event_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/events", post(capture_event).get(list_events))
        .route("/api/events/{id}", get(get_event))
        .route("/api/events/{id}/verify", get(verify_event))
        .route("/api/audit", get(audit_log))
        .route("/api/stats", get(stats))
}

// ─── Batches ─────────────────────────────────────────────

/// Batch detail with its anchor record and member events.
#[derive(Debug, Serialize)]
struct BatchDetail {
    #[serde(flatten)]
    batch: MerkleBatch,
    merkle_root: String,
    anchor: Option<AnchorRecord>,
    events: Vec<Event>,
}

/// GET /api/batches/{id}
async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchDetail>, ApiError> {
    let pool = state.db.pool();
    let batch = repository::require_batch(pool, id).await.map_err(api_error)?;
    let anchor = repository::get_anchor_record(pool, id)
        .await
        .map_err(api_error)?;
    let events = repository::batch_events(pool, id).await.map_err(api_error)?;

    Ok(Json(BatchDetail {
        merkle_root: batch.root_hex(),
        batch,
        anchor,
        events,
    }))
}

/// POST /api/batches/{id}/submit — Operator action: (re)submit a sealed
/// or failed batch instead of waiting for the worker.
async fn submit_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<AnchorRecord>), ApiError> {
    let pool = state.db.pool();
    let batch = repository::require_batch(pool, id).await.map_err(api_error)?;

    let record = state
        .anchor
        .submit_batch(pool, &batch)
        .await
        .map_err(api_error)?
        .ok_or_else(|| {
            (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: format!("batch {id} is not in a submittable state"),
                }),
            )
        })?;

    // The worker's tick drives confirmation; spawning a poller here would
    // give the batch a second concurrent checker.
    Ok((StatusCode::ACCEPTED, Json(record)))
}

pub fn batch_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/batches/{id}", get(get_batch))
        .route("/api/batches/{id}/submit", post(submit_batch))
}

// ─── Verification ────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct IntegrityQuery {
    #[serde(alias = "type")]
    event_type: Option<EventType>,
    module: Option<Module>,
    status: Option<EventStatus>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<i64>,
    #[serde(default)]
    on_chain: bool,
}

/// GET /api/integrity-check — Verify a filtered set of events and
/// report every failure individually.
async fn integrity_check(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IntegrityQuery>,
) -> Result<Json<IntegrityReport>, ApiError> {
    let filter = EventFilter {
        event_type: query.event_type,
        module: query.module,
        status: query.status,
        from: query.from,
        to: query.to,
        limit: query.limit,
        offset: None,
    };

    let report = verify::integrity_check(
        state.db.pool(),
        state.config.hash_algorithm,
        &state.anchor,
        &filter,
        query.on_chain,
    )
    .await
    .map_err(api_error)?;
    Ok(Json(report))
}

pub fn verification_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/integrity-check", get(integrity_check))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_filter_accepts_both_names() {
        let short: EventQuery =
            serde_json::from_value(serde_json::json!({"type": "invoice_created"})).unwrap();
        assert_eq!(short.event_type, Some(EventType::InvoiceCreated));

        let long: EventQuery =
            serde_json::from_value(serde_json::json!({"event_type": "invoice_created"})).unwrap();
        assert_eq!(long.event_type, Some(EventType::InvoiceCreated));
    }

    #[test]
    fn test_audit_query_accepts_type_alias() {
        let q: AuditQuery = serde_json::from_value(
            serde_json::json!({"type": "payment_created", "page": 2}),
        )
        .unwrap();
        assert_eq!(q.event_type, Some(EventType::PaymentCreated));
        assert_eq!(q.page, Some(2));
    }
}
