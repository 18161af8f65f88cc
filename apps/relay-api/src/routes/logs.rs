//! Polling transport: `GET`/`POST`/`OPTIONS /api/logs`.
//!
//! Shares the hub with the WebSocket transport, so a POSTed event is also
//! pushed to every connected viewer. Visibility for polling clients is bounded
//! by their poll interval; `after` lets them fetch only what is new.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, ApiErrorBody};
use crate::hub::LogOrder;
use crate::models::event::{EventRecord, NewEvent};
use crate::source::SourceAddress;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/logs",
        get(list_logs)
            .post(create_log)
            .options(preflight)
            .fallback(method_not_allowed),
    )
}

// ---------------------------------------------------------------------------
// GET /api/logs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListLogsParams {
    /// `desc` (default, newest first) or `asc` (chronological).
    pub order: Option<String>,
    /// Only return records with a larger `seq`.
    pub after: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListLogsResponse {
    pub success: bool,
    #[schema(value_type = Vec<EventRecord>)]
    pub logs: Vec<Arc<EventRecord>>,
    /// Number of records currently held, independent of `after`.
    pub total: usize,
}

fn parse_order(raw: Option<&str>) -> Result<LogOrder, ApiError> {
    match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
        None | Some("desc") => Ok(LogOrder::NewestFirst),
        Some("asc") => Ok(LogOrder::OldestFirst),
        Some(other) => Err(ApiError::bad_request(format!(
            "order must be 'asc' or 'desc', got '{other}'"
        ))),
    }
}

fn parse_after(raw: Option<&str>) -> Result<Option<u64>, ApiError> {
    raw.map(|s| {
        s.trim().parse::<u64>().map_err(|_| {
            ApiError::bad_request(format!("after must be a non-negative integer, got '{s}'"))
        })
    })
    .transpose()
}

#[utoipa::path(
    get,
    path = "/api/logs",
    tag = "Logs",
    params(
        ("order" = Option<String>, Query, description = "`desc` (default) or `asc`"),
        ("after" = Option<u64>, Query, description = "Only records with seq greater than this"),
    ),
    responses(
        (status = 200, description = "Current log contents", body = ListLogsResponse),
        (status = 400, description = "Invalid query", body = ApiErrorBody),
    ),
)]
pub async fn list_logs(
    State(state): State<AppState>,
    Query(params): Query<ListLogsParams>,
) -> Result<Json<ListLogsResponse>, ApiError> {
    let order = parse_order(params.order.as_deref())?;
    let after = parse_after(params.after.as_deref())?;
    let page = state.hub.query(order, after);

    Ok(Json(ListLogsResponse {
        success: true,
        logs: page.logs,
        total: page.total,
    }))
}

// ---------------------------------------------------------------------------
// POST /api/logs
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateLogResponse {
    pub success: bool,
    #[schema(value_type = EventRecord)]
    pub log: Arc<EventRecord>,
    pub total: usize,
}

#[utoipa::path(
    post,
    path = "/api/logs",
    tag = "Logs",
    request_body = NewEvent,
    responses(
        (status = 200, description = "Event accepted and broadcast", body = CreateLogResponse),
        (status = 400, description = "Malformed event", body = ApiErrorBody),
        (status = 429, description = "Throttled", body = ApiErrorBody),
    ),
)]
pub async fn create_log(
    State(state): State<AppState>,
    SourceAddress(source): SourceAddress,
    body: Bytes,
) -> Result<Json<CreateLogResponse>, ApiError> {
    // Parse by hand so every malformed body maps to one 400 shape.
    let event: NewEvent = serde_json::from_slice(&body)?;

    if !state.throttle.admit(&event.session_id, &event.kind) {
        tracing::debug!(session_id = %event.session_id, kind = %event.kind, "event throttled");
        return Err(ApiError::too_many_requests(format!(
            "Too many {} events for this session",
            event.kind
        )));
    }

    let submitted = state.hub.submit(event, source);
    tracing::info!(
        seq = submitted.record.seq,
        kind = %submitted.record.kind,
        source = %submitted.record.source_address,
        "log received over http"
    );

    Ok(Json(CreateLogResponse {
        success: true,
        log: submitted.record,
        total: submitted.total,
    }))
}

// ---------------------------------------------------------------------------
// OPTIONS /api/logs and everything else
// ---------------------------------------------------------------------------

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_defaults_to_newest_first() {
        assert_eq!(parse_order(None).unwrap(), LogOrder::NewestFirst);
        assert_eq!(parse_order(Some("DESC")).unwrap(), LogOrder::NewestFirst);
        assert_eq!(parse_order(Some("asc")).unwrap(), LogOrder::OldestFirst);
        assert!(parse_order(Some("sideways")).is_err());
    }

    #[test]
    fn after_must_be_a_sequence_number() {
        assert_eq!(parse_after(None).unwrap(), None);
        assert_eq!(parse_after(Some("7")).unwrap(), Some(7));
        assert!(parse_after(Some("abc")).is_err());
        assert!(parse_after(Some("-1")).is_err());
    }
}
