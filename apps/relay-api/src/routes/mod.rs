pub mod health;
pub mod logs;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(logs::router())
        .merge(crate::hub::server::router())
}

#[derive(OpenApi)]
#[openapi(
    info(title = "Activity Relay", description = "Real-time interaction log relay"),
    paths(
        // Health
        health::health,
        // Logs
        logs::list_logs,
        logs::create_log,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            // Models
            crate::models::event::EventRecord,
            crate::models::event::NewEvent,
            // Route request/response types
            health::HealthResponse,
            logs::ListLogsResponse,
            logs::CreateLogResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Logs", description = "Polling access to the event log"),
    )
)]
pub struct ApiDoc;
