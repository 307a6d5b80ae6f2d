pub mod dto;
pub mod errors;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::app::Greenhouse;
use handlers::ApiDoc;

pub fn router(greenhouse: Greenhouse) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/sensors", get(handlers::list_records))
        .route("/sensors/latest", get(handlers::get_latest_record))
        .route("/sensors/merge", post(handlers::merge_records))
        .route("/sensors/{kind}", post(handlers::ingest_reading))
        .route("/devices", get(handlers::get_devices))
        .route("/devices/history", get(handlers::get_device_history))
        .route("/devices/control", post(handlers::control_device))
        .route(
            "/automation",
            get(handlers::get_automation).put(handlers::update_automation),
        )
        .route("/automation/check", post(handlers::run_automation_check))
        .route("/alerts", get(handlers::list_alerts))
        .route(
            "/settings/alerts",
            get(handlers::get_alert_settings).put(handlers::update_alert_settings),
        )
        .route("/ws", get(handlers::live_events))
        .with_state(greenhouse)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
