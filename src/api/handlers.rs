use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
    Json,
};
use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use utoipa::OpenApi;

use super::{
    dto::{AlertQuery, ControlCommand, ControlResponse, DevicesResponse, LimitParams},
    errors::AppError,
};
use crate::{
    alerts::AlertSettings,
    app::Greenhouse,
    automation::{AutomationAction, AutomationConfig, AutomationConfigUpdate},
    broadcast::BroadcastEvent,
    control::ControlRequest,
    db::models::{
        Alert, ControlSource, DeviceHistory, DeviceState, SensorKind, SensorRecord,
    },
    error::GreenhouseError,
    merge::{merge_before_read, MergeOptions, MergeReport},
    sensors::IngestOutcome,
};

/// Failures that are not the caller's fault are also recorded as a
/// `system` alert for `component`.
async fn reported<T>(
    gh: &Greenhouse,
    component: &str,
    result: Result<T, GreenhouseError>,
) -> Result<T, AppError> {
    if let Err(e) = &result {
        if !e.is_input_error() {
            gh.alerts.handle_system_error(&e.to_string(), component).await;
        }
    }
    Ok(result?)
}

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// Latest persisted record, after a merge pass.
#[utoipa::path(
    get,
    path = "/sensors/latest",
    responses(
        (status = 200, description = "Most recent sensor record, or null", body = Option<SensorRecord>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "sensors"
)]
pub async fn get_latest_record(
    State(gh): State<Greenhouse>,
) -> Result<Json<Option<SensorRecord>>, AppError> {
    merge_before_read(&gh.merger, gh.read_merge, &gh.alerts).await;
    Ok(Json(gh.records.latest_record().await?))
}

/// Recent records, newest first, after a merge pass.
#[utoipa::path(
    get,
    path = "/sensors",
    params(LimitParams),
    responses(
        (status = 200, description = "Sensor records, newest first", body = Vec<SensorRecord>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "sensors"
)]
pub async fn list_records(
    State(gh): State<Greenhouse>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<SensorRecord>>, AppError> {
    merge_before_read(&gh.merger, gh.read_merge, &gh.alerts).await;
    Ok(Json(gh.records.recent_records(params.limit()).await?))
}

/// Run a merge pass with explicit options.
#[utoipa::path(
    post,
    path = "/sensors/merge",
    request_body = MergeOptions,
    responses(
        (status = 200, description = "Merge report", body = MergeReport),
        (status = 500, description = "Internal server error"),
    ),
    tag = "sensors"
)]
pub async fn merge_records(
    State(gh): State<Greenhouse>,
    Json(options): Json<MergeOptions>,
) -> Result<Json<MergeReport>, AppError> {
    let report = gh.merger.merge_same_timestamp_data(options).await;
    Ok(Json(reported(&gh, "merge", report).await?))
}

/// Ingest one reading. The body is a bare number, as published over MQTT.
#[utoipa::path(
    post,
    path = "/sensors/{kind}",
    params(("kind" = String, Path, description = "Sensor name, e.g. `temperature` or `soil`")),
    request_body(content = String, content_type = "text/plain"),
    responses(
        (status = 200, description = "Reading accepted", body = IngestOutcome),
        (status = 400, description = "Unknown sensor or unparseable value"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "sensors"
)]
pub async fn ingest_reading(
    State(gh): State<Greenhouse>,
    Path(kind): Path<String>,
    body: String,
) -> Result<Json<IngestOutcome>, AppError> {
    let kind: SensorKind = kind.parse()?;
    let outcome = gh.sensors.ingest(kind, &body, Utc::now()).await;
    Ok(Json(reported(&gh, "ingest", outcome).await?))
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/devices",
    responses(
        (status = 200, description = "Persisted device status and automation cache", body = DevicesResponse),
        (status = 500, description = "Internal server error"),
    ),
    tag = "devices"
)]
pub async fn get_devices(State(gh): State<Greenhouse>) -> Result<Json<DevicesResponse>, AppError> {
    Ok(Json(DevicesResponse {
        devices: gh.devices.device_states().await?,
        automation_cache: gh.automation.get_device_state_cache().await,
    }))
}

#[utoipa::path(
    get,
    path = "/devices/history",
    params(LimitParams),
    responses(
        (status = 200, description = "Command history, newest first", body = Vec<DeviceHistory>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "devices"
)]
pub async fn get_device_history(
    State(gh): State<Greenhouse>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<DeviceHistory>>, AppError> {
    Ok(Json(gh.devices.recent_history(params.limit()).await?))
}

/// Operator command. Bypasses the automation cache.
#[utoipa::path(
    post,
    path = "/devices/control",
    request_body = ControlCommand,
    responses(
        (status = 200, description = "Command delivered", body = ControlResponse),
        (status = 400, description = "Action does not apply to the device"),
        (status = 502, description = "Command could not be published"),
    ),
    tag = "devices"
)]
pub async fn control_device(
    State(gh): State<Greenhouse>,
    Json(cmd): Json<ControlCommand>,
) -> Result<Json<ControlResponse>, AppError> {
    if !cmd.action.fits(cmd.device) {
        return Err(GreenhouseError::InvalidCommand {
            device: cmd.device.to_string(),
            action: cmd.action.to_string(),
        }
        .into());
    }
    let sent = gh
        .controller
        .execute(ControlRequest {
            device: cmd.device,
            action: cmd.action,
            source: ControlSource::Manual,
            reason: cmd.reason.unwrap_or_else(|| "manual control".to_owned()),
            triggering_value: None,
        })
        .await;
    reported(&gh, "control", sent).await?;
    Ok(Json(ControlResponse {
        device: cmd.device,
        action: cmd.action,
        status: cmd.action.status(),
    }))
}

// ---------------------------------------------------------------------------
// Automation
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/automation",
    responses(
        (status = 200, description = "Current automation configuration", body = AutomationConfig),
        (status = 503, description = "Configuration not loaded"),
    ),
    tag = "automation"
)]
pub async fn get_automation(State(gh): State<Greenhouse>) -> Result<Json<AutomationConfig>, AppError> {
    Ok(Json(gh.automation.settings().current().await?))
}

/// Partial update; omitted fields keep their value.
#[utoipa::path(
    put,
    path = "/automation",
    request_body = AutomationConfigUpdate,
    responses(
        (status = 200, description = "Updated configuration", body = AutomationConfig),
        (status = 500, description = "Internal server error"),
    ),
    tag = "automation"
)]
pub async fn update_automation(
    State(gh): State<Greenhouse>,
    Json(patch): Json<AutomationConfigUpdate>,
) -> Result<Json<AutomationConfig>, AppError> {
    let updated = gh.automation.update_configuration(patch).await;
    Ok(Json(reported(&gh, "automation", updated).await?))
}

/// Evaluate the latest record now instead of waiting for the next tick.
#[utoipa::path(
    post,
    path = "/automation/check",
    responses(
        (status = 200, description = "Commands issued by the check", body = Vec<AutomationAction>),
    ),
    tag = "automation"
)]
pub async fn run_automation_check(State(gh): State<Greenhouse>) -> Json<Vec<AutomationAction>> {
    Json(gh.automation.process_immediate_automation_check().await)
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/alerts",
    params(AlertQuery),
    responses(
        (status = 200, description = "Alerts, newest first", body = Vec<Alert>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alerts"
)]
pub async fn list_alerts(
    State(gh): State<Greenhouse>,
    Query(query): Query<AlertQuery>,
) -> Result<Json<Vec<Alert>>, AppError> {
    Ok(Json(gh.alert_store.list_alerts(query.resolved, query.limit()).await?))
}

#[utoipa::path(
    get,
    path = "/settings/alerts",
    responses((status = 200, description = "Alert thresholds and notification settings", body = AlertSettings)),
    tag = "alerts"
)]
pub async fn get_alert_settings(State(gh): State<Greenhouse>) -> Json<AlertSettings> {
    Json(gh.alerts.settings().await)
}

#[utoipa::path(
    put,
    path = "/settings/alerts",
    request_body = AlertSettings,
    responses(
        (status = 200, description = "Saved settings", body = AlertSettings),
        (status = 400, description = "A band has min above max"),
    ),
    tag = "alerts"
)]
pub async fn update_alert_settings(
    State(gh): State<Greenhouse>,
    Json(settings): Json<AlertSettings>,
) -> Result<Json<AlertSettings>, AppError> {
    let saved = gh.alerts.update_settings(settings).await;
    Ok(Json(reported(&gh, "alerts", saved).await?))
}

// ---------------------------------------------------------------------------
// Live view
// ---------------------------------------------------------------------------

/// Streams every broadcast event as a JSON text frame.
pub async fn live_events(State(gh): State<Greenhouse>, upgrade: WebSocketUpgrade) -> Response {
    let rx = gh.broadcaster.subscribe();
    upgrade.on_upgrade(move |socket| forward_events(socket, rx))
}

async fn forward_events(mut socket: WebSocket, mut rx: broadcast::Receiver<BroadcastEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Live view subscriber lagging; events dropped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "Skipping unserialisable event");
                continue;
            }
        };
        if socket.send(Message::Text(text.into())).await.is_err() {
            debug!("Live view subscriber disconnected");
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        get_latest_record,
        list_records,
        merge_records,
        ingest_reading,
        get_devices,
        get_device_history,
        control_device,
        get_automation,
        update_automation,
        run_automation_check,
        list_alerts,
        get_alert_settings,
        update_alert_settings,
        health,
    ),
    components(schemas(
        SensorRecord,
        SensorKind,
        MergeOptions,
        MergeReport,
        IngestOutcome,
        DeviceState,
        DeviceHistory,
        DevicesResponse,
        ControlCommand,
        ControlResponse,
        AutomationConfig,
        AutomationConfigUpdate,
        AutomationAction,
        Alert,
        AlertSettings,
    )),
    tags(
        (name = "sensors", description = "Sensor ingest, records and merging"),
        (name = "devices", description = "Actuator status and control"),
        (name = "automation", description = "Automation configuration and checks"),
        (name = "alerts", description = "Threshold alerts and notification settings"),
        (name = "system", description = "System endpoints"),
    ),
    info(
        title = "Greenhouse Service API",
        version = "0.1.0",
        description = "REST API for greenhouse sensor data, automation and alerts"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
