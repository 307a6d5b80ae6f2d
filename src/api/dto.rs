use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::db::models::{DeviceAction, DeviceState, DeviceType};

pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 1_000;

#[derive(Debug, Deserialize, IntoParams)]
pub struct LimitParams {
    /// Maximum number of rows, 1..=1000. Defaults to 100.
    pub limit: Option<i64>,
}

impl LimitParams {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AlertQuery {
    /// Only resolved (`true`) or only open (`false`) alerts. Both when omitted.
    pub resolved: Option<bool>,
    pub limit: Option<i64>,
}

impl AlertQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// Response for `GET /devices`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DevicesResponse {
    /// Last delivered command per device.
    pub devices: Vec<DeviceState>,
    /// Last accepted automation decision per device, delivered or not.
    pub automation_cache: Vec<DeviceState>,
}

/// Request body for `POST /devices/control`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlCommand {
    pub device: DeviceType,
    /// `on`/`off` for light and pump, `open`/`close` for door and window.
    pub action: DeviceAction,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub device: DeviceType,
    pub action: DeviceAction,
    pub status: bool,
}
