use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::GreenhouseError;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<GreenhouseError>() {
            Some(e) if e.is_input_error() => StatusCode::BAD_REQUEST,
            Some(GreenhouseError::ConfigUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Some(GreenhouseError::PublishFailure { .. }) => StatusCode::BAD_GATEWAY,
            Some(GreenhouseError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_bad_requests() {
        let err = AppError::from(GreenhouseError::UnknownSensor("co2".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn undelivered_command_is_a_gateway_error() {
        let err = AppError::from(GreenhouseError::PublishFailure {
            topic: "greenhouse/devices/pump/control".into(),
            reason: "queue full".into(),
        });
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            AppError::from(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
