use thiserror::Error;

/// Errors raised by the ingestion, merge, automation and alerting pipeline.
#[derive(Debug, Error)]
pub enum GreenhouseError {
    /// Payload could not be parsed as a finite number. The reading is dropped.
    #[error("invalid reading for {kind}: {payload:?}")]
    InvalidReading { kind: String, payload: String },

    #[error("unknown sensor: {0:?}")]
    UnknownSensor(String),

    #[error("{action} is not a valid command for the {device}")]
    InvalidCommand { device: String, action: String },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// A merge group could not be resolved deterministically.
    #[error("merge conflict in group anchored at {anchor}: {reason}")]
    MergeConflict { anchor: String, reason: String },

    #[error("failed to publish to {topic}: {reason}")]
    PublishFailure { topic: String, reason: String },

    #[error("automation configuration unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("notification dispatch failed: {0}")]
    Notification(String),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
}

impl GreenhouseError {
    /// Input errors are dropped with a log line; everything else is reported
    /// through the system-error alert path.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            GreenhouseError::InvalidReading { .. }
                | GreenhouseError::UnknownSensor(_)
                | GreenhouseError::InvalidCommand { .. }
                | GreenhouseError::InvalidSettings(_)
        )
    }
}

/// Failures of the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type Result<T, E = GreenhouseError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_reading_is_an_input_error() {
        let err = GreenhouseError::InvalidReading {
            kind: "temperature".into(),
            payload: "abc".into(),
        };
        assert!(err.is_input_error());
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn publish_failure_is_not_an_input_error() {
        let err = GreenhouseError::PublishFailure {
            topic: "greenhouse/devices/light/control".into(),
            reason: "not connected".into(),
        };
        assert!(!err.is_input_error());
    }
}
