use tracing::{Level, event};
use uuid::Uuid;

/// Correlates the tracing events of one refresh attempt.
#[derive(Clone, Debug)]
pub(crate) struct RefreshTelemetry {
    attempt_id: Uuid,
    endpoint: String,
}

impl RefreshTelemetry {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            endpoint: endpoint.into(),
        }
    }

    pub fn emit_start(&self) {
        event!(
            Level::INFO,
            attempt_id = %self.attempt_id,
            endpoint = %self.endpoint,
            "refresh.start"
        );
    }

    pub fn emit_success(&self, rotated_refresh_token: bool) {
        event!(
            Level::INFO,
            attempt_id = %self.attempt_id,
            endpoint = %self.endpoint,
            rotated_refresh_token,
            "refresh.success"
        );
    }

    pub fn emit_failure(&self, reason: &str) {
        event!(
            Level::WARN,
            attempt_id = %self.attempt_id,
            endpoint = %self.endpoint,
            reason = %reason,
            "refresh.failure"
        );
    }
}
