//! Process-wide session and error signals.
//!
//! Consumers (logout redirects, toast surfaces) subscribe to the bus without
//! the client knowing about them. Emission is fire-and-forget: a signal with
//! zero subscribers is simply dropped.

use tokio::sync::broadcast;

/// Buffered per subscriber; a slow subscriber lags rather than blocking emit.
const SIGNAL_BUFFER: usize = 16;

/// Detail delivered to api-error subscribers when the network layer fails.
/// Ordinary 4xx/5xx server envelopes do not produce this signal.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiErrorSignal {
    /// Raw transport error message, unsanitized.
    pub message: String,
    pub code: String,
    pub endpoint: String,
}

#[derive(Clone)]
pub(crate) struct SignalBus {
    session_expired: broadcast::Sender<()>,
    api_errors: broadcast::Sender<ApiErrorSignal>,
}

impl SignalBus {
    pub fn new() -> Self {
        let (session_expired, _) = broadcast::channel(SIGNAL_BUFFER);
        let (api_errors, _) = broadcast::channel(SIGNAL_BUFFER);
        Self {
            session_expired,
            api_errors,
        }
    }

    pub fn subscribe_session_expired(&self) -> broadcast::Receiver<()> {
        self.session_expired.subscribe()
    }

    pub fn subscribe_api_errors(&self) -> broadcast::Receiver<ApiErrorSignal> {
        self.api_errors.subscribe()
    }

    pub fn emit_session_expired(&self) {
        let _ = self.session_expired.send(());
    }

    pub fn emit_api_error(&self, signal: ApiErrorSignal) {
        let _ = self.api_errors.send(signal);
    }
}
