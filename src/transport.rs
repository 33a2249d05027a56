//! Executes one network call and classifies the outcome into the uniform
//! envelope. All expected failures come back as values; nothing here raises.

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::signals::{ApiErrorSignal, SignalBus};
use crate::types::{ApiResult, RawResult, ResponseMeta, codes};

/// Body attached to an outbound call. JSON bodies arrive pre-serialized from
/// the caller's typed value; multipart forms carry their own content type.
pub(crate) enum Payload {
    Empty,
    Json(Value),
    Multipart(reqwest::multipart::Form),
}

/// Outcome of one transport round trip. An unauthorized answer is reported
/// separately so the dispatch layer can route eligible calls into the refresh
/// coordinator; it carries the plain failure envelope used when the call is
/// not eligible for a retry.
pub(crate) enum Dispatch {
    Settled(RawResult),
    Unauthorized(RawResult),
}

pub(crate) struct TransportExecutor {
    http: reqwest::Client,
    base_url: String,
    verbose_errors: bool,
    signals: SignalBus,
}

impl TransportExecutor {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        verbose_errors: bool,
        signals: SignalBus,
    ) -> Self {
        Self {
            http,
            base_url,
            verbose_errors,
            signals,
        }
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    pub async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        headers: HeaderMap,
        payload: Payload,
    ) -> Dispatch {
        let mut request = self
            .http
            .request(method.clone(), self.endpoint_url(endpoint))
            .headers(headers);
        request = match payload {
            Payload::Empty => request,
            Payload::Json(value) => request.body(value.to_string()),
            Payload::Multipart(form) => request.multipart(form),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return Dispatch::Settled(self.network_failure(endpoint, &err)),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(text) => text,
            Err(err) => return Dispatch::Settled(self.network_failure(endpoint, &err)),
        };
        debug!(%method, endpoint, status = status.as_u16(), "request.completed");

        self.classify(status, &body)
    }

    /// Envelope classification. Parse failures are resolved before the status
    /// is inspected, so an unauthorized answer with an unparseable body never
    /// reaches the refresh path.
    fn classify(&self, status: StatusCode, body: &str) -> Dispatch {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        match parsed {
            None => {
                if status.is_success() {
                    // Empty-body success, e.g. 204 from a delete.
                    Dispatch::Settled(ApiResult::success(None))
                } else {
                    Dispatch::Settled(ApiResult::failure(
                        "Invalid response from server",
                        codes::PARSE_ERROR,
                    ))
                }
            }
            Some(envelope) => {
                if status.is_success() {
                    Dispatch::Settled(unwrap_success(envelope))
                } else {
                    let failure = envelope_failure(status, &envelope);
                    if status == StatusCode::UNAUTHORIZED {
                        Dispatch::Unauthorized(failure)
                    } else {
                        Dispatch::Settled(failure)
                    }
                }
            }
        }
    }

    fn network_failure(&self, endpoint: &str, err: &reqwest::Error) -> RawResult {
        let raw = err.to_string();
        warn!(endpoint, error = %raw, "transport.network_error");
        self.signals.emit_api_error(ApiErrorSignal {
            message: raw.clone(),
            code: codes::NETWORK_ERROR.to_string(),
            endpoint: endpoint.to_string(),
        });
        let message = if self.verbose_errors {
            raw
        } else {
            "Unable to reach the server. Please try again.".to_string()
        };
        ApiResult::failure(message, codes::NETWORK_ERROR)
    }
}

/// Some endpoints nest their payload under `data`, others (login among them)
/// put it at the top level. A `data` key that is present and non-null wins;
/// anything else passes the whole body through. This mirrors the server-side
/// inconsistency and must not be normalized away.
fn unwrap_success(envelope: Value) -> RawResult {
    let message = envelope
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let meta: Option<ResponseMeta> = envelope
        .get("meta")
        .and_then(|m| serde_json::from_value(m.clone()).ok());
    let data = match envelope.get("data") {
        Some(value) if !value.is_null() => value.clone(),
        _ => envelope,
    };
    ApiResult::Success {
        data: Some(data),
        message,
        meta,
    }
}

fn envelope_failure(status: StatusCode, envelope: &Value) -> RawResult {
    let error = envelope
        .get("error")
        .and_then(Value::as_str)
        .or_else(|| envelope.get("message").and_then(Value::as_str))
        .unwrap_or("Request failed")
        .to_string();
    let code = envelope
        .get("code")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("HTTP_{}", status.as_u16()));
    ApiResult::Failure { error, code }
}
