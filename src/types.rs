use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Failure codes produced by the client itself. Server-supplied codes are
/// passed through verbatim and are not enumerated here.
pub mod codes {
    /// Transport-level failure: the server could not be reached at all.
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    /// The server answered with an error status and an unparseable body.
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    /// Token refresh failed definitively; the caller must re-authenticate.
    pub const SESSION_EXPIRED: &str = "SESSION_EXPIRED";
}

/// Pagination and endpoint-specific side-channel data attached to a success
/// envelope. The shape is deliberately open: endpoints are free to tuck extra
/// keys (e.g. conversation metadata) next to the cursor fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_cursor: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// The uniform envelope returned by every request method.
///
/// Expected failures are data, not panics or `Err`: transport errors, server
/// error envelopes, and expired sessions all arrive as [`ApiResult::Failure`].
#[derive(Clone, Debug, PartialEq)]
pub enum ApiResult<T> {
    Success {
        data: Option<T>,
        message: Option<String>,
        meta: Option<ResponseMeta>,
    },
    Failure {
        error: String,
        code: String,
    },
}

impl<T> ApiResult<T> {
    pub fn success(data: Option<T>) -> Self {
        ApiResult::Success {
            data,
            message: None,
            meta: None,
        }
    }

    pub fn failure(error: impl Into<String>, code: impl Into<String>) -> Self {
        ApiResult::Failure {
            error: error.into(),
            code: code.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ApiResult::Success { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            ApiResult::Success { data, .. } => data.as_ref(),
            ApiResult::Failure { .. } => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            ApiResult::Success { data, .. } => data,
            ApiResult::Failure { .. } => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            ApiResult::Success { message, .. } => message.as_deref(),
            ApiResult::Failure { .. } => None,
        }
    }

    pub fn meta(&self) -> Option<&ResponseMeta> {
        match self {
            ApiResult::Success { meta, .. } => meta.as_ref(),
            ApiResult::Failure { .. } => None,
        }
    }

    /// Failure code, if this is a failure.
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiResult::Success { .. } => None,
            ApiResult::Failure { code, .. } => Some(code),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ApiResult::Success { .. } => None,
            ApiResult::Failure { error, .. } => Some(error),
        }
    }
}

/// Untyped envelope used internally so that collapsed concurrent callers can
/// share one settled value before each deserializes its own copy.
pub(crate) type RawResult = ApiResult<Value>;

impl ApiResult<Value> {
    pub(crate) fn into_typed<T: DeserializeOwned>(self) -> ApiResult<T> {
        match self {
            ApiResult::Success {
                data: None,
                message,
                meta,
            } => ApiResult::Success {
                data: None,
                message,
                meta,
            },
            ApiResult::Success {
                data: Some(value),
                message,
                meta,
            } => match serde_json::from_value(value) {
                Ok(decoded) => ApiResult::Success {
                    data: Some(decoded),
                    message,
                    meta,
                },
                Err(err) => ApiResult::failure(
                    format!("Failed to decode response body: {err}"),
                    codes::PARSE_ERROR,
                ),
            },
            ApiResult::Failure { error, code } => ApiResult::Failure { error, code },
        }
    }
}
