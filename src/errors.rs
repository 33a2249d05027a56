use thiserror::Error;

/// Construction-time failures.
///
/// Request-level failures (transport errors, server error envelopes, expired
/// sessions) never surface through this type; they come back as
/// [`ApiResult`](crate::ApiResult) values so callers check a flag instead of
/// catching.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("http client setup failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("config parse failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config read failed: {0}")]
    Io(#[from] std::io::Error),
}
