mod client;
mod config;
mod dedup;
mod errors;
mod refresh;
mod request;
mod signals;
mod store;
mod telemetry;
mod transport;
mod types;

pub use client::{ApiClient, UploadForm};
pub use config::Config;
pub use errors::Error;
pub use request::{CSRF_HEADER, RequestOptions, TENANT_HEADER, build_query};
pub use signals::ApiErrorSignal;
pub use store::{FileBackend, MemoryBackend, StorageBackend, TokenStore};
pub use types::{ApiResult, ResponseMeta, codes};

#[cfg(test)]
mod tests;
