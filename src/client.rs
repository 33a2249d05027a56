use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::config::Config;
use crate::dedup::InFlightCache;
use crate::errors::Error;
use crate::refresh::RefreshCoordinator;
use crate::request::{RequestOptions, build_headers, build_query};
use crate::signals::{ApiErrorSignal, SignalBus};
use crate::store::{MemoryBackend, StorageBackend, TokenStore};
use crate::telemetry::RefreshTelemetry;
use crate::transport::{Dispatch, Payload, TransportExecutor};
use crate::types::{ApiResult, RawResult, codes};

struct ClientInner {
    transport: TransportExecutor,
    tokens: TokenStore,
    refresh: RefreshCoordinator,
    dedup: InFlightCache,
    signals: SignalBus,
    login_path: String,
    logout_path: String,
    refresh_path: String,
    csrf_path: String,
}

/// Authenticated HTTP client for the platform API.
///
/// Every request method returns an [`ApiResult`]; expected failures never
/// raise. Token refresh is single-flight across all concurrent callers of one
/// client, identical concurrent GETs collapse into one transport call, and
/// auth/tenant/CSRF headers are injected per call unless skipped.
///
/// Cloning is cheap; clones share all state, including the token store, the
/// refresh coordinator, and the signal bus.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Builds a client with an in-memory token store. Credentials are lost on
    /// process exit; use [`ApiClient::with_backend`] with a
    /// [`FileBackend`](crate::FileBackend) to persist them.
    pub fn new(config: Config) -> Result<Self, Error> {
        Self::with_backend(config, Arc::new(MemoryBackend::new()))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn StorageBackend>) -> Result<Self, Error> {
        let base_url = if config.base_url.starts_with("http") {
            config.base_url.clone()
        } else {
            format!("https://{}", config.base_url)
        };
        let base_url = base_url.trim_end_matches('/').to_string();
        // Catch a malformed base before any request goes out.
        reqwest::Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("Invalid base URL '{base_url}': {e}")))?;

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build()?;

        let signals = SignalBus::new();
        let tokens = TokenStore::new(backend, config.default_tenant_id);
        let transport =
            TransportExecutor::new(http, base_url, config.verbose_errors, signals.clone());
        Ok(Self {
            inner: Arc::new(ClientInner {
                transport,
                tokens,
                refresh: RefreshCoordinator::new(),
                dedup: InFlightCache::new(),
                signals,
                login_path: config.login_path,
                logout_path: config.logout_path,
                refresh_path: config.refresh_path,
                csrf_path: config.csrf_path,
            }),
        })
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    /// Fires when a refresh attempt definitively fails and the caller must
    /// re-authenticate. Dropping the receiver unsubscribes.
    pub fn on_session_expired(&self) -> broadcast::Receiver<()> {
        self.inner.signals.subscribe_session_expired()
    }

    /// Fires on network-layer failures with the raw error and endpoint, for
    /// toast/error surfaces. Ordinary 4xx/5xx envelopes do not fire this.
    pub fn on_api_error(&self) -> broadcast::Receiver<ApiErrorSignal> {
        self.inner.signals.subscribe_api_errors()
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<T> {
        self.get_with(endpoint, RequestOptions::default()).await
    }

    pub async fn get_with<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        opts: RequestOptions,
    ) -> ApiResult<T> {
        self.request(Method::GET, endpoint, None, opts).await
    }

    /// GET with query parameters appended via [`build_query`]; absent and
    /// empty values are skipped.
    pub async fn get_query<'a, T, I>(&self, endpoint: &str, params: I) -> ApiResult<T>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = (&'a str, Option<String>)>,
    {
        let endpoint = format!("{endpoint}{}", build_query(params));
        self.get(&endpoint).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &impl Serialize,
    ) -> ApiResult<T> {
        self.post_with(endpoint, body, RequestOptions::default())
            .await
    }

    pub async fn post_with<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &impl Serialize,
        opts: RequestOptions,
    ) -> ApiResult<T> {
        self.send_json(Method::POST, endpoint, body, opts).await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &impl Serialize,
    ) -> ApiResult<T> {
        self.send_json(Method::PUT, endpoint, body, RequestOptions::default())
            .await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &impl Serialize,
    ) -> ApiResult<T> {
        self.send_json(Method::PATCH, endpoint, body, RequestOptions::default())
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<T> {
        self.delete_with(endpoint, RequestOptions::default()).await
    }

    pub async fn delete_with<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        opts: RequestOptions,
    ) -> ApiResult<T> {
        self.request(Method::DELETE, endpoint, None, opts).await
    }

    /// Low-level entry point; the typed convenience methods all funnel here.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        opts: RequestOptions,
    ) -> ApiResult<T> {
        self.request_raw(method, endpoint, body, opts)
            .await
            .into_typed()
    }

    /// Multipart upload. Parts are held as owned data so the form can be
    /// rebuilt for the one replay after a refresh; the transport sets the
    /// multipart boundary itself, so no JSON content type is attached.
    /// Uploads are never deduplicated.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        form: UploadForm,
    ) -> ApiResult<T> {
        self.upload_with(endpoint, form, RequestOptions::default())
            .await
    }

    pub async fn upload_with<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        form: UploadForm,
        opts: RequestOptions,
    ) -> ApiResult<T> {
        self.run_with_refresh(&opts, || {
            let headers = build_headers(&Method::POST, false, &self.inner.tokens, &opts);
            self.inner.transport.execute(
                Method::POST,
                endpoint,
                headers,
                Payload::Multipart(form.to_multipart()),
            )
        })
        .await
        .into_typed()
    }

    /// Authenticates and stores the issued tokens. The login payload arrives
    /// at the top level of the response body rather than under `data`.
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<Value> {
        let body = serde_json::json!({ "email": email, "password": password });
        let result: ApiResult<Value> = self
            .request(
                Method::POST,
                &self.inner.login_path,
                Some(body),
                RequestOptions::unauthenticated(),
            )
            .await;
        if let ApiResult::Success {
            data: Some(payload),
            ..
        } = &result
        {
            if let Some(token) = payload.get("access_token").and_then(Value::as_str) {
                self.inner.tokens.set_access_token(token);
            }
            if let Some(token) = payload.get("refresh_token").and_then(Value::as_str) {
                self.inner.tokens.set_refresh_token(token);
            }
        }
        result
    }

    /// Best-effort server-side logout; local credentials are cleared no
    /// matter how the server answered.
    pub async fn logout(&self) -> ApiResult<Value> {
        let result = self
            .request(
                Method::POST,
                &self.inner.logout_path,
                Some(serde_json::json!({})),
                RequestOptions::default(),
            )
            .await;
        self.inner.tokens.clear_tokens();
        result
    }

    /// Session bootstrap: fetches a CSRF token and stores it for subsequent
    /// state-changing calls.
    pub async fn fetch_csrf_token(&self) -> ApiResult<Value> {
        let opts = RequestOptions {
            skip_csrf: true,
            ..RequestOptions::default()
        };
        let result: ApiResult<Value> = self
            .request(Method::GET, &self.inner.csrf_path, None, opts)
            .await;
        if let ApiResult::Success {
            data: Some(payload),
            ..
        } = &result
        {
            match payload.get("csrf_token").and_then(Value::as_str) {
                Some(token) => self.inner.tokens.set_csrf_token(token),
                None => warn!("csrf.bootstrap_missing_token"),
            }
        }
        result
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: &impl Serialize,
        opts: RequestOptions,
    ) -> ApiResult<T> {
        let body = match serde_json::to_value(body) {
            Ok(value) => value,
            Err(err) => {
                return ApiResult::failure(
                    format!("Failed to encode request body: {err}"),
                    codes::PARSE_ERROR,
                );
            }
        };
        self.request(method, endpoint, Some(body), opts).await
    }

    /// Routes body-less GETs through the in-flight cache; everything else
    /// dispatches directly.
    async fn request_raw(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        opts: RequestOptions,
    ) -> RawResult {
        if method == Method::GET && body.is_none() {
            let key = InFlightCache::key(&method, endpoint);
            let client = self.clone();
            let endpoint = endpoint.to_string();
            return self
                .inner
                .dedup
                .dedupe(key, move || async move {
                    client.dispatch(Method::GET, &endpoint, None, opts).await
                })
                .await;
        }
        self.dispatch(method, endpoint, body, opts).await
    }

    async fn dispatch(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        opts: RequestOptions,
    ) -> RawResult {
        self.run_with_refresh(&opts, || {
            // Headers are rebuilt per attempt so the replay carries the
            // rotated access token.
            let headers = build_headers(&method, body.is_some(), &self.inner.tokens, &opts);
            let payload = match &body {
                Some(value) => Payload::Json(value.clone()),
                None => Payload::Empty,
            };
            self.inner
                .transport
                .execute(method.clone(), endpoint, headers, payload)
        })
        .await
    }

    /// One send, and on an eligible 401 one refresh followed by exactly one
    /// replay. A 401 on the replay is surfaced as a plain failure instead of
    /// re-entering the coordinator.
    async fn run_with_refresh<F, Fut>(&self, opts: &RequestOptions, send: F) -> RawResult
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Dispatch>,
    {
        match send().await {
            Dispatch::Settled(result) => result,
            Dispatch::Unauthorized(unauthorized) => {
                if opts.skip_auth || !opts.retry_on_unauthorized {
                    return unauthorized;
                }
                if !self.ensure_refreshed().await {
                    return ApiResult::failure(
                        "Your session has expired. Please sign in again.",
                        codes::SESSION_EXPIRED,
                    );
                }
                match send().await {
                    Dispatch::Settled(result) => result,
                    Dispatch::Unauthorized(unauthorized) => unauthorized,
                }
            }
        }
    }

    async fn ensure_refreshed(&self) -> bool {
        let client = self.clone();
        self.inner
            .refresh
            .refresh(move || async move { client.perform_refresh().await })
            .await
    }

    /// The single refresh operation installed by the coordinator. Rotates the
    /// access token (and the refresh token when the server issues one); any
    /// failure, including transport errors, definitively expires the session.
    /// Runs at most once per coordinated flight, so the session-expired
    /// signal fires at most once no matter how many callers piled up.
    async fn perform_refresh(&self) -> bool {
        let inner = &self.inner;
        let telemetry = RefreshTelemetry::new(&inner.refresh_path);
        let Some(refresh_token) = inner.tokens.refresh_token() else {
            telemetry.emit_failure("missing_refresh_token");
            self.expire_session();
            return false;
        };
        telemetry.emit_start();

        let opts = RequestOptions::unauthenticated();
        let body = serde_json::json!({ "refresh_token": refresh_token });
        let headers = build_headers(&Method::POST, true, &inner.tokens, &opts);
        let outcome = match inner
            .transport
            .execute(
                Method::POST,
                &inner.refresh_path,
                headers,
                Payload::Json(body),
            )
            .await
        {
            Dispatch::Settled(result) => result,
            Dispatch::Unauthorized(unauthorized) => unauthorized,
        };

        let payload = match outcome {
            ApiResult::Success {
                data: Some(payload),
                ..
            } => payload,
            ApiResult::Success { data: None, .. } => {
                telemetry.emit_failure("empty_refresh_response");
                self.expire_session();
                return false;
            }
            ApiResult::Failure { code, .. } => {
                telemetry.emit_failure(&code);
                self.expire_session();
                return false;
            }
        };

        match payload.get("access_token").and_then(Value::as_str) {
            Some(access_token) => {
                inner.tokens.set_access_token(access_token);
                let rotated = payload.get("refresh_token").and_then(Value::as_str);
                if let Some(next_refresh) = rotated {
                    inner.tokens.set_refresh_token(next_refresh);
                }
                telemetry.emit_success(rotated.is_some());
                true
            }
            None => {
                telemetry.emit_failure("malformed_refresh_response");
                self.expire_session();
                false
            }
        }
    }

    fn expire_session(&self) {
        self.inner.tokens.clear_tokens();
        self.inner.signals.emit_session_expired();
    }

    #[cfg(test)]
    pub(crate) fn pending_request_count(&self) -> usize {
        self.inner.dedup.pending_count()
    }

    #[cfg(test)]
    pub(crate) fn is_refreshing(&self) -> bool {
        self.inner.refresh.is_refreshing()
    }
}

/// Multipart form content held as owned data so an upload can be replayed
/// after a token refresh.
#[derive(Clone, Debug, Default)]
pub struct UploadForm {
    fields: Vec<(String, String)>,
    files: Vec<UploadFile>,
}

#[derive(Clone, Debug)]
struct UploadFile {
    name: String,
    file_name: String,
    mime: Option<String>,
    bytes: Vec<u8>,
}

impl UploadForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(
        self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.file_with_mime(name, file_name, None, bytes)
    }

    pub fn file_with_mime(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: Option<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.files.push(UploadFile {
            name: name.into(),
            file_name: file_name.into(),
            mime,
            bytes,
        });
        self
    }

    fn to_multipart(&self) -> reqwest::multipart::Form {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in &self.fields {
            form = form.text(name.clone(), value.clone());
        }
        for file in &self.files {
            let mut part = reqwest::multipart::Part::bytes(file.bytes.clone())
                .file_name(file.file_name.clone());
            if let Some(mime) = &file.mime {
                part = match part.mime_str(mime) {
                    Ok(with_mime) => with_mime,
                    Err(_) => {
                        warn!(mime = %mime, "upload.invalid_mime");
                        reqwest::multipart::Part::bytes(file.bytes.clone())
                            .file_name(file.file_name.clone())
                    }
                };
            }
            form = form.part(file.name.clone(), part);
        }
        form
    }
}
