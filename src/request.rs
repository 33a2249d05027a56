//! Header and query composition for outbound requests.
//!
//! Everything here is pure: output depends only on the store snapshot and the
//! per-call options. Network access and mutation happen in the transport.

use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::store::TokenStore;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Per-call switches consumed by the header builder and the dispatch loop.
///
/// The skip flags exist for pre-authentication endpoints (login, register,
/// the token refresh itself, tenant bootstrap) and the CSRF fetch; everything
/// else runs with the defaults.
#[derive(Clone, Copy, Debug)]
pub struct RequestOptions {
    pub skip_auth: bool,
    pub skip_tenant: bool,
    pub skip_csrf: bool,
    /// A 401 answer triggers one refresh-and-replay cycle. Cleared on the
    /// replay itself so a second 401 surfaces as a plain failure.
    pub retry_on_unauthorized: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            skip_auth: false,
            skip_tenant: false,
            skip_csrf: false,
            retry_on_unauthorized: true,
        }
    }
}

impl RequestOptions {
    /// Options for endpoints reached before any credentials exist.
    pub fn unauthenticated() -> Self {
        Self {
            skip_auth: true,
            skip_csrf: true,
            retry_on_unauthorized: false,
            ..Self::default()
        }
    }
}

fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn insert_checked(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(parsed) => {
            headers.insert(name, parsed);
        }
        Err(_) => warn!(header = %name, "request.header_value_rejected"),
    }
}

/// Composes the wire headers for one call.
///
/// Injection rules: Accept always; Content-Type only when a JSON body rides
/// along and nothing set it already; Authorization unless `skip_auth` and only
/// when a token exists; tenant unless `skip_tenant`; CSRF only on
/// state-changing methods, unless `skip_csrf`, and only when a token exists.
/// GET never carries CSRF regardless of flags.
pub(crate) fn build_headers(
    method: &Method,
    has_json_body: bool,
    tokens: &TokenStore,
    opts: &RequestOptions,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if has_json_body && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    if !opts.skip_auth
        && let Some(token) = tokens.access_token()
    {
        insert_checked(&mut headers, AUTHORIZATION, &format!("Bearer {token}"));
    }
    if !opts.skip_tenant {
        insert_checked(
            &mut headers,
            HeaderName::from_static(TENANT_HEADER),
            &tokens.tenant_id(),
        );
    }
    if is_state_changing(method)
        && !opts.skip_csrf
        && let Some(token) = tokens.csrf_token()
    {
        insert_checked(&mut headers, HeaderName::from_static(CSRF_HEADER), &token);
    }
    headers
}

/// Builds a percent-encoded query string, skipping absent and empty values.
/// Returns an empty string when nothing remains, else `?k=v&...`.
pub fn build_query<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a str, Option<String>)>,
{
    let parts: Vec<String> = params
        .into_iter()
        .filter_map(|(key, value)| match value {
            Some(v) if !v.is_empty() => Some(format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(&v)
            )),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!("?{}", parts.join("&"))
    }
}
