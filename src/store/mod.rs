//! Durable holder for credentials and tenant/CSRF context.
//!
//! Pure get/set/clear: no request logic lives here, and no operation fails.
//! Token values are never logged.

use std::sync::Arc;

mod backend;

pub use backend::{FileBackend, MemoryBackend, StorageBackend};

const ACCESS_TOKEN_KEY: &str = "nexus.access_token";
const REFRESH_TOKEN_KEY: &str = "nexus.refresh_token";
const TENANT_ID_KEY: &str = "nexus.tenant_id";
const CSRF_TOKEN_KEY: &str = "nexus.csrf_token";

#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn StorageBackend>,
    default_tenant_id: String,
}

impl TokenStore {
    pub fn new(backend: Arc<dyn StorageBackend>, default_tenant_id: impl Into<String>) -> Self {
        Self {
            backend,
            default_tenant_id: default_tenant_id.into(),
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.backend.get(ACCESS_TOKEN_KEY)
    }

    pub fn set_access_token(&self, token: &str) {
        self.backend.set(ACCESS_TOKEN_KEY, token);
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.backend.get(REFRESH_TOKEN_KEY)
    }

    pub fn set_refresh_token(&self, token: &str) {
        self.backend.set(REFRESH_TOKEN_KEY, token);
    }

    /// Current tenant id, falling back to the configured default when unset.
    pub fn tenant_id(&self) -> String {
        self.backend
            .get(TENANT_ID_KEY)
            .unwrap_or_else(|| self.default_tenant_id.clone())
    }

    pub fn set_tenant_id(&self, tenant_id: &str) {
        self.backend.set(TENANT_ID_KEY, tenant_id);
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.backend.get(CSRF_TOKEN_KEY)
    }

    pub fn set_csrf_token(&self, token: &str) {
        self.backend.set(CSRF_TOKEN_KEY, token);
    }

    pub fn clear_csrf_token(&self) {
        self.backend.remove(CSRF_TOKEN_KEY);
    }

    /// Removes both credentials; tenant id and CSRF token survive.
    pub fn clear_tokens(&self) {
        self.backend.remove(ACCESS_TOKEN_KEY);
        self.backend.remove(REFRESH_TOKEN_KEY);
    }

    /// Removes credentials and the tenant id; `tenant_id()` reports the
    /// configured default afterwards.
    pub fn clear_all(&self) {
        self.clear_tokens();
        self.backend.remove(TENANT_ID_KEY);
    }
}
