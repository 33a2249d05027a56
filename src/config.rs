//! Client configuration, loadable from explicit values, a JSON file, or the
//! environment.

use crate::errors::Error;

fn default_tenant_id() -> String {
    "default".to_string()
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_logout_path() -> String {
    "/auth/logout".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

fn default_csrf_path() -> String {
    "/auth/csrf-token".to_string()
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct Config {
    /// Base URL of the platform API, e.g. `https://api.example.org/api`.
    pub base_url: String,
    /// Tenant id reported when the store holds none.
    #[serde(default = "default_tenant_id")]
    pub default_tenant_id: String,
    /// When set, transport error messages are passed through verbatim instead
    /// of being replaced with a generic user-facing string.
    #[serde(default)]
    pub verbose_errors: bool,
    /// Per-request timeout. `None` leaves the transport default in place.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_logout_path")]
    pub logout_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_csrf_path")]
    pub csrf_path: String,
}

impl Config {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_tenant_id: default_tenant_id(),
            verbose_errors: false,
            timeout_secs: None,
            login_path: default_login_path(),
            logout_path: default_logout_path(),
            refresh_path: default_refresh_path(),
            csrf_path: default_csrf_path(),
        }
    }

    pub fn from_file(path: &str) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn from_env() -> Result<Self, Error> {
        let base_url = std::env::var("NEXUS_API_BASE")
            .map_err(|_| Error::Config("Missing NEXUS_API_BASE env var".to_string()))?;
        let mut config = Self::new(base_url);
        if let Ok(tenant) = std::env::var("NEXUS_TENANT_ID") {
            config.default_tenant_id = tenant;
        }
        if let Ok(flag) = std::env::var("NEXUS_VERBOSE_ERRORS") {
            config.verbose_errors = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Ok(secs) = std::env::var("NEXUS_TIMEOUT_SECS") {
            config.timeout_secs = secs.parse().ok();
        }
        Ok(config)
    }
}
