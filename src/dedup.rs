//! Collapses concurrent identical reads into one transport call.
//!
//! This is a request-collapsing mechanism, not a response cache: an entry
//! lives only while its request is unsettled, so an identical call issued
//! after settlement always does fresh work. No TTL, no invalidation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::Method;
use tracing::debug;

use crate::types::RawResult;

type PendingRequest = Shared<BoxFuture<'static, RawResult>>;

pub(crate) struct InFlightCache {
    pending: Arc<Mutex<HashMap<String, PendingRequest>>>,
}

impl InFlightCache {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Canonical collapsing key. Only GETs are routed through the cache, so
    /// the method component is informational.
    pub fn key(method: &Method, endpoint: &str) -> String {
        format!("{method}:{endpoint}")
    }

    /// Returns the pending outcome for `key` when one exists; otherwise runs
    /// `factory` and shares its outcome with every caller that joins before
    /// settlement. The entry removes itself as the final act of the shared
    /// future, so removal is synchronous with settlement no matter how many
    /// callers awaited it.
    pub async fn dedupe<F, Fut>(&self, key: String, factory: F) -> RawResult
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = RawResult> + Send + 'static,
    {
        let pending = {
            let mut map = self.pending.lock().expect("in-flight map poisoned");
            if let Some(existing) = map.get(&key) {
                debug!(key = %key, "request.collapsed");
                existing.clone()
            } else {
                let handle = Arc::clone(&self.pending);
                let entry_key = key.clone();
                let request = factory();
                let shared = async move {
                    let outcome = request.await;
                    handle
                        .lock()
                        .expect("in-flight map poisoned")
                        .remove(&entry_key);
                    outcome
                }
                .boxed()
                .shared();
                map.insert(key, shared.clone());
                shared
            }
        };
        pending.await
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("in-flight map poisoned").len()
    }
}
