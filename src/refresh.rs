//! Single-flight coordination for token refresh.
//!
//! At most one refresh operation is logically in flight per client. The first
//! caller to hit an authorization failure installs the refresh future; every
//! concurrent caller joins the same shared outcome instead of issuing a
//! second refresh, which would race token rotation and invalidate the
//! freshly-issued refresh token. All waiters observe the identical outcome.

use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::debug;

type SharedOutcome = Shared<BoxFuture<'static, bool>>;

pub(crate) struct RefreshCoordinator {
    in_flight: Arc<Mutex<Option<SharedOutcome>>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Awaits the in-flight refresh when one exists, otherwise installs
    /// `run`'s future as the single refresh operation. The check-and-set is
    /// synchronous under the lock; the slot clears itself on completion,
    /// success or failure, so an ambiguous outcome can never wedge the
    /// coordinator in the refreshing state.
    pub async fn refresh<F, Fut>(&self, run: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        let outcome = {
            let mut slot = self.in_flight.lock().expect("refresh slot poisoned");
            if let Some(pending) = slot.as_ref() {
                debug!("refresh.joined_in_flight");
                pending.clone()
            } else {
                let handle = Arc::clone(&self.in_flight);
                let operation = run();
                let shared = async move {
                    let ok = operation.await;
                    *handle.lock().expect("refresh slot poisoned") = None;
                    ok
                }
                .boxed()
                .shared();
                *slot = Some(shared.clone());
                shared
            }
        };
        outcome.await
    }

    #[cfg(test)]
    pub fn is_refreshing(&self) -> bool {
        self.in_flight
            .lock()
            .expect("refresh slot poisoned")
            .is_some()
    }
}
