use std::sync::Arc;
use std::time::Duration;

use crate::store::MessageStore;

use super::Job;

/// Runs `PRAGMA optimize` on a long interval so SQLite can refresh its query
/// planner statistics while the broker is quiet.
pub fn store_optimize(store: Arc<MessageStore>, every: Duration) -> Job {
    Job::spawn("store-optimize", every, move || {
        let store = store.clone();
        async move {
            if let Err(e) = store.optimize().await {
                tracing::error!("store optimization failed: {e}");
            }
        }
    })
}
