//! Shared state handed to every HTTP handler.

use crate::services::{lifecycle::LifecycleManager, sweeper::ExpirySweeper};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: LifecycleManager,
    pub sweeper: ExpirySweeper,
    /// Key required by the cleanup endpoint. `None` disables the endpoint.
    pub cleanup_api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(lifecycle: LifecycleManager, cleanup_api_key: Option<String>) -> Self {
        Self {
            sweeper: ExpirySweeper::new(lifecycle.clone()),
            lifecycle,
            cleanup_api_key: cleanup_api_key.map(Arc::from),
        }
    }
}
