//! Application state management.

use std::sync::Arc;

use super::service::RewardService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RewardService>,
    /// Expected value of the `x-api-key` header
    pub api_key: String,
}

impl AppState {
    #[must_use]
    pub fn new(service: Arc<RewardService>, api_key: impl Into<String>) -> Self {
        Self {
            service,
            api_key: api_key.into(),
        }
    }
}
