//! Application State

use std::sync::Arc;

use agent_core::Coordinator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Owns settings, providers, tools and every live agent
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}
