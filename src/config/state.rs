// Application state module
// Shared, read-only state handed to every connection

use std::sync::Arc;

use super::types::Config;
use crate::handler::Router;
use crate::storage::ObjectStore;

/// Application state
pub struct AppState {
    pub config: Config,
    /// Request dispatcher, owning the injected storage backend
    pub router: Router,
}

impl AppState {
    pub fn new(config: &Config, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config: config.clone(),
            router: Router::new(store, config.http.max_json_body_size),
        }
    }
}
