//! Shared application state for the API routes.

use crate::dispatch::Dispatcher;
use crate::registry::Registry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(registry: Arc<Registry>) -> Self {
        AppState {
            dispatcher: Dispatcher::new(registry),
        }
    }
}
