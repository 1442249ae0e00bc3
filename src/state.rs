//! Shared application state for all routes.

use crate::config::{ResolvedModel, Resource};
use crate::service::EntityManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<dyn EntityManager>,
    /// Immutable after startup.
    pub model: Arc<ResolvedModel>,
}

impl AppState {
    pub fn new(manager: Arc<dyn EntityManager>, model: ResolvedModel) -> Self {
        Self {
            manager,
            model: Arc::new(model),
        }
    }
}

/// State of one resource's routes: the shared state plus the resource they serve.
#[derive(Clone)]
pub struct ResourceContext {
    pub app: AppState,
    pub resource: Arc<Resource>,
}
