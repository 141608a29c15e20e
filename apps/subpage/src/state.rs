use std::sync::Arc;

use crate::subpage::SubpageEngine;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SubpageEngine>,
}
