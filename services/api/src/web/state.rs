//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::adapters::storage::LocalStorage;
use ride_platform_core::ports::SessionStore;
use ride_platform_core::{DocumentService, SubscriptionService};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub documents: Arc<DocumentService>,
    pub subscriptions: Arc<SubscriptionService>,
    pub sessions: Arc<dyn SessionStore>,
    /// Backs the `/files` routes; `None` when blobs live elsewhere.
    pub files: Option<Arc<LocalStorage>>,
}
