pub mod admin;
pub mod documents;
pub mod files;
pub mod middleware;
pub mod response;
pub mod rest;
pub mod state;
pub mod subscriptions;

// Re-export the router builder and the OpenAPI document so the binaries can
// reach them directly.
pub use rest::{router, ApiDoc};
pub use state::AppState;
