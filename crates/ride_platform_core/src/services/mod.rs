//! crates/ride_platform_core/src/services/mod.rs
//!
//! Application services. Each one depends only on the narrow ports it needs,
//! enforces the invariants of its state machine and returns `ServiceError`s.

pub mod comparison;
pub mod discount;
pub mod documents;
pub mod subscriptions;
pub mod verification;

use uuid::Uuid;

pub use comparison::ComparisonConfig;
pub use documents::{DocumentPolicy, DocumentPorts, DocumentService};
pub use subscriptions::{SubscriptionPolicy, SubscriptionPorts, SubscriptionService};

/// One page of a listing plus the total number of matching rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}

/// Who is looking at a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Admin,
    Driver(Uuid),
}
