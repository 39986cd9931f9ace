//! crates/ride_platform_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the database, blob storage, payment gateway and OCR vendor.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::Stream;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::documents::{
    BackArtifact, DocumentDetails, DocumentStatus, DocumentType, Driver, DriverDocument,
    HistoryEntry, OcrJob, OcrJobStatus, OcrResult, ReviewTrail,
};
use crate::domain::subscriptions::{Subscription, SubscriptionPlan, SubscriptionStatus, UsageLog};
use crate::domain::{Caller, Money};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflicting state: {0}")]
    Conflict(String),
    #[error("Dependency unavailable: {0}")]
    Unavailable(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// A stream of artifact bytes moving to or from blob storage.
pub type ByteStream = Pin<Box<dyn Stream<Item = PortResult<Bytes>> + Send>>;

/// Wraps an in-memory buffer as a single-chunk `ByteStream`.
pub fn byte_stream_from(bytes: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(bytes) }))
}

//=========================================================================================
// Document Repository Ports
//=========================================================================================

#[async_trait]
pub trait DocumentTypeRepository: Send + Sync {
    async fn list_document_types(&self, active_only: bool) -> PortResult<Vec<DocumentType>>;

    async fn find_document_type(&self, id: Uuid) -> PortResult<Option<DocumentType>>;

    async fn find_document_type_by_code(&self, code: &str) -> PortResult<Option<DocumentType>>;

    /// Fails with `Conflict` when the code is taken.
    async fn create_document_type(&self, document_type: DocumentType) -> PortResult<DocumentType>;
}

/// A new document version together with the history it produces.
#[derive(Debug, Clone)]
pub struct NewDocumentVersion {
    pub document: DriverDocument,
    /// The current document this version replaces. The repository must fail
    /// with `Conflict` if the current document of (driver, type) is not this one.
    pub supersedes: Option<Uuid>,
    pub history: Vec<HistoryEntry>,
    /// Queued in the same unit of work when the type has OCR enabled.
    pub ocr_job: Option<OcrJob>,
}

/// A compare-and-set status change committed with its history entry.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub document_id: Uuid,
    pub allowed_from: Vec<DocumentStatus>,
    pub to: DocumentStatus,
    pub review: Option<ReviewTrail>,
    pub history: HistoryEntry,
    pub at: DateTime<Utc>,
}

/// OCR output to merge into a document. Extracted fields only fill blanks.
#[derive(Debug, Clone)]
pub struct OcrDocumentUpdate {
    pub document_id: Uuid,
    pub ocr_data: Value,
    pub confidence: f64,
    pub processed_at: DateTime<Utc>,
    pub details: DocumentDetails,
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn find_document(&self, id: Uuid) -> PortResult<Option<DriverDocument>>;

    /// The single non-superseded document of (driver, type), if any.
    async fn find_current_document(
        &self,
        driver_id: Uuid,
        document_type_id: Uuid,
    ) -> PortResult<Option<DriverDocument>>;

    /// Highest version ever stored for (driver, type), superseded ones included.
    async fn latest_version(&self, driver_id: Uuid, document_type_id: Uuid) -> PortResult<Option<i32>>;

    /// The non-superseded document whose front artifact has this key.
    async fn find_document_by_file_key(&self, key: &str) -> PortResult<Option<DriverDocument>>;

    async fn list_current_documents(&self, driver_id: Uuid) -> PortResult<Vec<DriverDocument>>;

    /// Page of documents in any of `statuses`, oldest submission first, with the total count.
    async fn list_documents_by_status(
        &self,
        statuses: &[DocumentStatus],
        limit: i64,
        offset: i64,
    ) -> PortResult<(Vec<DriverDocument>, i64)>;

    /// Approved documents with an expiry date within `[from, until]`.
    async fn list_expiring_documents(
        &self,
        from: NaiveDate,
        until: NaiveDate,
    ) -> PortResult<Vec<DriverDocument>>;

    /// Approved documents whose expiry date is before `today`.
    async fn list_lapsed_documents(&self, today: NaiveDate, limit: i64) -> PortResult<Vec<DriverDocument>>;

    /// Inserts the version, supersedes the prior current document, appends
    /// all history entries and enqueues the OCR job as one unit of work.
    async fn insert_document_version(&self, version: NewDocumentVersion) -> PortResult<DriverDocument>;

    /// Applies the transition only if the document is still in one of
    /// `allowed_from`; otherwise `Conflict`. Missing documents are `NotFound`.
    async fn transition_document(&self, transition: StatusTransition) -> PortResult<DriverDocument>;

    async fn attach_back_side(
        &self,
        document_id: Uuid,
        back: BackArtifact,
        allowed_from: &[DocumentStatus],
        at: DateTime<Utc>,
    ) -> PortResult<DriverDocument>;

    async fn list_history(&self, document_id: Uuid) -> PortResult<Vec<HistoryEntry>>;
}

//=========================================================================================
// OCR Queue Port
//=========================================================================================

/// Everything a successful OCR attempt writes. Committed as one unit of work.
#[derive(Debug, Clone)]
pub struct OcrJobCompletion {
    pub document: OcrDocumentUpdate,
    pub history: Vec<HistoryEntry>,
    pub provider: String,
    pub raw_response: Value,
    pub extracted_data: Value,
    pub confidence: f64,
    pub completed_at: DateTime<Utc>,
    pub processing_time_ms: i64,
}

#[derive(Debug, Clone)]
pub struct OcrJobFailure {
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: String,
    pub failed_at: DateTime<Utc>,
}

#[async_trait]
pub trait OcrJobRepository: Send + Sync {
    /// Due jobs ordered by priority DESC, created_at ASC.
    async fn list_due_ocr_jobs(&self, now: DateTime<Utc>, limit: i64) -> PortResult<Vec<OcrJob>>;

    /// Moves the job from `expected` to `processing`. Returns false if another
    /// worker got there first.
    async fn claim_ocr_job(
        &self,
        job_id: Uuid,
        expected: OcrJobStatus,
        now: DateTime<Utc>,
    ) -> PortResult<bool>;

    /// Marks a `processing` job completed, merges the OCR output into its
    /// document and appends the history entries, all or nothing. A job that
    /// is no longer processing is `Conflict`.
    async fn complete_ocr_job(&self, job_id: Uuid, completion: OcrJobCompletion) -> PortResult<()>;

    async fn fail_ocr_job(&self, job_id: Uuid, failure: OcrJobFailure) -> PortResult<()>;

    /// Flips jobs processing since before `started_before` to failed, counting
    /// the attempt and making them due at `now`. Returns how many were reaped.
    async fn reap_stuck_ocr_jobs(
        &self,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> PortResult<u64>;

    async fn find_ocr_job_for_document(&self, document_id: Uuid) -> PortResult<Option<OcrJob>>;
}

//=========================================================================================
// Subscription Repository Ports
//=========================================================================================

#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Fails with `Conflict` when the slug is taken.
    async fn create_plan(&self, plan: SubscriptionPlan) -> PortResult<SubscriptionPlan>;

    async fn find_plan(&self, id: Uuid) -> PortResult<Option<SubscriptionPlan>>;

    /// Plans ordered by display order, then price.
    async fn list_plans(&self, active_only: bool) -> PortResult<Vec<SubscriptionPlan>>;

    async fn save_plan(&self, plan: &SubscriptionPlan) -> PortResult<()>;
}

/// A lifecycle change applied atomically to one subscription row.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionChange {
    Pause { at: DateTime<Utc> },
    Resume { at: DateTime<Utc> },
    Cancel { at: DateTime<Utc>, reason: Option<String> },
    EndTrial { at: DateTime<Utc> },
    Renewed {
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    },
    PaymentFailed {
        at: DateTime<Utc>,
        past_due_threshold: i32,
    },
    Expire { at: DateTime<Utc> },
}

impl SubscriptionChange {
    /// Applies the change to an in-memory row. Adapters that cannot express a
    /// change as a single statement load the row under lock and call this.
    pub fn apply(&self, sub: &mut Subscription) {
        match self {
            SubscriptionChange::Pause { at } => {
                sub.status = SubscriptionStatus::Paused;
                sub.paused_at = Some(*at);
                sub.updated_at = *at;
            }
            SubscriptionChange::Resume { at } => {
                sub.status = SubscriptionStatus::Active;
                sub.paused_at = None;
                sub.updated_at = *at;
            }
            SubscriptionChange::Cancel { at, reason } => {
                sub.status = SubscriptionStatus::Cancelled;
                sub.cancelled_at = Some(*at);
                sub.cancel_reason = reason.clone();
                sub.auto_renew = false;
                sub.next_billing_date = None;
                sub.updated_at = *at;
            }
            SubscriptionChange::EndTrial { at } => {
                sub.is_trial_active = false;
                sub.updated_at = *at;
            }
            SubscriptionChange::Renewed {
                period_start,
                period_end,
            } => {
                sub.current_period_start = *period_start;
                sub.current_period_end = *period_end;
                sub.rides_used = 0;
                sub.upgrades_used = 0;
                sub.cancellations_used = 0;
                sub.failed_payments = 0;
                sub.last_payment_date = Some(*period_start);
                sub.next_billing_date = Some(*period_end);
                sub.is_trial_active = false;
                sub.status = SubscriptionStatus::Active;
                sub.updated_at = *period_start;
            }
            SubscriptionChange::PaymentFailed {
                at,
                past_due_threshold,
            } => {
                sub.failed_payments += 1;
                if sub.failed_payments >= *past_due_threshold {
                    sub.status = SubscriptionStatus::PastDue;
                }
                sub.updated_at = *at;
            }
            SubscriptionChange::Expire { at } => {
                sub.status = SubscriptionStatus::Expired;
                sub.next_billing_date = None;
                sub.updated_at = *at;
            }
        }
    }
}

/// A discounted ride to account for under the subscription's row lock.
#[derive(Debug, Clone)]
pub struct RideUsage {
    pub subscription_id: Uuid,
    /// The per-period ride cap; `None` means uncapped.
    pub cap: Option<i32>,
    pub log: UsageLog,
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// The user's subscription in active, paused or past_due, if any.
    async fn find_live_subscription(&self, user_id: Uuid) -> PortResult<Option<Subscription>>;

    async fn find_subscription(&self, id: Uuid) -> PortResult<Option<Subscription>>;

    /// Fails with `Conflict` if the user already holds a live subscription.
    async fn create_subscription(&self, subscription: Subscription) -> PortResult<Subscription>;

    /// Applies `change` only while the row is in one of `expected`; otherwise `Conflict`.
    async fn update_subscription(
        &self,
        id: Uuid,
        expected: &[SubscriptionStatus],
        change: SubscriptionChange,
    ) -> PortResult<Subscription>;

    /// Active or past_due subscriptions whose period ended at or before `now`.
    async fn list_due_for_renewal(&self, now: DateTime<Utc>, limit: i64) -> PortResult<Vec<Subscription>>;

    /// Atomically checks the cap and active status, bumps `rides_used` and
    /// `total_saved`, and appends the usage log. Returns false when the ride
    /// was not granted.
    async fn record_ride_usage(&self, usage: RideUsage) -> PortResult<bool>;

    async fn list_usage(&self, subscription_id: Uuid) -> PortResult<Vec<UsageLog>>;
}

/// Read access to a rider's fare history, used for plan comparison.
#[async_trait]
pub trait RideSpendReader: Send + Sync {
    /// Total fares paid by the user since `since`, in the given currency.
    async fn total_spend_since(&self, user_id: Uuid, since: DateTime<Utc>) -> PortResult<Money>;
}

//=========================================================================================
// External Collaborator Ports
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub url: String,
    pub key: String,
}

/// What storage knows about an object without reading it.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub size: i64,
    /// Absent when the backend does not record one.
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresignedUrl {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn upload(
        &self,
        key: &str,
        body: ByteStream,
        size: i64,
        content_type: &str,
    ) -> PortResult<StoredObject>;

    async fn download(&self, key: &str) -> PortResult<ByteStream>;

    async fn delete(&self, key: &str) -> PortResult<()>;

    /// `None` when no object is stored under `key`.
    async fn stat(&self, key: &str) -> PortResult<Option<ObjectInfo>>;

    fn get_url(&self, key: &str) -> String;

    async fn presigned_upload_url(
        &self,
        key: &str,
        content_type: &str,
        expiry: Duration,
    ) -> PortResult<PresignedUrl>;

    async fn presigned_download_url(&self, key: &str, expiry: Duration) -> PortResult<PresignedUrl>;

    async fn copy(&self, src: &str, dst: &str) -> PortResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReceipt {
    pub transaction_id: String,
    pub amount: Money,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PaymentError {
    /// The charge can be retried later (network, gateway outage, timeout).
    #[error("payment temporarily failed: {0}")]
    Transient(String),
    /// The charge was refused (card declined, invalid method).
    #[error("payment declined: {0}")]
    Declined(String),
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn charge_subscription(
        &self,
        user_id: Uuid,
        amount: Money,
        currency: &str,
        payment_method: Option<&str>,
    ) -> Result<PaymentReceipt, PaymentError>;
}

#[async_trait]
pub trait OcrProcessor: Send + Sync {
    /// Provider label recorded on completed jobs.
    fn provider(&self) -> &str;

    async fn process(
        &self,
        image: &[u8],
        mime: &str,
        document_type_code: &str,
    ) -> PortResult<OcrResult>;
}

/// Resolves authenticated users to drivers.
#[async_trait]
pub trait DriverDirectory: Send + Sync {
    async fn get_driver_by_user_id(&self, user_id: Uuid) -> PortResult<Driver>;

    async fn is_driver_suspended(&self, driver_id: Uuid) -> PortResult<bool>;
}

/// Validates the opaque session token presented by HTTP callers.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn validate_session(&self, token: &str) -> PortResult<Caller>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> Uuid;
}

/// Random v4 identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn new_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}
