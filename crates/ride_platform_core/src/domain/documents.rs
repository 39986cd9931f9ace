//! crates/ride_platform_core/src/domain/documents.rs
//!
//! Driver document catalog, versioned documents, their append-only history,
//! OCR jobs and the derived per-driver verification snapshot.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::string_enum;

//=========================================================================================
// Catalog
//=========================================================================================

/// A system-owned catalog entry describing one kind of driver document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentType {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub is_required: bool,
    pub requires_expiry: bool,
    pub requires_front_back: bool,
    pub requires_manual_review: bool,
    pub auto_ocr_enabled: bool,
    pub default_validity_months: Option<i32>,
    pub renewal_reminder_days: i32,
    pub is_active: bool,
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
}

impl DocumentType {
    /// Queue priority for OCR jobs created from this type; required types go first.
    pub fn ocr_priority(&self) -> i32 {
        if self.is_required {
            10
        } else {
            5
        }
    }
}

/// Admin input for a new catalog entry.
#[derive(Debug, Clone)]
pub struct NewDocumentType {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub is_required: bool,
    pub requires_expiry: bool,
    pub requires_front_back: bool,
    pub requires_manual_review: bool,
    pub auto_ocr_enabled: bool,
    pub default_validity_months: Option<i32>,
    pub renewal_reminder_days: i32,
    pub display_order: i32,
}

//=========================================================================================
// Documents
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Expired,
    Superseded,
    ResubmitRequested,
}

string_enum!(DocumentStatus, "document status", {
    Pending => "pending",
    UnderReview => "under_review",
    Approved => "approved",
    Rejected => "rejected",
    Expired => "expired",
    Superseded => "superseded",
    ResubmitRequested => "resubmit_requested",
});

impl DocumentStatus {
    /// Statuses that count as "submitted" towards verification.
    pub fn counts_as_submitted(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Pending
                | DocumentStatus::UnderReview
                | DocumentStatus::ResubmitRequested
                | DocumentStatus::Approved
        )
    }

    /// Statuses a reviewer may act on.
    pub fn is_reviewable(&self) -> bool {
        matches!(self, DocumentStatus::Pending | DocumentStatus::UnderReview)
    }
}

/// The stored file behind a document side.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub url: String,
    pub key: String,
    pub name: String,
    pub size: i64,
    pub mime: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackArtifact {
    pub url: String,
    pub key: String,
}

/// Fields read off the document, either typed in by the driver or filled by OCR.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentDetails {
    pub document_number: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub issuing_authority: Option<String>,
}

impl DocumentDetails {
    /// Fills blank fields from `other`; fields that already hold a value are kept.
    pub fn fill_blanks_from(&mut self, other: &DocumentDetails) {
        if self.document_number.is_none() {
            self.document_number = other.document_number.clone();
        }
        if self.issue_date.is_none() {
            self.issue_date = other.issue_date;
        }
        if self.expiry_date.is_none() {
            self.expiry_date = other.expiry_date;
        }
        if self.issuing_authority.is_none() {
            self.issuing_authority = other.issuing_authority.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewTrail {
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverDocument {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub document_type_id: Uuid,
    pub status: DocumentStatus,
    pub front: Artifact,
    pub back: Option<BackArtifact>,
    pub details: DocumentDetails,
    pub ocr_data: Option<Value>,
    pub ocr_confidence: Option<f64>,
    pub ocr_processed_at: Option<DateTime<Utc>>,
    pub review: ReviewTrail,
    pub version: i32,
    pub previous_document_id: Option<Uuid>,
    pub submitted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DriverDocument {
    pub fn is_expired_at(&self, today: NaiveDate) -> bool {
        self.details.expiry_date.is_some_and(|d| d < today)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve,
    Reject,
    RequestResubmit,
}

string_enum!(ReviewAction, "review action", {
    Approve => "approve",
    Reject => "reject",
    RequestResubmit => "request_resubmit",
});

impl ReviewAction {
    pub fn target_status(&self) -> DocumentStatus {
        match self {
            ReviewAction::Approve => DocumentStatus::Approved,
            ReviewAction::Reject => DocumentStatus::Rejected,
            ReviewAction::RequestResubmit => DocumentStatus::ResubmitRequested,
        }
    }

    pub fn history_event(&self) -> HistoryEvent {
        match self {
            ReviewAction::Approve => HistoryEvent::Approved,
            ReviewAction::Reject => HistoryEvent::Rejected,
            ReviewAction::RequestResubmit => HistoryEvent::ResubmitRequested,
        }
    }

    pub fn requires_reason(&self) -> bool {
        !matches!(self, ReviewAction::Approve)
    }
}

//=========================================================================================
// History
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryEvent {
    Submitted,
    OcrProcessed,
    OcrLowConfidence,
    ReviewStarted,
    Approved,
    Rejected,
    ResubmitRequested,
    Superseded,
    Expired,
}

string_enum!(HistoryEvent, "history event", {
    Submitted => "submitted",
    OcrProcessed => "ocr_processed",
    OcrLowConfidence => "ocr_low_confidence",
    ReviewStarted => "review_started",
    Approved => "approved",
    Rejected => "rejected",
    ResubmitRequested => "resubmit_requested",
    Superseded => "superseded",
    Expired => "expired",
});

/// Who caused a history event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Performer {
    User(Uuid),
    System,
}

impl Performer {
    pub const SYSTEM_MARKER: &'static str = "system";

    pub fn as_user(&self) -> Option<Uuid> {
        match self {
            Performer::User(id) => Some(*id),
            Performer::System => None,
        }
    }
}

impl std::fmt::Display for Performer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Performer::User(id) => write!(f, "{}", id),
            Performer::System => f.write_str(Self::SYSTEM_MARKER),
        }
    }
}

/// One append-only entry of a document's verification history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub document_id: Uuid,
    pub event: HistoryEvent,
    pub performed_by: Performer,
    pub previous_status: Option<DocumentStatus>,
    pub new_status: DocumentStatus,
    pub notes: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// OCR jobs
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

string_enum!(OcrJobStatus, "ocr job status", {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone, PartialEq)]
pub struct OcrJob {
    pub id: Uuid,
    pub document_id: Uuid,
    pub status: OcrJobStatus,
    pub priority: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub provider: Option<String>,
    pub raw_response: Option<Value>,
    pub extracted_data: Option<Value>,
    pub confidence: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OcrJob {
    /// Whether the job is eligible for the next worker pass.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            OcrJobStatus::Pending => true,
            OcrJobStatus::Failed => {
                self.retry_count < self.max_retries
                    && self.next_retry_at.is_some_and(|at| at <= now)
            }
            OcrJobStatus::Processing | OcrJobStatus::Completed => false,
        }
    }
}

/// Structured output of an OCR provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrResult {
    pub raw_text: String,
    pub confidence: f64,
    pub document_number: Option<String>,
    pub full_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub issue_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub issuing_authority: Option<String>,
    pub address: Option<String>,
    pub vehicle_plate: Option<String>,
    pub vehicle_vin: Option<String>,
    pub metadata: Value,
}

impl OcrResult {
    pub fn details(&self) -> DocumentDetails {
        DocumentDetails {
            document_number: self.document_number.clone(),
            issue_date: self.issue_date,
            expiry_date: self.expiry_date,
            issuing_authority: self.issuing_authority.clone(),
        }
    }

    /// The extracted fields as an opaque JSON object, as stored on the job.
    pub fn extracted_json(&self) -> Value {
        serde_json::json!({
            "document_number": self.document_number,
            "full_name": self.full_name,
            "date_of_birth": self.date_of_birth.map(|d| d.to_string()),
            "issue_date": self.issue_date.map(|d| d.to_string()),
            "expiry_date": self.expiry_date.map(|d| d.to_string()),
            "issuing_authority": self.issuing_authority,
            "address": self.address,
            "vehicle_plate": self.vehicle_plate,
            "vehicle_vin": self.vehicle_vin,
        })
    }
}

//=========================================================================================
// Verification snapshot
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationState {
    Incomplete,
    PendingReview,
    Approved,
    Rejected,
    Suspended,
}

string_enum!(VerificationState, "verification state", {
    Incomplete => "incomplete",
    PendingReview => "pending_review",
    Approved => "approved",
    Rejected => "rejected",
    Suspended => "suspended",
});

/// Where a single required document type stands for a driver.
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredDocumentState {
    pub document_type_id: Uuid,
    pub code: String,
    pub name: String,
    pub status: Option<DocumentStatus>,
    pub expiry_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverVerificationStatus {
    pub driver_id: Uuid,
    pub required_count: usize,
    pub submitted_count: usize,
    pub approved_count: usize,
    pub next_document_expiry: Option<NaiveDate>,
    pub state: VerificationState,
    pub documents: Vec<RequiredDocumentState>,
}

/// The driver record as far as this core needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct Driver {
    pub id: Uuid,
    pub user_id: Uuid,
}
