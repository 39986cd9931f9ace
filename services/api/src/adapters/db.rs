//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! every repository port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Multi-row changes run inside one transaction. Status changes are
//! compare-and-set updates (`WHERE status = ANY(..)`) so two replicas racing
//! on the same row cannot both win.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ride_platform_core::domain::documents::{
    Artifact, BackArtifact, DocumentDetails, DocumentStatus, DocumentType, Driver, DriverDocument,
    HistoryEntry, HistoryEvent, OcrJob, OcrJobStatus, Performer, ReviewTrail,
};
use ride_platform_core::domain::subscriptions::{
    PlanBenefits, PlanPresentation, Subscription, SubscriptionPlan, SubscriptionStatus, UsageLog,
};
use ride_platform_core::domain::{Caller, Money, ParseEnumError, Role};
use ride_platform_core::ports::{
    DocumentRepository, DocumentTypeRepository, DriverDirectory, NewDocumentVersion,
    OcrJobCompletion, OcrJobFailure, OcrJobRepository, PlanRepository,
    PortError, PortResult, RideSpendReader, RideUsage, SessionStore, StatusTransition,
    SubscriptionChange, SubscriptionRepository,
};
use serde_json::Value;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the repository ports.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Creates a new `PgRepository`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Maps driver errors onto the port taxonomy. Unique violations are the
/// partial indexes speaking, so they surface as `Conflict`.
fn db_err(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound("row not found".to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PortError::Unavailable(e.to_string())
        }
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            PortError::Conflict(db.message().to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn parse_err(e: ParseEnumError) -> PortError {
    PortError::Unexpected(format!("corrupt row: {}", e))
}

fn status_names<T: ToString>(statuses: &[T]) -> Vec<String> {
    statuses.iter().map(ToString::to_string).collect()
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct DocumentTypeRecord {
    id: Uuid,
    code: String,
    name: String,
    description: Option<String>,
    is_required: bool,
    requires_expiry: bool,
    requires_front_back: bool,
    requires_manual_review: bool,
    auto_ocr_enabled: bool,
    default_validity_months: Option<i32>,
    renewal_reminder_days: i32,
    is_active: bool,
    display_order: i32,
    created_at: DateTime<Utc>,
}
impl DocumentTypeRecord {
    fn to_domain(self) -> DocumentType {
        DocumentType {
            id: self.id,
            code: self.code,
            name: self.name,
            description: self.description,
            is_required: self.is_required,
            requires_expiry: self.requires_expiry,
            requires_front_back: self.requires_front_back,
            requires_manual_review: self.requires_manual_review,
            auto_ocr_enabled: self.auto_ocr_enabled,
            default_validity_months: self.default_validity_months,
            renewal_reminder_days: self.renewal_reminder_days,
            is_active: self.is_active,
            display_order: self.display_order,
            created_at: self.created_at,
        }
    }
}

const DOCUMENT_TYPE_COLUMNS: &str = "id, code, name, description, is_required, requires_expiry, \
    requires_front_back, requires_manual_review, auto_ocr_enabled, default_validity_months, \
    renewal_reminder_days, is_active, display_order, created_at";

#[derive(FromRow)]
struct DocumentRecord {
    id: Uuid,
    driver_id: Uuid,
    document_type_id: Uuid,
    status: String,
    file_url: String,
    file_key: String,
    file_name: String,
    file_size: i64,
    file_mime: String,
    back_file_url: Option<String>,
    back_file_key: Option<String>,
    document_number: Option<String>,
    issue_date: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
    issuing_authority: Option<String>,
    ocr_data: Option<Value>,
    ocr_confidence: Option<f64>,
    ocr_processed_at: Option<DateTime<Utc>>,
    reviewed_by: Option<Uuid>,
    reviewed_at: Option<DateTime<Utc>>,
    review_notes: Option<String>,
    rejection_reason: Option<String>,
    version: i32,
    previous_document_id: Option<Uuid>,
    submitted_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl DocumentRecord {
    fn to_domain(self) -> PortResult<DriverDocument> {
        let back = match (self.back_file_url, self.back_file_key) {
            (Some(url), Some(key)) => Some(BackArtifact { url, key }),
            _ => None,
        };
        Ok(DriverDocument {
            id: self.id,
            driver_id: self.driver_id,
            document_type_id: self.document_type_id,
            status: self.status.parse().map_err(parse_err)?,
            front: Artifact {
                url: self.file_url,
                key: self.file_key,
                name: self.file_name,
                size: self.file_size,
                mime: self.file_mime,
            },
            back,
            details: DocumentDetails {
                document_number: self.document_number,
                issue_date: self.issue_date,
                expiry_date: self.expiry_date,
                issuing_authority: self.issuing_authority,
            },
            ocr_data: self.ocr_data,
            ocr_confidence: self.ocr_confidence,
            ocr_processed_at: self.ocr_processed_at,
            review: ReviewTrail {
                reviewed_by: self.reviewed_by,
                reviewed_at: self.reviewed_at,
                review_notes: self.review_notes,
                rejection_reason: self.rejection_reason,
            },
            version: self.version,
            previous_document_id: self.previous_document_id,
            submitted_at: self.submitted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const DOCUMENT_COLUMNS: &str = "id, driver_id, document_type_id, status, file_url, file_key, \
    file_name, file_size, file_mime, back_file_url, back_file_key, document_number, issue_date, \
    expiry_date, issuing_authority, ocr_data, ocr_confidence, ocr_processed_at, reviewed_by, \
    reviewed_at, review_notes, rejection_reason, version, previous_document_id, submitted_at, \
    created_at, updated_at";

fn documents_to_domain(records: Vec<DocumentRecord>) -> PortResult<Vec<DriverDocument>> {
    records.into_iter().map(DocumentRecord::to_domain).collect()
}

#[derive(FromRow)]
struct HistoryRecord {
    id: Uuid,
    document_id: Uuid,
    action: String,
    performed_by: String,
    previous_status: Option<String>,
    new_status: String,
    notes: Option<String>,
    metadata: Value,
    created_at: DateTime<Utc>,
}
impl HistoryRecord {
    fn to_domain(self) -> PortResult<HistoryEntry> {
        let performed_by = if self.performed_by == Performer::SYSTEM_MARKER {
            Performer::System
        } else {
            let id = Uuid::parse_str(&self.performed_by)
                .map_err(|e| PortError::Unexpected(format!("corrupt performer: {}", e)))?;
            Performer::User(id)
        };
        Ok(HistoryEntry {
            id: self.id,
            document_id: self.document_id,
            event: self.action.parse::<HistoryEvent>().map_err(parse_err)?,
            performed_by,
            previous_status: self
                .previous_status
                .map(|s| s.parse())
                .transpose()
                .map_err(parse_err)?,
            new_status: self.new_status.parse().map_err(parse_err)?,
            notes: self.notes,
            metadata: self.metadata,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct OcrJobRecord {
    id: Uuid,
    document_id: Uuid,
    status: String,
    priority: i32,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: Option<DateTime<Utc>>,
    provider: Option<String>,
    raw_response: Option<Value>,
    extracted_data: Option<Value>,
    confidence: Option<f64>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    processing_time_ms: Option<i64>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}
impl OcrJobRecord {
    fn to_domain(self) -> PortResult<OcrJob> {
        Ok(OcrJob {
            id: self.id,
            document_id: self.document_id,
            status: self.status.parse().map_err(parse_err)?,
            priority: self.priority,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            next_retry_at: self.next_retry_at,
            provider: self.provider,
            raw_response: self.raw_response,
            extracted_data: self.extracted_data,
            confidence: self.confidence,
            started_at: self.started_at,
            completed_at: self.completed_at,
            processing_time_ms: self.processing_time_ms,
            error_message: self.error_message,
            created_at: self.created_at,
        })
    }
}

const OCR_JOB_COLUMNS: &str = "id, document_id, status, priority, retry_count, max_retries, \
    next_retry_at, provider, raw_response, extracted_data, confidence, started_at, completed_at, \
    processing_time_ms, error_message, created_at";

#[derive(FromRow)]
struct PlanRecord {
    id: Uuid,
    slug: String,
    name: String,
    description: Option<String>,
    plan_type: String,
    billing_period: String,
    price_minor: i64,
    currency: String,
    status: String,
    rides_included: Option<i32>,
    max_ride_value_minor: Option<i64>,
    discount_pct: i16,
    allowed_ride_types: Vec<String>,
    allowed_cities: Vec<String>,
    max_distance_km: Option<i32>,
    priority_matching: bool,
    surge_protection: bool,
    surge_max_cap: Option<f64>,
    free_upgrades: i32,
    free_cancellations: i32,
    trial_days: i32,
    trial_rides: i32,
    is_popular: bool,
    savings_label: Option<String>,
    display_order: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl PlanRecord {
    fn to_domain(self) -> PortResult<SubscriptionPlan> {
        let discount_pct = u8::try_from(self.discount_pct)
            .map_err(|_| PortError::Unexpected(format!("corrupt discount_pct {}", self.discount_pct)))?;
        Ok(SubscriptionPlan {
            id: self.id,
            slug: self.slug,
            name: self.name,
            description: self.description,
            plan_type: self.plan_type.parse().map_err(parse_err)?,
            billing_period: self.billing_period.parse().map_err(parse_err)?,
            price: Money::from_minor(self.price_minor),
            currency: self.currency,
            status: self.status.parse().map_err(parse_err)?,
            benefits: PlanBenefits {
                rides_included: self.rides_included,
                max_ride_value: self.max_ride_value_minor.map(Money::from_minor),
                discount_pct,
                allowed_ride_types: self.allowed_ride_types,
                allowed_cities: self.allowed_cities,
                max_distance_km: self.max_distance_km,
                priority_matching: self.priority_matching,
                surge_protection: self.surge_protection,
                surge_max_cap: self.surge_max_cap,
                free_upgrades: self.free_upgrades,
                free_cancellations: self.free_cancellations,
            },
            trial_days: self.trial_days,
            trial_rides: self.trial_rides,
            presentation: PlanPresentation {
                is_popular: self.is_popular,
                savings_label: self.savings_label,
                display_order: self.display_order,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const PLAN_COLUMNS: &str = "id, slug, name, description, plan_type, billing_period, price_minor, \
    currency, status, rides_included, max_ride_value_minor, discount_pct, allowed_ride_types, \
    allowed_cities, max_distance_km, priority_matching, surge_protection, surge_max_cap, \
    free_upgrades, free_cancellations, trial_days, trial_rides, is_popular, savings_label, \
    display_order, created_at, updated_at";

#[derive(FromRow)]
struct SubscriptionRecord {
    id: Uuid,
    user_id: Uuid,
    plan_id: Uuid,
    status: String,
    currency: String,
    activated_at: DateTime<Utc>,
    current_period_start: DateTime<Utc>,
    current_period_end: DateTime<Utc>,
    trial_ends_at: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    last_payment_date: Option<DateTime<Utc>>,
    next_billing_date: Option<DateTime<Utc>>,
    rides_used: i32,
    upgrades_used: i32,
    cancellations_used: i32,
    failed_payments: i32,
    total_saved_minor: i64,
    payment_method: Option<String>,
    auto_renew: bool,
    cancel_reason: Option<String>,
    is_trial_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl SubscriptionRecord {
    fn to_domain(self) -> PortResult<Subscription> {
        Ok(Subscription {
            id: self.id,
            user_id: self.user_id,
            plan_id: self.plan_id,
            status: self.status.parse().map_err(parse_err)?,
            currency: self.currency,
            activated_at: self.activated_at,
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            trial_ends_at: self.trial_ends_at,
            paused_at: self.paused_at,
            cancelled_at: self.cancelled_at,
            last_payment_date: self.last_payment_date,
            next_billing_date: self.next_billing_date,
            rides_used: self.rides_used,
            upgrades_used: self.upgrades_used,
            cancellations_used: self.cancellations_used,
            failed_payments: self.failed_payments,
            total_saved: Money::from_minor(self.total_saved_minor),
            payment_method: self.payment_method,
            auto_renew: self.auto_renew,
            cancel_reason: self.cancel_reason,
            is_trial_active: self.is_trial_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, status, currency, activated_at, \
    current_period_start, current_period_end, trial_ends_at, paused_at, cancelled_at, \
    last_payment_date, next_billing_date, rides_used, upgrades_used, cancellations_used, \
    failed_payments, total_saved_minor, payment_method, auto_renew, cancel_reason, \
    is_trial_active, created_at, updated_at";

#[derive(FromRow)]
struct UsageRecord {
    id: Uuid,
    subscription_id: Uuid,
    ride_id: Uuid,
    usage_type: String,
    original_fare_minor: i64,
    discounted_fare_minor: i64,
    savings_amount_minor: i64,
    created_at: DateTime<Utc>,
}
impl UsageRecord {
    fn to_domain(self) -> PortResult<UsageLog> {
        Ok(UsageLog {
            id: self.id,
            subscription_id: self.subscription_id,
            ride_id: self.ride_id,
            usage_type: self.usage_type.parse().map_err(parse_err)?,
            original_fare: Money::from_minor(self.original_fare_minor),
            discounted_fare: Money::from_minor(self.discounted_fare_minor),
            savings_amount: Money::from_minor(self.savings_amount_minor),
            created_at: self.created_at,
        })
    }
}

//=========================================================================================
// Statement Helpers Shared By Transactions
//=========================================================================================

async fn insert_history(conn: &mut PgConnection, entry: &HistoryEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO document_verification_history \
         (id, document_id, action, performed_by, previous_status, new_status, notes, metadata, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(entry.id)
    .bind(entry.document_id)
    .bind(entry.event.as_str())
    .bind(entry.performed_by.to_string())
    .bind(entry.previous_status.map(|s| s.as_str()))
    .bind(entry.new_status.as_str())
    .bind(&entry.notes)
    .bind(&entry.metadata)
    .bind(entry.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_document(conn: &mut PgConnection, doc: &DriverDocument) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT INTO driver_documents ({}) VALUES \
         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, \
          $20, $21, $22, $23, $24, $25, $26, $27)",
        DOCUMENT_COLUMNS
    ))
    .bind(doc.id)
    .bind(doc.driver_id)
    .bind(doc.document_type_id)
    .bind(doc.status.as_str())
    .bind(&doc.front.url)
    .bind(&doc.front.key)
    .bind(&doc.front.name)
    .bind(doc.front.size)
    .bind(&doc.front.mime)
    .bind(doc.back.as_ref().map(|b| b.url.clone()))
    .bind(doc.back.as_ref().map(|b| b.key.clone()))
    .bind(&doc.details.document_number)
    .bind(doc.details.issue_date)
    .bind(doc.details.expiry_date)
    .bind(&doc.details.issuing_authority)
    .bind(&doc.ocr_data)
    .bind(doc.ocr_confidence)
    .bind(doc.ocr_processed_at)
    .bind(doc.review.reviewed_by)
    .bind(doc.review.reviewed_at)
    .bind(&doc.review.review_notes)
    .bind(&doc.review.rejection_reason)
    .bind(doc.version)
    .bind(doc.previous_document_id)
    .bind(doc.submitted_at)
    .bind(doc.created_at)
    .bind(doc.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_ocr_job(conn: &mut PgConnection, job: &OcrJob) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO document_ocr_queue \
         (id, document_id, status, priority, retry_count, max_retries, next_retry_at, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(job.id)
    .bind(job.document_id)
    .bind(job.status.as_str())
    .bind(job.priority)
    .bind(job.retry_count)
    .bind(job.max_retries)
    .bind(job.next_retry_at)
    .bind(job.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Distinguishes "row missing" from "row in the wrong state" after a CAS
/// update matched nothing.
async fn cas_miss(conn: &mut PgConnection, table: &str, id: Uuid) -> PortError {
    let found = sqlx::query_scalar::<_, String>(&format!("SELECT status FROM {} WHERE id = $1", table))
        .bind(id)
        .fetch_optional(conn)
        .await;
    match found {
        Ok(Some(status)) => PortError::Conflict(format!("{} {} is {}", table, id, status)),
        Ok(None) => PortError::NotFound(format!("{} {}", table, id)),
        Err(e) => db_err(e),
    }
}

//=========================================================================================
// Document Repository Implementations
//=========================================================================================

#[async_trait]
impl DocumentTypeRepository for PgRepository {
    async fn list_document_types(&self, active_only: bool) -> PortResult<Vec<DocumentType>> {
        let records = sqlx::query_as::<_, DocumentTypeRecord>(&format!(
            "SELECT {} FROM document_types WHERE ($1 = FALSE OR is_active) ORDER BY display_order, name",
            DOCUMENT_TYPE_COLUMNS
        ))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(records.into_iter().map(DocumentTypeRecord::to_domain).collect())
    }

    async fn find_document_type(&self, id: Uuid) -> PortResult<Option<DocumentType>> {
        let record = sqlx::query_as::<_, DocumentTypeRecord>(&format!(
            "SELECT {} FROM document_types WHERE id = $1",
            DOCUMENT_TYPE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.map(DocumentTypeRecord::to_domain))
    }

    async fn find_document_type_by_code(&self, code: &str) -> PortResult<Option<DocumentType>> {
        let record = sqlx::query_as::<_, DocumentTypeRecord>(&format!(
            "SELECT {} FROM document_types WHERE code = $1",
            DOCUMENT_TYPE_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.map(DocumentTypeRecord::to_domain))
    }

    async fn create_document_type(&self, t: DocumentType) -> PortResult<DocumentType> {
        let record = sqlx::query_as::<_, DocumentTypeRecord>(&format!(
            "INSERT INTO document_types ({cols}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) RETURNING {cols}",
            cols = DOCUMENT_TYPE_COLUMNS
        ))
        .bind(t.id)
        .bind(&t.code)
        .bind(&t.name)
        .bind(&t.description)
        .bind(t.is_required)
        .bind(t.requires_expiry)
        .bind(t.requires_front_back)
        .bind(t.requires_manual_review)
        .bind(t.auto_ocr_enabled)
        .bind(t.default_validity_months)
        .bind(t.renewal_reminder_days)
        .bind(t.is_active)
        .bind(t.display_order)
        .bind(t.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.to_domain())
    }
}

#[async_trait]
impl DocumentRepository for PgRepository {
    async fn find_document(&self, id: Uuid) -> PortResult<Option<DriverDocument>> {
        sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {} FROM driver_documents WHERE id = $1",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(DocumentRecord::to_domain)
        .transpose()
    }

    async fn find_current_document(
        &self,
        driver_id: Uuid,
        document_type_id: Uuid,
    ) -> PortResult<Option<DriverDocument>> {
        sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {} FROM driver_documents \
             WHERE driver_id = $1 AND document_type_id = $2 AND status <> 'superseded'",
            DOCUMENT_COLUMNS
        ))
        .bind(driver_id)
        .bind(document_type_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(DocumentRecord::to_domain)
        .transpose()
    }

    async fn latest_version(&self, driver_id: Uuid, document_type_id: Uuid) -> PortResult<Option<i32>> {
        sqlx::query_scalar::<_, Option<i32>>(
            "SELECT MAX(version) FROM driver_documents WHERE driver_id = $1 AND document_type_id = $2",
        )
        .bind(driver_id)
        .bind(document_type_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_document_by_file_key(&self, key: &str) -> PortResult<Option<DriverDocument>> {
        sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {} FROM driver_documents WHERE file_key = $1 AND status <> 'superseded'",
            DOCUMENT_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(DocumentRecord::to_domain)
        .transpose()
    }

    async fn list_current_documents(&self, driver_id: Uuid) -> PortResult<Vec<DriverDocument>> {
        let records = sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {} FROM driver_documents \
             WHERE driver_id = $1 AND status <> 'superseded' ORDER BY submitted_at",
            DOCUMENT_COLUMNS
        ))
        .bind(driver_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        documents_to_domain(records)
    }

    async fn list_documents_by_status(
        &self,
        statuses: &[DocumentStatus],
        limit: i64,
        offset: i64,
    ) -> PortResult<(Vec<DriverDocument>, i64)> {
        let names = status_names(statuses);
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM driver_documents WHERE status = ANY($1)",
        )
        .bind(&names)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let records = sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {} FROM driver_documents WHERE status = ANY($1) \
             ORDER BY submitted_at LIMIT $2 OFFSET $3",
            DOCUMENT_COLUMNS
        ))
        .bind(&names)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok((documents_to_domain(records)?, total))
    }

    async fn list_expiring_documents(
        &self,
        from: NaiveDate,
        until: NaiveDate,
    ) -> PortResult<Vec<DriverDocument>> {
        let records = sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {} FROM driver_documents \
             WHERE status = 'approved' AND expiry_date BETWEEN $1 AND $2 ORDER BY expiry_date",
            DOCUMENT_COLUMNS
        ))
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        documents_to_domain(records)
    }

    async fn list_lapsed_documents(&self, today: NaiveDate, limit: i64) -> PortResult<Vec<DriverDocument>> {
        let records = sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {} FROM driver_documents \
             WHERE status = 'approved' AND expiry_date < $1 ORDER BY expiry_date LIMIT $2",
            DOCUMENT_COLUMNS
        ))
        .bind(today)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        documents_to_domain(records)
    }

    async fn insert_document_version(&self, version: NewDocumentVersion) -> PortResult<DriverDocument> {
        let doc = &version.document;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let current = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM driver_documents \
             WHERE driver_id = $1 AND document_type_id = $2 AND status <> 'superseded' FOR UPDATE",
        )
        .bind(doc.driver_id)
        .bind(doc.document_type_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        if current != version.supersedes {
            return Err(PortError::Conflict(
                "current document changed before the new version was stored".to_string(),
            ));
        }

        if let Some(prior_id) = current {
            sqlx::query("UPDATE driver_documents SET status = 'superseded', updated_at = $2 WHERE id = $1")
                .bind(prior_id)
                .bind(doc.created_at)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        insert_document(&mut *tx, doc).await.map_err(db_err)?;
        for entry in &version.history {
            insert_history(&mut *tx, entry).await.map_err(db_err)?;
        }
        if let Some(job) = &version.ocr_job {
            insert_ocr_job(&mut *tx, job).await.map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(version.document)
    }

    async fn transition_document(&self, t: StatusTransition) -> PortResult<DriverDocument> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let allowed = status_names(&t.allowed_from);
        let review = t.review.clone().unwrap_or_default();

        let updated = sqlx::query_as::<_, DocumentRecord>(&format!(
            "UPDATE driver_documents SET status = $3, updated_at = $4, \
                 reviewed_by = CASE WHEN $5 THEN $6 ELSE reviewed_by END, \
                 reviewed_at = CASE WHEN $5 THEN $7 ELSE reviewed_at END, \
                 review_notes = CASE WHEN $5 THEN $8 ELSE review_notes END, \
                 rejection_reason = CASE WHEN $5 THEN $9 ELSE rejection_reason END \
             WHERE id = $1 AND status = ANY($2) RETURNING {}",
            DOCUMENT_COLUMNS
        ))
        .bind(t.document_id)
        .bind(&allowed)
        .bind(t.to.as_str())
        .bind(t.at)
        .bind(t.review.is_some())
        .bind(review.reviewed_by)
        .bind(review.reviewed_at)
        .bind(review.review_notes)
        .bind(review.rejection_reason)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(record) = updated else {
            return Err(cas_miss(&mut *tx, "driver_documents", t.document_id).await);
        };
        insert_history(&mut *tx, &t.history).await.map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        record.to_domain()
    }

    async fn attach_back_side(
        &self,
        document_id: Uuid,
        back: BackArtifact,
        allowed_from: &[DocumentStatus],
        at: DateTime<Utc>,
    ) -> PortResult<DriverDocument> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let updated = sqlx::query_as::<_, DocumentRecord>(&format!(
            "UPDATE driver_documents SET back_file_url = $3, back_file_key = $4, updated_at = $5 \
             WHERE id = $1 AND status = ANY($2) RETURNING {}",
            DOCUMENT_COLUMNS
        ))
        .bind(document_id)
        .bind(status_names(allowed_from))
        .bind(&back.url)
        .bind(&back.key)
        .bind(at)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
        match updated {
            Some(record) => record.to_domain(),
            None => Err(cas_miss(&mut *conn, "driver_documents", document_id).await),
        }
    }

    async fn list_history(&self, document_id: Uuid) -> PortResult<Vec<HistoryEntry>> {
        let records = sqlx::query_as::<_, HistoryRecord>(
            "SELECT id, document_id, action, performed_by, previous_status, new_status, notes, \
                    metadata, created_at \
             FROM document_verification_history WHERE document_id = $1 ORDER BY created_at, id",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        records.into_iter().map(HistoryRecord::to_domain).collect()
    }
}

//=========================================================================================
// OCR Queue Implementation
//=========================================================================================

#[async_trait]
impl OcrJobRepository for PgRepository {
    async fn list_due_ocr_jobs(&self, now: DateTime<Utc>, limit: i64) -> PortResult<Vec<OcrJob>> {
        let records = sqlx::query_as::<_, OcrJobRecord>(&format!(
            "SELECT {} FROM document_ocr_queue \
             WHERE status = 'pending' \
                OR (status = 'failed' AND retry_count < max_retries AND next_retry_at <= $1) \
             ORDER BY priority DESC, created_at LIMIT $2",
            OCR_JOB_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        records.into_iter().map(OcrJobRecord::to_domain).collect()
    }

    async fn claim_ocr_job(
        &self,
        job_id: Uuid,
        expected: OcrJobStatus,
        now: DateTime<Utc>,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE document_ocr_queue SET status = 'processing', started_at = $3 \
             WHERE id = $1 AND status = $2 \
               AND (status = 'pending' OR (retry_count < max_retries AND next_retry_at <= $3))",
        )
        .bind(job_id)
        .bind(expected.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_ocr_job(&self, job_id: Uuid, c: OcrJobCompletion) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let result = sqlx::query(
            "UPDATE document_ocr_queue SET status = 'completed', provider = $2, raw_response = $3, \
                 extracted_data = $4, confidence = $5, completed_at = $6, processing_time_ms = $7, \
                 error_message = NULL \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(job_id)
        .bind(&c.provider)
        .bind(&c.raw_response)
        .bind(&c.extracted_data)
        .bind(c.confidence)
        .bind(c.completed_at)
        .bind(c.processing_time_ms)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(cas_miss(&mut *tx, "document_ocr_queue", job_id).await);
        }

        let update = &c.document;
        let result = sqlx::query(
            "UPDATE driver_documents SET ocr_data = $2, ocr_confidence = $3, ocr_processed_at = $4, \
                 document_number = COALESCE(document_number, $5), \
                 issue_date = COALESCE(issue_date, $6), \
                 expiry_date = COALESCE(expiry_date, $7), \
                 issuing_authority = COALESCE(issuing_authority, $8), \
                 updated_at = $4 \
             WHERE id = $1",
        )
        .bind(update.document_id)
        .bind(&update.ocr_data)
        .bind(update.confidence)
        .bind(update.processed_at)
        .bind(&update.details.document_number)
        .bind(update.details.issue_date)
        .bind(update.details.expiry_date)
        .bind(&update.details.issuing_authority)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("document {}", update.document_id)));
        }
        for entry in &c.history {
            insert_history(&mut *tx, entry).await.map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)
    }

    async fn fail_ocr_job(&self, job_id: Uuid, f: OcrJobFailure) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE document_ocr_queue SET status = 'failed', retry_count = $2, next_retry_at = $3, \
                 error_message = $4, completed_at = $5 \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(f.retry_count)
        .bind(f.next_retry_at)
        .bind(&f.error_message)
        .bind(f.failed_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("ocr job {}", job_id)));
        }
        Ok(())
    }

    async fn reap_stuck_ocr_jobs(
        &self,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> PortResult<u64> {
        let result = sqlx::query(
            "UPDATE document_ocr_queue SET status = 'failed', retry_count = retry_count + 1, \
                 next_retry_at = $2, error_message = 'processing timed out' \
             WHERE status = 'processing' AND started_at < $1",
        )
        .bind(started_before)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn find_ocr_job_for_document(&self, document_id: Uuid) -> PortResult<Option<OcrJob>> {
        sqlx::query_as::<_, OcrJobRecord>(&format!(
            "SELECT {} FROM document_ocr_queue WHERE document_id = $1 \
             ORDER BY created_at DESC LIMIT 1",
            OCR_JOB_COLUMNS
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(OcrJobRecord::to_domain)
        .transpose()
    }
}

//=========================================================================================
// Subscription Repository Implementations
//=========================================================================================

#[async_trait]
impl PlanRepository for PgRepository {
    async fn create_plan(&self, p: SubscriptionPlan) -> PortResult<SubscriptionPlan> {
        sqlx::query_as::<_, PlanRecord>(&format!(
            "INSERT INTO subscription_plans ({cols}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, \
              $20, $21, $22, $23, $24, $25, $26, $27) RETURNING {cols}",
            cols = PLAN_COLUMNS
        ))
        .bind(p.id)
        .bind(&p.slug)
        .bind(&p.name)
        .bind(&p.description)
        .bind(p.plan_type.as_str())
        .bind(p.billing_period.as_str())
        .bind(p.price.minor())
        .bind(&p.currency)
        .bind(p.status.as_str())
        .bind(p.benefits.rides_included)
        .bind(p.benefits.max_ride_value.map(Money::minor))
        .bind(i16::from(p.benefits.discount_pct))
        .bind(&p.benefits.allowed_ride_types)
        .bind(&p.benefits.allowed_cities)
        .bind(p.benefits.max_distance_km)
        .bind(p.benefits.priority_matching)
        .bind(p.benefits.surge_protection)
        .bind(p.benefits.surge_max_cap)
        .bind(p.benefits.free_upgrades)
        .bind(p.benefits.free_cancellations)
        .bind(p.trial_days)
        .bind(p.trial_rides)
        .bind(p.presentation.is_popular)
        .bind(&p.presentation.savings_label)
        .bind(p.presentation.display_order)
        .bind(p.created_at)
        .bind(p.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?
        .to_domain()
    }

    async fn find_plan(&self, id: Uuid) -> PortResult<Option<SubscriptionPlan>> {
        sqlx::query_as::<_, PlanRecord>(&format!(
            "SELECT {} FROM subscription_plans WHERE id = $1",
            PLAN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(PlanRecord::to_domain)
        .transpose()
    }

    async fn list_plans(&self, active_only: bool) -> PortResult<Vec<SubscriptionPlan>> {
        let records = sqlx::query_as::<_, PlanRecord>(&format!(
            "SELECT {} FROM subscription_plans WHERE ($1 = FALSE OR status = 'active') \
             ORDER BY display_order, price_minor",
            PLAN_COLUMNS
        ))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        records.into_iter().map(PlanRecord::to_domain).collect()
    }

    async fn save_plan(&self, p: &SubscriptionPlan) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE subscription_plans SET name = $2, description = $3, price_minor = $4, status = $5, \
                 rides_included = $6, max_ride_value_minor = $7, discount_pct = $8, \
                 allowed_ride_types = $9, allowed_cities = $10, max_distance_km = $11, \
                 priority_matching = $12, surge_protection = $13, surge_max_cap = $14, \
                 free_upgrades = $15, free_cancellations = $16, trial_days = $17, trial_rides = $18, \
                 is_popular = $19, savings_label = $20, display_order = $21, updated_at = $22 \
             WHERE id = $1",
        )
        .bind(p.id)
        .bind(&p.name)
        .bind(&p.description)
        .bind(p.price.minor())
        .bind(p.status.as_str())
        .bind(p.benefits.rides_included)
        .bind(p.benefits.max_ride_value.map(Money::minor))
        .bind(i16::from(p.benefits.discount_pct))
        .bind(&p.benefits.allowed_ride_types)
        .bind(&p.benefits.allowed_cities)
        .bind(p.benefits.max_distance_km)
        .bind(p.benefits.priority_matching)
        .bind(p.benefits.surge_protection)
        .bind(p.benefits.surge_max_cap)
        .bind(p.benefits.free_upgrades)
        .bind(p.benefits.free_cancellations)
        .bind(p.trial_days)
        .bind(p.trial_rides)
        .bind(p.presentation.is_popular)
        .bind(&p.presentation.savings_label)
        .bind(p.presentation.display_order)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("plan {}", p.id)));
        }
        Ok(())
    }
}

async fn write_subscription(conn: &mut PgConnection, s: &Subscription) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE user_subscriptions SET status = $2, current_period_start = $3, \
             current_period_end = $4, paused_at = $5, cancelled_at = $6, last_payment_date = $7, \
             next_billing_date = $8, rides_used = $9, upgrades_used = $10, cancellations_used = $11, \
             failed_payments = $12, total_saved_minor = $13, auto_renew = $14, cancel_reason = $15, \
             is_trial_active = $16, updated_at = $17 \
         WHERE id = $1",
    )
    .bind(s.id)
    .bind(s.status.as_str())
    .bind(s.current_period_start)
    .bind(s.current_period_end)
    .bind(s.paused_at)
    .bind(s.cancelled_at)
    .bind(s.last_payment_date)
    .bind(s.next_billing_date)
    .bind(s.rides_used)
    .bind(s.upgrades_used)
    .bind(s.cancellations_used)
    .bind(s.failed_payments)
    .bind(s.total_saved.minor())
    .bind(s.auto_renew)
    .bind(&s.cancel_reason)
    .bind(s.is_trial_active)
    .bind(s.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl SubscriptionRepository for PgRepository {
    async fn find_live_subscription(&self, user_id: Uuid) -> PortResult<Option<Subscription>> {
        sqlx::query_as::<_, SubscriptionRecord>(&format!(
            "SELECT {} FROM user_subscriptions \
             WHERE user_id = $1 AND status IN ('active', 'paused', 'past_due')",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(SubscriptionRecord::to_domain)
        .transpose()
    }

    async fn find_subscription(&self, id: Uuid) -> PortResult<Option<Subscription>> {
        sqlx::query_as::<_, SubscriptionRecord>(&format!(
            "SELECT {} FROM user_subscriptions WHERE id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(SubscriptionRecord::to_domain)
        .transpose()
    }

    async fn create_subscription(&self, s: Subscription) -> PortResult<Subscription> {
        sqlx::query_as::<_, SubscriptionRecord>(&format!(
            "INSERT INTO user_subscriptions ({cols}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, \
              $20, $21, $22, $23, $24) RETURNING {cols}",
            cols = SUBSCRIPTION_COLUMNS
        ))
        .bind(s.id)
        .bind(s.user_id)
        .bind(s.plan_id)
        .bind(s.status.as_str())
        .bind(&s.currency)
        .bind(s.activated_at)
        .bind(s.current_period_start)
        .bind(s.current_period_end)
        .bind(s.trial_ends_at)
        .bind(s.paused_at)
        .bind(s.cancelled_at)
        .bind(s.last_payment_date)
        .bind(s.next_billing_date)
        .bind(s.rides_used)
        .bind(s.upgrades_used)
        .bind(s.cancellations_used)
        .bind(s.failed_payments)
        .bind(s.total_saved.minor())
        .bind(&s.payment_method)
        .bind(s.auto_renew)
        .bind(&s.cancel_reason)
        .bind(s.is_trial_active)
        .bind(s.created_at)
        .bind(s.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?
        .to_domain()
    }

    async fn update_subscription(
        &self,
        id: Uuid,
        expected: &[SubscriptionStatus],
        change: SubscriptionChange,
    ) -> PortResult<Subscription> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let record = sqlx::query_as::<_, SubscriptionRecord>(&format!(
            "SELECT {} FROM user_subscriptions WHERE id = $1 FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PortError::NotFound(format!("subscription {}", id)))?;

        let mut subscription = record.to_domain()?;
        if !expected.contains(&subscription.status) {
            return Err(PortError::Conflict(format!(
                "subscription {} is {}",
                id, subscription.status
            )));
        }
        change.apply(&mut subscription);
        write_subscription(&mut *tx, &subscription).await.map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(subscription)
    }

    async fn list_due_for_renewal(&self, now: DateTime<Utc>, limit: i64) -> PortResult<Vec<Subscription>> {
        let records = sqlx::query_as::<_, SubscriptionRecord>(&format!(
            "SELECT {} FROM user_subscriptions \
             WHERE status IN ('active', 'past_due') AND current_period_end <= $1 \
             ORDER BY current_period_end LIMIT $2",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        records.into_iter().map(SubscriptionRecord::to_domain).collect()
    }

    async fn record_ride_usage(&self, usage: RideUsage) -> PortResult<bool> {
        let log = &usage.log;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // The cap check and the increment are one statement, so concurrent
        // rides serialize on the row lock and never overshoot.
        let granted = sqlx::query_scalar::<_, Uuid>(
            "UPDATE user_subscriptions \
             SET rides_used = rides_used + 1, total_saved_minor = total_saved_minor + $2, updated_at = $3 \
             WHERE id = $1 AND status = 'active' AND ($4::INTEGER IS NULL OR rides_used < $4) \
             RETURNING id",
        )
        .bind(usage.subscription_id)
        .bind(log.savings_amount.minor())
        .bind(log.created_at)
        .bind(usage.cap)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        if granted.is_none() {
            let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM user_subscriptions WHERE id = $1")
                .bind(usage.subscription_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;
            if exists == 0 {
                return Err(PortError::NotFound(format!("subscription {}", usage.subscription_id)));
            }
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO subscription_usage_logs \
             (id, subscription_id, ride_id, usage_type, original_fare_minor, discounted_fare_minor, \
              savings_amount_minor, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(log.id)
        .bind(log.subscription_id)
        .bind(log.ride_id)
        .bind(log.usage_type.as_str())
        .bind(log.original_fare.minor())
        .bind(log.discounted_fare.minor())
        .bind(log.savings_amount.minor())
        .bind(log.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn list_usage(&self, subscription_id: Uuid) -> PortResult<Vec<UsageLog>> {
        let records = sqlx::query_as::<_, UsageRecord>(
            "SELECT id, subscription_id, ride_id, usage_type, original_fare_minor, \
                    discounted_fare_minor, savings_amount_minor, created_at \
             FROM subscription_usage_logs WHERE subscription_id = $1 ORDER BY created_at",
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        records.into_iter().map(UsageRecord::to_domain).collect()
    }
}

//=========================================================================================
// Platform Lookups (Rides, Drivers, Auth Sessions)
//=========================================================================================

#[async_trait]
impl RideSpendReader for PgRepository {
    async fn total_spend_since(&self, user_id: Uuid, since: DateTime<Utc>) -> PortResult<Money> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(fare_minor), 0)::BIGINT FROM rides \
             WHERE rider_id = $1 AND status = 'completed' AND completed_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(Money::from_minor(total))
    }
}

#[derive(FromRow)]
struct DriverRecord {
    id: Uuid,
    user_id: Uuid,
}

#[async_trait]
impl DriverDirectory for PgRepository {
    async fn get_driver_by_user_id(&self, user_id: Uuid) -> PortResult<Driver> {
        let record = sqlx::query_as::<_, DriverRecord>("SELECT id, user_id FROM drivers WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| PortError::NotFound(format!("driver for user {}", user_id)))?;
        Ok(Driver {
            id: record.id,
            user_id: record.user_id,
        })
    }

    async fn is_driver_suspended(&self, driver_id: Uuid) -> PortResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT is_suspended FROM drivers WHERE id = $1")
            .bind(driver_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| PortError::NotFound(format!("driver {}", driver_id)))
    }
}

#[derive(FromRow)]
struct CallerRecord {
    id: Uuid,
    role: String,
}

#[async_trait]
impl SessionStore for PgRepository {
    async fn validate_session(&self, token: &str) -> PortResult<Caller> {
        let record = sqlx::query_as::<_, CallerRecord>(
            "SELECT u.id, u.role FROM auth_sessions s JOIN users u ON u.id = s.user_id \
             WHERE s.id = $1 AND s.expires_at > NOW()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(PortError::Unauthorized)?;
        Ok(Caller {
            user_id: record.id,
            role: record.role.parse::<Role>().map_err(parse_err)?,
        })
    }
}
