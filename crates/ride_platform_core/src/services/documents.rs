//! crates/ride_platform_core/src/services/documents.rs
//!
//! The driver document service: upload validation, versioning and
//! supersession, the review state machine and the expiry sweep. Every status
//! change is committed together with its history entry by the repository.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::documents::{
    Artifact, BackArtifact, DocumentDetails, DocumentStatus, DocumentType, Driver, DriverDocument,
    DriverVerificationStatus, HistoryEntry, HistoryEvent, NewDocumentType, OcrJob, OcrJobStatus,
    Performer, ReviewAction, ReviewTrail,
};
use crate::error::{ServiceError, ServiceResult};
use crate::ports::{
    ByteStream, Clock, DocumentRepository, DocumentTypeRepository, DriverDirectory, IdGenerator,
    NewDocumentVersion, PortError, StatusTransition, Storage,
};
use crate::services::verification;
use crate::services::{Page, Viewer};

const STORE_FAILED: &str = "the file could not be stored, please try again";
const STAT_FAILED: &str = "the uploaded file could not be checked, please try again";
const UPLOAD_LINK_FAILED: &str = "an upload link could not be created, please try again";
const DOWNLOAD_LINK_FAILED: &str = "a download link could not be created, please try again";

/// Limits applied to uploaded artifacts.
#[derive(Debug, Clone)]
pub struct DocumentPolicy {
    pub allowed_mime_types: Vec<String>,
    pub max_upload_bytes: i64,
    pub presign_expiry: Duration,
    pub ocr_max_retries: i32,
    pub sweep_batch_size: i64,
}

impl Default for DocumentPolicy {
    fn default() -> Self {
        Self {
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
                "application/pdf".to_string(),
            ],
            max_upload_bytes: 10 * 1024 * 1024,
            presign_expiry: Duration::minutes(15),
            ocr_max_retries: 3,
            sweep_batch_size: 500,
        }
    }
}

/// The ports the document service talks to.
#[derive(Clone)]
pub struct DocumentPorts {
    pub types: Arc<dyn DocumentTypeRepository>,
    pub documents: Arc<dyn DocumentRepository>,
    pub drivers: Arc<dyn DriverDirectory>,
    pub storage: Arc<dyn Storage>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

/// A front-side upload streamed through the API.
pub struct UploadRequest {
    pub driver_id: Uuid,
    pub type_code: String,
    pub body: ByteStream,
    pub size: i64,
    pub mime: String,
    pub filename: String,
    pub details: DocumentDetails,
}

/// A back-side upload for an existing document.
pub struct BackSideUpload {
    pub document_id: Uuid,
    pub driver_id: Uuid,
    pub body: ByteStream,
    pub size: i64,
    pub mime: String,
    pub filename: String,
}

/// Everything a client needs to PUT a file straight to storage.
#[derive(Debug, Clone, PartialEq)]
pub struct PresignedUpload {
    pub url: String,
    pub method: String,
    pub headers: std::collections::HashMap<String, String>,
    pub expires_at: DateTime<Utc>,
    pub file_key: String,
}

#[derive(Debug, Clone)]
pub struct ReviewDecision {
    pub action: ReviewAction,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
}

pub struct DocumentService {
    ports: DocumentPorts,
    policy: DocumentPolicy,
}

impl DocumentService {
    pub fn new(ports: DocumentPorts, policy: DocumentPolicy) -> Self {
        Self { ports, policy }
    }

    pub fn policy(&self) -> &DocumentPolicy {
        &self.policy
    }

    //=====================================================================================
    // Catalog
    //=====================================================================================

    pub async fn list_document_types(&self) -> ServiceResult<Vec<DocumentType>> {
        Ok(self.ports.types.list_document_types(true).await?)
    }

    pub async fn create_document_type(&self, input: NewDocumentType) -> ServiceResult<DocumentType> {
        let code = input.code.trim().to_lowercase();
        let valid_code = !code.is_empty()
            && code
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid_code {
            return Err(ServiceError::invalid_input(
                "document type code must be non-empty snake_case",
            ));
        }
        if input.name.trim().is_empty() {
            return Err(ServiceError::invalid_input("document type name is required"));
        }
        if input.renewal_reminder_days < 0 {
            return Err(ServiceError::invalid_input("renewal reminder days cannot be negative"));
        }

        let document_type = DocumentType {
            id: self.ports.ids.new_id(),
            code,
            name: input.name.trim().to_string(),
            description: input.description,
            is_required: input.is_required,
            requires_expiry: input.requires_expiry,
            requires_front_back: input.requires_front_back,
            requires_manual_review: input.requires_manual_review,
            auto_ocr_enabled: input.auto_ocr_enabled,
            default_validity_months: input.default_validity_months,
            renewal_reminder_days: input.renewal_reminder_days,
            is_active: true,
            display_order: input.display_order,
            created_at: self.ports.clock.now(),
        };

        match self.ports.types.create_document_type(document_type).await {
            Ok(created) => {
                info!(code = %created.code, "Document type created");
                Ok(created)
            }
            Err(PortError::Conflict(_)) => Err(ServiceError::conflict(
                "a document type with this code already exists",
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Looks up an active type by code; unknown and inactive codes are invalid input.
    async fn active_type(&self, code: &str) -> ServiceResult<DocumentType> {
        match self.ports.types.find_document_type_by_code(code).await? {
            Some(t) if t.is_active => Ok(t),
            _ => Err(ServiceError::invalid_input(format!(
                "unknown document type '{}'",
                code
            ))),
        }
    }

    //=====================================================================================
    // Drivers and access
    //=====================================================================================

    /// Resolves the authenticated user to their driver record.
    pub async fn resolve_driver(&self, user_id: Uuid) -> ServiceResult<Driver> {
        match self.ports.drivers.get_driver_by_user_id(user_id).await {
            Ok(driver) => Ok(driver),
            Err(PortError::NotFound(_)) => {
                Err(ServiceError::forbidden("a driver profile is required"))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, document_id: Uuid) -> ServiceResult<DriverDocument> {
        self.ports
            .documents
            .find_document(document_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("document not found"))
    }

    fn ensure_visible(doc: &DriverDocument, viewer: Viewer) -> ServiceResult<()> {
        match viewer {
            Viewer::Admin => Ok(()),
            Viewer::Driver(driver_id) if driver_id == doc.driver_id => Ok(()),
            Viewer::Driver(_) => Err(ServiceError::forbidden(
                "you do not have access to this document",
            )),
        }
    }

    pub async fn get_document(&self, document_id: Uuid, viewer: Viewer) -> ServiceResult<DriverDocument> {
        let doc = self.load(document_id).await?;
        Self::ensure_visible(&doc, viewer)?;
        Ok(doc)
    }

    pub async fn document_history(
        &self,
        document_id: Uuid,
        viewer: Viewer,
    ) -> ServiceResult<Vec<HistoryEntry>> {
        let doc = self.load(document_id).await?;
        Self::ensure_visible(&doc, viewer)?;
        Ok(self.ports.documents.list_history(doc.id).await?)
    }

    pub async fn get_download_url(
        &self,
        document_id: Uuid,
        viewer: Viewer,
    ) -> ServiceResult<crate::ports::PresignedUrl> {
        let doc = self.load(document_id).await?;
        Self::ensure_visible(&doc, viewer)?;
        self.ports
            .storage
            .presigned_download_url(&doc.front.key, self.policy.presign_expiry)
            .await
            .map_err(|e| ServiceError::storage("Failed to presign download", DOWNLOAD_LINK_FAILED, e))
    }

    pub async fn list_driver_documents(&self, driver_id: Uuid) -> ServiceResult<Vec<DriverDocument>> {
        Ok(self.ports.documents.list_current_documents(driver_id).await?)
    }

    pub async fn list_pending_documents(&self, limit: i64, offset: i64) -> ServiceResult<Page<DriverDocument>> {
        let limit = limit.clamp(1, 100);
        let offset = offset.max(0);
        let (items, total) = self
            .ports
            .documents
            .list_documents_by_status(
                &[DocumentStatus::Pending, DocumentStatus::UnderReview],
                limit,
                offset,
            )
            .await?;
        Ok(Page {
            items,
            limit,
            offset,
            total,
        })
    }

    pub async fn list_expiring_documents(&self, days: i64) -> ServiceResult<Vec<DriverDocument>> {
        if !(1..=365).contains(&days) {
            return Err(ServiceError::invalid_input("days must be between 1 and 365"));
        }
        let today = self.ports.clock.now().date_naive();
        let until = today + Duration::days(days);
        Ok(self.ports.documents.list_expiring_documents(today, until).await?)
    }

    //=====================================================================================
    // Uploads
    //=====================================================================================

    fn validate_artifact(&self, mime: &str, size: i64) -> ServiceResult<()> {
        if !self.policy.allowed_mime_types.iter().any(|m| m == mime) {
            return Err(ServiceError::invalid_input(format!(
                "file type '{}' is not allowed",
                mime
            )));
        }
        if size <= 0 {
            return Err(ServiceError::invalid_input("the uploaded file is empty"));
        }
        if size > self.policy.max_upload_bytes {
            return Err(ServiceError::invalid_input(format!(
                "file exceeds the maximum size of {} bytes",
                self.policy.max_upload_bytes
            )));
        }
        Ok(())
    }

    fn validate_details(&self, doc_type: &DocumentType, details: &DocumentDetails) -> ServiceResult<()> {
        if let (Some(issue), Some(expiry)) = (details.issue_date, details.expiry_date) {
            if expiry <= issue {
                return Err(ServiceError::invalid_input("expiry date must be after issue date"));
            }
        }
        if doc_type.requires_expiry {
            let today = self.ports.clock.now().date_naive();
            if details.expiry_date.is_some_and(|d| d < today) {
                return Err(ServiceError::invalid_input("the document has already expired"));
            }
        }
        Ok(())
    }

    pub async fn upload_document(&self, req: UploadRequest) -> ServiceResult<DriverDocument> {
        let doc_type = self.active_type(&req.type_code).await?;
        self.validate_artifact(&req.mime, req.size)?;
        self.validate_details(&doc_type, &req.details)?;

        let document_id = self.ports.ids.new_id();
        let key = object_key(req.driver_id, &doc_type.code, document_id, &req.filename, Side::Front);

        let stored = self
            .ports
            .storage
            .upload(&key, req.body, req.size, &req.mime)
            .await
            .map_err(|e| ServiceError::storage("Failed to store document artifact", STORE_FAILED, e))?;

        let front = Artifact {
            url: stored.url,
            key: stored.key,
            name: req.filename,
            size: req.size,
            mime: req.mime,
        };

        match self
            .persist_new_version(document_id, req.driver_id, &doc_type, front, req.details)
            .await
        {
            Ok(doc) => Ok(doc),
            Err(e) => {
                self.discard_artifact(&key).await;
                Err(e)
            }
        }
    }

    pub async fn upload_back_side(&self, req: BackSideUpload) -> ServiceResult<DriverDocument> {
        let doc = self.load(req.document_id).await?;
        if doc.driver_id != req.driver_id {
            return Err(ServiceError::forbidden("you do not own this document"));
        }
        let doc_type = self
            .ports
            .types
            .find_document_type(doc.document_type_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("document type not found"))?;
        ensure_back_side_allowed(&doc_type, &doc)?;
        self.validate_artifact(&req.mime, req.size)?;

        let key = object_key(doc.driver_id, &doc_type.code, doc.id, &req.filename, Side::Back);
        let stored = self
            .ports
            .storage
            .upload(&key, req.body, req.size, &req.mime)
            .await
            .map_err(|e| ServiceError::storage("Failed to store back side artifact", STORE_FAILED, e))?;

        let back = BackArtifact {
            url: stored.url,
            key: stored.key,
        };
        match self
            .ports
            .documents
            .attach_back_side(doc.id, back, &BACK_SIDE_STATUSES, self.ports.clock.now())
            .await
        {
            Ok(updated) => {
                info!(document_id = %updated.id, "Back side attached");
                Ok(updated)
            }
            Err(e) => {
                self.discard_artifact(&key).await;
                Err(e.into())
            }
        }
    }

    pub async fn get_presigned_upload_url(
        &self,
        driver_id: Uuid,
        type_code: &str,
        filename: &str,
        content_type: &str,
        is_front: bool,
    ) -> ServiceResult<PresignedUpload> {
        let doc_type = self.active_type(type_code).await?;
        if !self.policy.allowed_mime_types.iter().any(|m| m == content_type) {
            return Err(ServiceError::invalid_input(format!(
                "file type '{}' is not allowed",
                content_type
            )));
        }
        if !is_front && !doc_type.requires_front_back {
            return Err(ServiceError::invalid_state(
                "this document type does not take a back side",
            ));
        }

        let side = if is_front { Side::Front } else { Side::Back };
        let file_key = object_key(driver_id, &doc_type.code, self.ports.ids.new_id(), filename, side);
        let presigned = self
            .ports
            .storage
            .presigned_upload_url(&file_key, content_type, self.policy.presign_expiry)
            .await
            .map_err(|e| ServiceError::storage("Failed to presign upload", UPLOAD_LINK_FAILED, e))?;

        Ok(PresignedUpload {
            url: presigned.url,
            method: presigned.method,
            headers: presigned.headers,
            expires_at: presigned.expires_at,
            file_key,
        })
    }

    /// Registers a file the client already PUT to storage. Idempotent on the key.
    pub async fn complete_direct_upload(
        &self,
        driver_id: Uuid,
        file_key: &str,
        type_code: &str,
        is_front: bool,
    ) -> ServiceResult<DriverDocument> {
        let doc_type = self.active_type(type_code).await?;
        let namespace = format!("documents/{}/{}/", driver_id, doc_type.code);
        if !file_key.starts_with(&namespace) || file_key.contains("..") {
            return Err(ServiceError::forbidden("the file key does not belong to you"));
        }

        if is_front {
            if let Some(existing) = self.ports.documents.find_document_by_file_key(file_key).await? {
                debug!(document_id = %existing.id, "Direct upload already registered");
                return Ok(existing);
            }
        }

        let info = self
            .ports
            .storage
            .stat(file_key)
            .await
            .map_err(|e| ServiceError::storage("Failed to check uploaded file", STAT_FAILED, e))?
            .ok_or_else(|| ServiceError::invalid_input("the uploaded file was not found"))?;

        let filename = file_key.rsplit('/').next().unwrap_or(file_key).to_string();
        let mime = info
            .content_type
            .map(|ct| ct.to_lowercase())
            .unwrap_or_else(|| mime_for_filename(&filename).to_string());
        if let Err(e) = self.validate_artifact(&mime, info.size) {
            warn!(key = file_key, size = info.size, mime = %mime, "Rejected direct upload");
            self.discard_artifact(file_key).await;
            return Err(e);
        }

        if !is_front {
            return self.complete_direct_back_side(driver_id, &doc_type, file_key).await;
        }

        let front = Artifact {
            url: self.ports.storage.get_url(file_key),
            key: file_key.to_string(),
            name: filename,
            size: info.size,
            mime,
        };
        let document_id = self.ports.ids.new_id();
        self.persist_new_version(document_id, driver_id, &doc_type, front, DocumentDetails::default())
            .await
    }

    async fn complete_direct_back_side(
        &self,
        driver_id: Uuid,
        doc_type: &DocumentType,
        file_key: &str,
    ) -> ServiceResult<DriverDocument> {
        let doc = self
            .ports
            .documents
            .find_current_document(driver_id, doc_type.id)
            .await?
            .ok_or_else(|| ServiceError::not_found("upload the front side first"))?;
        if doc.back.as_ref().is_some_and(|b| b.key == file_key) {
            return Ok(doc);
        }
        ensure_back_side_allowed(doc_type, &doc)?;
        let back = BackArtifact {
            url: self.ports.storage.get_url(file_key),
            key: file_key.to_string(),
        };
        Ok(self
            .ports
            .documents
            .attach_back_side(doc.id, back, &BACK_SIDE_STATUSES, self.ports.clock.now())
            .await?)
    }

    /// Stores a new version, superseding the current one. A lost race on the
    /// current document is retried once before giving up with `conflict`.
    async fn persist_new_version(
        &self,
        document_id: Uuid,
        driver_id: Uuid,
        doc_type: &DocumentType,
        front: Artifact,
        details: DocumentDetails,
    ) -> ServiceResult<DriverDocument> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let now = self.ports.clock.now();
            let current = self
                .ports
                .documents
                .find_current_document(driver_id, doc_type.id)
                .await?;
            let version = self
                .ports
                .documents
                .latest_version(driver_id, doc_type.id)
                .await?
                .map_or(1, |v| v + 1);

            let document = DriverDocument {
                id: document_id,
                driver_id,
                document_type_id: doc_type.id,
                status: DocumentStatus::Pending,
                front: front.clone(),
                back: None,
                details: details.clone(),
                ocr_data: None,
                ocr_confidence: None,
                ocr_processed_at: None,
                review: ReviewTrail::default(),
                version,
                previous_document_id: current.as_ref().map(|c| c.id),
                submitted_at: now,
                created_at: now,
                updated_at: now,
            };

            let mut history = vec![self.history_entry(
                document_id,
                HistoryEvent::Submitted,
                Performer::User(driver_id),
                None,
                DocumentStatus::Pending,
                None,
                json!({ "version": version, "file_name": front.name }),
                now,
            )];
            if let Some(prior) = &current {
                history.push(self.history_entry(
                    prior.id,
                    HistoryEvent::Superseded,
                    Performer::User(driver_id),
                    Some(prior.status),
                    DocumentStatus::Superseded,
                    Some(format!("superseded by version {}", version)),
                    json!({ "superseded_by": document_id }),
                    now,
                ));
            }

            let ocr_job = doc_type.auto_ocr_enabled.then(|| OcrJob {
                id: self.ports.ids.new_id(),
                document_id,
                status: OcrJobStatus::Pending,
                priority: doc_type.ocr_priority(),
                retry_count: 0,
                max_retries: self.policy.ocr_max_retries,
                next_retry_at: None,
                provider: None,
                raw_response: None,
                extracted_data: None,
                confidence: None,
                started_at: None,
                completed_at: None,
                processing_time_ms: None,
                error_message: None,
                created_at: now,
            });

            let result = self
                .ports
                .documents
                .insert_document_version(NewDocumentVersion {
                    document,
                    supersedes: current.as_ref().map(|c| c.id),
                    history,
                    ocr_job,
                })
                .await;

            match result {
                Ok(doc) => {
                    info!(
                        document_id = %doc.id,
                        driver_id = %driver_id,
                        document_type = %doc_type.code,
                        version = doc.version,
                        "Document submitted"
                    );
                    return Ok(doc);
                }
                Err(PortError::Conflict(reason)) if attempt < 2 => {
                    warn!(driver_id = %driver_id, %reason, "Concurrent upload detected, retrying once");
                }
                Err(PortError::Conflict(_)) => {
                    return Err(ServiceError::conflict(
                        "another upload for this document type is in progress",
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Compensating delete for an artifact whose database write failed.
    async fn discard_artifact(&self, key: &str) {
        if let Err(e) = self.ports.storage.delete(key).await {
            error!(
                key = %key,
                error = %e,
                orphaned = true,
                "Failed to delete discarded artifact; left for garbage collection"
            );
        }
    }

    //=====================================================================================
    // Review
    //=====================================================================================

    pub async fn start_review(&self, document_id: Uuid, reviewer_id: Uuid) -> ServiceResult<DriverDocument> {
        let doc = self.load(document_id).await?;
        if doc.status != DocumentStatus::Pending {
            return Err(ServiceError::invalid_state(format!(
                "a {} document cannot be taken into review",
                doc.status
            )));
        }
        let now = self.ports.clock.now();
        let transition = StatusTransition {
            document_id,
            allowed_from: vec![DocumentStatus::Pending],
            to: DocumentStatus::UnderReview,
            review: None,
            history: self.history_entry(
                document_id,
                HistoryEvent::ReviewStarted,
                Performer::User(reviewer_id),
                Some(doc.status),
                DocumentStatus::UnderReview,
                None,
                json!({}),
                now,
            ),
            at: now,
        };
        let updated = self.ports.documents.transition_document(transition).await?;
        info!(document_id = %document_id, reviewer_id = %reviewer_id, "Review started");
        Ok(updated)
    }

    pub async fn review(
        &self,
        document_id: Uuid,
        reviewer_id: Uuid,
        decision: ReviewDecision,
    ) -> ServiceResult<DriverDocument> {
        let reason = decision
            .rejection_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        if decision.action.requires_reason() && reason.is_none() {
            return Err(ServiceError::invalid_input(format!(
                "a reason is required to {}",
                decision.action.as_str().replace('_', " ")
            )));
        }

        let doc = self.load(document_id).await?;
        if !doc.status.is_reviewable() {
            return Err(ServiceError::invalid_state(format!(
                "a {} document cannot be reviewed",
                doc.status
            )));
        }

        let now = self.ports.clock.now();
        let target = decision.action.target_status();
        let review = ReviewTrail {
            reviewed_by: Some(reviewer_id),
            reviewed_at: Some(now),
            review_notes: decision.notes.clone(),
            rejection_reason: if decision.action.requires_reason() {
                reason.clone()
            } else {
                None
            },
        };
        let transition = StatusTransition {
            document_id,
            allowed_from: vec![DocumentStatus::Pending, DocumentStatus::UnderReview],
            to: target,
            review: Some(review),
            history: self.history_entry(
                document_id,
                decision.action.history_event(),
                Performer::User(reviewer_id),
                Some(doc.status),
                target,
                decision.notes.clone().or(reason),
                json!({ "action": decision.action.as_str() }),
                now,
            ),
            at: now,
        };
        let updated = self.ports.documents.transition_document(transition).await?;
        info!(
            document_id = %document_id,
            reviewer_id = %reviewer_id,
            action = %decision.action,
            "Document reviewed"
        );
        Ok(updated)
    }

    //=====================================================================================
    // Verification and expiry
    //=====================================================================================

    pub async fn derive_verification_status(&self, driver_id: Uuid) -> ServiceResult<DriverVerificationStatus> {
        let types = self.ports.types.list_document_types(true).await?;
        let documents = self.ports.documents.list_current_documents(driver_id).await?;
        let suspended = self.ports.drivers.is_driver_suspended(driver_id).await?;
        let today = self.ports.clock.now().date_naive();
        Ok(verification::aggregate(driver_id, &types, &documents, suspended, today))
    }

    /// Moves approved documents whose expiry date has passed to `expired`.
    /// Returns how many were expired.
    pub async fn expire_documents(&self) -> ServiceResult<usize> {
        let now = self.ports.clock.now();
        let lapsed = self
            .ports
            .documents
            .list_lapsed_documents(now.date_naive(), self.policy.sweep_batch_size)
            .await?;

        let mut expired = 0;
        for doc in lapsed {
            let transition = StatusTransition {
                document_id: doc.id,
                allowed_from: vec![DocumentStatus::Approved],
                to: DocumentStatus::Expired,
                review: None,
                history: self.history_entry(
                    doc.id,
                    HistoryEvent::Expired,
                    Performer::System,
                    Some(DocumentStatus::Approved),
                    DocumentStatus::Expired,
                    Some("expiry date passed".to_string()),
                    json!({ "expiry_date": doc.details.expiry_date.map(|d| d.to_string()) }),
                    now,
                ),
                at: now,
            };
            match self.ports.documents.transition_document(transition).await {
                Ok(_) => expired += 1,
                Err(PortError::Conflict(_)) => {
                    debug!(document_id = %doc.id, "Document changed before expiry, skipping")
                }
                Err(e) => error!(document_id = %doc.id, error = %e, "Failed to expire document"),
            }
        }
        if expired > 0 {
            info!(count = expired, "Expired lapsed documents");
        }
        Ok(expired)
    }

    #[allow(clippy::too_many_arguments)]
    fn history_entry(
        &self,
        document_id: Uuid,
        event: HistoryEvent,
        performed_by: Performer,
        previous_status: Option<DocumentStatus>,
        new_status: DocumentStatus,
        notes: Option<String>,
        metadata: serde_json::Value,
        at: DateTime<Utc>,
    ) -> HistoryEntry {
        HistoryEntry {
            id: self.ports.ids.new_id(),
            document_id,
            event,
            performed_by,
            previous_status,
            new_status,
            notes,
            metadata,
            created_at: at,
        }
    }
}

const BACK_SIDE_STATUSES: [DocumentStatus; 2] =
    [DocumentStatus::Pending, DocumentStatus::ResubmitRequested];

fn ensure_back_side_allowed(doc_type: &DocumentType, doc: &DriverDocument) -> ServiceResult<()> {
    if !doc_type.requires_front_back {
        return Err(ServiceError::invalid_state(
            "this document type does not take a back side",
        ));
    }
    if !BACK_SIDE_STATUSES.contains(&doc.status) {
        return Err(ServiceError::invalid_state(format!(
            "cannot add a back side to a {} document",
            doc.status
        )));
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Side {
    Front,
    Back,
}

/// `documents/{driver}/{type}/{id}[-back]{.ext}`; the extension is reduced to
/// lowercase alphanumerics so user file names never shape the path.
fn object_key(driver_id: Uuid, type_code: &str, id: Uuid, filename: &str, side: Side) -> String {
    let ext = extension_of(filename)
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    let suffix = match side {
        Side::Front => "",
        Side::Back => "-back",
    };
    format!("documents/{}/{}/{}{}{}", driver_id, type_code, id, suffix, ext)
}

fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();
    (!ext.is_empty()).then_some(ext)
}

/// Content type implied by a file name's extension.
pub fn mime_for_filename(filename: &str) -> &'static str {
    match extension_of(filename).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_are_namespaced_and_sanitised() {
        let driver = Uuid::nil();
        let id = Uuid::from_u128(7);
        let key = object_key(driver, "license", id, "My Scan.JP/G", Side::Front);
        assert_eq!(
            key,
            format!("documents/{}/license/{}.jpg", driver, id)
        );
        let back = object_key(driver, "license", id, "noext", Side::Back);
        assert!(back.ends_with(&format!("{}-back", id)));
    }

    #[test]
    fn mime_is_guessed_from_extension() {
        assert_eq!(mime_for_filename("a.PDF"), "application/pdf");
        assert_eq!(mime_for_filename("a.jpeg"), "image/jpeg");
        assert_eq!(mime_for_filename("a"), "application/octet-stream");
    }
}
