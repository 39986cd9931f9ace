//! services/api/src/web/documents.rs
//!
//! Driver-facing document endpoints and the JSON shapes shared with the
//! admin document endpoints.

use axum::{
    extract::{Multipart, Path, State},
    response::IntoResponse,
    Extension, Json,
};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use ride_platform_core::domain::documents::{
    DocumentDetails, DocumentType, DriverDocument, DriverVerificationStatus, HistoryEntry,
    RequiredDocumentState,
};
use ride_platform_core::ports::{byte_stream_from, PresignedUrl};
use ride_platform_core::services::documents::{BackSideUpload, PresignedUpload, UploadRequest};
use ride_platform_core::services::Viewer;
use ride_platform_core::{Caller, ServiceResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::response::{created, ok};
use crate::web::state::AppState;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct DocumentTypeDto {
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

impl From<DocumentType> for DocumentTypeDto {
    fn from(t: DocumentType) -> Self {
        Self {
            id: t.id,
            code: t.code,
            name: t.name,
            description: t.description,
            is_required: t.is_required,
            requires_expiry: t.requires_expiry,
            requires_front_back: t.requires_front_back,
            requires_manual_review: t.requires_manual_review,
            auto_ocr_enabled: t.auto_ocr_enabled,
            default_validity_months: t.default_validity_months,
            renewal_reminder_days: t.renewal_reminder_days,
            is_active: t.is_active,
            display_order: t.display_order,
            created_at: t.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct DocumentDto {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub document_type_id: Uuid,
    pub status: String,
    pub file_url: String,
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
    pub back_file_url: Option<String>,
    pub document_number: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub issuing_authority: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub ocr_data: Option<serde_json::Value>,
    pub ocr_confidence: Option<f64>,
    pub ocr_processed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub version: i32,
    pub previous_document_id: Option<Uuid>,
    pub submitted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DriverDocument> for DocumentDto {
    fn from(d: DriverDocument) -> Self {
        Self {
            id: d.id,
            driver_id: d.driver_id,
            document_type_id: d.document_type_id,
            status: d.status.to_string(),
            file_url: d.front.url,
            file_name: d.front.name,
            file_size: d.front.size,
            mime_type: d.front.mime,
            back_file_url: d.back.map(|b| b.url),
            document_number: d.details.document_number,
            issue_date: d.details.issue_date,
            expiry_date: d.details.expiry_date,
            issuing_authority: d.details.issuing_authority,
            ocr_data: d.ocr_data,
            ocr_confidence: d.ocr_confidence,
            ocr_processed_at: d.ocr_processed_at,
            reviewed_by: d.review.reviewed_by,
            reviewed_at: d.review.reviewed_at,
            review_notes: d.review.review_notes,
            rejection_reason: d.review.rejection_reason,
            version: d.version,
            previous_document_id: d.previous_document_id,
            submitted_at: d.submitted_at,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct HistoryEntryDto {
    pub id: Uuid,
    pub document_id: Uuid,
    pub action: String,
    /// A user id, or `system` for background jobs.
    pub performed_by: String,
    pub previous_status: Option<String>,
    pub new_status: String,
    pub notes: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<HistoryEntry> for HistoryEntryDto {
    fn from(h: HistoryEntry) -> Self {
        Self {
            id: h.id,
            document_id: h.document_id,
            action: h.event.to_string(),
            performed_by: h.performed_by.to_string(),
            previous_status: h.previous_status.map(|s| s.to_string()),
            new_status: h.new_status.to_string(),
            notes: h.notes,
            metadata: h.metadata,
            created_at: h.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct RequiredDocumentDto {
    pub document_type_id: Uuid,
    pub code: String,
    pub name: String,
    pub status: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

impl From<RequiredDocumentState> for RequiredDocumentDto {
    fn from(r: RequiredDocumentState) -> Self {
        Self {
            document_type_id: r.document_type_id,
            code: r.code,
            name: r.name,
            status: r.status.map(|s| s.to_string()),
            expiry_date: r.expiry_date,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct VerificationStatusDto {
    pub driver_id: Uuid,
    pub status: String,
    pub required_count: usize,
    pub submitted_count: usize,
    pub approved_count: usize,
    pub next_document_expiry: Option<NaiveDate>,
    pub documents: Vec<RequiredDocumentDto>,
}

impl From<DriverVerificationStatus> for VerificationStatusDto {
    fn from(v: DriverVerificationStatus) -> Self {
        Self {
            driver_id: v.driver_id,
            status: v.state.to_string(),
            required_count: v.required_count,
            submitted_count: v.submitted_count,
            approved_count: v.approved_count,
            next_document_expiry: v.next_document_expiry,
            documents: v.documents.into_iter().map(Into::into).collect(),
        }
    }
}

fn default_front() -> bool {
    true
}

#[derive(Deserialize, ToSchema)]
pub struct PresignedUploadRequest {
    pub document_type_code: String,
    pub filename: String,
    pub content_type: String,
    #[serde(default = "default_front")]
    pub is_front: bool,
}

#[derive(Serialize, ToSchema)]
pub struct PresignedUploadDto {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub expires_at: DateTime<Utc>,
    pub file_key: String,
}

impl From<PresignedUpload> for PresignedUploadDto {
    fn from(p: PresignedUpload) -> Self {
        Self {
            url: p.url,
            method: p.method,
            headers: p.headers,
            expires_at: p.expires_at,
            file_key: p.file_key,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct UploadCompleteRequest {
    pub file_key: String,
    pub document_type_code: String,
    #[serde(default = "default_front")]
    pub is_front: bool,
}

#[derive(Serialize, ToSchema)]
pub struct DownloadUrlDto {
    pub url: String,
    pub method: String,
    pub expires_at: DateTime<Utc>,
}

impl From<PresignedUrl> for DownloadUrlDto {
    fn from(p: PresignedUrl) -> Self {
        Self {
            url: p.url,
            method: p.method,
            expires_at: p.expires_at,
        }
    }
}

//=========================================================================================
// Multipart Parsing
//=========================================================================================

struct UploadedFile {
    bytes: Bytes,
    mime: String,
    filename: String,
}

#[derive(Default)]
struct UploadForm {
    file: Option<UploadedFile>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_lowercase();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read the file: {}", e)))?;
                form.file = Some(UploadedFile { bytes, mime, filename });
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read field '{}': {}", name, e)))?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    fn take_file(&mut self) -> Result<UploadedFile, ApiError> {
        self.file
            .take()
            .ok_or_else(|| ApiError::bad_request("multipart form must include a 'file' part"))
    }

    fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn date(&self, name: &str) -> Result<Option<NaiveDate>, ApiError> {
        self.text(name)
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .map_err(|_| ApiError::bad_request(format!("{} must be in YYYY-MM-DD format", name)))
            })
            .transpose()
    }

    fn details(&self) -> Result<DocumentDetails, ApiError> {
        Ok(DocumentDetails {
            document_number: self.text("document_number"),
            issue_date: self.date("issue_date")?,
            expiry_date: self.date("expiry_date")?,
            issuing_authority: self.text("issuing_authority"),
        })
    }
}

/// Admins see every document; everyone else must be the owning driver.
pub async fn viewer_for(state: &AppState, caller: &Caller) -> ServiceResult<Viewer> {
    if caller.is_admin() {
        return Ok(Viewer::Admin);
    }
    let driver = state.documents.resolve_driver(caller.user_id).await?;
    Ok(Viewer::Driver(driver.id))
}

//=========================================================================================
// Handlers
//=========================================================================================

/// List the active document types.
#[utoipa::path(
    get,
    path = "/api/v1/documents/types",
    tag = "documents",
    responses((status = 200, description = "Active document types", body = [DocumentTypeDto]))
)]
pub async fn list_document_types(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let types = state.documents.list_document_types().await?;
    Ok(ok(types.into_iter().map(DocumentTypeDto::from).collect::<Vec<_>>()))
}

/// List the caller's current (non-superseded) documents.
#[utoipa::path(
    get,
    path = "/api/v1/documents",
    tag = "documents",
    responses(
        (status = 200, description = "The caller's documents", body = [DocumentDto]),
        (status = 403, description = "Caller is not a driver")
    )
)]
pub async fn list_my_documents(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let driver = state.documents.resolve_driver(caller.user_id).await?;
    let docs = state.documents.list_driver_documents(driver.id).await?;
    Ok(ok(docs.into_iter().map(DocumentDto::from).collect::<Vec<_>>()))
}

/// The caller's verification snapshot.
#[utoipa::path(
    get,
    path = "/api/v1/documents/verification-status",
    tag = "documents",
    responses((status = 200, description = "Verification snapshot", body = VerificationStatusDto))
)]
pub async fn my_verification_status(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let driver = state.documents.resolve_driver(caller.user_id).await?;
    let status = state.documents.derive_verification_status(driver.id).await?;
    Ok(ok(VerificationStatusDto::from(status)))
}

/// Upload the front side of a document.
///
/// Multipart fields: `file`, `document_type_code`, and optionally
/// `document_number`, `issuing_authority`, `issue_date`, `expiry_date` (YYYY-MM-DD).
#[utoipa::path(
    post,
    path = "/api/v1/documents/upload",
    tag = "documents",
    request_body(content_type = "multipart/form-data", description = "The document file and its details."),
    responses(
        (status = 201, description = "Document stored and queued for review", body = DocumentDto),
        (status = 400, description = "Invalid type, file or details")
    )
)]
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let driver = state.documents.resolve_driver(caller.user_id).await?;
    let mut form = UploadForm::read(multipart).await?;
    let type_code = form
        .text("document_type_code")
        .ok_or_else(|| ApiError::bad_request("document_type_code is required"))?;
    let details = form.details()?;
    let file = form.take_file()?;

    let doc = state
        .documents
        .upload_document(UploadRequest {
            driver_id: driver.id,
            type_code,
            size: file.bytes.len() as i64,
            body: byte_stream_from(file.bytes),
            mime: file.mime,
            filename: file.filename,
            details,
        })
        .await?;
    Ok(created(DocumentDto::from(doc)))
}

/// Ask for a URL to PUT a file straight to storage.
#[utoipa::path(
    post,
    path = "/api/v1/documents/presigned-upload",
    tag = "documents",
    request_body = PresignedUploadRequest,
    responses((status = 200, description = "Presigned upload target", body = PresignedUploadDto))
)]
pub async fn presigned_upload(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<PresignedUploadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let driver = state.documents.resolve_driver(caller.user_id).await?;
    let presigned = state
        .documents
        .get_presigned_upload_url(
            driver.id,
            &req.document_type_code,
            &req.filename,
            &req.content_type.to_lowercase(),
            req.is_front,
        )
        .await?;
    Ok(ok(PresignedUploadDto::from(presigned)))
}

/// Register a file uploaded through a presigned URL.
#[utoipa::path(
    post,
    path = "/api/v1/documents/upload-complete",
    tag = "documents",
    request_body = UploadCompleteRequest,
    responses(
        (status = 201, description = "Document registered", body = DocumentDto),
        (status = 404, description = "Nothing was uploaded under this key")
    )
)]
pub async fn upload_complete(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<UploadCompleteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let driver = state.documents.resolve_driver(caller.user_id).await?;
    let doc = state
        .documents
        .complete_direct_upload(driver.id, &req.file_key, &req.document_type_code, req.is_front)
        .await?;
    Ok(created(DocumentDto::from(doc)))
}

/// Fetch one document; owner or admin.
#[utoipa::path(
    get,
    path = "/api/v1/documents/{id}",
    tag = "documents",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "The document", body = DocumentDto),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such document")
    )
)]
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = viewer_for(&state, &caller).await?;
    let doc = state.documents.get_document(id, viewer).await?;
    Ok(ok(DocumentDto::from(doc)))
}

/// The document's verification history, oldest first.
#[utoipa::path(
    get,
    path = "/api/v1/documents/{id}/history",
    tag = "documents",
    params(("id" = Uuid, Path, description = "Document id")),
    responses((status = 200, description = "History entries", body = [HistoryEntryDto]))
)]
pub async fn document_history(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = viewer_for(&state, &caller).await?;
    let history = state.documents.document_history(id, viewer).await?;
    Ok(ok(history.into_iter().map(HistoryEntryDto::from).collect::<Vec<_>>()))
}

/// A short-lived URL for downloading the front side.
#[utoipa::path(
    get,
    path = "/api/v1/documents/{id}/download-url",
    tag = "documents",
    params(("id" = Uuid, Path, description = "Document id")),
    responses((status = 200, description = "Presigned download URL", body = DownloadUrlDto))
)]
pub async fn download_url(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = viewer_for(&state, &caller).await?;
    let url = state.documents.get_download_url(id, viewer).await?;
    Ok(ok(DownloadUrlDto::from(url)))
}

/// Attach the back side to an existing document; owner only.
#[utoipa::path(
    post,
    path = "/api/v1/documents/{id}/back",
    tag = "documents",
    params(("id" = Uuid, Path, description = "Document id")),
    request_body(content_type = "multipart/form-data", description = "The back-side file."),
    responses(
        (status = 200, description = "Back side stored", body = DocumentDto),
        (status = 400, description = "Type has no back side or document is not awaiting review"),
        (status = 403, description = "Not the owner")
    )
)]
pub async fn upload_back(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let driver = state.documents.resolve_driver(caller.user_id).await?;
    let file = UploadForm::read(multipart).await?.take_file()?;
    let doc = state
        .documents
        .upload_back_side(BackSideUpload {
            document_id: id,
            driver_id: driver.id,
            size: file.bytes.len() as i64,
            body: byte_stream_from(file.bytes),
            mime: file.mime,
            filename: file.filename,
        })
        .await?;
    Ok(ok(DocumentDto::from(doc)))
}
