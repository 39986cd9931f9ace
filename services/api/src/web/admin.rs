//! services/api/src/web/admin.rs
//!
//! Administrator endpoints: the review queue, per-driver views, the document
//! type catalog and the plan catalog. Mounted behind `require_admin`.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use ride_platform_core::domain::documents::{NewDocumentType, ReviewAction};
use ride_platform_core::domain::subscriptions::{
    BillingPeriod, NewPlan, PlanBenefits, PlanPresentation, PlanStatus, PlanType, PlanUpdate,
};
use ride_platform_core::services::documents::ReviewDecision;
use ride_platform_core::{Caller, Money};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::documents::{DocumentDto, DocumentTypeDto, VerificationStatusDto};
use crate::web::response::{created, ok, paged};
use crate::web::state::AppState;
use crate::web::subscriptions::PlanDto;

//=========================================================================================
// Payload Structs
//=========================================================================================

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// 1 to 100, default 20.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExpiringParams {
    /// Look-ahead window in days, 1 to 365, default 30.
    pub days: Option<i64>,
}

#[derive(Deserialize, ToSchema)]
pub struct ReviewRequest {
    /// One of `approve`, `reject`, `request_resubmit`.
    pub action: String,
    pub notes: Option<String>,
    /// Required for `reject` and `request_resubmit`.
    pub rejection_reason: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateDocumentTypeRequest {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub requires_expiry: bool,
    #[serde(default)]
    pub requires_front_back: bool,
    #[serde(default)]
    pub requires_manual_review: bool,
    #[serde(default)]
    pub auto_ocr_enabled: bool,
    pub default_validity_months: Option<i32>,
    #[serde(default)]
    pub renewal_reminder_days: i32,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Deserialize, ToSchema, Default)]
#[serde(default)]
pub struct PlanBenefitsInput {
    pub rides_included: Option<i32>,
    pub max_ride_value_minor: Option<i64>,
    pub discount_pct: u8,
    pub allowed_ride_types: Vec<String>,
    pub allowed_cities: Vec<String>,
    pub max_distance_km: Option<i32>,
    pub priority_matching: bool,
    pub surge_protection: bool,
    pub surge_max_cap: Option<f64>,
    pub free_upgrades: i32,
    pub free_cancellations: i32,
}

impl From<PlanBenefitsInput> for PlanBenefits {
    fn from(b: PlanBenefitsInput) -> Self {
        PlanBenefits {
            rides_included: b.rides_included,
            max_ride_value: b.max_ride_value_minor.map(Money::from_minor),
            discount_pct: b.discount_pct,
            allowed_ride_types: b.allowed_ride_types,
            allowed_cities: b.allowed_cities,
            max_distance_km: b.max_distance_km,
            priority_matching: b.priority_matching,
            surge_protection: b.surge_protection,
            surge_max_cap: b.surge_max_cap,
            free_upgrades: b.free_upgrades,
            free_cancellations: b.free_cancellations,
        }
    }
}

#[derive(Deserialize, ToSchema, Default)]
#[serde(default)]
pub struct PresentationInput {
    pub is_popular: bool,
    pub savings_label: Option<String>,
    pub display_order: i32,
}

impl From<PresentationInput> for PlanPresentation {
    fn from(p: PresentationInput) -> Self {
        PlanPresentation {
            is_popular: p.is_popular,
            savings_label: p.savings_label,
            display_order: p.display_order,
        }
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Deserialize, ToSchema)]
pub struct CreatePlanRequest {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    /// One of `unlimited`, `package`, `discount`, `priority`.
    pub plan_type: String,
    /// One of `weekly`, `monthly`, `yearly`.
    pub billing_period: String,
    pub price_minor: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub benefits: PlanBenefitsInput,
    #[serde(default)]
    pub trial_days: i32,
    #[serde(default)]
    pub trial_rides: i32,
    #[serde(default)]
    pub presentation: PresentationInput,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdatePlanRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_minor: Option<i64>,
    /// One of `active`, `inactive`, `archived`.
    pub status: Option<String>,
    pub benefits: Option<PlanBenefitsInput>,
    pub trial_days: Option<i32>,
    pub trial_rides: Option<i32>,
    pub presentation: Option<PresentationInput>,
}

fn parse_enum<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .to_lowercase()
        .parse::<T>()
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

//=========================================================================================
// Document Review
//=========================================================================================

/// Documents waiting for review, oldest first.
#[utoipa::path(
    get,
    path = "/api/v1/admin/documents/pending",
    tag = "admin",
    params(PageParams),
    responses((status = 200, description = "One page of the review queue", body = [DocumentDto]))
)]
pub async fn pending_documents(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .documents
        .list_pending_documents(params.limit.unwrap_or(20), params.offset.unwrap_or(0))
        .await?;
    Ok(paged(page, DocumentDto::from))
}

/// Approved documents whose expiry falls within the next `days` days.
#[utoipa::path(
    get,
    path = "/api/v1/admin/documents/expiring",
    tag = "admin",
    params(ExpiringParams),
    responses(
        (status = 200, description = "Soon-to-expire documents", body = [DocumentDto]),
        (status = 400, description = "days out of range")
    )
)]
pub async fn expiring_documents(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExpiringParams>,
) -> Result<impl IntoResponse, ApiError> {
    let docs = state
        .documents
        .list_expiring_documents(params.days.unwrap_or(30))
        .await?;
    Ok(ok(docs.into_iter().map(DocumentDto::from).collect::<Vec<_>>()))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/documents/{id}/start-review",
    tag = "admin",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Document is under review", body = DocumentDto),
        (status = 400, description = "Document is not pending")
    )
)]
pub async fn start_review(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let doc = state.documents.start_review(id, caller.user_id).await?;
    Ok(ok(DocumentDto::from(doc)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/documents/{id}/review",
    tag = "admin",
    params(("id" = Uuid, Path, description = "Document id")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Decision recorded", body = DocumentDto),
        (status = 400, description = "Unknown action, missing reason or document not reviewable")
    )
)]
pub async fn review_document(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let action: ReviewAction = parse_enum(&req.action)?;
    let doc = state
        .documents
        .review(
            id,
            caller.user_id,
            ReviewDecision {
                action,
                notes: req.notes,
                rejection_reason: req.rejection_reason,
            },
        )
        .await?;
    Ok(ok(DocumentDto::from(doc)))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/drivers/{driver_id}/documents",
    tag = "admin",
    params(("driver_id" = Uuid, Path, description = "Driver id")),
    responses((status = 200, description = "The driver's current documents", body = [DocumentDto]))
)]
pub async fn driver_documents(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let docs = state.documents.list_driver_documents(driver_id).await?;
    Ok(ok(docs.into_iter().map(DocumentDto::from).collect::<Vec<_>>()))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/drivers/{driver_id}/verification-status",
    tag = "admin",
    params(("driver_id" = Uuid, Path, description = "Driver id")),
    responses((status = 200, description = "Verification snapshot", body = VerificationStatusDto))
)]
pub async fn driver_verification_status(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.documents.derive_verification_status(driver_id).await?;
    Ok(ok(VerificationStatusDto::from(status)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/documents/types",
    tag = "admin",
    request_body = CreateDocumentTypeRequest,
    responses(
        (status = 201, description = "Document type created", body = DocumentTypeDto),
        (status = 409, description = "Code already in use")
    )
)]
pub async fn create_document_type(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDocumentTypeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created_type = state
        .documents
        .create_document_type(NewDocumentType {
            code: req.code,
            name: req.name,
            description: req.description,
            is_required: req.is_required,
            requires_expiry: req.requires_expiry,
            requires_front_back: req.requires_front_back,
            requires_manual_review: req.requires_manual_review,
            auto_ocr_enabled: req.auto_ocr_enabled,
            default_validity_months: req.default_validity_months,
            renewal_reminder_days: req.renewal_reminder_days,
            display_order: req.display_order,
        })
        .await?;
    Ok(created(DocumentTypeDto::from(created_type)))
}

//=========================================================================================
// Plan Catalog
//=========================================================================================

/// Every plan, whatever its status.
#[utoipa::path(
    get,
    path = "/api/v1/admin/subscriptions/plans",
    tag = "admin",
    responses((status = 200, description = "All plans", body = [PlanDto]))
)]
pub async fn list_all_plans(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let plans = state.subscriptions.list_all_plans().await?;
    Ok(ok(plans.into_iter().map(PlanDto::from).collect::<Vec<_>>()))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/subscriptions/plans",
    tag = "admin",
    request_body = CreatePlanRequest,
    responses(
        (status = 201, description = "Plan created", body = PlanDto),
        (status = 409, description = "Slug already in use")
    )
)]
pub async fn create_plan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePlanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let plan_type: PlanType = parse_enum(&req.plan_type)?;
    let billing_period: BillingPeriod = parse_enum(&req.billing_period)?;
    let plan = state
        .subscriptions
        .create_plan(NewPlan {
            slug: req.slug,
            name: req.name,
            description: req.description,
            plan_type,
            billing_period,
            price: Money::from_minor(req.price_minor),
            currency: req.currency,
            benefits: req.benefits.into(),
            trial_days: req.trial_days,
            trial_rides: req.trial_rides,
            presentation: req.presentation.into(),
        })
        .await?;
    Ok(created(PlanDto::from(plan)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/admin/subscriptions/plans/{id}",
    tag = "admin",
    params(("id" = Uuid, Path, description = "Plan id")),
    request_body = UpdatePlanRequest,
    responses(
        (status = 200, description = "Plan updated", body = PlanDto),
        (status = 404, description = "No such plan")
    )
)]
pub async fn update_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePlanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let status = req
        .status
        .as_deref()
        .map(parse_enum::<PlanStatus>)
        .transpose()?;
    let plan = state
        .subscriptions
        .update_plan(
            id,
            PlanUpdate {
                name: req.name,
                description: req.description,
                price: req.price_minor.map(Money::from_minor),
                status,
                benefits: req.benefits.map(Into::into),
                trial_days: req.trial_days,
                trial_rides: req.trial_rides,
                presentation: req.presentation.map(Into::into),
            },
        )
        .await?;
    Ok(ok(PlanDto::from(plan)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/subscriptions/plans/{id}/deactivate",
    tag = "admin",
    params(("id" = Uuid, Path, description = "Plan id")),
    responses((status = 200, description = "Plan deactivated", body = PlanDto))
)]
pub async fn deactivate_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let plan = state.subscriptions.deactivate_plan(id).await?;
    Ok(ok(PlanDto::from(plan)))
}
