//! services/api/src/web/subscriptions.rs
//!
//! Rider-facing subscription endpoints. Amounts travel as integer minor
//! units (`*_minor`), the same representation the services compute in.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use ride_platform_core::domain::subscriptions::{
    DiscountOutcome, PlanComparison, RideCharge, Subscription, SubscriptionPlan, SubscriptionView,
};
use ride_platform_core::{Caller, Money};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::response::{created, ok};
use crate::web::state::AppState;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct PlanDto {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub plan_type: String,
    pub billing_period: String,
    pub price_minor: i64,
    pub currency: String,
    pub status: String,
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
    pub trial_days: i32,
    pub trial_rides: i32,
    pub is_popular: bool,
    pub savings_label: Option<String>,
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SubscriptionPlan> for PlanDto {
    fn from(p: SubscriptionPlan) -> Self {
        Self {
            id: p.id,
            slug: p.slug,
            name: p.name,
            description: p.description,
            plan_type: p.plan_type.to_string(),
            billing_period: p.billing_period.to_string(),
            price_minor: p.price.minor(),
            currency: p.currency,
            status: p.status.to_string(),
            rides_included: p.benefits.rides_included,
            max_ride_value_minor: p.benefits.max_ride_value.map(Money::minor),
            discount_pct: p.benefits.discount_pct,
            allowed_ride_types: p.benefits.allowed_ride_types,
            allowed_cities: p.benefits.allowed_cities,
            max_distance_km: p.benefits.max_distance_km,
            priority_matching: p.benefits.priority_matching,
            surge_protection: p.benefits.surge_protection,
            surge_max_cap: p.benefits.surge_max_cap,
            free_upgrades: p.benefits.free_upgrades,
            free_cancellations: p.benefits.free_cancellations,
            trial_days: p.trial_days,
            trial_rides: p.trial_rides,
            is_popular: p.presentation.is_popular,
            savings_label: p.presentation.savings_label,
            display_order: p.presentation.display_order,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SubscriptionDto {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub currency: String,
    pub activated_at: DateTime<Utc>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub is_trial_active: bool,
    pub paused_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub rides_used: i32,
    pub upgrades_used: i32,
    pub cancellations_used: i32,
    pub failed_payments: i32,
    pub total_saved_minor: i64,
    pub auto_renew: bool,
}

impl From<Subscription> for SubscriptionDto {
    fn from(s: Subscription) -> Self {
        Self {
            id: s.id,
            user_id: s.user_id,
            plan_id: s.plan_id,
            status: s.status.to_string(),
            currency: s.currency,
            activated_at: s.activated_at,
            current_period_start: s.current_period_start,
            current_period_end: s.current_period_end,
            trial_ends_at: s.trial_ends_at,
            is_trial_active: s.is_trial_active,
            paused_at: s.paused_at,
            cancelled_at: s.cancelled_at,
            cancel_reason: s.cancel_reason,
            last_payment_date: s.last_payment_date,
            next_billing_date: s.next_billing_date,
            rides_used: s.rides_used,
            upgrades_used: s.upgrades_used,
            cancellations_used: s.cancellations_used,
            failed_payments: s.failed_payments,
            total_saved_minor: s.total_saved.minor(),
            auto_renew: s.auto_renew,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SubscriptionViewDto {
    pub subscription: SubscriptionDto,
    pub plan: PlanDto,
    pub days_remaining: i64,
    /// Absent for plans without a ride cap.
    pub rides_remaining: Option<i32>,
}

impl From<SubscriptionView> for SubscriptionViewDto {
    fn from(v: SubscriptionView) -> Self {
        Self {
            subscription: v.subscription.into(),
            plan: v.plan.into(),
            days_remaining: v.days_remaining,
            rides_remaining: v.rides_remaining,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PlanEstimateDto {
    pub plan: PlanDto,
    pub estimated_savings_minor: i64,
}

#[derive(Serialize, ToSchema)]
pub struct PlanComparisonDto {
    pub avg_monthly_spend_minor: i64,
    pub best_plan_id: Option<Uuid>,
    pub plans: Vec<PlanEstimateDto>,
}

impl From<PlanComparison> for PlanComparisonDto {
    fn from(c: PlanComparison) -> Self {
        let savings = c.estimated_savings;
        Self {
            avg_monthly_spend_minor: c.avg_monthly_spend.minor(),
            best_plan_id: c.best_plan_id,
            plans: c
                .plans
                .into_iter()
                .map(|plan| PlanEstimateDto {
                    estimated_savings_minor: savings.get(&plan.id).copied().unwrap_or_default().minor(),
                    plan: plan.into(),
                })
                .collect(),
        }
    }
}

fn default_auto_renew() -> bool {
    true
}

#[derive(Deserialize, ToSchema)]
pub struct SubscribeRequest {
    pub plan_id: Uuid,
    pub payment_method: Option<String>,
    #[serde(default = "default_auto_renew")]
    pub auto_renew: bool,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CancelParams {
    /// Free-text reason recorded on the subscription.
    pub reason: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct RideDiscountRequest {
    pub ride_id: Uuid,
    pub original_fare_minor: i64,
    pub ride_type: String,
    pub city: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct RideDiscountDto {
    pub original_fare_minor: i64,
    pub final_fare_minor: i64,
    pub savings_minor: i64,
    pub discounted: bool,
    pub no_discount_reason: Option<String>,
}

impl From<DiscountOutcome> for RideDiscountDto {
    fn from(d: DiscountOutcome) -> Self {
        Self {
            discounted: d.is_discounted(),
            original_fare_minor: d.original_fare.minor(),
            final_fare_minor: d.final_fare.minor(),
            savings_minor: d.savings.minor(),
            no_discount_reason: d.no_discount_reason.map(|r| r.to_string()),
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// The active plan catalog.
#[utoipa::path(
    get,
    path = "/api/v1/subscriptions/plans",
    tag = "subscriptions",
    responses((status = 200, description = "Active plans in display order", body = [PlanDto]))
)]
pub async fn list_plans(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let plans = state.subscriptions.list_active_plans().await?;
    Ok(ok(plans.into_iter().map(PlanDto::from).collect::<Vec<_>>()))
}

/// Estimated monthly savings of each active plan for the caller.
#[utoipa::path(
    get,
    path = "/api/v1/subscriptions/compare",
    tag = "subscriptions",
    responses((status = 200, description = "Personalised comparison", body = PlanComparisonDto))
)]
pub async fn compare_plans(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let comparison = state.subscriptions.compare_plans(caller.user_id).await?;
    Ok(ok(PlanComparisonDto::from(comparison)))
}

/// Subscribe the caller to a plan.
#[utoipa::path(
    post,
    path = "/api/v1/subscriptions",
    tag = "subscriptions",
    request_body = SubscribeRequest,
    responses(
        (status = 201, description = "Subscription started", body = SubscriptionViewDto),
        (status = 409, description = "Caller already has a live subscription"),
        (status = 500, description = "Payment failed")
    )
)]
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .subscriptions
        .subscribe(caller.user_id, req.plan_id, req.payment_method, req.auto_renew)
        .await?;
    Ok(created(SubscriptionViewDto::from(view)))
}

/// The caller's live subscription.
#[utoipa::path(
    get,
    path = "/api/v1/subscriptions/me",
    tag = "subscriptions",
    responses(
        (status = 200, description = "Current subscription", body = SubscriptionViewDto),
        (status = 404, description = "No live subscription")
    )
)]
pub async fn my_subscription(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.subscriptions.current_subscription(caller.user_id).await?;
    Ok(ok(SubscriptionViewDto::from(view)))
}

#[utoipa::path(
    post,
    path = "/api/v1/subscriptions/me/pause",
    tag = "subscriptions",
    responses(
        (status = 200, description = "Subscription paused", body = SubscriptionViewDto),
        (status = 400, description = "Subscription is not active")
    )
)]
pub async fn pause(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.subscriptions.pause(caller.user_id).await?;
    Ok(ok(SubscriptionViewDto::from(view)))
}

#[utoipa::path(
    post,
    path = "/api/v1/subscriptions/me/resume",
    tag = "subscriptions",
    responses(
        (status = 200, description = "Subscription resumed", body = SubscriptionViewDto),
        (status = 400, description = "Subscription is not paused")
    )
)]
pub async fn resume(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.subscriptions.resume(caller.user_id).await?;
    Ok(ok(SubscriptionViewDto::from(view)))
}

/// Cancel the caller's subscription.
#[utoipa::path(
    delete,
    path = "/api/v1/subscriptions/me",
    tag = "subscriptions",
    params(CancelParams),
    responses(
        (status = 200, description = "Subscription cancelled", body = SubscriptionViewDto),
        (status = 404, description = "No live subscription")
    )
)]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<CancelParams>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.subscriptions.cancel(caller.user_id, params.reason).await?;
    Ok(ok(SubscriptionViewDto::from(view)))
}

/// Price a ride against the caller's subscription and record the usage.
#[utoipa::path(
    post,
    path = "/api/v1/subscriptions/me/rides/discount",
    tag = "subscriptions",
    request_body = RideDiscountRequest,
    responses((status = 200, description = "Fare after subscription benefits", body = RideDiscountDto))
)]
pub async fn ride_discount(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<RideDiscountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.original_fare_minor < 0 {
        return Err(ApiError::bad_request("original_fare_minor cannot be negative"));
    }
    let outcome = state
        .subscriptions
        .apply_discount(
            caller.user_id,
            RideCharge {
                ride_id: req.ride_id,
                original_fare: Money::from_minor(req.original_fare_minor),
                ride_type: req.ride_type,
                city: req.city,
            },
        )
        .await?;
    Ok(ok(RideDiscountDto::from(outcome)))
}
