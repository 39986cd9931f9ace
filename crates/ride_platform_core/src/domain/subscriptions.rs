//! crates/ride_platform_core/src/domain/subscriptions.rs
//!
//! Subscription plans, subscriber state and per-ride usage records.

use chrono::{DateTime, Duration, Months, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use super::{string_enum, Money};

//=========================================================================================
// Plan catalog
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanType {
    /// Every eligible ride is covered up to the per-ride cap.
    Unlimited,
    /// A fixed number of covered rides per period.
    Package,
    /// A percentage off every eligible ride.
    Discount,
    /// A percentage off plus priority matching.
    Priority,
}

string_enum!(PlanType, "plan type", {
    Unlimited => "unlimited",
    Package => "package",
    Discount => "discount",
    Priority => "priority",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BillingPeriod {
    Weekly,
    Monthly,
    Yearly,
}

string_enum!(BillingPeriod, "billing period", {
    Weekly => "weekly",
    Monthly => "monthly",
    Yearly => "yearly",
});

impl BillingPeriod {
    /// The end of a period that starts at `from`. Month arithmetic clamps to
    /// the last day of shorter months.
    pub fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            BillingPeriod::Weekly => from + Duration::days(7),
            BillingPeriod::Monthly => from
                .checked_add_months(Months::new(1))
                .unwrap_or(from + Duration::days(30)),
            BillingPeriod::Yearly => from
                .checked_add_months(Months::new(12))
                .unwrap_or(from + Duration::days(365)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Active,
    Inactive,
    Archived,
}

string_enum!(PlanStatus, "plan status", {
    Active => "active",
    Inactive => "inactive",
    Archived => "archived",
});

/// What a subscriber gets for the price.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanBenefits {
    pub rides_included: Option<i32>,
    pub max_ride_value: Option<Money>,
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

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanPresentation {
    pub is_popular: bool,
    pub savings_label: Option<String>,
    pub display_order: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub plan_type: PlanType,
    pub billing_period: BillingPeriod,
    pub price: Money,
    pub currency: String,
    pub status: PlanStatus,
    pub benefits: PlanBenefits,
    pub trial_days: i32,
    pub trial_rides: i32,
    pub presentation: PlanPresentation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionPlan {
    pub fn is_active(&self) -> bool {
        self.status == PlanStatus::Active
    }
}

/// Admin input for creating a plan.
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub plan_type: PlanType,
    pub billing_period: BillingPeriod,
    pub price: Money,
    pub currency: String,
    pub benefits: PlanBenefits,
    pub trial_days: i32,
    pub trial_rides: i32,
    pub presentation: PlanPresentation,
}

/// Partial update of a plan; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Money>,
    pub status: Option<PlanStatus>,
    pub benefits: Option<PlanBenefits>,
    pub trial_days: Option<i32>,
    pub trial_rides: Option<i32>,
    pub presentation: Option<PlanPresentation>,
}

//=========================================================================================
// Subscriptions
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
    PastDue,
    Expired,
}

string_enum!(SubscriptionStatus, "subscription status", {
    Active => "active",
    Paused => "paused",
    Cancelled => "cancelled",
    PastDue => "past_due",
    Expired => "expired",
});

impl SubscriptionStatus {
    /// Statuses that occupy a user's single subscription slot.
    pub const LIVE: [SubscriptionStatus; 3] = [
        SubscriptionStatus::Active,
        SubscriptionStatus::Paused,
        SubscriptionStatus::PastDue,
    ];

    pub fn is_live(&self) -> bool {
        Self::LIVE.contains(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub currency: String,
    pub activated_at: DateTime<Utc>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub rides_used: i32,
    pub upgrades_used: i32,
    pub cancellations_used: i32,
    pub failed_payments: i32,
    pub total_saved: Money,
    pub payment_method: Option<String>,
    pub auto_renew: bool,
    pub cancel_reason: Option<String>,
    pub is_trial_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Resets the per-period counters and starts a new paid period at `now`.
    pub fn start_paid_period(&mut self, period: BillingPeriod, now: DateTime<Utc>) {
        self.current_period_start = now;
        self.current_period_end = period.advance(now);
        self.rides_used = 0;
        self.upgrades_used = 0;
        self.cancellations_used = 0;
        self.failed_payments = 0;
        self.last_payment_date = Some(now);
        self.next_billing_date = Some(self.current_period_end);
        self.status = SubscriptionStatus::Active;
        self.updated_at = now;
    }

    /// The ride cap in force for the current period, if any.
    pub fn ride_cap(&self, plan: &SubscriptionPlan) -> Option<i32> {
        if self.is_trial_active && plan.trial_rides > 0 {
            return Some(plan.trial_rides);
        }
        plan.benefits.rides_included
    }
}

/// A subscription together with its plan and the figures clients display.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionView {
    pub subscription: Subscription,
    pub plan: SubscriptionPlan,
    pub days_remaining: i64,
    pub rides_remaining: Option<i32>,
}

impl SubscriptionView {
    pub fn new(subscription: Subscription, plan: SubscriptionPlan, now: DateTime<Utc>) -> Self {
        let days_remaining = (subscription.current_period_end - now).num_days().max(0);
        let rides_remaining = subscription
            .ride_cap(&plan)
            .map(|cap| (cap - subscription.rides_used).max(0));
        Self {
            subscription,
            plan,
            days_remaining,
            rides_remaining,
        }
    }
}

//=========================================================================================
// Usage
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageType {
    FreeRide,
    RideDiscount,
}

string_enum!(UsageType, "usage type", {
    FreeRide => "free_ride",
    RideDiscount => "ride_discount",
});

#[derive(Debug, Clone, PartialEq)]
pub struct UsageLog {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub ride_id: Uuid,
    pub usage_type: UsageType,
    pub original_fare: Money,
    pub discounted_fare: Money,
    pub savings_amount: Money,
    pub created_at: DateTime<Utc>,
}

/// The ride being priced.
#[derive(Debug, Clone, PartialEq)]
pub struct RideCharge {
    pub ride_id: Uuid,
    pub original_fare: Money,
    pub ride_type: String,
    pub city: Option<String>,
}

/// Why a ride was charged in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoDiscountReason {
    NoSubscription,
    NotActive,
    RideTypeNotCovered,
    CityNotCovered,
    RideCapReached,
    NothingToDiscount,
}

string_enum!(NoDiscountReason, "no-discount reason", {
    NoSubscription => "no_subscription",
    NotActive => "not_active",
    RideTypeNotCovered => "ride_type_not_covered",
    CityNotCovered => "city_not_covered",
    RideCapReached => "ride_cap_reached",
    NothingToDiscount => "nothing_to_discount",
});

#[derive(Debug, Clone, PartialEq)]
pub struct DiscountOutcome {
    pub original_fare: Money,
    pub final_fare: Money,
    pub savings: Money,
    pub no_discount_reason: Option<NoDiscountReason>,
}

impl DiscountOutcome {
    pub fn full_fare(original_fare: Money, reason: NoDiscountReason) -> Self {
        Self {
            original_fare,
            final_fare: original_fare,
            savings: Money::ZERO,
            no_discount_reason: Some(reason),
        }
    }

    pub fn is_discounted(&self) -> bool {
        self.no_discount_reason.is_none()
    }
}

/// Personalised savings estimate over the active catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanComparison {
    pub plans: Vec<SubscriptionPlan>,
    pub avg_monthly_spend: Money,
    pub best_plan_id: Option<Uuid>,
    pub estimated_savings: HashMap<Uuid, Money>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn monthly_advance_clamps_to_month_end() {
        let jan31 = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        let end = BillingPeriod::Monthly.advance(jan31);
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap());
    }

    #[test]
    fn weekly_and_yearly_advance() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(BillingPeriod::Weekly.advance(start), start + Duration::days(7));
        assert_eq!(
            BillingPeriod::Yearly.advance(start),
            Utc.with_ymd_and_hms(2027, 3, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn live_statuses() {
        assert!(SubscriptionStatus::PastDue.is_live());
        assert!(!SubscriptionStatus::Cancelled.is_live());
        assert!(!SubscriptionStatus::Expired.is_live());
    }
}
