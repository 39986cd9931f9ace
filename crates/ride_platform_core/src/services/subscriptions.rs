//! crates/ride_platform_core/src/services/subscriptions.rs
//!
//! Plan catalog management, the subscriber state machine, per-ride discounts
//! and plan comparison.

use chrono::{Duration, Months};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::subscriptions::{
    DiscountOutcome, NewPlan, NoDiscountReason, PlanBenefits, PlanComparison, PlanStatus,
    PlanType, PlanUpdate, RideCharge, Subscription, SubscriptionPlan, SubscriptionStatus,
    SubscriptionView, UsageLog,
};
use crate::domain::Money;
use crate::error::{ServiceError, ServiceResult};
use crate::ports::{
    Clock, IdGenerator, PaymentError, PaymentProcessor, PaymentReceipt, PlanRepository, PortError,
    RideSpendReader, RideUsage, SubscriptionChange, SubscriptionRepository,
};
use crate::services::comparison::{self, ComparisonConfig};
use crate::services::discount::{self, Evaluation};

#[derive(Debug, Clone)]
pub struct SubscriptionPolicy {
    /// Consecutive failed renewal charges before a subscription turns past_due.
    pub past_due_threshold: i32,
    pub payment_timeout: std::time::Duration,
    pub comparison: ComparisonConfig,
}

impl Default for SubscriptionPolicy {
    fn default() -> Self {
        Self {
            past_due_threshold: 3,
            payment_timeout: std::time::Duration::from_secs(30),
            comparison: ComparisonConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionPorts {
    pub plans: Arc<dyn PlanRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub spend: Arc<dyn RideSpendReader>,
    pub payments: Arc<dyn PaymentProcessor>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

/// Charges through the processor, giving up after `timeout`. A timed-out
/// charge counts as a transient failure.
pub async fn charge_with_deadline(
    payments: &dyn PaymentProcessor,
    timeout: std::time::Duration,
    user_id: Uuid,
    amount: Money,
    currency: &str,
    payment_method: Option<&str>,
) -> Result<PaymentReceipt, PaymentError> {
    match tokio::time::timeout(
        timeout,
        payments.charge_subscription(user_id, amount, currency, payment_method),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(PaymentError::Transient(format!(
            "charge timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

pub struct SubscriptionService {
    ports: SubscriptionPorts,
    policy: SubscriptionPolicy,
}

impl SubscriptionService {
    pub fn new(ports: SubscriptionPorts, policy: SubscriptionPolicy) -> Self {
        Self { ports, policy }
    }

    //=====================================================================================
    // Catalog
    //=====================================================================================

    pub async fn create_plan(&self, input: NewPlan) -> ServiceResult<SubscriptionPlan> {
        let slug = input.slug.trim().to_lowercase();
        let valid_slug = !slug.is_empty()
            && slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid_slug {
            return Err(ServiceError::invalid_input(
                "slug must contain only lowercase letters, digits, '-' or '_'",
            ));
        }
        if input.name.trim().is_empty() {
            return Err(ServiceError::invalid_input("plan name is required"));
        }
        let currency = input.currency.trim().to_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ServiceError::invalid_input("currency must be a 3-letter ISO code"));
        }
        validate_terms(input.plan_type, input.price, &input.benefits, input.trial_days, input.trial_rides)?;

        let now = self.ports.clock.now();
        let plan = SubscriptionPlan {
            id: self.ports.ids.new_id(),
            slug,
            name: input.name.trim().to_string(),
            description: input.description,
            plan_type: input.plan_type,
            billing_period: input.billing_period,
            price: input.price,
            currency,
            status: PlanStatus::Active,
            benefits: input.benefits,
            trial_days: input.trial_days,
            trial_rides: input.trial_rides,
            presentation: input.presentation,
            created_at: now,
            updated_at: now,
        };

        match self.ports.plans.create_plan(plan).await {
            Ok(plan) => {
                info!(plan_id = %plan.id, slug = %plan.slug, "Plan created");
                Ok(plan)
            }
            Err(PortError::Conflict(_)) => {
                Err(ServiceError::conflict("a plan with this slug already exists"))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> ServiceResult<SubscriptionPlan> {
        self.ports
            .plans
            .find_plan(plan_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("plan not found"))
    }

    pub async fn list_active_plans(&self) -> ServiceResult<Vec<SubscriptionPlan>> {
        Ok(self.ports.plans.list_plans(true).await?)
    }

    pub async fn list_all_plans(&self) -> ServiceResult<Vec<SubscriptionPlan>> {
        Ok(self.ports.plans.list_plans(false).await?)
    }

    /// Existing subscribers keep their plan id; changed terms apply from their
    /// next period.
    pub async fn update_plan(&self, plan_id: Uuid, update: PlanUpdate) -> ServiceResult<SubscriptionPlan> {
        let mut plan = self.get_plan(plan_id).await?;

        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(ServiceError::invalid_input("plan name is required"));
            }
            plan.name = name.trim().to_string();
        }
        if let Some(description) = update.description {
            plan.description = Some(description);
        }
        if let Some(price) = update.price {
            plan.price = price;
        }
        if let Some(status) = update.status {
            plan.status = status;
        }
        if let Some(benefits) = update.benefits {
            plan.benefits = benefits;
        }
        if let Some(trial_days) = update.trial_days {
            plan.trial_days = trial_days;
        }
        if let Some(trial_rides) = update.trial_rides {
            plan.trial_rides = trial_rides;
        }
        if let Some(presentation) = update.presentation {
            plan.presentation = presentation;
        }
        validate_terms(plan.plan_type, plan.price, &plan.benefits, plan.trial_days, plan.trial_rides)?;

        plan.updated_at = self.ports.clock.now();
        self.ports.plans.save_plan(&plan).await?;
        info!(plan_id = %plan.id, status = %plan.status, "Plan updated");
        Ok(plan)
    }

    pub async fn deactivate_plan(&self, plan_id: Uuid) -> ServiceResult<SubscriptionPlan> {
        self.update_plan(
            plan_id,
            PlanUpdate {
                status: Some(PlanStatus::Inactive),
                ..PlanUpdate::default()
            },
        )
        .await
    }

    //=====================================================================================
    // Lifecycle
    //=====================================================================================

    pub async fn subscribe(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        payment_method: Option<String>,
        auto_renew: bool,
    ) -> ServiceResult<SubscriptionView> {
        if self.ports.subscriptions.find_live_subscription(user_id).await?.is_some() {
            return Err(ServiceError::conflict("you already have an active subscription"));
        }
        let plan = self.get_plan(plan_id).await?;
        if !plan.is_active() {
            return Err(ServiceError::invalid_state("this plan is not available"));
        }

        let now = self.ports.clock.now();
        let trial = plan.trial_days > 0;
        let mut subscription = Subscription {
            id: self.ports.ids.new_id(),
            user_id,
            plan_id: plan.id,
            status: SubscriptionStatus::Active,
            currency: plan.currency.clone(),
            activated_at: now,
            current_period_start: now,
            current_period_end: now,
            trial_ends_at: None,
            paused_at: None,
            cancelled_at: None,
            last_payment_date: None,
            next_billing_date: None,
            rides_used: 0,
            upgrades_used: 0,
            cancellations_used: 0,
            failed_payments: 0,
            total_saved: Money::ZERO,
            payment_method,
            auto_renew,
            cancel_reason: None,
            is_trial_active: trial,
            created_at: now,
            updated_at: now,
        };

        let receipt = if trial {
            let trial_ends_at = now + Duration::days(i64::from(plan.trial_days));
            subscription.trial_ends_at = Some(trial_ends_at);
            subscription.current_period_end = trial_ends_at;
            subscription.next_billing_date = Some(trial_ends_at);
            None
        } else {
            let receipt = charge_with_deadline(
                self.ports.payments.as_ref(),
                self.policy.payment_timeout,
                user_id,
                plan.price,
                &plan.currency,
                subscription.payment_method.as_deref(),
            )
            .await
            .map_err(|e| {
                warn!(user_id = %user_id, plan_id = %plan.id, error = %e, "Initial charge failed");
                ServiceError::from(e)
            })?;
            subscription.start_paid_period(plan.billing_period, now);
            Some(receipt)
        };

        let subscription = match self.ports.subscriptions.create_subscription(subscription).await {
            Ok(s) => s,
            Err(e) => {
                if let Some(receipt) = &receipt {
                    error!(
                        user_id = %user_id,
                        plan_id = %plan.id,
                        transaction_id = %receipt.transaction_id,
                        error = %e,
                        "Charged but failed to persist subscription; needs refund"
                    );
                }
                return Err(match e {
                    PortError::Conflict(_) => {
                        ServiceError::conflict("you already have an active subscription")
                    }
                    other => other.into(),
                });
            }
        };

        info!(
            subscription_id = %subscription.id,
            user_id = %user_id,
            plan = %plan.slug,
            trial,
            "Subscription created"
        );
        Ok(SubscriptionView::new(subscription, plan, now))
    }

    async fn live_subscription(&self, user_id: Uuid) -> ServiceResult<Subscription> {
        self.ports
            .subscriptions
            .find_live_subscription(user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("no active subscription"))
    }

    async fn view(&self, subscription: Subscription) -> ServiceResult<SubscriptionView> {
        let plan = self.get_plan(subscription.plan_id).await?;
        Ok(SubscriptionView::new(subscription, plan, self.ports.clock.now()))
    }

    pub async fn current_subscription(&self, user_id: Uuid) -> ServiceResult<SubscriptionView> {
        let subscription = self.live_subscription(user_id).await?;
        self.view(subscription).await
    }

    /// Applies a lifecycle change guarded by the statuses it is allowed from.
    async fn change(
        &self,
        user_id: Uuid,
        allowed: &[SubscriptionStatus],
        verb: &str,
        make: impl FnOnce(chrono::DateTime<chrono::Utc>) -> SubscriptionChange,
    ) -> ServiceResult<SubscriptionView> {
        let subscription = self.live_subscription(user_id).await?;
        if !allowed.contains(&subscription.status) {
            return Err(ServiceError::invalid_state(format!(
                "a {} subscription cannot be {}",
                subscription.status, verb
            )));
        }
        let change = make(self.ports.clock.now());
        let updated = self
            .ports
            .subscriptions
            .update_subscription(subscription.id, allowed, change)
            .await?;
        info!(subscription_id = %updated.id, user_id = %user_id, status = %updated.status, "Subscription {}", verb);
        self.view(updated).await
    }

    pub async fn pause(&self, user_id: Uuid) -> ServiceResult<SubscriptionView> {
        self.change(user_id, &[SubscriptionStatus::Active], "paused", |at| {
            SubscriptionChange::Pause { at }
        })
        .await
    }

    pub async fn resume(&self, user_id: Uuid) -> ServiceResult<SubscriptionView> {
        self.change(user_id, &[SubscriptionStatus::Paused], "resumed", |at| {
            SubscriptionChange::Resume { at }
        })
        .await
    }

    /// Cancels without refund. Benefits stop immediately.
    pub async fn cancel(&self, user_id: Uuid, reason: Option<String>) -> ServiceResult<SubscriptionView> {
        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        self.change(user_id, &SubscriptionStatus::LIVE, "cancelled", move |at| {
            SubscriptionChange::Cancel { at, reason }
        })
        .await
    }

    //=====================================================================================
    // Rides
    //=====================================================================================

    pub async fn apply_discount(&self, user_id: Uuid, ride: RideCharge) -> ServiceResult<DiscountOutcome> {
        if ride.original_fare.is_negative() {
            return Err(ServiceError::invalid_input("fare cannot be negative"));
        }
        let Some(subscription) = self.ports.subscriptions.find_live_subscription(user_id).await? else {
            return Ok(DiscountOutcome::full_fare(
                ride.original_fare,
                NoDiscountReason::NoSubscription,
            ));
        };
        let plan = self.get_plan(subscription.plan_id).await?;

        let grant = match discount::evaluate(&subscription, &plan, &ride) {
            Evaluation::FullFare(outcome) => return Ok(outcome),
            Evaluation::Grant(grant) => grant,
        };

        let usage = RideUsage {
            subscription_id: subscription.id,
            cap: grant.cap,
            log: UsageLog {
                id: self.ports.ids.new_id(),
                subscription_id: subscription.id,
                ride_id: ride.ride_id,
                usage_type: grant.usage_type,
                original_fare: grant.outcome.original_fare,
                discounted_fare: grant.outcome.final_fare,
                savings_amount: grant.outcome.savings,
                created_at: self.ports.clock.now(),
            },
        };

        if self.ports.subscriptions.record_ride_usage(usage).await? {
            info!(
                subscription_id = %subscription.id,
                ride_id = %ride.ride_id,
                savings = %grant.outcome.savings,
                "Ride discount applied"
            );
            Ok(grant.outcome)
        } else {
            // Another ride took the last slot, or the subscription changed state.
            Ok(DiscountOutcome::full_fare(
                ride.original_fare,
                NoDiscountReason::RideCapReached,
            ))
        }
    }

    pub async fn compare_plans(&self, user_id: Uuid) -> ServiceResult<PlanComparison> {
        let config = self.policy.comparison;
        let now = self.ports.clock.now();
        let since = now
            .checked_sub_months(Months::new(config.window_months.max(1)))
            .unwrap_or(now - Duration::days(30 * i64::from(config.window_months.max(1))));
        let total = self.ports.spend.total_spend_since(user_id, since).await?;
        let avg = comparison::average_monthly_spend(total, &config);
        let plans = self.ports.plans.list_plans(true).await?;
        Ok(comparison::compare(plans, avg, &config))
    }
}

fn validate_terms(
    plan_type: PlanType,
    price: Money,
    benefits: &PlanBenefits,
    trial_days: i32,
    trial_rides: i32,
) -> ServiceResult<()> {
    if price.is_negative() {
        return Err(ServiceError::invalid_input("price cannot be negative"));
    }
    if benefits.discount_pct > 100 {
        return Err(ServiceError::invalid_input("discount must be between 0 and 100 percent"));
    }
    if trial_days < 0 || trial_rides < 0 {
        return Err(ServiceError::invalid_input("trial terms cannot be negative"));
    }
    if benefits.rides_included.is_some_and(|r| r <= 0) {
        return Err(ServiceError::invalid_input("rides included must be positive"));
    }
    if benefits.max_ride_value.is_some_and(|m| m.is_negative()) {
        return Err(ServiceError::invalid_input("max ride value cannot be negative"));
    }
    match plan_type {
        PlanType::Package if benefits.rides_included.is_none() => Err(ServiceError::invalid_input(
            "package plans must include a number of rides",
        )),
        PlanType::Discount | PlanType::Priority if benefits.discount_pct == 0 => Err(
            ServiceError::invalid_input("discount plans need a discount percentage"),
        ),
        _ => Ok(()),
    }
}
