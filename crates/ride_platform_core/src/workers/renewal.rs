//! crates/ride_platform_core/src/workers/renewal.rs
//!
//! Periodic pass over subscriptions whose period has ended: end trials,
//! charge, start the next period or count the failure.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::subscriptions::{Subscription, SubscriptionStatus};
use crate::ports::{
    Clock, PaymentProcessor, PlanRepository, PortError, SubscriptionChange, SubscriptionRepository,
};
use crate::services::subscriptions::charge_with_deadline;

const RENEWABLE: [SubscriptionStatus; 2] = [SubscriptionStatus::Active, SubscriptionStatus::PastDue];

#[derive(Debug, Clone)]
pub struct RenewalConfig {
    pub tick: std::time::Duration,
    pub batch_size: i64,
    pub past_due_threshold: i32,
    pub payment_timeout: std::time::Duration,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            tick: std::time::Duration::from_secs(3600),
            batch_size: 100,
            past_due_threshold: 3,
            payment_timeout: std::time::Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalSummary {
    pub renewed: usize,
    pub payment_failures: usize,
    pub expired: usize,
    pub skipped: usize,
}

enum Renewal {
    Renewed,
    PaymentFailed,
    Expired,
    Skipped,
}

pub struct RenewalWorker {
    plans: Arc<dyn PlanRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    payments: Arc<dyn PaymentProcessor>,
    clock: Arc<dyn Clock>,
    config: RenewalConfig,
}

impl RenewalWorker {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        payments: Arc<dyn PaymentProcessor>,
        clock: Arc<dyn Clock>,
        config: RenewalConfig,
    ) -> Self {
        Self {
            plans,
            subscriptions,
            payments,
            clock,
            config,
        }
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.tick;
        super::run_every("renewal", period, shutdown, move |token| {
            let worker = self.clone();
            async move {
                worker.run_once(&token).await;
            }
        })
        .await;
    }

    pub async fn run_once(&self, shutdown: &CancellationToken) -> RenewalSummary {
        let mut summary = RenewalSummary::default();
        let now = self.clock.now();
        let due = match self
            .subscriptions
            .list_due_for_renewal(now, self.config.batch_size)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to list subscriptions due for renewal");
                return summary;
            }
        };

        for subscription in due {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, stopping renewal pass");
                break;
            }
            match self.renew(&subscription).await {
                Ok(Renewal::Renewed) => summary.renewed += 1,
                Ok(Renewal::PaymentFailed) => summary.payment_failures += 1,
                Ok(Renewal::Expired) => summary.expired += 1,
                Ok(Renewal::Skipped) => summary.skipped += 1,
                Err(PortError::Conflict(_)) => {
                    debug!(subscription_id = %subscription.id, "Subscription changed during renewal, skipping");
                    summary.skipped += 1;
                }
                Err(e) => {
                    error!(subscription_id = %subscription.id, error = %e, "Renewal failed");
                    summary.skipped += 1;
                }
            }
        }

        if summary != RenewalSummary::default() {
            info!(
                renewed = summary.renewed,
                payment_failures = summary.payment_failures,
                expired = summary.expired,
                skipped = summary.skipped,
                "Renewal pass finished"
            );
        }
        summary
    }

    async fn renew(&self, subscription: &Subscription) -> Result<Renewal, PortError> {
        let now = self.clock.now();
        if !subscription.auto_renew {
            self.subscriptions
                .update_subscription(subscription.id, &RENEWABLE, SubscriptionChange::Expire { at: now })
                .await?;
            info!(subscription_id = %subscription.id, "Subscription expired without renewal");
            return Ok(Renewal::Expired);
        }

        let plan = match self.plans.find_plan(subscription.plan_id).await? {
            Some(plan) if plan.is_active() => plan,
            _ => {
                warn!(
                    subscription_id = %subscription.id,
                    plan_id = %subscription.plan_id,
                    "Plan is no longer active, skipping renewal"
                );
                return Ok(Renewal::Skipped);
            }
        };

        if subscription.is_trial_active {
            self.subscriptions
                .update_subscription(subscription.id, &RENEWABLE, SubscriptionChange::EndTrial { at: now })
                .await?;
            info!(subscription_id = %subscription.id, "Trial ended, charging first period");
        }

        let charge = charge_with_deadline(
            self.payments.as_ref(),
            self.config.payment_timeout,
            subscription.user_id,
            plan.price,
            &subscription.currency,
            subscription.payment_method.as_deref(),
        )
        .await;

        match charge {
            Ok(receipt) => {
                let change = SubscriptionChange::Renewed {
                    period_start: now,
                    period_end: plan.billing_period.advance(now),
                };
                let renewed = self
                    .subscriptions
                    .update_subscription(subscription.id, &RENEWABLE, change)
                    .await
                    .inspect_err(|e| {
                        error!(
                            subscription_id = %subscription.id,
                            transaction_id = %receipt.transaction_id,
                            error = %e,
                            "Charged but failed to record renewal"
                        )
                    })?;
                info!(
                    subscription_id = %renewed.id,
                    transaction_id = %receipt.transaction_id,
                    period_end = %renewed.current_period_end,
                    "Subscription renewed"
                );
                Ok(Renewal::Renewed)
            }
            Err(e) => {
                let change = SubscriptionChange::PaymentFailed {
                    at: now,
                    past_due_threshold: self.config.past_due_threshold,
                };
                let updated = self
                    .subscriptions
                    .update_subscription(subscription.id, &RENEWABLE, change)
                    .await?;
                warn!(
                    subscription_id = %updated.id,
                    failed_payments = updated.failed_payments,
                    status = %updated.status,
                    error = %e,
                    "Renewal charge failed"
                );
                Ok(Renewal::PaymentFailed)
            }
        }
    }
}
