mod common;

use chrono::Duration;
use ride_platform_core::domain::subscriptions::{PlanBenefits, PlanType, SubscriptionStatus};
use ride_platform_core::domain::Money;
use ride_platform_core::ports::{PaymentError, SubscriptionRepository};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use common::Harness;

fn package(rides: i32) -> PlanBenefits {
    PlanBenefits {
        rides_included: Some(rides),
        ..PlanBenefits::default()
    }
}

#[tokio::test]
async fn trial_converts_to_paid_on_day_eight() {
    let h = Harness::new();
    let plan = h
        .plan_with_trial("trial-pack", PlanType::Package, 2_500, package(10), 7)
        .await;
    let user = Uuid::new_v4();
    let view = h.subscriptions.subscribe(user, plan.id, None, true).await.unwrap();
    let id = view.subscription.id;
    let worker = h.renewal_worker();
    let token = CancellationToken::new();

    // Nothing is due during the trial.
    h.clock.advance(Duration::days(3));
    assert_eq!(worker.run_once(&token).await.renewed, 0);
    assert_eq!(h.payments.call_count(), 0);

    let mut ride_used = h.store.find_subscription(id).await.unwrap().unwrap();
    ride_used.rides_used = 4;
    h.store.put_subscription(ride_used);

    h.clock.advance(Duration::days(5));
    let summary = worker.run_once(&token).await;
    assert_eq!(summary.renewed, 1);
    assert_eq!(h.payments.call_count(), 1);
    assert_eq!(h.payments.calls()[0].amount, Money::from_minor(2_500));

    let sub = h.store.find_subscription(id).await.unwrap().unwrap();
    let now = h.clock_now();
    assert!(!sub.is_trial_active);
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.last_payment_date, Some(now));
    assert_eq!(sub.rides_used, 0);
    assert_eq!(sub.current_period_start, now);
    assert_eq!(sub.current_period_end, plan.billing_period.advance(now));
    assert_eq!(sub.next_billing_date, Some(sub.current_period_end));
}

#[tokio::test]
async fn three_failed_charges_mark_past_due_and_a_success_recovers() {
    let h = Harness::new();
    let plan = h.plan("monthly", PlanType::Unlimited, 3_000, PlanBenefits::default()).await;
    let user = Uuid::new_v4();
    let id = h
        .subscriptions
        .subscribe(user, plan.id, None, true)
        .await
        .unwrap()
        .subscription
        .id;
    let worker = h.renewal_worker();
    let token = CancellationToken::new();

    for _ in 0..3 {
        h.payments
            .push_outcome(Err(PaymentError::Transient("gateway down".into())));
    }
    h.clock.advance(Duration::days(32));

    for attempt in 1..=3 {
        let summary = worker.run_once(&token).await;
        assert_eq!(summary.payment_failures, 1);
        let sub = h.store.find_subscription(id).await.unwrap().unwrap();
        assert_eq!(sub.failed_payments, attempt);
        let expected = if attempt < 3 {
            SubscriptionStatus::Active
        } else {
            SubscriptionStatus::PastDue
        };
        assert_eq!(sub.status, expected);
        h.clock.advance(Duration::hours(1));
    }

    let summary = worker.run_once(&token).await;
    assert_eq!(summary.renewed, 1);
    let sub = h.store.find_subscription(id).await.unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.failed_payments, 0);
    // One initial charge plus four renewal attempts.
    assert_eq!(h.payments.call_count(), 5);
}

#[tokio::test]
async fn no_auto_renew_expires_without_charge() {
    let h = Harness::new();
    let plan = h.plan("monthly", PlanType::Unlimited, 3_000, PlanBenefits::default()).await;
    let user = Uuid::new_v4();
    let id = h
        .subscriptions
        .subscribe(user, plan.id, None, false)
        .await
        .unwrap()
        .subscription
        .id;

    h.clock.advance(Duration::days(40));
    let summary = h.renewal_worker().run_once(&CancellationToken::new()).await;
    assert_eq!(summary.expired, 1);
    assert_eq!(h.payments.call_count(), 1);

    let sub = h.store.find_subscription(id).await.unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Expired);
    assert!(h.store.find_live_subscription(user).await.unwrap().is_none());
}

#[tokio::test]
async fn inactive_plans_and_paused_subscriptions_are_skipped() {
    let h = Harness::new();
    let retired = h.plan("retired", PlanType::Unlimited, 3_000, PlanBenefits::default()).await;
    let current = h.plan("current", PlanType::Unlimited, 3_000, PlanBenefits::default()).await;

    let on_retired = Uuid::new_v4();
    let paused = Uuid::new_v4();
    h.subscriptions.subscribe(on_retired, retired.id, None, true).await.unwrap();
    h.subscriptions.subscribe(paused, current.id, None, true).await.unwrap();
    h.subscriptions.pause(paused).await.unwrap();
    h.subscriptions.deactivate_plan(retired.id).await.unwrap();

    h.clock.advance(Duration::days(40));
    let summary = h.renewal_worker().run_once(&CancellationToken::new()).await;
    assert_eq!(summary.renewed, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(h.payments.call_count(), 2);

    let sub = h.store.find_live_subscription(paused).await.unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Paused);
}

#[tokio::test]
async fn non_renewing_subscription_on_a_retired_plan_still_expires() {
    let h = Harness::new();
    let plan = h.plan("retired", PlanType::Unlimited, 3_000, PlanBenefits::default()).await;
    let user = Uuid::new_v4();
    let id = h
        .subscriptions
        .subscribe(user, plan.id, None, false)
        .await
        .unwrap()
        .subscription
        .id;
    h.subscriptions.deactivate_plan(plan.id).await.unwrap();

    h.clock.advance(Duration::days(40));
    let summary = h.renewal_worker().run_once(&CancellationToken::new()).await;
    assert_eq!(summary.expired, 1);
    assert_eq!(summary.skipped, 0);

    let sub = h.store.find_subscription(id).await.unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Expired);
}
