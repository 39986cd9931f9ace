mod common;

use chrono::Duration;
use futures::future::join_all;
use ride_platform_core::domain::subscriptions::{
    NoDiscountReason, PlanBenefits, PlanType, PlanUpdate, RideCharge, SubscriptionStatus,
};
use ride_platform_core::domain::Money;
use ride_platform_core::error::ErrorKind;
use ride_platform_core::ports::{PaymentError, SubscriptionRepository};
use uuid::Uuid;

use common::Harness;

fn ride(fare: i64) -> RideCharge {
    RideCharge {
        ride_id: Uuid::new_v4(),
        original_fare: Money::from_minor(fare),
        ride_type: "economy".to_string(),
        city: None,
    }
}

fn package(rides: i32) -> PlanBenefits {
    PlanBenefits {
        rides_included: Some(rides),
        ..PlanBenefits::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_discounts_never_exceed_the_cap() {
    let h = Harness::new();
    let plan = h.plan("five-pack", PlanType::Package, 2_000, package(5)).await;
    let user = Uuid::new_v4();
    let view = h.subscriptions.subscribe(user, plan.id, None, true).await.unwrap();

    let calls = (0..10).map(|_| {
        let service = h.subscriptions.clone();
        tokio::spawn(async move { service.apply_discount(user, ride(1_200)).await })
    });
    let outcomes: Vec<_> = join_all(calls)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let discounted = outcomes.iter().filter(|o| o.is_discounted()).count();
    assert_eq!(discounted, 5);
    for full in outcomes.iter().filter(|o| !o.is_discounted()) {
        assert_eq!(full.final_fare, Money::from_minor(1_200));
        assert_eq!(full.no_discount_reason, Some(NoDiscountReason::RideCapReached));
    }

    let sub = h
        .store
        .find_subscription(view.subscription.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.rides_used, 5);
    assert_eq!(sub.total_saved, Money::from_minor(6_000));
    assert_eq!(h.store.list_usage(sub.id).await.unwrap().len(), 5);
}

#[tokio::test]
async fn double_subscribe_conflicts_without_charging() {
    let h = Harness::new();
    let plan = h.plan("basic", PlanType::Discount, 999, PlanBenefits {
        discount_pct: 10,
        ..PlanBenefits::default()
    })
    .await;
    let user = Uuid::new_v4();

    h.subscriptions.subscribe(user, plan.id, Some("pm_1".into()), true).await.unwrap();
    assert_eq!(h.payments.call_count(), 1);

    let err = h
        .subscriptions
        .subscribe(user, plan.id, Some("pm_1".into()), true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.payments.call_count(), 1);
}

#[tokio::test]
async fn paid_subscribe_charges_and_starts_a_period() {
    let h = Harness::new();
    let plan = h.plan("monthly", PlanType::Unlimited, 4_900, PlanBenefits::default()).await;
    let user = Uuid::new_v4();

    let view = h.subscriptions.subscribe(user, plan.id, None, true).await.unwrap();
    let sub = &view.subscription;
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert!(!sub.is_trial_active);
    assert_eq!(sub.last_payment_date, Some(h.clock_now()));
    assert_eq!(sub.next_billing_date, Some(sub.current_period_end));
    assert_eq!(sub.current_period_end, plan.billing_period.advance(h.clock_now()));
    assert_eq!(view.rides_remaining, None);

    let charge = &h.payments.calls()[0];
    assert_eq!(charge.amount, Money::from_minor(4_900));
    assert_eq!(charge.currency, "USD");
}

#[tokio::test]
async fn declined_payment_persists_nothing() {
    let h = Harness::new();
    let plan = h.plan("monthly", PlanType::Unlimited, 4_900, PlanBenefits::default()).await;
    let user = Uuid::new_v4();
    h.payments
        .push_outcome(Err(PaymentError::Declined("card declined".into())));

    let err = h.subscriptions.subscribe(user, plan.id, None, true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PaymentFailed);
    assert!(h.store.find_live_subscription(user).await.unwrap().is_none());
}

#[tokio::test]
async fn trial_subscribe_skips_the_charge() {
    let h = Harness::new();
    let plan = h
        .plan_with_trial("trial", PlanType::Package, 2_000, package(10), 7)
        .await;
    let user = Uuid::new_v4();

    let view = h.subscriptions.subscribe(user, plan.id, None, true).await.unwrap();
    assert_eq!(h.payments.call_count(), 0);
    assert!(view.subscription.is_trial_active);
    let trial_end = h.clock_now() + Duration::days(7);
    assert_eq!(view.subscription.trial_ends_at, Some(trial_end));
    assert_eq!(view.subscription.current_period_end, trial_end);
    assert_eq!(view.subscription.next_billing_date, Some(trial_end));
    assert_eq!(view.days_remaining, 7);
    assert_eq!(view.rides_remaining, Some(10));
}

#[tokio::test]
async fn pause_resume_cancel() {
    let h = Harness::new();
    let plan = h.plan("p", PlanType::Unlimited, 100, PlanBenefits::default()).await;
    let user = Uuid::new_v4();
    h.subscriptions.subscribe(user, plan.id, None, true).await.unwrap();

    let err = h.subscriptions.resume(user).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let paused = h.subscriptions.pause(user).await.unwrap();
    assert_eq!(paused.subscription.status, SubscriptionStatus::Paused);
    assert!(paused.subscription.paused_at.is_some());

    let outcome = h.subscriptions.apply_discount(user, ride(500)).await.unwrap();
    assert_eq!(outcome.no_discount_reason, Some(NoDiscountReason::NotActive));
    assert_eq!(outcome.final_fare, Money::from_minor(500));

    let err = h.subscriptions.pause(user).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let resumed = h.subscriptions.resume(user).await.unwrap();
    assert_eq!(resumed.subscription.status, SubscriptionStatus::Active);
    assert_eq!(resumed.subscription.paused_at, None);

    h.subscriptions.pause(user).await.unwrap();
    let cancelled = h
        .subscriptions
        .cancel(user, Some("moving away".into()))
        .await
        .unwrap();
    let sub = &cancelled.subscription;
    assert_eq!(sub.status, SubscriptionStatus::Cancelled);
    assert!(!sub.auto_renew);
    assert!(sub.cancelled_at.is_some());
    assert_eq!(sub.cancel_reason.as_deref(), Some("moving away"));

    let err = h.subscriptions.current_subscription(user).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = h.subscriptions.cancel(user, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // The slot is free again.
    h.subscriptions.subscribe(user, plan.id, None, true).await.unwrap();
}

#[tokio::test]
async fn plan_catalog_rules() {
    let h = Harness::new();
    let plan = h.plan("gold", PlanType::Priority, 1_500, PlanBenefits {
        discount_pct: 15,
        priority_matching: true,
        ..PlanBenefits::default()
    })
    .await;

    let err = h
        .subscriptions
        .create_plan(ride_platform_core::domain::subscriptions::NewPlan {
            slug: "gold".into(),
            name: "Gold again".into(),
            description: None,
            plan_type: PlanType::Unlimited,
            billing_period: plan.billing_period,
            price: Money::from_minor(1),
            currency: "USD".into(),
            benefits: PlanBenefits::default(),
            trial_days: 0,
            trial_rides: 0,
            presentation: Default::default(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = h
        .subscriptions
        .update_plan(plan.id, PlanUpdate {
            benefits: Some(PlanBenefits {
                discount_pct: 120,
                ..PlanBenefits::default()
            }),
            ..PlanUpdate::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let updated = h
        .subscriptions
        .update_plan(plan.id, PlanUpdate {
            price: Some(Money::from_minor(1_700)),
            ..PlanUpdate::default()
        })
        .await
        .unwrap();
    assert_eq!(updated.price, Money::from_minor(1_700));

    h.subscriptions.deactivate_plan(plan.id).await.unwrap();
    assert!(h.subscriptions.list_active_plans().await.unwrap().is_empty());
    assert_eq!(h.subscriptions.list_all_plans().await.unwrap().len(), 1);

    let err = h
        .subscriptions
        .subscribe(Uuid::new_v4(), plan.id, None, true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = h
        .subscriptions
        .subscribe(Uuid::new_v4(), Uuid::new_v4(), None, true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn rides_without_subscription_pay_full_fare() {
    let h = Harness::new();
    let outcome = h
        .subscriptions
        .apply_discount(Uuid::new_v4(), ride(1_000))
        .await
        .unwrap();
    assert_eq!(outcome.final_fare, Money::from_minor(1_000));
    assert_eq!(outcome.no_discount_reason, Some(NoDiscountReason::NoSubscription));

    let err = h
        .subscriptions
        .apply_discount(Uuid::new_v4(), ride(-5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn comparison_uses_trailing_spend() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    // 60_000 over the last three months, plus an old ride outside the window.
    for days_ago in [10, 40, 70] {
        h.store
            .record_spend(user, h.clock_now() - Duration::days(days_ago), Money::from_minor(20_000));
    }
    h.store
        .record_spend(user, h.clock_now() - Duration::days(200), Money::from_minor(99_999));

    let discount = h.plan("save-10", PlanType::Discount, 500, PlanBenefits {
        discount_pct: 10,
        ..PlanBenefits::default()
    })
    .await;
    let pack = h.plan("ten-pack", PlanType::Package, 4_000, package(10)).await;
    let unlimited = h.plan("all-you-can-ride", PlanType::Unlimited, 30_000, PlanBenefits::default()).await;

    let comparison = h.subscriptions.compare_plans(user).await.unwrap();
    assert_eq!(comparison.avg_monthly_spend, Money::from_minor(20_000));
    assert_eq!(comparison.plans.len(), 3);
    assert_eq!(comparison.estimated_savings[&discount.id], Money::from_minor(1_500));
    assert_eq!(comparison.estimated_savings[&pack.id], Money::from_minor(6_000));
    assert_eq!(comparison.estimated_savings[&unlimited.id], Money::ZERO);
    assert_eq!(comparison.best_plan_id, Some(pack.id));

    let stranger = h.subscriptions.compare_plans(Uuid::new_v4()).await.unwrap();
    assert_eq!(stranger.avg_monthly_spend, Money::ZERO);
    assert_eq!(stranger.best_plan_id, None);
}
