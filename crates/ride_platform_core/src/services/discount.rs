//! crates/ride_platform_core/src/services/discount.rs
//!
//! Per-ride pricing against a subscription. `evaluate` only decides; the
//! capped usage increment happens in the repository under the row lock.

use crate::domain::subscriptions::{
    DiscountOutcome, NoDiscountReason, PlanType, RideCharge, Subscription, SubscriptionPlan,
    SubscriptionStatus, UsageType,
};
use crate::domain::Money;

/// A ride the plan would discount, pending the atomic cap check.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscountGrant {
    pub outcome: DiscountOutcome,
    pub cap: Option<i32>,
    pub usage_type: UsageType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    FullFare(DiscountOutcome),
    Grant(DiscountGrant),
}

fn covers(list: &[String], value: &str) -> bool {
    list.is_empty() || list.iter().any(|v| v.eq_ignore_ascii_case(value))
}

pub fn evaluate(sub: &Subscription, plan: &SubscriptionPlan, ride: &RideCharge) -> Evaluation {
    let fare = ride.original_fare;
    let benefits = &plan.benefits;

    if sub.status != SubscriptionStatus::Active {
        return Evaluation::FullFare(DiscountOutcome::full_fare(fare, NoDiscountReason::NotActive));
    }
    if !covers(&benefits.allowed_ride_types, &ride.ride_type) {
        return Evaluation::FullFare(DiscountOutcome::full_fare(
            fare,
            NoDiscountReason::RideTypeNotCovered,
        ));
    }
    if let Some(city) = ride.city.as_deref() {
        if !covers(&benefits.allowed_cities, city) {
            return Evaluation::FullFare(DiscountOutcome::full_fare(
                fare,
                NoDiscountReason::CityNotCovered,
            ));
        }
    }

    let cap = sub.ride_cap(plan);
    if cap.is_some_and(|cap| sub.rides_used >= cap) {
        return Evaluation::FullFare(DiscountOutcome::full_fare(fare, NoDiscountReason::RideCapReached));
    }

    let fare_to_discount = match benefits.max_ride_value {
        Some(max) => fare.min(max),
        None => fare,
    };

    let (final_fare, usage_type) = match plan.plan_type {
        PlanType::Unlimited | PlanType::Package => (fare - fare_to_discount, UsageType::FreeRide),
        PlanType::Discount | PlanType::Priority => (
            fare - fare_to_discount.percent(benefits.discount_pct),
            UsageType::RideDiscount,
        ),
    };
    let final_fare = final_fare.max_zero();
    let savings = fare - final_fare;

    if savings <= Money::ZERO {
        return Evaluation::FullFare(DiscountOutcome::full_fare(
            fare,
            NoDiscountReason::NothingToDiscount,
        ));
    }

    Evaluation::Grant(DiscountGrant {
        outcome: DiscountOutcome {
            original_fare: fare,
            final_fare,
            savings,
            no_discount_reason: None,
        },
        cap,
        usage_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscriptions::{
        BillingPeriod, PlanBenefits, PlanPresentation, PlanStatus,
    };
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn plan(plan_type: PlanType, benefits: PlanBenefits) -> SubscriptionPlan {
        let now = Utc::now();
        SubscriptionPlan {
            id: Uuid::new_v4(),
            slug: "p".into(),
            name: "P".into(),
            description: None,
            plan_type,
            billing_period: BillingPeriod::Monthly,
            price: Money::from_minor(1000),
            currency: "USD".into(),
            status: PlanStatus::Active,
            benefits,
            trial_days: 0,
            trial_rides: 0,
            presentation: PlanPresentation::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn subscription(plan: &SubscriptionPlan) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: plan.id,
            status: SubscriptionStatus::Active,
            currency: "USD".into(),
            activated_at: now,
            current_period_start: now,
            current_period_end: now + Duration::days(30),
            trial_ends_at: None,
            paused_at: None,
            cancelled_at: None,
            last_payment_date: Some(now),
            next_billing_date: Some(now + Duration::days(30)),
            rides_used: 0,
            upgrades_used: 0,
            cancellations_used: 0,
            failed_payments: 0,
            total_saved: Money::ZERO,
            payment_method: None,
            auto_renew: true,
            cancel_reason: None,
            is_trial_active: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn ride(fare: i64, ride_type: &str) -> RideCharge {
        RideCharge {
            ride_id: Uuid::new_v4(),
            original_fare: Money::from_minor(fare),
            ride_type: ride_type.into(),
            city: None,
        }
    }

    fn granted(e: Evaluation) -> DiscountGrant {
        match e {
            Evaluation::Grant(g) => g,
            Evaluation::FullFare(o) => panic!("expected a grant, got {:?}", o.no_discount_reason),
        }
    }

    fn refused(e: Evaluation) -> NoDiscountReason {
        match e {
            Evaluation::FullFare(o) => o.no_discount_reason.unwrap(),
            Evaluation::Grant(_) => panic!("expected full fare"),
        }
    }

    #[test]
    fn package_covers_up_to_max_ride_value() {
        let p = plan(
            PlanType::Package,
            PlanBenefits {
                rides_included: Some(5),
                max_ride_value: Some(Money::from_minor(1500)),
                ..PlanBenefits::default()
            },
        );
        let s = subscription(&p);
        let g = granted(evaluate(&s, &p, &ride(2000, "economy")));
        assert_eq!(g.outcome.final_fare, Money::from_minor(500));
        assert_eq!(g.outcome.savings, Money::from_minor(1500));
        assert_eq!(g.cap, Some(5));
        assert_eq!(g.usage_type, UsageType::FreeRide);
    }

    #[test]
    fn percentage_discount_rounds_half_away_from_zero() {
        let p = plan(
            PlanType::Discount,
            PlanBenefits {
                discount_pct: 15,
                ..PlanBenefits::default()
            },
        );
        let s = subscription(&p);
        // 15% of 1010 = 151.5 -> 152
        let g = granted(evaluate(&s, &p, &ride(1010, "economy")));
        assert_eq!(g.outcome.savings, Money::from_minor(152));
        assert_eq!(g.outcome.final_fare, Money::from_minor(858));
        assert_eq!(g.cap, None);
        assert_eq!(g.usage_type, UsageType::RideDiscount);
    }

    #[test]
    fn gates_refuse_with_reason() {
        let p = plan(
            PlanType::Unlimited,
            PlanBenefits {
                allowed_ride_types: vec!["economy".into()],
                allowed_cities: vec!["Lagos".into()],
                rides_included: Some(2),
                ..PlanBenefits::default()
            },
        );
        let mut s = subscription(&p);
        assert_eq!(
            refused(evaluate(&s, &p, &ride(1000, "premium"))),
            NoDiscountReason::RideTypeNotCovered
        );

        let mut abroad = ride(1000, "economy");
        abroad.city = Some("Accra".into());
        assert_eq!(refused(evaluate(&s, &p, &abroad)), NoDiscountReason::CityNotCovered);

        s.rides_used = 2;
        assert_eq!(
            refused(evaluate(&s, &p, &ride(1000, "economy"))),
            NoDiscountReason::RideCapReached
        );

        s.rides_used = 0;
        s.status = SubscriptionStatus::Paused;
        assert_eq!(
            refused(evaluate(&s, &p, &ride(1000, "economy"))),
            NoDiscountReason::NotActive
        );
    }

    #[test]
    fn trial_rides_cap_applies_during_trial() {
        let mut p = plan(
            PlanType::Package,
            PlanBenefits {
                rides_included: Some(10),
                ..PlanBenefits::default()
            },
        );
        p.trial_rides = 2;
        let mut s = subscription(&p);
        s.is_trial_active = true;
        s.rides_used = 2;
        assert_eq!(
            refused(evaluate(&s, &p, &ride(800, "economy"))),
            NoDiscountReason::RideCapReached
        );
        s.is_trial_active = false;
        assert_eq!(granted(evaluate(&s, &p, &ride(800, "economy"))).cap, Some(10));
    }

    #[test]
    fn zero_fare_is_not_counted() {
        let p = plan(PlanType::Unlimited, PlanBenefits::default());
        let s = subscription(&p);
        assert_eq!(
            refused(evaluate(&s, &p, &ride(0, "economy"))),
            NoDiscountReason::NothingToDiscount
        );
    }
}
