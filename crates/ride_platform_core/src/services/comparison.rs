//! crates/ride_platform_core/src/services/comparison.rs
//!
//! Personalised savings estimates over the active plan catalog.

use std::collections::HashMap;

use crate::domain::subscriptions::{PlanComparison, PlanType, SubscriptionPlan};
use crate::domain::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComparisonConfig {
    /// Trailing window the average monthly spend is taken over.
    pub window_months: u32,
    /// Assumed rides per month when valuing package plans.
    pub rides_per_month: i64,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            window_months: 3,
            rides_per_month: 20,
        }
    }
}

/// Average monthly spend over the window from the window's total.
pub fn average_monthly_spend(total: Money, config: &ComparisonConfig) -> Money {
    total.div_round(i64::from(config.window_months.max(1)))
}

/// Estimated monthly savings of `plan` for a rider spending `avg_monthly_spend`, clamped at zero.
pub fn estimate_savings(plan: &SubscriptionPlan, avg_monthly_spend: Money, config: &ComparisonConfig) -> Money {
    let benefit = match plan.plan_type {
        PlanType::Discount | PlanType::Priority => avg_monthly_spend.percent(plan.benefits.discount_pct),
        PlanType::Package => match plan.benefits.rides_included {
            Some(rides) => avg_monthly_spend
                .times(i64::from(rides))
                .div_round(config.rides_per_month),
            None => avg_monthly_spend,
        },
        PlanType::Unlimited => avg_monthly_spend,
    };
    (benefit - plan.price).max_zero()
}

/// Ranks `plans` for the rider. The best plan is the largest positive
/// estimate; ties go to the cheaper plan, then the lower display order.
pub fn compare(plans: Vec<SubscriptionPlan>, avg_monthly_spend: Money, config: &ComparisonConfig) -> PlanComparison {
    let estimated_savings: HashMap<_, _> = plans
        .iter()
        .map(|p| (p.id, estimate_savings(p, avg_monthly_spend, config)))
        .collect();

    let best_plan_id = plans
        .iter()
        .filter(|p| estimated_savings[&p.id] > Money::ZERO)
        .min_by(|a, b| {
            estimated_savings[&b.id]
                .cmp(&estimated_savings[&a.id])
                .then(a.price.cmp(&b.price))
                .then(a.presentation.display_order.cmp(&b.presentation.display_order))
        })
        .map(|p| p.id);

    PlanComparison {
        plans,
        avg_monthly_spend,
        best_plan_id,
        estimated_savings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscriptions::{BillingPeriod, PlanBenefits, PlanPresentation, PlanStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn plan(plan_type: PlanType, price: i64, benefits: PlanBenefits, order: i32) -> SubscriptionPlan {
        let now = Utc::now();
        SubscriptionPlan {
            id: Uuid::new_v4(),
            slug: format!("plan-{}", order),
            name: "Plan".into(),
            description: None,
            plan_type,
            billing_period: BillingPeriod::Monthly,
            price: Money::from_minor(price),
            currency: "USD".into(),
            status: PlanStatus::Active,
            benefits,
            trial_days: 0,
            trial_rides: 0,
            presentation: PlanPresentation {
                display_order: order,
                ..PlanPresentation::default()
            },
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn estimates_follow_plan_type() {
        let cfg = ComparisonConfig::default();
        let avg = Money::from_minor(20_000);

        let discount = plan(
            PlanType::Discount,
            1_000,
            PlanBenefits {
                discount_pct: 20,
                ..PlanBenefits::default()
            },
            1,
        );
        assert_eq!(estimate_savings(&discount, avg, &cfg), Money::from_minor(3_000));

        let package = plan(
            PlanType::Package,
            2_000,
            PlanBenefits {
                rides_included: Some(10),
                ..PlanBenefits::default()
            },
            2,
        );
        // 20000 / 20 * 10 - 2000
        assert_eq!(estimate_savings(&package, avg, &cfg), Money::from_minor(8_000));

        let unlimited = plan(PlanType::Unlimited, 25_000, PlanBenefits::default(), 3);
        assert_eq!(estimate_savings(&unlimited, avg, &cfg), Money::ZERO);
    }

    #[test]
    fn ties_prefer_cheaper_then_display_order() {
        let cfg = ComparisonConfig::default();
        let avg = Money::from_minor(10_000);
        let a = plan(PlanType::Unlimited, 4_000, PlanBenefits::default(), 2);
        let b = plan(
            PlanType::Discount,
            0,
            PlanBenefits {
                discount_pct: 60,
                ..PlanBenefits::default()
            },
            5,
        );
        let c = plan(
            PlanType::Discount,
            0,
            PlanBenefits {
                discount_pct: 60,
                ..PlanBenefits::default()
            },
            1,
        );
        let best = c.id;
        let result = compare(vec![a, b, c], avg, &cfg);
        assert_eq!(result.best_plan_id, Some(best));
    }

    #[test]
    fn no_positive_estimate_means_no_best_plan() {
        let cfg = ComparisonConfig::default();
        let pricey = plan(PlanType::Unlimited, 50_000, PlanBenefits::default(), 1);
        let result = compare(vec![pricey], Money::from_minor(1_000), &cfg);
        assert_eq!(result.best_plan_id, None);
        assert_eq!(result.estimated_savings.values().next(), Some(&Money::ZERO));
    }

    #[test]
    fn average_uses_window() {
        let cfg = ComparisonConfig::default();
        assert_eq!(
            average_monthly_spend(Money::from_minor(30_001), &cfg),
            Money::from_minor(10_000)
        );
    }
}
