//! crates/ride_platform_core/src/domain/money.rs
//!
//! Fixed-precision money held as integer minor units (cents, paise, ...).
//! Discount and renewal code paths never touch floating point.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `pct` percent of this amount, rounded half away from zero.
    pub fn percent(self, pct: u8) -> Money {
        let scaled = i128::from(self.0) * i128::from(pct);
        let rounded = if scaled >= 0 {
            (scaled + 50) / 100
        } else {
            (scaled - 50) / 100
        };
        Money(rounded as i64)
    }

    /// Integer division rounded half away from zero.
    pub fn div_round(self, divisor: i64) -> Money {
        if divisor == 0 {
            return Money::ZERO;
        }
        let n = i128::from(self.0);
        let d = i128::from(divisor);
        let half = d.abs() / 2;
        let rounded = if (n >= 0) == (d > 0) {
            (n.abs() + half) / d.abs()
        } else {
            -((n.abs() + half) / d.abs())
        };
        Money(rounded as i64)
    }

    pub fn times(self, factor: i64) -> Money {
        Money(self.0.saturating_mul(factor))
    }

    pub fn max_zero(self) -> Money {
        Money(self.0.max(0))
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(Money::from_minor(1000).percent(15), Money::from_minor(150));
        assert_eq!(Money::from_minor(333).percent(50), Money::from_minor(167));
        assert_eq!(Money::from_minor(999).percent(100), Money::from_minor(999));
        assert_eq!(Money::from_minor(999).percent(0), Money::ZERO);
    }

    #[test]
    fn div_round_handles_signs() {
        assert_eq!(Money::from_minor(25).div_round(2), Money::from_minor(13));
        assert_eq!(Money::from_minor(-25).div_round(2), Money::from_minor(-13));
        assert_eq!(Money::from_minor(10).div_round(0), Money::ZERO);
    }

    #[test]
    fn display_uses_two_decimals() {
        assert_eq!(Money::from_minor(1234).to_string(), "12.34");
        assert_eq!(Money::from_minor(-5).to_string(), "-0.05");
    }
}
