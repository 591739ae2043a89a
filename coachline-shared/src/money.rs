use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// An amount in minor currency units (e.g. halalas, cents).
///
/// Arithmetic is exact integer arithmetic; nothing in the engine ever goes
/// through floating point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Clamp to zero from below
    pub fn non_negative(self) -> Self {
        Self(self.0.max(0))
    }

    /// `self * numerator / denominator`, rounded toward negative infinity.
    /// Intermediate products are widened so large totals cannot overflow.
    pub fn mul_div_floor(self, numerator: i64, denominator: i64) -> Self {
        if denominator == 0 {
            return Money::ZERO;
        }
        let product = self.0 as i128 * numerator as i128;
        Self(product.div_euclid(denominator as i128) as i64)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + *m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_floor_rounds_down() {
        assert_eq!(Money::from_minor(500).mul_div_floor(50, 100), Money::from_minor(250));
        assert_eq!(Money::from_minor(101).mul_div_floor(1, 2), Money::from_minor(50));
        assert_eq!(Money::from_minor(-101).mul_div_floor(1, 2), Money::from_minor(-51));
        assert_eq!(Money::from_minor(10).mul_div_floor(1, 0), Money::ZERO);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_minor(23000).to_string(), "230.00");
        assert_eq!(Money::from_minor(-5).to_string(), "-0.05");
    }
}
