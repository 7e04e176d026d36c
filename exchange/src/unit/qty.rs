use super::{UnitParseError, parse_decimal_units};
use serde::{Deserialize, Serialize};

use std::{fmt, str::FromStr};

/// Fixed atomic unit scale: 10^-QTY_SCALE is the smallest stored fraction.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Deserialize, Serialize,
)]
pub struct Qty {
    /// number of atomic units (atomic unit = 10^-QTY_SCALE)
    pub units: i64,
}

impl Qty {
    /// number of decimal places of the atomic unit
    pub const QTY_SCALE: i32 = 8;
    pub const ZERO: Self = Self { units: 0 };

    /// Lossy: convert qty to f32, may lose precision beyond `QTY_SCALE`
    pub fn to_f32_lossy(self) -> f32 {
        self.to_f64() as f32
    }

    pub fn to_f64(self) -> f64 {
        (self.units as f64) / 10f64.powi(Self::QTY_SCALE)
    }

    pub fn from_f64(v: f64) -> Self {
        let scale = 10f64.powi(Self::QTY_SCALE);
        Self {
            units: (v * scale).round() as i64,
        }
    }

    pub const fn from_units(units: i64) -> Self {
        Self { units }
    }

    /// `self >= other * ratio`, evaluated in integer units.
    pub fn dominates(self, other: Self, ratio: u32) -> bool {
        i128::from(self.units) >= i128::from(other.units) * i128::from(ratio)
    }

    pub const fn is_zero(self) -> bool {
        self.units == 0
    }

    pub const fn is_positive(self) -> bool {
        self.units > 0
    }

    pub const fn is_negative(self) -> bool {
        self.units < 0
    }
}

impl FromStr for Qty {
    type Err = UnitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_decimal_units(s, Self::QTY_SCALE as u32).map(Self::from_units)
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Price::from_units(self.units).fmt(f)
    }
}

impl std::ops::Add for Qty {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            units: self
                .units
                .checked_add(rhs.units)
                .expect("Qty add overflowed"),
        }
    }
}

impl std::ops::AddAssign for Qty {
    fn add_assign(&mut self, rhs: Self) {
        self.units = self
            .units
            .checked_add(rhs.units)
            .expect("Qty add_assign overflowed");
    }
}

impl std::ops::Sub for Qty {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            units: self
                .units
                .checked_sub(rhs.units)
                .expect("Qty sub overflowed"),
        }
    }
}

impl std::ops::SubAssign for Qty {
    fn sub_assign(&mut self, rhs: Self) {
        self.units = self
            .units
            .checked_sub(rhs.units)
            .expect("Qty sub_assign overflowed");
    }
}

impl std::iter::Sum for Qty {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Qty::ZERO, |acc, q| acc + q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dominance_is_exact_at_the_boundary() {
        let q = |v: &str| v.parse::<Qty>().unwrap();
        assert!(q("30").dominates(q("10"), 3));
        assert!(!q("29.99999999").dominates(q("10"), 3));
        assert!(q("1").dominates(Qty::ZERO, 3));
        assert!(Qty::ZERO.dominates(Qty::ZERO, 3));
    }

    #[test]
    fn sums_and_differences() {
        let total: Qty = ["1.5", "2.25", "0.25"]
            .iter()
            .map(|s| s.parse::<Qty>().unwrap())
            .sum();
        assert_eq!(total, "4".parse().unwrap());
        assert_eq!(total.to_string(), "4");
        assert_eq!(total - "5".parse().unwrap(), Qty::from_f64(-1.0));
    }
}
