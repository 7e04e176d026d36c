use super::{MinTicksize, UnitParseError, parse_decimal_units};
use serde::{Deserialize, Serialize};

use std::{fmt, str::FromStr};

/// Fixed atomic unit scale: 10^-PRICE_SCALE is the smallest stored fraction.
/// MinTicksize has range [-8, 2], so PRICE_SCALE = 8 represents every exchange tick exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Deserialize, Serialize)]
pub struct Price {
    /// number of atomic units (atomic unit = 10^-PRICE_SCALE)
    pub units: i64,
}

impl Price {
    /// number of decimal places of the atomic unit (10^-8)
    pub const PRICE_SCALE: i32 = 8;

    /// Lossy: convert price to f32, may lose precision if going beyond `PRICE_SCALE`
    pub fn to_f32_lossy(self) -> f32 {
        (self.to_f64()) as f32
    }

    pub fn to_f64(self) -> f64 {
        (self.units as f64) / 10f64.powi(Self::PRICE_SCALE)
    }

    pub fn from_f64(v: f64) -> Self {
        let scale = 10f64.powi(Self::PRICE_SCALE);
        Self {
            units: (v * scale).round() as i64,
        }
    }

    /// Create Price from raw atomic units (no rounding)
    pub const fn from_units(units: i64) -> Self {
        Self { units }
    }

    pub const fn is_positive(self) -> bool {
        self.units > 0
    }

    /// Nearest multiple of `step`; ties (exactly half a step) round up to the higher multiple.
    pub fn round_to_step(self, step: PriceStep) -> Self {
        let unit = step.units;
        if unit <= 1 {
            return self;
        }
        let half = unit / 2;
        let rounded = ((self.units + half).div_euclid(unit)) * unit;
        Self { units: rounded }
    }

    /// Floor to multiple of an arbitrary step
    pub fn floor_to_step(self, step: PriceStep) -> Self {
        let unit = step.units;
        if unit <= 1 {
            return self;
        }
        Self {
            units: self.units.div_euclid(unit) * unit,
        }
    }

    /// Ceil to multiple of an arbitrary step
    pub fn ceil_to_step(self, step: PriceStep) -> Self {
        let unit = step.units;
        if unit <= 1 {
            return self;
        }
        let added = self.units.saturating_add(unit - 1);
        Self {
            units: added.div_euclid(unit) * unit,
        }
    }

    /// Returns the atomic-unit count that corresponds to one min tick (min_tick / atomic_unit)
    fn min_tick_units(min_tick: MinTicksize) -> i64 {
        let exp = (Self::PRICE_SCALE + i32::from(min_tick.power)).max(0);
        10i64.pow(exp as u32)
    }

    /// Round this Price to the nearest multiple of the provided min_ticksize
    pub fn round_to_min_tick(self, min_tick: MinTicksize) -> Self {
        self.round_to_step(PriceStep {
            units: Self::min_tick_units(min_tick),
        })
    }

    pub fn add_steps(self, steps: i64, step: PriceStep) -> Self {
        Self::from_units(self.units.saturating_add(steps.saturating_mul(step.units)))
    }

    /// Number of step increments between low..=high (inclusive), or None if invalid.
    pub fn steps_between_inclusive(low: Price, high: Price, step: PriceStep) -> Option<usize> {
        if high.units < low.units || step.units <= 0 {
            return None;
        }
        let span = high.units.checked_sub(low.units)?;
        Some((span / step.units) as usize + 1)
    }

    /// Formats with exactly `decimals` fractional digits, rounding half away from zero.
    pub fn fmt_decimals<W: fmt::Write>(self, decimals: usize, out: &mut W) -> fmt::Result {
        let scale = Self::PRICE_SCALE as u32;
        let decimals = (decimals as u32).min(scale);
        let unit = 10i128.pow(scale - decimals);

        let u = i128::from(self.units);
        let half = unit / 2;
        let rounded = if u >= 0 {
            (u + half) / unit
        } else {
            -((-u + half) / unit)
        };

        if rounded < 0 {
            out.write_char('-')?;
        }
        let abs = rounded.unsigned_abs();
        let frac_pow = 10u128.pow(decimals);

        write!(out, "{}", abs / frac_pow)?;
        if decimals > 0 {
            write!(
                out,
                ".{:0width$}",
                abs % frac_pow,
                width = decimals as usize
            )?;
        }
        Ok(())
    }

    pub fn to_string_with(self, decimals: usize) -> String {
        let mut out = String::with_capacity(24);
        // writing into a String never fails
        let _ = self.fmt_decimals(decimals, &mut out);
        out
    }
}

impl FromStr for Price {
    type Err = UnitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_decimal_units(s, Self::PRICE_SCALE as u32).map(Self::from_units)
    }
}

impl fmt::Display for Price {
    /// Shortest representation without trailing zeros
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale_pow = 10i64.pow(Self::PRICE_SCALE as u32);
        let mut decimals = Self::PRICE_SCALE as usize;
        let mut frac = self.units.rem_euclid(scale_pow);

        if frac == 0 {
            decimals = 0;
        } else {
            while frac % 10 == 0 {
                frac /= 10;
                decimals -= 1;
            }
        }
        self.fmt_decimals(decimals, f)
    }
}

impl std::ops::Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            units: self
                .units
                .checked_add(rhs.units)
                .expect("Price add overflowed"),
        }
    }
}

impl std::ops::Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            units: self
                .units
                .checked_sub(rhs.units)
                .expect("Price sub overflowed"),
        }
    }
}

/// Arbitrary quantization step for footprint levels, e.g. 0.5 or 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceStep {
    /// step size in atomic units (10^-PRICE_SCALE)
    pub units: i64,
}

impl PriceStep {
    /// Lossy: f32 step for UI
    pub fn to_f32_lossy(self) -> f32 {
        Price::from_units(self.units).to_f32_lossy()
    }

    pub const fn from_units(units: i64) -> Self {
        Self { units }
    }

    /// Widens the step by an integer factor (at least 1)
    pub fn scaled(self, factor: i64) -> Self {
        Self {
            units: self.units.saturating_mul(factor.max(1)),
        }
    }

    /// Decimal places required to print multiples of this step without loss
    pub fn decimals(self) -> usize {
        let mut decimals = Price::PRICE_SCALE as usize;
        let mut units = self.units;
        while decimals > 0 && units % 10 == 0 {
            units /= 10;
            decimals -= 1;
        }
        decimals
    }
}

impl From<MinTicksize> for PriceStep {
    fn from(min_tick: MinTicksize) -> Self {
        Self {
            units: Price::min_tick_units(min_tick),
        }
    }
}

impl Default for PriceStep {
    fn default() -> Self {
        // 0.01
        Self { units: 1_000_000 }
    }
}

impl FromStr for PriceStep {
    type Err = UnitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let units = parse_decimal_units(s, Price::PRICE_SCALE as u32)?;
        if units <= 0 {
            return Err(UnitParseError::Invalid(s.to_string()));
        }
        Ok(Self { units })
    }
}

impl fmt::Display for PriceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Price::from_units(self.units).fmt(f)
    }
}

impl Serialize for PriceStep {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PriceStep {
    /// Accepts either a decimal string ("0.5") or a JSON number (0.5)
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let text = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            _ => return Err(serde::de::Error::custom("expected tick size as string or number")),
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}
