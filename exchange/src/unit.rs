pub mod price;
pub mod qty;

pub use price::{Price, PriceStep};
pub use qty::Qty;

pub type MinTicksize = Power10<-8, 2>;

#[derive(Debug, Clone, Copy, PartialEq, Hash, Eq)]
pub struct Power10<const MIN: i8, const MAX: i8> {
    pub power: i8,
}

impl<const MIN: i8, const MAX: i8> Power10<MIN, MAX> {
    #[inline]
    pub fn new(power: i8) -> Self {
        Self {
            power: power.clamp(MIN, MAX),
        }
    }

    #[inline]
    pub fn as_f32(self) -> f32 {
        10f32.powi(self.power as i32)
    }
}

impl<const MIN: i8, const MAX: i8> From<Power10<MIN, MAX>> for f32 {
    fn from(v: Power10<MIN, MAX>) -> Self {
        v.as_f32()
    }
}

impl<const MIN: i8, const MAX: i8> From<f32> for Power10<MIN, MAX> {
    fn from(value: f32) -> Self {
        if value <= 0.0 {
            return Self { power: 0 };
        }
        let rounded = value.abs().log10().round() as i8;
        Self {
            power: rounded.clamp(MIN, MAX),
        }
    }
}

impl<const MIN: i8, const MAX: i8> serde::Serialize for Power10<MIN, MAX> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let v: f32 = (*self).into();
        serializer.serialize_f32(v)
    }
}

impl<'de, const MIN: i8, const MAX: i8> serde::Deserialize<'de> for Power10<MIN, MAX> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = f32::deserialize(deserializer)?;
        Ok(Self::from(v))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitParseError {
    #[error("empty decimal string")]
    Empty,
    #[error("invalid decimal: {0:?}")]
    Invalid(String),
    #[error("decimal out of range: {0:?}")]
    Overflow(String),
}

/// Parses a plain decimal string ("65000.12", "-0.5", "3") into atomic units of `10^-scale`.
///
/// Digits beyond `scale` are rounded half away from zero. Exponent notation is rejected.
pub(crate) fn parse_decimal_units(s: &str, scale: u32) -> Result<i64, UnitParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(UnitParseError::Empty);
    }

    let (negative, digits) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if (int_part.is_empty() && frac_part.is_empty())
        || !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(UnitParseError::Invalid(s.to_string()));
    }

    let overflow = || UnitParseError::Overflow(s.to_string());
    let scale_pow = 10i128.pow(scale);

    let mut units: i128 = 0;
    for b in int_part.bytes() {
        units = units
            .checked_mul(10)
            .and_then(|u| u.checked_add(i128::from(b - b'0')))
            .ok_or_else(overflow)?;
        if units > i128::from(i64::MAX) {
            return Err(overflow());
        }
    }
    units *= scale_pow;

    let mut frac_units: i128 = 0;
    for (i, b) in frac_part.bytes().enumerate() {
        let digit = i128::from(b - b'0');
        if (i as u32) < scale {
            frac_units += digit * 10i128.pow(scale - 1 - i as u32);
        } else {
            if i as u32 == scale && digit >= 5 {
                frac_units += 1;
            }
            break;
        }
    }
    units += frac_units;

    let signed = if negative { -units } else { units };
    i64::try_from(signed).map_err(|_| overflow())
}
