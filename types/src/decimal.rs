//! Exact fixed-point decimals.
//!
//! Amounts cross the API as decimal strings ("1.1", "0.00012"). They are held
//! as an integer mantissa plus a power-of-ten scale so that unit conversion
//! never goes through floating point.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::AmountError;

/// Most fraction digits accepted when parsing.
pub const MAX_SCALE: u32 = 18;

/// A non-negative decimal `mantissa * 10^-scale`, always normalized
/// (no trailing zero fraction digits).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Decimal {
    mantissa: u128,
    scale: u32,
}

impl Decimal {
    pub const ZERO: Self = Self {
        mantissa: 0,
        scale: 0,
    };

    pub fn new(mantissa: u128, scale: u32) -> Self {
        Self { mantissa, scale }.normalized()
    }

    pub fn from_integer(value: u64) -> Self {
        Self::new(u128::from(value), 0)
    }

    pub fn mantissa(&self) -> u128 {
        self.mantissa
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    fn normalized(mut self) -> Self {
        while self.scale > 0 && self.mantissa % 10 == 0 {
            self.mantissa /= 10;
            self.scale -= 1;
        }
        self
    }

    /// This value as an integer count of `10^-decimals` units.
    ///
    /// Fails with `TooPrecise` when the value carries more fraction digits
    /// than `decimals`.
    pub fn to_scaled(&self, decimals: u32) -> Result<u128, AmountError> {
        if self.scale > decimals {
            return Err(AmountError::TooPrecise {
                max_decimals: decimals,
            });
        }
        pow10(decimals - self.scale)
            .and_then(|p| self.mantissa.checked_mul(p))
            .ok_or(AmountError::Overflow)
    }

    /// Render `value * 10^-decimals` with exactly `decimals` fraction digits.
    pub fn format_scaled(value: u128, decimals: u32) -> String {
        if decimals == 0 {
            return value.to_string();
        }
        let divisor = 10u128.pow(decimals);
        format!(
            "{}.{:0width$}",
            value / divisor,
            value % divisor,
            width = decimals as usize
        )
    }

    /// Render with exactly `decimals` fraction digits, rounding half-up.
    pub fn to_fixed(&self, decimals: u32) -> String {
        let value = if self.scale <= decimals {
            self.mantissa
                .saturating_mul(pow10(decimals - self.scale).unwrap_or(u128::MAX))
        } else {
            div_round_half_up(self.mantissa, 10u128.pow(self.scale - decimals))
        };
        Self::format_scaled(value, decimals)
    }
}

pub(crate) fn pow10(exp: u32) -> Option<u128> {
    10u128.checked_pow(exp)
}

/// `n / d` rounded half-up. `d` must be non-zero.
pub(crate) fn div_round_half_up(n: u128, d: u128) -> u128 {
    let q = n / d;
    let r = n % d;
    if r >= d - r {
        q + 1
    } else {
        q
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let scale = self.scale.max(other.scale);
        let lhs = pow10(scale - self.scale).and_then(|p| self.mantissa.checked_mul(p));
        let rhs = pow10(scale - other.scale).and_then(|p| other.mantissa.checked_mul(p));
        match (lhs, rhs) {
            (Some(a), Some(b)) => a.cmp(&b),
            // Only the side that overflowed can be larger.
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (None, None) => self.mantissa.cmp(&other.mantissa),
        }
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Decimal {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountError::Empty);
        }
        if s.starts_with('-') {
            return Err(AmountError::Negative);
        }
        let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty())
            || !all_digits(int_part)
            || !all_digits(frac_part)
        {
            return Err(AmountError::Malformed(s.to_string()));
        }

        let frac_part = frac_part.trim_end_matches('0');
        let scale = frac_part.len() as u32;
        if scale > MAX_SCALE {
            return Err(AmountError::TooPrecise {
                max_decimals: MAX_SCALE,
            });
        }

        let mut mantissa: u128 = 0;
        for b in int_part.bytes().chain(frac_part.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(u128::from(b - b'0')))
                .ok_or(AmountError::Overflow)?;
        }
        Ok(Self { mantissa, scale })
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Self::format_scaled(self.mantissa, self.scale))
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct DecimalVisitor;

impl Visitor<'_> for DecimalVisitor {
    type Value = Decimal;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative decimal string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Decimal, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Decimal, E> {
        Ok(Decimal::from_integer(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Decimal, E> {
        u64::try_from(v)
            .map(Decimal::from_integer)
            .map_err(|_| E::custom(AmountError::Negative))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Decimal, E> {
        if !v.is_finite() {
            return Err(E::custom(AmountError::Malformed(v.to_string())));
        }
        v.to_string().parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DecimalVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn parses_integer_and_fraction() {
        assert_eq!(dec("1.1"), Decimal::new(11, 1));
        assert_eq!(dec("0.00012"), Decimal::new(12, 5));
        assert_eq!(dec("42"), Decimal::new(42, 0));
        assert_eq!(dec(".5"), Decimal::new(5, 1));
        assert_eq!(dec("7."), Decimal::new(7, 0));
    }

    #[test]
    fn trailing_zeros_normalize() {
        assert_eq!(dec("1.10000"), dec("1.1"));
        assert_eq!(dec("1.10000").scale(), 1);
        assert_eq!(Decimal::new(1000, 3), Decimal::from_integer(1));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!("".parse::<Decimal>(), Err(AmountError::Empty));
        assert_eq!("-1".parse::<Decimal>(), Err(AmountError::Negative));
        assert!(matches!("1.2.3".parse::<Decimal>(), Err(AmountError::Malformed(_))));
        assert!(matches!("abc".parse::<Decimal>(), Err(AmountError::Malformed(_))));
        assert!(matches!(".".parse::<Decimal>(), Err(AmountError::Malformed(_))));
        assert!(matches!("1e5".parse::<Decimal>(), Err(AmountError::Malformed(_))));
    }

    #[test]
    fn to_scaled_checks_precision() {
        assert_eq!(dec("1.1").to_scaled(8), Ok(110_000_000));
        assert_eq!(
            dec("0.123456789").to_scaled(8),
            Err(AmountError::TooPrecise { max_decimals: 8 })
        );
    }

    #[test]
    fn format_scaled_pads_fraction() {
        assert_eq!(Decimal::format_scaled(110_000_000, 8), "1.10000000");
        assert_eq!(Decimal::format_scaled(5, 2), "0.05");
        assert_eq!(Decimal::format_scaled(5, 0), "5");
    }

    #[test]
    fn to_fixed_rounds_half_up() {
        assert_eq!(dec("1.005").to_fixed(2), "1.01");
        assert_eq!(dec("1.004").to_fixed(2), "1.00");
        assert_eq!(dec("3").to_fixed(2), "3.00");
    }

    #[test]
    fn ordering_compares_values() {
        assert!(dec("1.5") > dec("1.25"));
        assert!(dec("0.1") < dec("1"));
        assert_eq!(dec("2.50").cmp(&dec("2.5")), Ordering::Equal);
    }

    #[test]
    fn serde_accepts_strings_and_numbers() {
        let from_str: Decimal = serde_json::from_str("\"12.5\"").unwrap();
        let from_float: Decimal = serde_json::from_str("12.5").unwrap();
        let from_int: Decimal = serde_json::from_str("12").unwrap();
        assert_eq!(from_str, dec("12.5"));
        assert_eq!(from_float, dec("12.5"));
        assert_eq!(from_int, dec("12"));
        assert_eq!(serde_json::to_string(&from_str).unwrap(), "\"12.5\"");
    }
}
