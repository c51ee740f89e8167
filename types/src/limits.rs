//! Per-transaction spending limits.

use serde::{Deserialize, Serialize};

use crate::amount::{fiat_to_satoshi, FiatRate, Satoshi};
use crate::decimal::Decimal;

/// Spends up to this limit go through without a two-factor challenge.
///
/// `is_fiat` selects which of the two values is authoritative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingLimits {
    pub is_fiat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satoshi: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiat: Option<Decimal>,
}

impl Default for SpendingLimits {
    fn default() -> Self {
        Self::satoshi(0)
    }
}

impl SpendingLimits {
    pub fn satoshi(limit: u64) -> Self {
        Self {
            is_fiat: false,
            satoshi: Some(limit),
            fiat: None,
        }
    }

    pub fn fiat(limit: Decimal) -> Self {
        Self {
            is_fiat: true,
            satoshi: None,
            fiat: Some(limit),
        }
    }

    /// The limit expressed in satoshi, or `None` when it is a fiat limit and
    /// no usable rate is known.
    pub fn threshold(&self, rate: Option<&FiatRate>) -> Option<Satoshi> {
        if self.is_fiat {
            let fiat = self.fiat.unwrap_or(Decimal::ZERO);
            rate.and_then(|r| fiat_to_satoshi(&fiat, r).ok())
        } else {
            Some(Satoshi::new(self.satoshi.unwrap_or(0)))
        }
    }

    pub fn is_zero(&self) -> bool {
        if self.is_fiat {
            self.fiat.map_or(true, |f| f.is_zero())
        } else {
            self.satoshi.unwrap_or(0) == 0
        }
    }

    /// Whether moving from `self` to `new` raises the limit.
    ///
    /// Same-unit limits compare directly. Across units both sides are
    /// converted through `rate`; without a rate the change counts as an
    /// increase.
    pub fn is_increase(&self, new: &SpendingLimits, rate: Option<&FiatRate>) -> bool {
        match (self.is_fiat, new.is_fiat) {
            (false, false) => new.satoshi.unwrap_or(0) > self.satoshi.unwrap_or(0),
            (true, true) => {
                new.fiat.unwrap_or(Decimal::ZERO) > self.fiat.unwrap_or(Decimal::ZERO)
            }
            _ => match (self.threshold(rate), new.threshold(rate)) {
                (Some(old), Some(new)) => new > old,
                _ => !new.is_zero(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate() -> FiatRate {
        FiatRate::new("EUR", "10000".parse().unwrap())
    }

    #[test]
    fn default_is_zero_satoshi() {
        let limits = SpendingLimits::default();
        assert!(!limits.is_fiat);
        assert_eq!(limits.satoshi, Some(0));
        assert!(limits.is_zero());
    }

    #[test]
    fn satoshi_limits_compare_directly() {
        let low = SpendingLimits::satoshi(1000);
        let high = SpendingLimits::satoshi(5000);
        assert!(low.is_increase(&high, None));
        assert!(!high.is_increase(&low, None));
        assert!(!low.is_increase(&low, None));
    }

    #[test]
    fn fiat_threshold_needs_rate() {
        let limits = SpendingLimits::fiat("1".parse().unwrap());
        assert_eq!(limits.threshold(None), None);
        assert_eq!(limits.threshold(Some(&rate())), Some(Satoshi::new(10_000)));
    }

    #[test]
    fn unit_switch_uses_rate() {
        let sat = SpendingLimits::satoshi(20_000);
        let fiat = SpendingLimits::fiat("1".parse().unwrap());
        assert!(!sat.is_increase(&fiat, Some(&rate())));
        assert!(fiat.is_increase(&sat, Some(&rate())));
        // no rate: any non-zero limit in the other unit is treated as higher
        assert!(sat.is_increase(&fiat, None));
    }

    #[test]
    fn serializes_only_populated_side() {
        let json = serde_json::to_value(SpendingLimits::satoshi(42)).unwrap();
        assert_eq!(json, serde_json::json!({"is_fiat": false, "satoshi": 42}));
    }
}
