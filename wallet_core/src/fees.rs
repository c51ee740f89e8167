//! Fee rates and fee-estimate tiers.
//!
//! Rates are satoshi per 1000 virtual bytes. An estimate table always has
//! [`NUM_FEE_ESTIMATES`] tiers: tier 0 is the minimum relay rate and tier
//! `n` targets confirmation within `n` blocks.

use serde::{Deserialize, Serialize};
use std::fmt;

use satchel_types::{Decimal, Satoshi};

pub const NUM_FEE_ESTIMATES: usize = 25;
pub const DEFAULT_MIN_FEE_RATE: u64 = 1000;

/// Satoshi per 1000 vbytes.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FeeRate(u64);

impl FeeRate {
    pub const fn from_sat_per_kvb(rate: u64) -> Self {
        Self(rate)
    }

    pub const fn as_sat_per_kvb(&self) -> u64 {
        self.0
    }

    /// `ceil(vsize * rate / 1000)`.
    pub fn fee_for_vsize(&self, vsize: u64) -> Satoshi {
        Satoshi::new((vsize.saturating_mul(self.0)).div_ceil(1000))
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat/kvB", self.0)
    }
}

/// The fee for a transaction of `vsize`, never below the minimum rate.
pub fn tx_fee(vsize: u64, rate: FeeRate, min_rate: FeeRate) -> Satoshi {
    rate.max(min_rate).fee_for_vsize(vsize)
}

/// Source of fee estimates.
pub trait FeeEstimator {
    fn estimates(&self) -> FeeEstimates;
}

/// An ordered table of fee-rate tiers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeEstimates(Vec<FeeRate>);

impl FeeEstimates {
    /// Every tier at the minimum rate.
    pub fn flat(min_rate: FeeRate) -> Self {
        Self(vec![min_rate; NUM_FEE_ESTIMATES])
    }

    /// Build tiers from raw `(blocks, btc_per_kb)` estimates.
    ///
    /// Targets outside `1..NUM_FEE_ESTIMATES` and rates below `min_rate` are
    /// ignored. A missing tier takes the rate of the next known higher
    /// target; tiers past the last known target take its rate. With no usable
    /// estimate every tier is the minimum.
    pub fn from_block_targets(min_rate: FeeRate, raw: &[(u32, Decimal)]) -> Self {
        let mut known: Vec<Option<FeeRate>> = vec![None; NUM_FEE_ESTIMATES];
        for (blocks, btc_per_kb) in raw {
            let blocks = *blocks as usize;
            if blocks == 0 || blocks >= NUM_FEE_ESTIMATES {
                continue;
            }
            let Ok(sat_per_kb) = btc_per_kb.to_scaled(8) else {
                continue;
            };
            let Ok(sat_per_kb) = u64::try_from(sat_per_kb) else {
                continue;
            };
            let rate = FeeRate::from_sat_per_kvb(sat_per_kb);
            if rate >= min_rate {
                known[blocks] = Some(rate);
            }
        }

        let mut tiers = vec![min_rate; NUM_FEE_ESTIMATES];
        let mut next_known: Option<FeeRate> = None;
        let last_known = known.iter().rev().find_map(|r| *r);
        for blocks in (1..NUM_FEE_ESTIMATES).rev() {
            if let Some(rate) = known[blocks] {
                next_known = Some(rate);
            }
            tiers[blocks] = next_known.or(last_known).unwrap_or(min_rate);
        }
        Self(tiers)
    }

    pub fn tiers(&self) -> &[FeeRate] {
        &self.0
    }

    pub fn min_rate(&self) -> FeeRate {
        self.0.first().copied().unwrap_or_default()
    }

    /// The rate for confirmation within `blocks`, clamped to the table.
    pub fn for_blocks(&self, blocks: u32) -> FeeRate {
        let index = (blocks as usize).clamp(1, NUM_FEE_ESTIMATES - 1);
        self.0.get(index).copied().unwrap_or_else(|| self.min_rate())
    }
}

impl FeeEstimator for FeeEstimates {
    fn estimates(&self) -> FeeEstimates {
        self.clone()
    }
}
