//! Bitcoin amounts and their display units.
//!
//! The canonical amount is an integer count of satoshi. btc, mbtc, ubtc and
//! bits are fixed-ratio views of it, parsed and rendered by
//! [`bitcoin::Amount`]; fiat is a separate decimal that exists only when an
//! exchange rate is known.

use bitcoin::amount::ParseAmountError;
use bitcoin::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

use crate::decimal::{div_round_half_up, pow10, Decimal};
use crate::error::AmountError;

pub const COIN: u64 = 100_000_000;
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// Fraction digits shown for fiat values.
pub const FIAT_DECIMALS: u32 = 2;

/// An amount in satoshi.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Satoshi(u64);

impl Satoshi {
    pub const ZERO: Self = Self(0);

    pub const fn new(sat: u64) -> Self {
        Self(sat)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Render in `unit` with the unit's full number of fraction digits.
    pub fn to_unit_string(&self, unit: Denomination) -> String {
        let amount = Amount::from_sat(self.0);
        format!("{:.*}", unit.decimals() as usize, amount.display_in(unit.to_bitcoin()))
    }
}

impl Add for Satoshi {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Satoshi {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Display for Satoshi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat", self.0)
    }
}

/// Non-fiat display units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Denomination {
    Btc,
    Mbtc,
    Ubtc,
    Bits,
    Satoshi,
}

impl Denomination {
    pub const ALL: [Denomination; 5] = [
        Self::Btc,
        Self::Mbtc,
        Self::Ubtc,
        Self::Bits,
        Self::Satoshi,
    ];

    /// log10 of the satoshi per unit, which is also the unit's fraction digits.
    pub const fn decimals(&self) -> u32 {
        match self {
            Self::Btc => 8,
            Self::Mbtc => 5,
            Self::Ubtc | Self::Bits => 2,
            Self::Satoshi => 0,
        }
    }

    pub const fn to_bitcoin(self) -> bitcoin::Denomination {
        match self {
            Self::Btc => bitcoin::Denomination::Bitcoin,
            Self::Mbtc => bitcoin::Denomination::MilliBitcoin,
            Self::Ubtc => bitcoin::Denomination::MicroBitcoin,
            Self::Bits => bitcoin::Denomination::Bit,
            Self::Satoshi => bitcoin::Denomination::Satoshi,
        }
    }

    /// Parse a decimal count of this unit, such as "1.1" btc.
    pub fn parse_amount(self, s: &str) -> Result<Amount, AmountError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountError::Empty);
        }
        if s.starts_with('-') {
            return Err(AmountError::Negative);
        }
        Amount::from_str_in(s, self.to_bitcoin()).map_err(|e| match e {
            ParseAmountError::TooPrecise(_) => AmountError::TooPrecise {
                max_decimals: self.decimals(),
            },
            ParseAmountError::OutOfRange(_) | ParseAmountError::InputTooLarge(_) => {
                AmountError::Overflow
            }
            _ => AmountError::Malformed(s.to_string()),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Btc => "btc",
            Self::Mbtc => "mbtc",
            Self::Ubtc => "ubtc",
            Self::Bits => "bits",
            Self::Satoshi => "satoshi",
        }
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Denomination {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|unit| unit.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AmountError::Malformed(s.to_string()))
    }
}

/// Units of `currency` per one BTC.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiatRate {
    pub currency: String,
    pub rate: Decimal,
}

impl FiatRate {
    pub fn new(currency: impl Into<String>, rate: Decimal) -> Self {
        Self {
            currency: currency.into(),
            rate,
        }
    }
}

/// A single authoritative amount.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AmountInput {
    Satoshi(u64),
    /// An amount the caller gave in a bitcoin unit.
    Unit(Denomination, Amount),
    Fiat(Decimal),
}

/// Amount fields as a caller supplies them. At most one may be set.
///
/// Decimal fields stay as raw strings here so that a bad value surfaces as an
/// `InvalidAmount` on the draft rather than a deserialization failure.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satoshi: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbtc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ubtc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bits: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiat: Option<String>,
}

impl AmountFields {
    pub fn satoshi(sat: u64) -> Self {
        Self {
            satoshi: Some(sat),
            ..Self::default()
        }
    }

    pub fn unit(unit: Denomination, value: impl Into<String>) -> Self {
        let value = value.into();
        match unit {
            Denomination::Btc => Self {
                btc: Some(value),
                ..Self::default()
            },
            Denomination::Mbtc => Self {
                mbtc: Some(value),
                ..Self::default()
            },
            Denomination::Ubtc => Self {
                ubtc: Some(value),
                ..Self::default()
            },
            Denomination::Bits => Self {
                bits: Some(value),
                ..Self::default()
            },
            Denomination::Satoshi => Self {
                satoshi: value.parse().ok(),
                ..Self::default()
            },
        }
    }

    pub fn fiat(value: impl Into<String>) -> Self {
        Self {
            fiat: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    fn count(&self) -> usize {
        usize::from(self.satoshi.is_some())
            + [&self.btc, &self.mbtc, &self.ubtc, &self.bits, &self.fiat]
                .iter()
                .filter(|f| f.is_some())
                .count()
    }

    /// The populated field, `None` when nothing is set.
    pub fn single(&self) -> Result<Option<AmountInput>, AmountError> {
        if self.count() > 1 {
            return Err(AmountError::MultipleFields);
        }
        if let Some(sat) = self.satoshi {
            return Ok(Some(AmountInput::Satoshi(sat)));
        }
        let units = [
            (Denomination::Btc, &self.btc),
            (Denomination::Mbtc, &self.mbtc),
            (Denomination::Ubtc, &self.ubtc),
            (Denomination::Bits, &self.bits),
        ];
        for (unit, field) in units {
            if let Some(raw) = field {
                return Ok(Some(AmountInput::Unit(unit, unit.parse_amount(raw)?)));
            }
        }
        match &self.fiat {
            Some(raw) => Ok(Some(AmountInput::Fiat(raw.parse()?))),
            None => Ok(None),
        }
    }
}

/// Every view of one amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedAmount {
    pub satoshi: u64,
    pub btc: String,
    pub mbtc: String,
    pub ubtc: String,
    pub bits: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiat_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiat_rate: Option<String>,
}

impl ConvertedAmount {
    pub fn from_satoshi(sat: Satoshi, rate: Option<&FiatRate>) -> Self {
        let fiat = rate.and_then(|r| satoshi_to_fiat(sat, r).ok());
        Self {
            satoshi: sat.value(),
            btc: sat.to_unit_string(Denomination::Btc),
            mbtc: sat.to_unit_string(Denomination::Mbtc),
            ubtc: sat.to_unit_string(Denomination::Ubtc),
            bits: sat.to_unit_string(Denomination::Bits),
            fiat_currency: fiat.as_ref().and(rate).map(|r| r.currency.clone()),
            fiat_rate: fiat.as_ref().and(rate).map(|r| r.rate.to_string()),
            fiat: fiat.map(|f| f.to_fixed(FIAT_DECIMALS)),
        }
    }

    pub fn get(&self, unit: Denomination) -> String {
        match unit {
            Denomination::Btc => self.btc.clone(),
            Denomination::Mbtc => self.mbtc.clone(),
            Denomination::Ubtc => self.ubtc.clone(),
            Denomination::Bits => self.bits.clone(),
            Denomination::Satoshi => self.satoshi.to_string(),
        }
    }
}

/// Resolve an input to satoshi. Fiat input needs a rate.
pub fn to_satoshi(input: &AmountInput, rate: Option<&FiatRate>) -> Result<Satoshi, AmountError> {
    let sat = match input {
        AmountInput::Satoshi(sat) => *sat,
        AmountInput::Unit(_, amount) => amount.to_sat(),
        AmountInput::Fiat(value) => {
            let rate = rate.ok_or(AmountError::NoRate)?;
            fiat_to_satoshi(value, rate)?.value()
        }
    };
    if sat > MAX_MONEY {
        return Err(AmountError::ExceedsMaxMoney);
    }
    Ok(Satoshi::new(sat))
}

/// Convert one amount into every unit. Fiat fields are `None` without a rate.
pub fn convert(input: &AmountInput, rate: Option<&FiatRate>) -> Result<ConvertedAmount, AmountError> {
    let sat = to_satoshi(input, rate)?;
    Ok(ConvertedAmount::from_satoshi(sat, rate))
}

/// `round(fiat / rate * 10^8)`, rounding half-up.
pub fn fiat_to_satoshi(fiat: &Decimal, rate: &FiatRate) -> Result<Satoshi, AmountError> {
    if rate.rate.is_zero() {
        return Err(AmountError::InvalidRate);
    }
    // fiat = fm / 10^fs, rate = rm / 10^rs
    // sat  = fm * 10^rs * 10^8 / (rm * 10^fs)
    let numerator = pow10(rate.rate.scale() + 8)
        .and_then(|p| fiat.mantissa().checked_mul(p))
        .ok_or(AmountError::Overflow)?;
    let denominator = pow10(fiat.scale())
        .and_then(|p| rate.rate.mantissa().checked_mul(p))
        .ok_or(AmountError::Overflow)?;
    let sat = div_round_half_up(numerator, denominator);
    if sat > u128::from(MAX_MONEY) {
        return Err(AmountError::ExceedsMaxMoney);
    }
    Ok(Satoshi::new(sat as u64))
}

/// The fiat value of `sat`, rounded half-up to cents.
pub fn satoshi_to_fiat(sat: Satoshi, rate: &FiatRate) -> Result<Decimal, AmountError> {
    // cents = sat * rm * 10^2 / (10^8 * 10^rs)
    let numerator = u128::from(sat.value())
        .checked_mul(rate.rate.mantissa())
        .and_then(|n| n.checked_mul(10u128.pow(FIAT_DECIMALS)))
        .ok_or(AmountError::Overflow)?;
    let denominator = pow10(rate.rate.scale() + 8).ok_or(AmountError::Overflow)?;
    let cents = div_round_half_up(numerator, denominator);
    Ok(Decimal::new(cents, FIAT_DECIMALS))
}
