//! Error types shared across crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Validation failures attached to a transaction draft.
///
/// A draft carrying one of these must not be sent. The serialized form is the
/// stable string id consumed by front ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "id_invalid_address")]
    InvalidAddress,
    #[serde(rename = "id_no_amount_specified")]
    NoAmountSpecified,
    #[serde(rename = "id_invalid_amount")]
    InvalidAmount,
    #[serde(rename = "id_unknown_bip21_parameter")]
    UnknownRequiredBip21Parameter,
    #[serde(rename = "id_fee_rate_is_below_minimum")]
    FeeRateBelowMinimum,
    #[serde(rename = "id_insufficient_funds")]
    InsufficientFunds,
    #[serde(rename = "id_no_outputs")]
    NoOutputs,
    #[serde(rename = "id_send_all_requires_a_single_output")]
    SendAllRequiresSingleOutput,
    #[serde(rename = "id_transaction_not_replaceable")]
    NotReplaceable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidAddress => "id_invalid_address",
            Self::NoAmountSpecified => "id_no_amount_specified",
            Self::InvalidAmount => "id_invalid_amount",
            Self::UnknownRequiredBip21Parameter => "id_unknown_bip21_parameter",
            Self::FeeRateBelowMinimum => "id_fee_rate_is_below_minimum",
            Self::InsufficientFunds => "id_insufficient_funds",
            Self::NoOutputs => "id_no_outputs",
            Self::SendAllRequiresSingleOutput => "id_send_all_requires_a_single_output",
            Self::NotReplaceable => "id_transaction_not_replaceable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ErrorCode {}

/// Failures while parsing or converting amounts.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("amount is negative")]
    Negative,

    #[error("malformed amount: {0}")]
    Malformed(String),

    #[error("amount has more than {max_decimals} fraction digits")]
    TooPrecise { max_decimals: u32 },

    #[error("amount overflows")]
    Overflow,

    #[error("amount exceeds the 21 million BTC supply")]
    ExceedsMaxMoney,

    #[error("more than one amount field is set")]
    MultipleFields,

    #[error("no fiat exchange rate available")]
    NoRate,

    #[error("fiat exchange rate must be positive")]
    InvalidRate,
}

impl From<AmountError> for ErrorCode {
    fn from(_: AmountError) -> Self {
        ErrorCode::InvalidAmount
    }
}
