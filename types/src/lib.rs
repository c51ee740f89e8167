//! Fundamental types for the satchel wallet.
//!
//! Amounts and their display units, exact decimals, spending limits,
//! two-factor method identifiers, network ids and the draft error codes
//! shared by every other crate in the workspace.

pub mod amount;
pub mod decimal;
pub mod error;
pub mod limits;
pub mod network;
pub mod twofactor;

pub use amount::{
    convert, AmountFields, AmountInput, ConvertedAmount, Denomination, FiatRate, Satoshi, COIN,
    MAX_MONEY,
};
pub use decimal::Decimal;
pub use error::{AmountError, ErrorCode};
pub use limits::SpendingLimits;
pub use network::NetworkId;
pub use twofactor::TwoFactorMethod;
