//! Wallet core library for satchel.
//!
//! Everything between a caller's payment request and a signed transaction:
//! - Addressee resolution (bare addresses and BIP21 URIs)
//! - Fee-rate tiers and fee computation
//! - Transaction building: coin selection, change, fee bumping, sweeping
//! - Signing through the `Signer` capability

pub mod addressee;
pub mod error;
pub mod fees;
pub mod random;
pub mod signer;
pub mod transaction_builder;
pub mod utxo;

pub use addressee::{
    parse_bip21, resolve_addressee, validate_address, Addressee, Bip21Uri, ResolvedAddressee,
};
pub use error::WalletError;
pub use fees::{tx_fee, FeeEstimates, FeeEstimator, FeeRate, NUM_FEE_ESTIMATES};
pub use random::{OsRandom, RandomSource};
pub use signer::{
    derive_address, public_key, sign_digest, wallet_path, HardwareAction, SighashKind, Signer,
    SignerResponse, SoftwareSigner,
};
pub use transaction_builder::{
    build_transaction, create_transaction, sign_transaction, BuildContext, ResolvedTransaction,
    TransactionDraft,
};
pub use utxo::{ChangeOutput, ScriptKind, Utxo, WalletAddress, WalletTransaction};
