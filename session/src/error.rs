use satchel_types::{ErrorCode, TwoFactorMethod};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("two-factor authorization required via one of {methods:?}")]
    AuthorizationRequired { methods: Vec<TwoFactorMethod> },

    #[error("two-factor authorization denied ({attempts_remaining} attempts remaining)")]
    AuthorizationDenied { attempts_remaining: u32 },

    #[error("balance is stale until the backend reports the last sent transaction")]
    StaleBalance,

    #[error("a password is required for this session")]
    MissingPassword,

    #[error("{0} is already enabled")]
    AlreadyEnabled(TwoFactorMethod),

    #[error("{0} is already disabled")]
    AlreadyDisabled(TwoFactorMethod),

    #[error("not logged in")]
    NotLoggedIn,

    #[error("operation is not available in a watch-only session")]
    WatchOnly,

    #[error("unknown pending operation: {0}")]
    UnknownPendingOperation(u64),

    #[error("transaction {0} was not created by this session")]
    UnknownTransaction(bitcoin::Txid),

    #[error("unknown subaccount: {0}")]
    UnknownSubaccount(u32),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("invalid two-factor request: {0}")]
    InvalidTwoFactor(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("broadcast rejected: {0}")]
    BroadcastRejected(String),

    #[error("transaction is invalid: {0}")]
    Build(ErrorCode),

    #[error("crypto error: {0}")]
    Crypto(#[from] satchel_crypto::CryptoError),

    #[error("signer error: {0}")]
    Signer(#[from] satchel_wallet_core::WalletError),

    #[error("config error: {0}")]
    Config(String),

    #[error("session has shut down")]
    Closed,
}

impl From<ErrorCode> for SessionError {
    fn from(code: ErrorCode) -> Self {
        SessionError::Build(code)
    }
}
