use satchel_types::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("transaction is invalid: {0}")]
    Invalid(ErrorCode),

    #[error("key error: {0}")]
    Key(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("invalid derivation path: {0}")]
    Derivation(String),

    #[error("{0}")]
    Other(String),
}

impl From<ErrorCode> for WalletError {
    fn from(code: ErrorCode) -> Self {
        WalletError::Invalid(code)
    }
}

impl From<bitcoin::bip32::Error> for WalletError {
    fn from(e: bitcoin::bip32::Error) -> Self {
        WalletError::Derivation(e.to_string())
    }
}
