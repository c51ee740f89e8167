//! The wallet service the session talks to.
//!
//! Transport is not part of this crate: anything that can answer these
//! calls (an RPC client, or an in-memory double in tests) plugs in here.

use async_trait::async_trait;
use bitcoin::{Script, Transaction, Txid};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use satchel_types::{FiatRate, TwoFactorMethod};
use satchel_wallet_core::{FeeEstimates, Utxo, WalletTransaction};

use crate::settings::Settings;
use crate::twofactor::TwoFactorConfig;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

/// How the wallet is identified to the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginCredentials {
    /// Derived from the wallet seed.
    WalletId(String),
    WatchOnly { username: String, password: String },
}

/// What the backend knows about a wallet at login.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    #[serde(default)]
    pub subaccounts: Vec<SubaccountInfo>,
    #[serde(default)]
    pub twofactor: TwoFactorConfig,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub block_height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubaccountInfo {
    pub pointer: u32,
    pub name: String,
    /// Next unused external address index.
    #[serde(default)]
    pub receive_pointer: u32,
    /// Next unused change address index.
    #[serde(default)]
    pub change_pointer: u32,
}

/// Pushed by the backend as the chain and wallet move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendEvent {
    Block { height: u32 },
    Fees(FeeEstimates),
    /// A wallet transaction was seen; balances of `subaccounts` are current.
    Transaction { txid: Txid, subaccounts: Vec<u32> },
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn register(&self, credentials: &LoginCredentials) -> Result<(), BackendError>;

    async fn login(&self, credentials: &LoginCredentials) -> Result<LoginData, BackendError>;

    /// Wallet outputs of one subaccount in the order coins should be spent.
    async fn unspent_outputs(&self, subaccount: u32) -> Result<Vec<Utxo>, BackendError>;

    /// Outputs paying `script`, for sweeping keys the wallet does not own.
    async fn unspent_outputs_for_script(&self, script: &Script) -> Result<Vec<Utxo>, BackendError>;

    async fn transactions(&self, subaccount: u32) -> Result<Vec<WalletTransaction>, BackendError>;

    async fn broadcast(&self, transaction: &Transaction) -> Result<Txid, BackendError>;

    async fn block_height(&self) -> Result<u32, BackendError>;

    async fn fee_estimates(&self) -> Result<FeeEstimates, BackendError>;

    /// `None` when no rate is available for `currency`.
    async fn fiat_rate(&self, currency: &str) -> Result<Option<FiatRate>, BackendError>;

    /// Ask for a code to be delivered for `action`.
    async fn request_code(&self, method: TwoFactorMethod, action: &str) -> Result<(), BackendError>;

    async fn verify_code(&self, method: TwoFactorMethod, code: &str) -> Result<bool, BackendError>;

    /// A stream of backend events. Called once per session.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<BackendEvent>;
}

impl From<BackendError> for crate::SessionError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Rejected(reason) => crate::SessionError::BroadcastRejected(reason),
            other => crate::SessionError::Backend(other.to_string()),
        }
    }
}
