//! Nullable backend: an in-memory wallet service.
//!
//! Holds the outputs, transactions and two-factor codes a test sets up,
//! records broadcasts and code requests, and pushes backend events only when
//! the test says so.

use async_trait::async_trait;
use bitcoin::{Script, ScriptBuf, Transaction, Txid};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

use satchel_session::{Backend, BackendError, BackendEvent, LoginCredentials, LoginData};
use satchel_types::{FiatRate, TwoFactorMethod};
use satchel_wallet_core::{FeeEstimates, FeeRate, Utxo, WalletTransaction};

/// The code every method accepts.
pub const VALID_CODE: &str = "555555";

#[derive(Default)]
struct Inner {
    registered: Vec<LoginCredentials>,
    login: LoginData,
    utxos: BTreeMap<u32, Vec<Utxo>>,
    script_utxos: BTreeMap<ScriptBuf, Vec<Utxo>>,
    transactions: BTreeMap<u32, Vec<WalletTransaction>>,
    broadcasts: Vec<Transaction>,
    reject_broadcasts: Option<String>,
    block_height: u32,
    fees: Option<FeeEstimates>,
    fiat_rate: Option<FiatRate>,
    requested_codes: Vec<(TwoFactorMethod, String)>,
    events: Vec<mpsc::UnboundedSender<BackendEvent>>,
}

/// A test backend that keeps everything in memory.
#[derive(Default)]
pub struct NullBackend {
    inner: Mutex<Inner>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// What `login` returns.
    pub fn set_login_data(&self, data: LoginData) {
        self.inner().login = data;
    }

    pub fn add_utxo(&self, utxo: Utxo) {
        self.inner().utxos.entry(utxo.subaccount).or_default().push(utxo);
    }

    /// An output paying a key the wallet does not own.
    pub fn add_script_utxo(&self, utxo: Utxo) {
        self.inner()
            .script_utxos
            .entry(utxo.script_pubkey.clone())
            .or_default()
            .push(utxo);
    }

    pub fn add_transaction(&self, transaction: WalletTransaction) {
        self.inner()
            .transactions
            .entry(transaction.subaccount)
            .or_default()
            .push(transaction);
    }

    pub fn set_fees(&self, fees: FeeEstimates) {
        self.inner().fees = Some(fees);
    }

    pub fn set_fiat_rate(&self, rate: Option<FiatRate>) {
        self.inner().fiat_rate = rate;
    }

    pub fn set_block_height(&self, height: u32) {
        self.inner().block_height = height;
    }

    /// Reject every broadcast with `reason`, or accept again with `None`.
    pub fn reject_broadcasts(&self, reason: Option<&str>) {
        self.inner().reject_broadcasts = reason.map(str::to_string);
    }

    /// All transactions broadcast so far (for assertions).
    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.inner().broadcasts.clone()
    }

    /// All code requests so far as `(method, action)`.
    pub fn requested_codes(&self) -> Vec<(TwoFactorMethod, String)> {
        self.inner().requested_codes.clone()
    }

    pub fn registered(&self) -> Vec<LoginCredentials> {
        self.inner().registered.clone()
    }

    /// Push an event to every subscribed session.
    pub fn emit(&self, event: BackendEvent) {
        self.inner()
            .events
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Report that `txid` is now reflected in `subaccounts`.
    pub fn report_transaction(&self, txid: Txid, subaccounts: Vec<u32>) {
        self.emit(BackendEvent::Transaction { txid, subaccounts });
    }
}

#[async_trait]
impl Backend for NullBackend {
    async fn register(&self, credentials: &LoginCredentials) -> Result<(), BackendError> {
        self.inner().registered.push(credentials.clone());
        Ok(())
    }

    async fn login(&self, credentials: &LoginCredentials) -> Result<LoginData, BackendError> {
        let inner = self.inner();
        if let LoginCredentials::WalletId(_) = credentials {
            if !inner.registered.is_empty() && !inner.registered.contains(credentials) {
                return Err(BackendError::Login("unknown wallet".to_string()));
            }
        }
        Ok(inner.login.clone())
    }

    async fn unspent_outputs(&self, subaccount: u32) -> Result<Vec<Utxo>, BackendError> {
        Ok(self.inner().utxos.get(&subaccount).cloned().unwrap_or_default())
    }

    async fn unspent_outputs_for_script(&self, script: &Script) -> Result<Vec<Utxo>, BackendError> {
        Ok(self
            .inner()
            .script_utxos
            .get(script)
            .cloned()
            .unwrap_or_default())
    }

    async fn transactions(&self, subaccount: u32) -> Result<Vec<WalletTransaction>, BackendError> {
        Ok(self
            .inner()
            .transactions
            .get(&subaccount)
            .cloned()
            .unwrap_or_default())
    }

    async fn broadcast(&self, transaction: &Transaction) -> Result<Txid, BackendError> {
        let mut guard = self.inner();
        let inner = &mut *guard;
        if let Some(reason) = &inner.reject_broadcasts {
            return Err(BackendError::Rejected(reason.clone()));
        }
        let spent: Vec<_> = transaction
            .input
            .iter()
            .map(|input| input.previous_output)
            .collect();
        for utxos in inner.utxos.values_mut().chain(inner.script_utxos.values_mut()) {
            utxos.retain(|u| !spent.contains(&u.outpoint));
        }
        inner.broadcasts.push(transaction.clone());
        Ok(transaction.compute_txid())
    }

    async fn block_height(&self) -> Result<u32, BackendError> {
        Ok(self.inner().block_height)
    }

    async fn fee_estimates(&self) -> Result<FeeEstimates, BackendError> {
        Ok(self
            .inner()
            .fees
            .clone()
            .unwrap_or_else(|| FeeEstimates::flat(FeeRate::from_sat_per_kvb(1000))))
    }

    async fn fiat_rate(&self, currency: &str) -> Result<Option<FiatRate>, BackendError> {
        Ok(self
            .inner()
            .fiat_rate
            .clone()
            .filter(|rate| rate.currency.eq_ignore_ascii_case(currency)))
    }

    async fn request_code(&self, method: TwoFactorMethod, action: &str) -> Result<(), BackendError> {
        self.inner().requested_codes.push((method, action.to_string()));
        Ok(())
    }

    async fn verify_code(&self, _method: TwoFactorMethod, code: &str) -> Result<bool, BackendError> {
        Ok(code == VALID_CODE)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<BackendEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner().events.push(tx);
        rx
    }
}
