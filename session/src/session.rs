//! The wallet session.
//!
//! One tokio task owns all session state and handles requests one at a
//! time, so no two operations ever see each other half-done. [`Session`] is
//! a cheap, cloneable handle that sends requests to that task. The task
//! stops when every handle is dropped or [`Session::shutdown`] is called.

use bitcoin::secp256k1::Secp256k1;
use bitcoin::{PrivateKey, ScriptBuf, Transaction, Txid};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use satchel_crypto::{
    default_password, import_private_key, parse_password, parse_salt, seed_from_mnemonic,
    CryptoError, EncryptedBlob, Vault,
};
use satchel_types::{
    convert, AmountFields, ConvertedAmount, ErrorCode, FiatRate, SpendingLimits, TwoFactorMethod,
};
use satchel_wallet_core::{
    create_transaction, derive_address, public_key, sign_transaction, wallet_path, Addressee,
    BuildContext, FeeEstimates, FeeRate, OsRandom, RandomSource, ResolvedTransaction, ScriptKind,
    Signer, SoftwareSigner, TransactionDraft, WalletAddress, WalletTransaction,
};

use crate::backend::{Backend, BackendEvent, LoginCredentials};
use crate::config::SessionConfig;
use crate::notification::{Notification, Notifications, Subscribers};
use crate::pending::{
    Advance, ChallengeStatus, Operation, OperationResult, PendingId, PendingOperations, Submitted,
};
use crate::settings::{Settings, SettingsStore};
use crate::twofactor::{AuthorizationPolicy, TwoFactorChange, TwoFactorConfig};
use crate::SessionError;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// How a user opens a wallet.
#[derive(Clone)]
pub enum Credentials {
    Mnemonic {
        mnemonic: Zeroizing<String>,
        passphrase: Zeroizing<String>,
    },
    /// Keys live in an external signer, such as a hardware device.
    Signer(Arc<dyn Signer>),
    WatchOnly {
        username: String,
        password: Zeroizing<String>,
    },
}

impl Credentials {
    pub fn mnemonic(mnemonic: impl Into<String>) -> Self {
        Self::Mnemonic {
            mnemonic: Zeroizing::new(mnemonic.into()),
            passphrase: Zeroizing::new(String::new()),
        }
    }

    pub fn watch_only(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::WatchOnly {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mnemonic { .. } => f.write_str("Credentials::Mnemonic(..)"),
            Self::Signer(_) => f.write_str("Credentials::Signer(..)"),
            Self::WatchOnly { username, .. } => f
                .debug_struct("Credentials::WatchOnly")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// A subaccount as the session reports it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subaccount {
    pub pointer: u32,
    pub name: String,
    pub receive_pointer: u32,
    pub change_pointer: u32,
    /// A sent transaction is not yet reflected by the backend.
    pub is_dirty: bool,
}

/// Import a foreign key and sweep its funds into `subaccount`.
#[derive(Clone, Serialize, Deserialize)]
pub struct SweepRequest {
    /// WIF, or BIP38 together with `passphrase`.
    pub private_key: String,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub subaccount: u32,
    #[serde(default)]
    pub fee_rate: Option<FeeRate>,
}

impl fmt::Debug for SweepRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SweepRequest")
            .field("subaccount", &self.subaccount)
            .field("fee_rate", &self.fee_rate)
            .finish_non_exhaustive()
    }
}

/// Passwords and salts are hex strings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EncryptRequest {
    pub plaintext: Vec<u8>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub salt: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecryptRequest {
    #[serde(flatten)]
    pub blob: EncryptedBlob,
    #[serde(default)]
    pub password: Option<String>,
}

enum Command {
    Register {
        credentials: Credentials,
        reply: Reply<()>,
    },
    Login {
        credentials: Credentials,
        reply: Reply<()>,
    },
    Subscribe {
        reply: oneshot::Sender<Notifications>,
    },
    Subaccounts {
        reply: Reply<Vec<Subaccount>>,
    },
    Balance {
        subaccount: u32,
        reply: Reply<u64>,
    },
    ReceiveAddress {
        subaccount: u32,
        reply: Reply<WalletAddress>,
    },
    FeeEstimates {
        reply: Reply<FeeEstimates>,
    },
    ConvertAmount {
        amount: AmountFields,
        reply: Reply<ConvertedAmount>,
    },
    CreateTransaction {
        draft: Box<TransactionDraft>,
        reply: Reply<TransactionDraft>,
    },
    CreateSweep {
        request: SweepRequest,
        reply: Reply<TransactionDraft>,
    },
    SignTransaction {
        transaction: Box<ResolvedTransaction>,
        reply: Reply<Transaction>,
    },
    Transactions {
        subaccount: u32,
        reply: Reply<Vec<WalletTransaction>>,
    },
    TwoFactorConfig {
        reply: Reply<TwoFactorConfig>,
    },
    Settings {
        reply: Reply<Settings>,
    },
    ChangeSettings {
        patch: Value,
        reply: Reply<Settings>,
    },
    Encrypt {
        request: EncryptRequest,
        reply: Reply<EncryptedBlob>,
    },
    Decrypt {
        request: DecryptRequest,
        reply: Reply<Vec<u8>>,
    },
    Submit {
        operation: Operation,
        reply: Reply<Submitted>,
    },
    RequestCode {
        id: PendingId,
        method: TwoFactorMethod,
        reply: Reply<ChallengeStatus>,
    },
    Resolve {
        id: PendingId,
        code: String,
        reply: Reply<Submitted>,
    },
    Cancel {
        id: PendingId,
        reply: Reply<()>,
    },
}

/// Handle to a running session.
#[derive(Clone)]
pub struct Session {
    tx: mpsc::Sender<Command>,
    shutdown: broadcast::Sender<()>,
}

impl Session {
    /// Start a session task on the current runtime.
    pub fn spawn(config: SessionConfig, backend: Arc<dyn Backend>) -> Self {
        Self::spawn_with(config, backend, Arc::new(OsRandom))
    }

    pub fn spawn_with(
        config: SessionConfig,
        backend: Arc<dyn Backend>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        let (tx, commands) = mpsc::channel(config.request_queue.max(1));
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let events = backend.subscribe();
        let state = SessionState::new(config, backend, random);
        tokio::spawn(state.run(commands, events, shutdown_rx));
        Self { tx, shutdown }
    }

    /// Stop the session task. Later requests fail with `Closed`.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn register(&self, credentials: Credentials) -> Result<(), SessionError> {
        self.call(|reply| Command::Register { credentials, reply }).await
    }

    pub async fn login(&self, credentials: Credentials) -> Result<(), SessionError> {
        self.call(|reply| Command::Login { credentials, reply }).await
    }

    pub async fn subscribe(&self) -> Result<Notifications, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Subscribe { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn subaccounts(&self) -> Result<Vec<Subaccount>, SessionError> {
        self.call(|reply| Command::Subaccounts { reply }).await
    }

    /// Confirmed plus unconfirmed satoshi. Fails with `StaleBalance` while
    /// a sent transaction is not yet reflected.
    pub async fn balance(&self, subaccount: u32) -> Result<u64, SessionError> {
        self.call(|reply| Command::Balance { subaccount, reply }).await
    }

    pub async fn receive_address(&self, subaccount: u32) -> Result<WalletAddress, SessionError> {
        self.call(|reply| Command::ReceiveAddress { subaccount, reply }).await
    }

    pub async fn fee_estimates(&self) -> Result<FeeEstimates, SessionError> {
        self.call(|reply| Command::FeeEstimates { reply }).await
    }

    pub async fn convert_amount(&self, amount: AmountFields) -> Result<ConvertedAmount, SessionError> {
        self.call(|reply| Command::ConvertAmount { amount, reply }).await
    }

    /// Build a draft. Validation failures come back on `draft.error`.
    pub async fn create_transaction(
        &self,
        draft: TransactionDraft,
    ) -> Result<TransactionDraft, SessionError> {
        self.call(|reply| Command::CreateTransaction {
            draft: Box::new(draft),
            reply,
        })
        .await
    }

    pub async fn create_sweep(&self, request: SweepRequest) -> Result<TransactionDraft, SessionError> {
        self.call(|reply| Command::CreateSweep { request, reply }).await
    }

    pub async fn sign_transaction(
        &self,
        transaction: ResolvedTransaction,
    ) -> Result<Transaction, SessionError> {
        self.call(|reply| Command::SignTransaction {
            transaction: Box::new(transaction),
            reply,
        })
        .await
    }

    /// Sign and broadcast, subject to two-factor authorization.
    pub async fn send_transaction(
        &self,
        transaction: ResolvedTransaction,
    ) -> Result<Submitted, SessionError> {
        self.submit(Operation::SendTransaction(Box::new(transaction))).await
    }

    pub async fn transactions(&self, subaccount: u32) -> Result<Vec<WalletTransaction>, SessionError> {
        self.call(|reply| Command::Transactions { subaccount, reply }).await
    }

    pub async fn twofactor_config(&self) -> Result<TwoFactorConfig, SessionError> {
        self.call(|reply| Command::TwoFactorConfig { reply }).await
    }

    pub async fn change_twofactor(
        &self,
        method: TwoFactorMethod,
        change: TwoFactorChange,
    ) -> Result<Submitted, SessionError> {
        self.submit(Operation::ChangeTwoFactor { method, change }).await
    }

    pub async fn spending_limits(&self) -> Result<SpendingLimits, SessionError> {
        Ok(self.twofactor_config().await?.limits)
    }

    pub async fn change_limits(&self, limits: SpendingLimits) -> Result<Submitted, SessionError> {
        self.submit(Operation::ChangeLimits(limits)).await
    }

    pub async fn settings(&self) -> Result<Settings, SessionError> {
        self.call(|reply| Command::Settings { reply }).await
    }

    pub async fn change_settings(&self, patch: Value) -> Result<Settings, SessionError> {
        self.call(|reply| Command::ChangeSettings { patch, reply }).await
    }

    pub async fn encrypt(&self, request: EncryptRequest) -> Result<EncryptedBlob, SessionError> {
        self.call(|reply| Command::Encrypt { request, reply }).await
    }

    pub async fn decrypt(&self, request: DecryptRequest) -> Result<Vec<u8>, SessionError> {
        self.call(|reply| Command::Decrypt { request, reply }).await
    }

    /// Run `operation` now, or park it behind a two-factor challenge.
    pub async fn submit(&self, operation: Operation) -> Result<Submitted, SessionError> {
        self.call(|reply| Command::Submit { operation, reply }).await
    }

    /// Pick the method for the current challenge of a pending operation.
    pub async fn request_code(
        &self,
        id: PendingId,
        method: TwoFactorMethod,
    ) -> Result<ChallengeStatus, SessionError> {
        self.call(|reply| Command::RequestCode { id, method, reply }).await
    }

    pub async fn resolve(&self, id: PendingId, code: impl Into<String>) -> Result<Submitted, SessionError> {
        let code = code.into();
        self.call(|reply| Command::Resolve { id, code, reply }).await
    }

    pub async fn cancel(&self, id: PendingId) -> Result<(), SessionError> {
        self.call(|reply| Command::Cancel { id, reply }).await
    }
}

// ── Actor ──────────────────────────────────────────────────────────────

struct Wallet {
    signer: Option<Arc<dyn Signer>>,
    /// Vault password derived from the seed; absent without a seed.
    default_password: Option<Zeroizing<Vec<u8>>>,
}

/// A transaction as this session built it. Only these are signed or sent.
struct BuiltTransaction {
    transaction: ResolvedTransaction,
    /// The imported key of a sweep.
    sweep_key: Option<PrivateKey>,
    /// Subaccount and receive pointer a sweep pays into, consumed once it
    /// is sent.
    receive_pointer: Option<(u32, u32)>,
}

struct SessionState {
    config: SessionConfig,
    backend: Arc<dyn Backend>,
    random: Arc<dyn RandomSource>,
    vault: Vault,
    wallet: Option<Wallet>,
    policy: AuthorizationPolicy,
    settings: SettingsStore,
    pending: PendingOperations,
    subaccounts: BTreeMap<u32, Subaccount>,
    block_height: u32,
    fees: FeeEstimates,
    subscribers: Subscribers,
    /// Built transactions by unsigned txid.
    built: BTreeMap<Txid, BuiltTransaction>,
}

impl SessionState {
    fn new(config: SessionConfig, backend: Arc<dyn Backend>, random: Arc<dyn RandomSource>) -> Self {
        let pending = PendingOperations::new(
            config.twofactor_attempts,
            Duration::from_secs(config.challenge_timeout_secs),
        );
        Self {
            vault: Vault::new(config.vault_params()),
            fees: FeeEstimates::flat(FeeRate::from_sat_per_kvb(config.min_fee_rate)),
            config,
            backend,
            random,
            wallet: None,
            policy: AuthorizationPolicy::default(),
            settings: SettingsStore::default(),
            pending,
            subaccounts: BTreeMap::new(),
            block_height: 0,
            subscribers: Subscribers::default(),
            built: BTreeMap::new(),
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<BackendEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(network = %self.config.network, "session started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("session shutting down");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!("all session handles dropped");
                        break;
                    }
                },
                Some(event) = events.recv() => self.on_backend_event(event),
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        let expired = self.pending.expire(Instant::now());
        if expired > 0 {
            debug!(expired, "dropped timed-out pending operations");
        }

        // A dropped reply receiver means the caller went away; nothing to do.
        match command {
            Command::Register { credentials, reply } => {
                let _ = reply.send(self.register(credentials).await);
            }
            Command::Login { credentials, reply } => {
                let _ = reply.send(self.login(credentials).await);
            }
            Command::Subscribe { reply } => {
                let _ = reply.send(self.subscribers.subscribe());
            }
            Command::Subaccounts { reply } => {
                let _ = reply.send(self.require_login().map(|_| self.subaccounts.values().cloned().collect()));
            }
            Command::Balance { subaccount, reply } => {
                let _ = reply.send(self.balance(subaccount).await);
            }
            Command::ReceiveAddress { subaccount, reply } => {
                let _ = reply.send(self.receive_address(subaccount).await);
            }
            Command::FeeEstimates { reply } => {
                let _ = reply.send(self.require_login().map(|_| self.fees.clone()));
            }
            Command::ConvertAmount { amount, reply } => {
                let _ = reply.send(self.convert_amount(&amount).await);
            }
            Command::CreateTransaction { draft, reply } => {
                let _ = reply.send(self.create_transaction(*draft).await);
            }
            Command::CreateSweep { request, reply } => {
                let _ = reply.send(self.create_sweep(request).await);
            }
            Command::SignTransaction { transaction, reply } => {
                let _ = reply.send(self.sign(&transaction).await);
            }
            Command::Transactions { subaccount, reply } => {
                let _ = reply.send(self.transactions(subaccount).await);
            }
            Command::TwoFactorConfig { reply } => {
                let _ = reply.send(self.require_login().map(|_| self.policy.config().redacted()));
            }
            Command::Settings { reply } => {
                let _ = reply.send(self.require_login().map(|_| self.settings.get().clone()));
            }
            Command::ChangeSettings { patch, reply } => {
                let _ = reply.send(self.change_settings(&patch));
            }
            Command::Encrypt { request, reply } => {
                let _ = reply.send(self.encrypt(request).await);
            }
            Command::Decrypt { request, reply } => {
                let _ = reply.send(self.decrypt(request).await);
            }
            Command::Submit { operation, reply } => {
                let _ = reply.send(self.submit(operation).await);
            }
            Command::RequestCode { id, method, reply } => {
                let _ = reply.send(self.request_code(id, method).await);
            }
            Command::Resolve { id, code, reply } => {
                let _ = reply.send(self.resolve(id, &code).await);
            }
            Command::Cancel { id, reply } => {
                let result = self.pending.cancel(id);
                if result.is_ok() {
                    info!(id, "pending operation cancelled");
                }
                let _ = reply.send(result);
            }
        }
    }

    fn on_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Block { height } => {
                self.block_height = height;
                self.subscribers.emit(Notification::Block {
                    block_height: height,
                });
            }
            BackendEvent::Fees(fees) => {
                self.fees = fees.clone();
                self.subscribers.emit(Notification::Fees { fees });
            }
            BackendEvent::Transaction { txid, subaccounts } => {
                for pointer in &subaccounts {
                    if let Some(sub) = self.subaccounts.get_mut(pointer) {
                        if sub.is_dirty {
                            sub.is_dirty = false;
                            self.subscribers.emit(Notification::Subaccount {
                                pointer: *pointer,
                                is_dirty: false,
                            });
                        }
                    }
                }
                debug!(%txid, "backend reported transaction");
                self.subscribers.emit(Notification::Transaction {
                    txhash: txid,
                    subaccounts,
                });
            }
        }
    }

    // ── Login ──────────────────────────────────────────────────────────

    async fn open_wallet(
        &self,
        credentials: Credentials,
    ) -> Result<(Wallet, LoginCredentials), SessionError> {
        let network = self.config.network;
        match credentials {
            Credentials::Mnemonic {
                mnemonic,
                passphrase,
            } => {
                let seed = seed_from_mnemonic(&mnemonic, &passphrase)?;
                let signer: Arc<dyn Signer> = Arc::new(SoftwareSigner::from_seed(&seed[..], network)?);
                let id = wallet_id(signer.as_ref(), network).await?;
                let wallet = Wallet {
                    signer: Some(signer),
                    default_password: Some(default_password(&seed[..])?),
                };
                Ok((wallet, LoginCredentials::WalletId(id)))
            }
            Credentials::Signer(signer) => {
                let id = wallet_id(signer.as_ref(), network).await?;
                let wallet = Wallet {
                    signer: Some(signer),
                    default_password: None,
                };
                Ok((wallet, LoginCredentials::WalletId(id)))
            }
            Credentials::WatchOnly { username, password } => {
                let wallet = Wallet {
                    signer: None,
                    default_password: None,
                };
                let credentials = LoginCredentials::WatchOnly {
                    username,
                    password: password.to_string(),
                };
                Ok((wallet, credentials))
            }
        }
    }

    async fn register(&mut self, credentials: Credentials) -> Result<(), SessionError> {
        if matches!(credentials, Credentials::WatchOnly { .. }) {
            return Err(SessionError::WatchOnly);
        }
        let (_, login) = self.open_wallet(credentials).await?;
        self.backend.register(&login).await?;
        info!("wallet registered");
        Ok(())
    }

    async fn login(&mut self, credentials: Credentials) -> Result<(), SessionError> {
        let (wallet, login) = self.open_wallet(credentials).await?;
        let data = self.backend.login(&login).await?;
        let fees = self.backend.fee_estimates().await?;

        self.policy = AuthorizationPolicy::new(data.twofactor);
        self.settings = SettingsStore::new(data.settings);
        self.block_height = data.block_height;
        self.fees = fees;
        self.subaccounts = data
            .subaccounts
            .into_iter()
            .map(|info| {
                let sub = Subaccount {
                    pointer: info.pointer,
                    name: info.name,
                    receive_pointer: info.receive_pointer,
                    change_pointer: info.change_pointer,
                    is_dirty: false,
                };
                (sub.pointer, sub)
            })
            .collect();
        self.subaccounts.entry(0).or_insert_with(|| Subaccount {
            pointer: 0,
            name: String::new(),
            receive_pointer: 0,
            change_pointer: 0,
            is_dirty: false,
        });
        self.pending = PendingOperations::new(
            self.config.twofactor_attempts,
            Duration::from_secs(self.config.challenge_timeout_secs),
        );
        self.built.clear();

        let watch_only = wallet.signer.is_none();
        self.wallet = Some(wallet);
        info!(
            watch_only,
            subaccounts = self.subaccounts.len(),
            block_height = self.block_height,
            "logged in"
        );
        Ok(())
    }

    fn require_login(&self) -> Result<&Wallet, SessionError> {
        self.wallet.as_ref().ok_or(SessionError::NotLoggedIn)
    }

    fn signer(&self) -> Result<Arc<dyn Signer>, SessionError> {
        self.require_login()?
            .signer
            .clone()
            .ok_or(SessionError::WatchOnly)
    }

    fn subaccount(&self, pointer: u32) -> Result<&Subaccount, SessionError> {
        self.subaccounts
            .get(&pointer)
            .ok_or(SessionError::UnknownSubaccount(pointer))
    }

    // ── Reads ──────────────────────────────────────────────────────────

    async fn balance(&self, subaccount: u32) -> Result<u64, SessionError> {
        self.require_login()?;
        if self.subaccount(subaccount)?.is_dirty {
            return Err(SessionError::StaleBalance);
        }
        let utxos = self.backend.unspent_outputs(subaccount).await?;
        Ok(utxos.iter().map(|u| u.satoshi).sum())
    }

    async fn transactions(&self, subaccount: u32) -> Result<Vec<WalletTransaction>, SessionError> {
        self.require_login()?;
        self.subaccount(subaccount)?;
        Ok(self.backend.transactions(subaccount).await?)
    }

    /// The address `receive_address` hands out next, without consuming it.
    async fn next_receive_address(&self, subaccount: u32) -> Result<WalletAddress, SessionError> {
        let signer = self.signer()?;
        let pointer = self.subaccount(subaccount)?.receive_pointer;
        Ok(derive_address(signer.as_ref(), self.config.network, subaccount, false, pointer).await?)
    }

    async fn receive_address(&mut self, subaccount: u32) -> Result<WalletAddress, SessionError> {
        let address = self.next_receive_address(subaccount).await?;
        self.consume_receive_pointer(subaccount, address.pointer);
        debug!(subaccount, pointer = address.pointer, "receive address issued");
        Ok(address)
    }

    fn consume_receive_pointer(&mut self, subaccount: u32, pointer: u32) {
        if let Some(sub) = self.subaccounts.get_mut(&subaccount) {
            sub.receive_pointer = sub.receive_pointer.max(pointer + 1);
        }
    }

    /// `None` when no rate is available; a failing rate source is not an error.
    async fn fiat_rate(&self) -> Option<FiatRate> {
        let currency = &self.settings.get().pricing.currency;
        match self.backend.fiat_rate(currency).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!(error = %e, currency, "fiat rate unavailable");
                None
            }
        }
    }

    async fn convert_amount(&self, amount: &AmountFields) -> Result<ConvertedAmount, SessionError> {
        let input = amount
            .single()
            .map_err(|e| SessionError::Build(ErrorCode::from(e)))?
            .ok_or(SessionError::Build(ErrorCode::NoAmountSpecified))?;
        let rate = self.fiat_rate().await;
        convert(&input, rate.as_ref()).map_err(|e| SessionError::Build(ErrorCode::from(e)))
    }

    fn change_settings(&mut self, patch: &Value) -> Result<Settings, SessionError> {
        self.require_login()?;
        let settings = self.settings.change(patch)?;
        info!("settings changed");
        self.subscribers.emit(Notification::Settings {
            settings: settings.clone(),
        });
        Ok(settings)
    }

    // ── Transactions ───────────────────────────────────────────────────

    async fn build(&self, mut draft: TransactionDraft) -> Result<TransactionDraft, SessionError> {
        let signer = self.signer()?;
        let subaccount = self.subaccount(draft.subaccount)?;
        draft.previous_transaction = match draft.replaces {
            None => None,
            Some(txid) => {
                let previous = self
                    .backend
                    .transactions(draft.subaccount)
                    .await?
                    .into_iter()
                    .find(|tx| tx.txid == txid);
                if previous.is_none() {
                    warn!(%txid, subaccount = draft.subaccount, "replacement names an unknown transaction");
                }
                previous
            }
        };

        let change_address = derive_address(
            signer.as_ref(),
            self.config.network,
            subaccount.pointer,
            true,
            subaccount.change_pointer,
        )
        .await?;

        if draft.utxos.is_empty() && !draft.is_sweep() {
            draft.utxos = self.backend.unspent_outputs(draft.subaccount).await?;
        }
        if draft.fee_rate.is_none() {
            let blocks = self.settings.get().required_num_blocks;
            draft.fee_rate = Some(self.fees.for_blocks(blocks));
        }

        let rate = self.fiat_rate().await;
        let ctx = BuildContext {
            network: self.config.network,
            min_fee_rate: FeeRate::from_sat_per_kvb(self.config.min_fee_rate),
            dust_threshold: self.config.dust_threshold,
            block_height: self.block_height,
            rbf: self.settings.get().rbf,
            fiat_rate: rate.as_ref(),
            change_address: &change_address,
        };
        Ok(create_transaction(draft, &ctx, self.random.as_ref()))
    }

    async fn create_transaction(
        &mut self,
        draft: TransactionDraft,
    ) -> Result<TransactionDraft, SessionError> {
        // Imported keys only come in through `create_sweep`.
        let draft = TransactionDraft {
            private_key: None,
            ..draft
        };
        let built = self.build(draft).await?;
        if let Some(resolved) = &built.resolved {
            debug!(fee = resolved.fee, satoshi = resolved.satoshi, "transaction created");
            self.remember(resolved.clone(), None, None);
        }
        Ok(built)
    }

    fn remember(
        &mut self,
        transaction: ResolvedTransaction,
        sweep_key: Option<PrivateKey>,
        receive_pointer: Option<(u32, u32)>,
    ) {
        self.built.insert(
            transaction.transaction.compute_txid(),
            BuiltTransaction {
                transaction,
                sweep_key,
                receive_pointer,
            },
        );
    }

    /// The session's own copy of `transaction`, matched by unsigned txid.
    fn lookup_built(&self, transaction: &ResolvedTransaction) -> Result<&BuiltTransaction, SessionError> {
        let txid = transaction.transaction.compute_txid();
        self.built
            .get(&txid)
            .ok_or(SessionError::UnknownTransaction(txid))
    }

    async fn create_sweep(&mut self, request: SweepRequest) -> Result<TransactionDraft, SessionError> {
        self.signer()?;
        let network = self.config.network;
        let key = import_private_key(&request.private_key, request.passphrase.as_deref(), network)?;
        let secp = Secp256k1::signing_only();
        let source = ScriptBuf::new_p2pkh(&key.public_key(&secp).pubkey_hash());

        let utxos = self
            .backend
            .unspent_outputs_for_script(&source)
            .await?
            .into_iter()
            .map(|mut utxo| {
                utxo.kind = ScriptKind::P2pkh {
                    compressed: key.compressed,
                };
                utxo.subaccount = request.subaccount;
                utxo
            })
            .collect();
        let destination = self.next_receive_address(request.subaccount).await?;
        let receive_pointer = (request.subaccount, destination.pointer);

        let draft = TransactionDraft {
            subaccount: request.subaccount,
            addressees: vec![Addressee::without_amount(destination.address)],
            fee_rate: request.fee_rate,
            send_all: true,
            utxos,
            private_key: Some(key),
            ..TransactionDraft::default()
        };
        let built = self.build(draft).await?;
        if let Some(resolved) = &built.resolved {
            info!(satoshi = resolved.satoshi, fee = resolved.fee, "sweep created");
            self.remember(resolved.clone(), Some(key), Some(receive_pointer));
        }
        Ok(built)
    }

    async fn sign(&self, transaction: &ResolvedTransaction) -> Result<Transaction, SessionError> {
        let signer = self.signer()?;
        let built = self.lookup_built(transaction)?;
        Ok(sign_transaction(
            &built.transaction,
            built.sweep_key.as_ref(),
            Some(signer.as_ref()),
            self.config.network,
        )
        .await?)
    }

    // ── Gated operations ───────────────────────────────────────────────

    async fn submit(&mut self, operation: Operation) -> Result<Submitted, SessionError> {
        self.require_login()?;
        // Sends are judged and executed on the built copy, never the caller's.
        let operation = match operation {
            Operation::SendTransaction(transaction) => {
                self.signer()?;
                let built = self.lookup_built(&transaction)?;
                Operation::SendTransaction(Box::new(built.transaction.clone()))
            }
            other => other,
        };

        let stages = match operation.gated_action() {
            None => Vec::new(),
            Some(action) => {
                let rate = self.fiat_rate().await;
                self.policy.challenges(&action, rate.as_ref())?
            }
        };
        if stages.is_empty() {
            return Ok(Submitted::Done(self.execute(operation).await?));
        }

        let action = operation.action_name();
        let (id, status) = self.pending.insert(operation, stages, Instant::now());
        info!(id, action, "operation awaiting two-factor authorization");
        Ok(Submitted::Pending { id, status })
    }

    async fn request_code(
        &mut self,
        id: PendingId,
        method: TwoFactorMethod,
    ) -> Result<ChallengeStatus, SessionError> {
        let (operation, status) = self.pending.request_code(id, method, Instant::now())?;
        let action = operation.action_name();
        if method.delivers_code() {
            self.backend.request_code(method, action).await?;
        }
        debug!(id, %method, action, "two-factor code requested");
        Ok(status)
    }

    async fn resolve(&mut self, id: PendingId, code: &str) -> Result<Submitted, SessionError> {
        let method = self.pending.awaiting(id, Instant::now())?;
        if !self.backend.verify_code(method, code).await? {
            return Err(self.pending.fail(id));
        }
        info!(id, %method, "two-factor challenge passed");
        match self.pending.succeed(id)? {
            Advance::Next(status) => Ok(Submitted::Pending { id, status }),
            Advance::Complete(pending) => Ok(Submitted::Done(self.execute(pending.operation).await?)),
        }
    }

    async fn execute(&mut self, operation: Operation) -> Result<OperationResult, SessionError> {
        match operation {
            Operation::SendTransaction(mut transaction) => {
                let signed = self.sign(&transaction).await?;
                let unsigned_txid = transaction.transaction.compute_txid();
                let txid = self.backend.broadcast(&signed).await?;
                if let Some(built) = self.built.remove(&unsigned_txid) {
                    if let Some((subaccount, pointer)) = built.receive_pointer {
                        self.consume_receive_pointer(subaccount, pointer);
                    }
                }
                self.after_send(&transaction);
                transaction.txhash = Some(txid);
                info!(%txid, fee = transaction.fee, satoshi = transaction.satoshi, "transaction sent");
                Ok(OperationResult::Sent(transaction))
            }
            Operation::ChangeLimits(limits) => {
                let action = crate::twofactor::GatedAction::ChangeLimits(limits);
                self.policy.apply(&action)?;
                self.emit_twofactor();
                Ok(OperationResult::LimitsChanged(self.policy.limits().clone()))
            }
            Operation::ChangeTwoFactor { method, change } => {
                let action = crate::twofactor::GatedAction::ChangeMethod { method, change };
                self.policy.apply(&action)?;
                self.emit_twofactor();
                Ok(OperationResult::TwoFactorChanged(self.policy.config().redacted()))
            }
        }
    }

    fn after_send(&mut self, transaction: &ResolvedTransaction) {
        if let Some(change) = &transaction.change {
            if let Some(sub) = self.subaccounts.get_mut(&change.address.subaccount) {
                sub.change_pointer = sub.change_pointer.max(change.address.pointer + 1);
            }
        }
        for pointer in transaction.balance_deltas.keys() {
            if let Some(sub) = self.subaccounts.get_mut(pointer) {
                sub.is_dirty = true;
                self.subscribers.emit(Notification::Subaccount {
                    pointer: *pointer,
                    is_dirty: true,
                });
            }
        }
    }

    fn emit_twofactor(&mut self) {
        self.subscribers.emit(Notification::TwoFactor {
            config: self.policy.config().redacted(),
        });
    }

    // ── Vault ──────────────────────────────────────────────────────────

    fn vault_password(&self, password: Option<&str>) -> Result<Zeroizing<Vec<u8>>, SessionError> {
        match password {
            Some(hex) => Ok(parse_password(hex)?),
            None => self
                .require_login()?
                .default_password
                .clone()
                .ok_or(SessionError::MissingPassword),
        }
    }

    async fn encrypt(&self, request: EncryptRequest) -> Result<EncryptedBlob, SessionError> {
        let password = self.vault_password(request.password.as_deref())?;
        let salt = request.salt.as_deref().map(parse_salt).transpose()?;
        let vault = self.vault.clone();
        let plaintext = Zeroizing::new(request.plaintext);
        run_blocking(move || vault.encrypt(&plaintext, &password, salt.as_ref().map(|s| &s[..]))).await
    }

    async fn decrypt(&self, request: DecryptRequest) -> Result<Vec<u8>, SessionError> {
        let password = self.vault_password(request.password.as_deref())?;
        let vault = self.vault.clone();
        let blob = request.blob;
        run_blocking(move || vault.decrypt(&blob, &password)).await
    }
}

/// Run a key-stretching job off the async workers.
async fn run_blocking<T, F>(job: F) -> Result<T, SessionError>
where
    F: FnOnce() -> Result<T, CryptoError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| SessionError::Crypto(CryptoError::Kdf(e.to_string())))?
        .map_err(SessionError::from)
}

/// Identifies a wallet to the backend without revealing its keys.
async fn wallet_id(signer: &dyn Signer, network: satchel_types::NetworkId) -> Result<String, SessionError> {
    let path = wallet_path(network, 0, false, 0)?;
    let key = public_key(signer, path).await?;
    Ok(key.pubkey_hash().to_string())
}
