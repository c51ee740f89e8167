//! Wallet session for satchel.
//!
//! The session ties the wallet core to a backend and a user:
//! - Login with a mnemonic, an external signer, or watch-only credentials
//! - Transaction creation, signing and sending, sweeps of imported keys
//! - Two-factor authorization of spends, limit and method changes
//! - Settings with merge-patch updates
//! - Encryption of wallet metadata
//! - Ordered notifications of chain and wallet events

pub mod backend;
pub mod config;
pub mod error;
pub mod notification;
pub mod pending;
pub mod session;
pub mod settings;
pub mod twofactor;

pub use backend::{Backend, BackendError, BackendEvent, LoginCredentials, LoginData, SubaccountInfo};
pub use config::{SessionConfig, VaultConfig};
pub use error::SessionError;
pub use notification::{Notification, Notifications};
pub use pending::{ChallengeStatus, Operation, OperationResult, PendingId, Submitted};
pub use session::{Credentials, DecryptRequest, EncryptRequest, Session, Subaccount, SweepRequest};
pub use settings::{merge_patch, Settings, SettingsStore};
pub use twofactor::{
    AuthorizationPolicy, ChallengeStage, GatedAction, MethodConfig, MethodState, TwoFactorChange,
    TwoFactorConfig,
};
