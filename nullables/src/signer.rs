//! Nullable signer: an in-memory stand-in for a hardware device.

use async_trait::async_trait;
use std::sync::Mutex;

use satchel_types::NetworkId;
use satchel_wallet_core::{HardwareAction, Signer, SignerResponse, SoftwareSigner, WalletError};

/// Answers signer requests from a fixed seed and records every request.
///
/// Can be told to refuse, which is what a user pressing "reject" on a
/// device looks like to the wallet.
pub struct NullSigner {
    inner: SoftwareSigner,
    actions: Mutex<Vec<HardwareAction>>,
    refuse: Mutex<bool>,
}

impl NullSigner {
    pub fn from_seed(seed: &[u8], network: NetworkId) -> Result<Self, WalletError> {
        Ok(Self {
            inner: SoftwareSigner::from_seed(seed, network)?,
            actions: Mutex::new(Vec::new()),
            refuse: Mutex::new(false),
        })
    }

    /// All requests so far (for assertions).
    pub fn actions(&self) -> Vec<HardwareAction> {
        self.actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn refuse(&self, refuse: bool) {
        *self.refuse.lock().unwrap_or_else(|e| e.into_inner()) = refuse;
    }
}

#[async_trait]
impl Signer for NullSigner {
    async fn sign(&self, action: HardwareAction) -> Result<SignerResponse, WalletError> {
        self.actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(action.clone());
        if *self.refuse.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(WalletError::Signer("request refused on device".to_string()));
        }
        self.inner.sign(action).await
    }
}
