//! Unspent outputs, wallet addresses and wallet transactions.

use bitcoin::{OutPoint, ScriptBuf, Transaction, Txid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::fees::FeeRate;

/// How an output is spent, which decides input size and sighash algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    /// Wallet outputs: native segwit v0, signed by the wallet signer.
    P2wpkh,
    /// Swept legacy outputs, signed with an imported key.
    P2pkh { compressed: bool },
}

impl ScriptKind {
    /// Witness elements or scriptSig pushes with maximum-size signatures,
    /// used to size a transaction before it is signed.
    pub(crate) fn dummy_pubkey_len(&self) -> usize {
        match self {
            Self::P2wpkh | Self::P2pkh { compressed: true } => 33,
            Self::P2pkh { compressed: false } => 65,
        }
    }
}

/// A spendable output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub satoshi: u64,
    pub script_pubkey: ScriptBuf,
    pub kind: ScriptKind,
    pub subaccount: u32,
    #[serde(default)]
    pub is_internal: bool,
    #[serde(default)]
    pub pointer: u32,
    /// `None` while unconfirmed.
    #[serde(default)]
    pub block_height: Option<u32>,
}

impl Utxo {
    pub fn is_confirmed(&self) -> bool {
        self.block_height.is_some()
    }

    /// Confirmations at `tip`, zero while unconfirmed.
    pub fn confirmations(&self, tip: u32) -> u32 {
        self.block_height
            .map(|h| tip.saturating_sub(h) + 1)
            .unwrap_or(0)
    }
}

/// A derived wallet address and where it sits in the wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAddress {
    pub address: String,
    pub script_pubkey: ScriptBuf,
    pub subaccount: u32,
    pub is_internal: bool,
    pub pointer: u32,
}

/// The change output of a built transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOutput {
    pub index: usize,
    pub satoshi: u64,
    pub address: WalletAddress,
}

/// A transaction as the backend reports it for a subaccount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub txid: Txid,
    pub transaction: Transaction,
    pub subaccount: u32,
    pub fee: u64,
    pub fee_rate: FeeRate,
    /// `None` while unconfirmed.
    pub block_height: Option<u32>,
    /// Unconfirmed, signals replaceability and spends only wallet inputs.
    pub can_rbf: bool,
    /// Wallet outputs this transaction spent.
    pub inputs: Vec<Utxo>,
    /// The wallet change output, if any.
    pub change: Option<ChangeOutput>,
    /// Net effect on each touched subaccount.
    pub balance_deltas: BTreeMap<u32, i64>,
    #[serde(default)]
    pub memo: String,
}

impl WalletTransaction {
    pub fn vsize(&self) -> u64 {
        self.transaction.vsize() as u64
    }
}
