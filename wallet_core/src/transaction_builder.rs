//! Transaction building and signing.
//!
//! A [`TransactionDraft`] is the caller's description of a spend. Building it
//! either yields a [`ResolvedTransaction`] or attaches exactly one
//! [`ErrorCode`] to the draft; a draft with an error is never signed.
//!
//! Coin selection takes wallet outputs in the order given until the payout
//! plus fee is covered. Any remainder above the dust threshold goes to a
//! change output at a random position; a smaller remainder is left to the fee.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, PrivateKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use satchel_types::{ErrorCode, FiatRate, NetworkId};

use crate::addressee::{resolve_addressee, Addressee, ResolvedAddressee};
use crate::error::WalletError;
use crate::fees::{tx_fee, FeeRate};
use crate::random::RandomSource;
use crate::signer::{public_key, sign_digest, wallet_path, SighashKind, Signer};
use crate::utxo::{ChangeOutput, ScriptKind, Utxo, WalletAddress, WalletTransaction};

/// DER signature plus sighash byte, at its largest.
const DUMMY_SIGNATURE_LEN: usize = 72;

/// What the caller wants to send.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransactionDraft {
    #[serde(default)]
    pub subaccount: u32,
    #[serde(default)]
    pub addressees: Vec<Addressee>,
    /// Defaults to the minimum relay rate.
    #[serde(default)]
    pub fee_rate: Option<FeeRate>,
    #[serde(default)]
    pub send_all: bool,
    /// Candidate inputs, in selection order.
    #[serde(default)]
    pub utxos: Vec<Utxo>,
    /// Txid of a wallet transaction to replace by fee.
    #[serde(default)]
    pub replaces: Option<Txid>,
    /// The transaction named by `replaces`, as the backend reports it.
    #[serde(skip)]
    pub previous_transaction: Option<WalletTransaction>,
    /// An imported key whose funds are swept into the wallet.
    #[serde(skip)]
    pub private_key: Option<PrivateKey>,
    #[serde(default)]
    pub error: Option<ErrorCode>,
    #[serde(default)]
    pub resolved: Option<ResolvedTransaction>,
}

impl TransactionDraft {
    pub fn new(subaccount: u32, addressees: Vec<Addressee>, fee_rate: FeeRate) -> Self {
        Self {
            subaccount,
            addressees,
            fee_rate: Some(fee_rate),
            ..Self::default()
        }
    }

    pub fn is_sweep(&self) -> bool {
        self.private_key.is_some()
    }

    pub fn is_fee_bump(&self) -> bool {
        self.replaces.is_some() || self.previous_transaction.is_some()
    }
}

/// Session facts the builder needs.
#[derive(Clone, Debug)]
pub struct BuildContext<'a> {
    pub network: NetworkId,
    pub min_fee_rate: FeeRate,
    pub dust_threshold: u64,
    pub block_height: u32,
    /// Signal replaceability on every input.
    pub rbf: bool,
    pub fiat_rate: Option<&'a FiatRate>,
    /// Where change goes unless a replaced transaction already has change.
    pub change_address: &'a WalletAddress,
}

/// A fully built, unsigned transaction and its accounting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTransaction {
    pub addressees: Vec<ResolvedAddressee>,
    pub transaction: Transaction,
    pub fee: u64,
    pub fee_rate: FeeRate,
    /// Estimated with maximum-size signatures.
    pub vsize: u64,
    /// Total paid to addressees.
    pub satoshi: u64,
    pub used_utxos: Vec<Utxo>,
    pub change: Option<ChangeOutput>,
    pub balance_deltas: BTreeMap<u32, i64>,
    pub send_all: bool,
    pub is_sweep: bool,
    pub rbf_optin: bool,
    /// Bandwidth fee for the replaced transaction; zero when not replacing.
    pub network_fee: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_fee: Option<u64>,
    /// `fee - old_fee` when replacing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_increment: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<Txid>,
    /// Set once broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txhash: Option<Txid>,
}

impl ResolvedTransaction {
    /// The amount a spend authorization is judged on: the fee increment for
    /// a replacement, the payout plus fee otherwise.
    pub fn spend_amount(&self) -> u64 {
        match self.fee_increment {
            Some(increment) => increment,
            None => self.satoshi.saturating_add(self.fee),
        }
    }
}

/// Build `draft`, attaching either the result or the error.
pub fn create_transaction(
    mut draft: TransactionDraft,
    ctx: &BuildContext<'_>,
    random: &dyn RandomSource,
) -> TransactionDraft {
    match build_transaction(&draft, ctx, random) {
        Ok(resolved) => {
            draft.error = None;
            draft.resolved = Some(resolved);
        }
        Err(code) => {
            debug!(error = %code, subaccount = draft.subaccount, "draft rejected");
            draft.error = Some(code);
            draft.resolved = None;
        }
    }
    draft
}

pub fn build_transaction(
    draft: &TransactionDraft,
    ctx: &BuildContext<'_>,
    random: &dyn RandomSource,
) -> Result<ResolvedTransaction, ErrorCode> {
    let fee_rate = draft.fee_rate.unwrap_or(ctx.min_fee_rate);
    if fee_rate < ctx.min_fee_rate {
        return Err(ErrorCode::FeeRateBelowMinimum);
    }

    let is_sweep = draft.is_sweep();
    let previous = draft.previous_transaction.as_ref();
    if let Some(txid) = draft.replaces {
        if previous.map(|p| p.txid) != Some(txid) {
            return Err(ErrorCode::NotReplaceable);
        }
    }
    let send_all = (draft.send_all || is_sweep) && previous.is_none();

    let addressees = match previous {
        Some(prev) => replacement_addressees(prev, ctx.network)?,
        None => {
            if draft.addressees.is_empty() {
                return Err(ErrorCode::NoOutputs);
            }
            if send_all && draft.addressees.len() > 1 {
                return Err(ErrorCode::SendAllRequiresSingleOutput);
            }
            draft
                .addressees
                .iter()
                .map(|a| resolve_addressee(a, ctx.network, ctx.fiat_rate, send_all))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    if !send_all && addressees.iter().any(|a| a.satoshi < ctx.dust_threshold.max(1)) {
        return Err(ErrorCode::InvalidAmount);
    }

    let mut required = addressees
        .iter()
        .try_fold(0u64, |acc, a| acc.checked_add(a.satoshi))
        .ok_or(ErrorCode::InvalidAmount)?;

    let mut outputs: Vec<TxOut> = addressees
        .iter()
        .map(|a| TxOut {
            value: Amount::from_sat(a.satoshi),
            script_pubkey: a.script_pubkey.clone(),
        })
        .collect();

    // Inputs: everything the replaced transaction spent, then candidates.
    let mut selected: Vec<Utxo> = previous.map(|p| p.inputs.clone()).unwrap_or_default();
    let mut total: u64 = selected.iter().map(|u| u.satoshi).sum();
    let candidates: Vec<&Utxo> = draft
        .utxos
        .iter()
        .filter(|u| !selected.iter().any(|s| s.outpoint == u.outpoint))
        .collect();
    let mut next = 0;
    while next < candidates.len() && (send_all || total < required) {
        total += candidates[next].satoshi;
        selected.push(candidates[next].clone());
        next += 1;
    }
    if selected.is_empty() {
        return Err(ErrorCode::InsufficientFunds);
    }

    let change_address = previous
        .and_then(|p| p.change.as_ref().map(|c| c.address.clone()))
        .unwrap_or_else(|| ctx.change_address.clone());
    let mut have_change = previous.is_some_and(|p| p.change.is_some());
    if have_change {
        outputs.push(TxOut {
            value: Amount::ZERO,
            script_pubkey: change_address.script_pubkey.clone(),
        });
    }

    let (old_fee, network_fee) = match previous {
        Some(prev) => (
            Some(prev.fee),
            tx_fee(prev.vsize(), ctx.min_fee_rate, ctx.min_fee_rate).value(),
        ),
        None => (None, 0),
    };

    let lock_time = match previous {
        Some(_) => ctx.block_height,
        None => anti_snipe_locktime(ctx.block_height, random),
    };
    let rbf_optin = ctx.rbf || previous.is_some();
    let sequence = if rbf_optin {
        Sequence::ENABLE_RBF_NO_LOCKTIME
    } else {
        Sequence::ENABLE_LOCKTIME_NO_RBF
    };

    let mut change_dropped = false;
    let fee = loop {
        let sized = assemble(&selected, &outputs, lock_time, sequence, true);
        let mut fee = tx_fee(sized.vsize() as u64, fee_rate, ctx.min_fee_rate).value();
        if let Some(old) = old_fee {
            // Must beat the old fee before paying for the old bandwidth.
            if fee <= old {
                fee = old + 1;
            }
            fee += network_fee;
        }

        if send_all {
            if total < fee.saturating_add(ctx.dust_threshold) {
                return Err(ErrorCode::InsufficientFunds);
            }
            required = total - fee;
            outputs[0].value = Amount::from_sat(required);
            break fee;
        }

        let need = required.saturating_add(fee);
        if total < need {
            match candidates.get(next) {
                Some(utxo) => {
                    total += utxo.satoshi;
                    selected.push((*utxo).clone());
                    next += 1;
                    continue;
                }
                None => return Err(ErrorCode::InsufficientFunds),
            }
        }

        let leftover = total - need;
        if have_change {
            if leftover >= ctx.dust_threshold {
                if let Some(change) = outputs.last_mut() {
                    change.value = Amount::from_sat(leftover);
                }
                break fee;
            }
            outputs.pop();
            have_change = false;
            change_dropped = true;
            continue;
        }
        if !change_dropped && leftover > ctx.dust_threshold {
            outputs.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: change_address.script_pubkey.clone(),
            });
            have_change = true;
            continue;
        }
        break fee + leftover;
    };

    let change = if have_change {
        let last = outputs.len() - 1;
        let index = random.uniform(outputs.len() as u32) as usize;
        outputs.swap(index, last);
        Some(ChangeOutput {
            index,
            satoshi: outputs[index].value.to_sat(),
            address: change_address,
        })
    } else {
        None
    };

    debug!(
        inputs = selected.len(),
        outputs = outputs.len(),
        fee,
        required,
        "coin selection complete"
    );

    let vsize = assemble(&selected, &outputs, lock_time, sequence, true).vsize() as u64;
    let transaction = assemble(&selected, &outputs, lock_time, sequence, false);

    let mut addressees = addressees;
    if send_all {
        addressees[0].satoshi = required;
    }

    let balance_deltas = balance_deltas(draft.subaccount, is_sweep, &selected, change.as_ref(), required);

    Ok(ResolvedTransaction {
        addressees,
        transaction,
        fee,
        fee_rate,
        vsize,
        satoshi: required,
        used_utxos: selected,
        change,
        balance_deltas,
        send_all,
        is_sweep,
        rbf_optin,
        network_fee,
        old_fee,
        fee_increment: old_fee.map(|old| fee.saturating_sub(old)),
        replaces: previous.map(|p| p.txid),
        txhash: None,
    })
}

/// Sign every input: wallet inputs through `signer`, swept inputs with
/// `private_key`.
pub async fn sign_transaction(
    resolved: &ResolvedTransaction,
    private_key: Option<&PrivateKey>,
    signer: Option<&dyn Signer>,
    network: NetworkId,
) -> Result<Transaction, WalletError> {
    let mut tx = resolved.transaction.clone();
    let digests = {
        let mut cache = SighashCache::new(&resolved.transaction);
        let mut digests = Vec::with_capacity(resolved.used_utxos.len());
        for (index, utxo) in resolved.used_utxos.iter().enumerate() {
            let digest = match utxo.kind {
                ScriptKind::P2wpkh => cache
                    .p2wpkh_signature_hash(
                        index,
                        &utxo.script_pubkey,
                        Amount::from_sat(utxo.satoshi),
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| WalletError::Signing(e.to_string()))?
                    .to_byte_array(),
                ScriptKind::P2pkh { .. } => cache
                    .legacy_signature_hash(
                        index,
                        &utxo.script_pubkey,
                        EcdsaSighashType::All.to_u32(),
                    )
                    .map_err(|e| WalletError::Signing(e.to_string()))?
                    .to_byte_array(),
            };
            digests.push(digest);
        }
        digests
    };

    let secp = Secp256k1::signing_only();
    for (index, (utxo, digest)) in resolved.used_utxos.iter().zip(digests).enumerate() {
        match utxo.kind {
            ScriptKind::P2wpkh => {
                let signer = signer
                    .ok_or_else(|| WalletError::Signing("no signer for wallet input".to_string()))?;
                let path = wallet_path(network, utxo.subaccount, utxo.is_internal, utxo.pointer)?;
                let pk = public_key(signer, path.clone()).await?;
                let sig = sign_digest(signer, path, digest, SighashKind::SegwitV0).await?;
                let sig = bitcoin::ecdsa::Signature::sighash_all(sig);
                let mut witness = Witness::new();
                witness.push(sig.to_vec());
                witness.push(pk.to_bytes());
                tx.input[index].witness = witness;
            }
            ScriptKind::P2pkh { .. } => {
                let key = private_key
                    .ok_or_else(|| WalletError::Signing("no key for swept input".to_string()))?;
                let sig = secp.sign_ecdsa(&Message::from_digest(digest), &key.inner);
                let sig = bitcoin::ecdsa::Signature::sighash_all(sig);
                tx.input[index].script_sig = p2pkh_script_sig(&sig.to_vec(), &key.public_key(&secp).to_bytes())?;
            }
        }
    }
    Ok(tx)
}

fn replacement_addressees(
    prev: &WalletTransaction,
    network: NetworkId,
) -> Result<Vec<ResolvedAddressee>, ErrorCode> {
    if !prev.can_rbf || prev.block_height.is_some() {
        return Err(ErrorCode::NotReplaceable);
    }
    let change_index = prev.change.as_ref().map(|c| c.index);
    let addressees = prev
        .transaction
        .output
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != change_index)
        .map(|(_, out)| ResolvedAddressee {
            address: Address::from_script(&out.script_pubkey, bitcoin::Network::from(network))
                .map(|a| a.to_string())
                .unwrap_or_default(),
            satoshi: out.value.to_sat(),
            bip21_params: None,
            script_pubkey: out.script_pubkey.clone(),
        })
        .collect::<Vec<_>>();
    if addressees.is_empty() {
        return Err(ErrorCode::NoOutputs);
    }
    Ok(addressees)
}

/// Current height, or with probability 1/10 up to 99 blocks earlier.
fn anti_snipe_locktime(height: u32, random: &dyn RandomSource) -> u32 {
    if random.uniform(10) == 0 {
        height.saturating_sub(random.uniform(100))
    } else {
        height
    }
}

fn assemble(
    inputs: &[Utxo],
    outputs: &[TxOut],
    lock_time: u32,
    sequence: Sequence,
    with_dummy_signatures: bool,
) -> Transaction {
    let input = inputs
        .iter()
        .map(|utxo| {
            let mut txin = TxIn {
                previous_output: utxo.outpoint,
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Witness::new(),
            };
            if with_dummy_signatures {
                let sig = vec![0u8; DUMMY_SIGNATURE_LEN];
                let pk = vec![0u8; utxo.kind.dummy_pubkey_len()];
                match utxo.kind {
                    ScriptKind::P2wpkh => {
                        txin.witness.push(sig);
                        txin.witness.push(pk);
                    }
                    ScriptKind::P2pkh { .. } => {
                        txin.script_sig = p2pkh_script_sig(&sig, &pk).unwrap_or_default();
                    }
                }
            }
            txin
        })
        .collect();

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(lock_time),
        input,
        output: outputs.to_vec(),
    }
}

fn p2pkh_script_sig(sig: &[u8], pubkey: &[u8]) -> Result<ScriptBuf, WalletError> {
    let sig = PushBytesBuf::try_from(sig.to_vec()).map_err(|e| WalletError::Signing(e.to_string()))?;
    let pubkey =
        PushBytesBuf::try_from(pubkey.to_vec()).map_err(|e| WalletError::Signing(e.to_string()))?;
    Ok(Builder::new().push_slice(&sig).push_slice(&pubkey).into_script())
}

fn balance_deltas(
    subaccount: u32,
    is_sweep: bool,
    inputs: &[Utxo],
    change: Option<&ChangeOutput>,
    payout: u64,
) -> BTreeMap<u32, i64> {
    let mut deltas = BTreeMap::new();
    if is_sweep {
        deltas.insert(subaccount, payout as i64);
        return deltas;
    }
    for utxo in inputs {
        *deltas.entry(utxo.subaccount).or_insert(0) -= utxo.satoshi as i64;
    }
    if let Some(change) = change {
        *deltas.entry(change.address.subaccount).or_insert(0) += change.satoshi as i64;
    }
    deltas
}
