//! The signer capability.
//!
//! Wallet keys never leave the signer. The wallet asks for public keys and
//! signatures through [`HardwareAction`]s, which a device implementation
//! may turn into a round-trip to external hardware. [`SoftwareSigner`]
//! answers them from a BIP39 seed.

use async_trait::async_trait;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::{ecdsa, All, Message, Secp256k1};
use bitcoin::{Address, CompressedPublicKey, PublicKey};

use satchel_types::NetworkId;

use crate::error::WalletError;
use crate::utxo::WalletAddress;

/// BIP84 purpose for native segwit accounts.
const PURPOSE_P2WPKH: u32 = 84;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SighashKind {
    SegwitV0,
    Legacy,
}

/// A request to the signer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HardwareAction {
    GetPublicKey {
        path: DerivationPath,
    },
    SignInput {
        path: DerivationPath,
        sighash: [u8; 32],
        kind: SighashKind,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignerResponse {
    PublicKey(PublicKey),
    Signature(ecdsa::Signature),
}

#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, action: HardwareAction) -> Result<SignerResponse, WalletError>;
}

/// `m/84'/coin'/subaccount'/chain/pointer`
pub fn wallet_path(
    network: NetworkId,
    subaccount: u32,
    is_internal: bool,
    pointer: u32,
) -> Result<DerivationPath, WalletError> {
    Ok(DerivationPath::from(vec![
        ChildNumber::from_hardened_idx(PURPOSE_P2WPKH)?,
        ChildNumber::from_hardened_idx(network.coin_type())?,
        ChildNumber::from_hardened_idx(subaccount)?,
        ChildNumber::from_normal_idx(u32::from(is_internal))?,
        ChildNumber::from_normal_idx(pointer)?,
    ]))
}

pub async fn public_key(signer: &dyn Signer, path: DerivationPath) -> Result<PublicKey, WalletError> {
    match signer.sign(HardwareAction::GetPublicKey { path }).await? {
        SignerResponse::PublicKey(pk) => Ok(pk),
        SignerResponse::Signature(_) => Err(WalletError::Signer(
            "expected a public key, got a signature".to_string(),
        )),
    }
}

pub async fn sign_digest(
    signer: &dyn Signer,
    path: DerivationPath,
    sighash: [u8; 32],
    kind: SighashKind,
) -> Result<ecdsa::Signature, WalletError> {
    let action = HardwareAction::SignInput {
        path,
        sighash,
        kind,
    };
    match signer.sign(action).await? {
        SignerResponse::Signature(sig) => Ok(sig),
        SignerResponse::PublicKey(_) => Err(WalletError::Signer(
            "expected a signature, got a public key".to_string(),
        )),
    }
}

/// Derive the P2WPKH address at a wallet position.
pub async fn derive_address(
    signer: &dyn Signer,
    network: NetworkId,
    subaccount: u32,
    is_internal: bool,
    pointer: u32,
) -> Result<WalletAddress, WalletError> {
    let path = wallet_path(network, subaccount, is_internal, pointer)?;
    let pk = public_key(signer, path).await?;
    let compressed = CompressedPublicKey::try_from(pk)
        .map_err(|e| WalletError::Key(format!("wallet key must be compressed: {e}")))?;
    let address = Address::p2wpkh(&compressed, bitcoin::Network::from(network));
    Ok(WalletAddress {
        address: address.to_string(),
        script_pubkey: address.script_pubkey(),
        subaccount,
        is_internal,
        pointer,
    })
}

/// A signer holding the master key in memory.
pub struct SoftwareSigner {
    master: Xpriv,
    secp: Secp256k1<All>,
}

impl SoftwareSigner {
    pub fn from_seed(seed: &[u8], network: NetworkId) -> Result<Self, WalletError> {
        let master = Xpriv::new_master(bitcoin::Network::from(network), seed)?;
        Ok(Self {
            master,
            secp: Secp256k1::new(),
        })
    }

    fn derive(&self, path: &DerivationPath) -> Result<Xpriv, WalletError> {
        Ok(self.master.derive_priv(&self.secp, path)?)
    }
}

#[async_trait]
impl Signer for SoftwareSigner {
    async fn sign(&self, action: HardwareAction) -> Result<SignerResponse, WalletError> {
        match action {
            HardwareAction::GetPublicKey { path } => {
                let xpriv = self.derive(&path)?;
                Ok(SignerResponse::PublicKey(
                    xpriv.to_priv().public_key(&self.secp),
                ))
            }
            HardwareAction::SignInput { path, sighash, .. } => {
                let xpriv = self.derive(&path)?;
                let message = Message::from_digest(sighash);
                Ok(SignerResponse::Signature(
                    self.secp.sign_ecdsa(&message, &xpriv.private_key),
                ))
            }
        }
    }
}
