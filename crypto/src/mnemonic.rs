//! BIP39 mnemonic generation and seed derivation.

use bip39::Mnemonic;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Generate a new 24-word BIP39 mnemonic from 256-bit entropy.
pub fn generate_mnemonic() -> Result<String, CryptoError> {
    let mut entropy = Zeroizing::new([0u8; 32]);
    OsRng.try_fill_bytes(&mut entropy[..])?;
    let mnemonic = Mnemonic::from_entropy(&entropy[..])
        .map_err(|e| CryptoError::InvalidMnemonic(e.to_string()))?;
    Ok(mnemonic.to_string())
}

/// Derive the 64-byte BIP39 seed (PBKDF2-HMAC-SHA512, 2048 rounds).
pub fn seed_from_mnemonic(
    mnemonic: &str,
    passphrase: &str,
) -> Result<Zeroizing<[u8; 64]>, CryptoError> {
    let mnemonic = Mnemonic::parse_normalized(mnemonic)
        .map_err(|e| CryptoError::InvalidMnemonic(e.to_string()))?;
    Ok(Zeroizing::new(mnemonic.to_seed_normalized(passphrase)))
}

pub fn validate_mnemonic(mnemonic: &str) -> bool {
    Mnemonic::parse_normalized(mnemonic).is_ok()
}
