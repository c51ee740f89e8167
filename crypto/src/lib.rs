//! Cryptography for the satchel wallet.
//!
//! - **Vault**: Argon2id + AES-256-GCM encryption of wallet metadata blobs
//! - **Keys**: WIF and BIP38 private key import for sweeping
//! - **Mnemonic**: BIP39 phrase generation and seed derivation

pub mod error;
pub mod keys;
pub mod mnemonic;
pub mod vault;

pub use error::CryptoError;
pub use keys::{decrypt_bip38, encrypt_bip38, import_private_key, is_bip38, parse_wif};
pub use mnemonic::{generate_mnemonic, seed_from_mnemonic, validate_mnemonic};
pub use vault::{default_password, parse_password, parse_salt, EncryptedBlob, Vault, VaultParams};
