//! Errors from key handling and the encryption vault.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("password must be a non-empty hex string")]
    InvalidPassword,

    #[error("invalid salt length: expected 16 bytes, got {0}")]
    InvalidSalt(usize),

    #[error("decryption failed: wrong password or corrupted data")]
    DecryptionFailed,

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("cipher error: {0}")]
    Cipher(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("private key is for a different network")]
    WrongNetwork,

    #[error("BIP38 passphrase is required")]
    PassphraseRequired,

    #[error("BIP38 passphrase is incorrect")]
    WrongPassphrase,

    #[error("invalid mnemonic phrase: {0}")]
    InvalidMnemonic(String),

    #[error("random number generator failed: {0}")]
    Random(String),
}

impl From<hex::FromHexError> for CryptoError {
    fn from(e: hex::FromHexError) -> Self {
        CryptoError::InvalidHex(e.to_string())
    }
}

impl From<rand::Error> for CryptoError {
    fn from(e: rand::Error) -> Self {
        CryptoError::Random(e.to_string())
    }
}
