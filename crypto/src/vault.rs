//! Password-based encryption of opaque wallet metadata.
//!
//! 1. Argon2id stretches the password and a 16-byte salt into 44 bytes:
//!    a 32-byte AES key followed by a 12-byte nonce
//! 2. AES-256-GCM encrypts the plaintext under that key and nonce
//! 3. The caller keeps `{ciphertext, salt}`, both hex-encoded
//!
//! Because the nonce comes from the KDF, a fresh random salt gives a fresh
//! key and nonce on every call, and a caller-supplied salt makes encryption
//! deterministic for the same plaintext and password.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

const DEFAULT_MEMORY_KIB: u32 = 19_456;
const DEFAULT_ITERATIONS: u32 = 2;
const DEFAULT_PARALLELISM: u32 = 1;

/// HMAC key used to derive a session's default vault password from its seed.
const DEFAULT_PASSWORD_TAG: &[u8] = b"satchel/vault-password";

/// Argon2id cost parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for VaultParams {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_MEMORY_KIB,
            iterations: DEFAULT_ITERATIONS,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

/// An encrypted blob as handed back to the caller. Never holds the password.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    /// Hex-encoded ciphertext including the GCM tag.
    pub ciphertext: String,
    /// Hex-encoded 16-byte salt.
    pub salt: String,
}

#[derive(Clone, Debug, Default)]
pub struct Vault {
    params: VaultParams,
}

impl Vault {
    pub fn new(params: VaultParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> VaultParams {
        self.params
    }

    /// Encrypt `plaintext`. A random salt is drawn when `salt` is `None`.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        password: &[u8],
        salt: Option<&[u8]>,
    ) -> Result<EncryptedBlob, CryptoError> {
        if password.is_empty() {
            return Err(CryptoError::InvalidPassword);
        }
        let salt = match salt {
            Some(salt) => check_salt(salt)?,
            None => random_salt()?,
        };

        let (cipher, nonce) = self.cipher_for(password, &salt)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Cipher(format!("encryption failed: {e}")))?;

        Ok(EncryptedBlob {
            ciphertext: hex::encode(ciphertext),
            salt: hex::encode(salt),
        })
    }

    pub fn decrypt(&self, blob: &EncryptedBlob, password: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if password.is_empty() {
            return Err(CryptoError::InvalidPassword);
        }
        let salt = check_salt(&hex::decode(&blob.salt)?)?;
        let ciphertext = hex::decode(&blob.ciphertext)?;

        let (cipher, nonce) = self.cipher_for(password, &salt)?;
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    fn cipher_for(
        &self,
        password: &[u8],
        salt: &[u8; SALT_LEN],
    ) -> Result<(Aes256Gcm, [u8; NONCE_LEN]), CryptoError> {
        let material = self.derive(password, salt)?;
        let cipher = Aes256Gcm::new_from_slice(&material[..KEY_LEN])
            .map_err(|e| CryptoError::Cipher(format!("AES key init failed: {e}")))?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&material[KEY_LEN..]);
        Ok((cipher, nonce))
    }

    fn derive(
        &self,
        password: &[u8],
        salt: &[u8; SALT_LEN],
    ) -> Result<Zeroizing<[u8; KEY_LEN + NONCE_LEN]>, CryptoError> {
        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            Some(KEY_LEN + NONCE_LEN),
        )
        .map_err(|e| CryptoError::Kdf(format!("Argon2 params error: {e}")))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut output = Zeroizing::new([0u8; KEY_LEN + NONCE_LEN]);
        argon2
            .hash_password_into(password, salt, &mut output[..])
            .map_err(|e| CryptoError::Kdf(format!("Argon2 hashing failed: {e}")))?;
        Ok(output)
    }
}

/// Decode a caller-supplied hex password.
pub fn parse_password(hex_password: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let bytes = hex::decode(hex_password).map_err(|_| CryptoError::InvalidPassword)?;
    if bytes.is_empty() {
        return Err(CryptoError::InvalidPassword);
    }
    Ok(Zeroizing::new(bytes))
}

/// Decode a caller-supplied hex salt, which must be exactly 16 bytes.
pub fn parse_salt(hex_salt: &str) -> Result<[u8; SALT_LEN], CryptoError> {
    check_salt(&hex::decode(hex_salt)?)
}

/// The password a full session uses when the caller does not pass one.
pub fn default_password(seed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(DEFAULT_PASSWORD_TAG)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    mac.update(seed);
    let digest = mac.finalize().into_bytes();
    Ok(Zeroizing::new(digest[..KEY_LEN].to_vec()))
}

fn check_salt(salt: &[u8]) -> Result<[u8; SALT_LEN], CryptoError> {
    salt.try_into()
        .map_err(|_| CryptoError::InvalidSalt(salt.len()))
}

fn random_salt() -> Result<[u8; SALT_LEN], CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.try_fill_bytes(&mut salt)?;
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> Vault {
        // Low cost keeps the suite fast; production uses the defaults.
        Vault::new(VaultParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        })
    }

    const PASSWORD: &[u8] = b"\x01\x02\x03\x04";

    #[test]
    fn roundtrip_around_block_boundaries() {
        let vault = vault();
        for len in [0usize, 1, 15, 16, 17, 32, 256, 257] {
            let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let blob = vault.encrypt(&plaintext, PASSWORD, None).unwrap();
            assert_eq!(vault.decrypt(&blob, PASSWORD).unwrap(), plaintext, "len {len}");
        }
    }

    #[test]
    fn random_salt_differs_each_time() {
        let vault = vault();
        let a = vault.encrypt(b"metadata", PASSWORD, None).unwrap();
        let b = vault.encrypt(b"metadata", PASSWORD, None).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(hex::decode(&a.salt).unwrap().len(), SALT_LEN);
    }

    #[test]
    fn explicit_salt_is_deterministic() {
        let vault = vault();
        let salt = [7u8; SALT_LEN];
        let a = vault.encrypt(b"metadata", PASSWORD, Some(&salt)).unwrap();
        let b = vault.encrypt(b"metadata", PASSWORD, Some(&salt)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.salt, hex::encode(salt));
    }

    #[test]
    fn wrong_password_is_rejected() {
        let vault = vault();
        let blob = vault.encrypt(b"secret", PASSWORD, None).unwrap();
        let result = vault.decrypt(&blob, b"\x09\x09");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let vault = vault();
        let mut blob = vault.encrypt(b"secret", PASSWORD, None).unwrap();
        let mut bytes = hex::decode(&blob.ciphertext).unwrap();
        bytes[0] ^= 0xFF;
        blob.ciphertext = hex::encode(bytes);
        assert!(matches!(vault.decrypt(&blob, PASSWORD), Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn salt_must_be_sixteen_bytes() {
        let vault = vault();
        let result = vault.encrypt(b"x", PASSWORD, Some(&[0u8; 8]));
        assert!(matches!(result, Err(CryptoError::InvalidSalt(8))));
        assert!(matches!(parse_salt("abcd"), Err(CryptoError::InvalidSalt(2))));
    }

    #[test]
    fn empty_password_is_rejected() {
        let vault = vault();
        assert!(matches!(
            vault.encrypt(b"x", b"", None),
            Err(CryptoError::InvalidPassword)
        ));
    }

    #[test]
    fn passwords_are_hex() {
        assert_eq!(parse_password("0a0b").unwrap().as_slice(), &[0x0a, 0x0b]);
        assert!(matches!(parse_password("hunter2"), Err(CryptoError::InvalidPassword)));
        assert!(matches!(parse_password(""), Err(CryptoError::InvalidPassword)));
    }

    #[test]
    fn default_password_depends_on_seed() {
        let a = default_password(&[1u8; 64]).unwrap();
        let b = default_password(&[1u8; 64]).unwrap();
        let c = default_password(&[2u8; 64]).unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
        assert_ne!(a.as_slice(), c.as_slice());
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn blob_serializes_without_password() {
        let vault = vault();
        let blob = vault.encrypt(b"x", PASSWORD, None).unwrap();
        let json = serde_json::to_value(&blob).unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["ciphertext".to_string(), "salt".to_string()]);
    }
}
