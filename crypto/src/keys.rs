//! Importing foreign private keys for sweeping.
//!
//! Accepts WIF (compressed or uncompressed) and BIP38 passphrase-encrypted
//! keys without EC multiplication. BIP38 address hashes are computed over
//! the mainnet P2PKH address, as in the published test vectors; the
//! returned key is tagged with the session's network.

use aes_gcm::aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes_gcm::aes::{Aes256, Block};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{base58, Address, NetworkKind, PrivateKey};
use satchel_types::NetworkId;
use zeroize::Zeroizing;

use crate::error::CryptoError;

const BIP38_PREFIX: [u8; 2] = [0x01, 0x42];
const BIP38_LEN: usize = 39;
const FLAG_COMPRESSED: u8 = 0xE0;
const FLAG_UNCOMPRESSED: u8 = 0xC0;

/// scrypt cost of the BIP38 key derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ScryptCost {
    log_n: u8,
    r: u32,
    p: u32,
}

impl ScryptCost {
    /// N = 2^14, r = 8, p = 8
    const BIP38: Self = Self {
        log_n: 14,
        r: 8,
        p: 8,
    };
}

/// Whether `s` looks like a BIP38 encrypted key.
pub fn is_bip38(s: &str) -> bool {
    base58::decode_check(s.trim())
        .map(|raw| raw.len() == BIP38_LEN && raw[..2] == BIP38_PREFIX)
        .unwrap_or(false)
}

/// Parse a WIF key and check it belongs to `network`.
pub fn parse_wif(wif: &str, network: NetworkId) -> Result<PrivateKey, CryptoError> {
    let key = PrivateKey::from_wif(wif.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    if key.network != NetworkKind::from(bitcoin::Network::from(network)) {
        return Err(CryptoError::WrongNetwork);
    }
    Ok(key)
}

/// Import a WIF or BIP38 key. BIP38 keys need `passphrase`.
pub fn import_private_key(
    encoded: &str,
    passphrase: Option<&str>,
    network: NetworkId,
) -> Result<PrivateKey, CryptoError> {
    if is_bip38(encoded) {
        let passphrase = passphrase.ok_or(CryptoError::PassphraseRequired)?;
        decrypt_bip38(encoded, passphrase, network)
    } else {
        parse_wif(encoded, network)
    }
}

pub fn decrypt_bip38(
    encrypted: &str,
    passphrase: &str,
    network: NetworkId,
) -> Result<PrivateKey, CryptoError> {
    decrypt_bip38_with(encrypted, passphrase, network, ScryptCost::BIP38)
}

pub fn encrypt_bip38(key: &PrivateKey, passphrase: &str) -> Result<String, CryptoError> {
    encrypt_bip38_with(key, passphrase, ScryptCost::BIP38)
}

fn decrypt_bip38_with(
    encrypted: &str,
    passphrase: &str,
    network: NetworkId,
    cost: ScryptCost,
) -> Result<PrivateKey, CryptoError> {
    let raw = base58::decode_check(encrypted.trim())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    if raw.len() != BIP38_LEN || raw[..2] != BIP38_PREFIX {
        return Err(CryptoError::InvalidKey("not a BIP38 key".to_string()));
    }
    let compressed = match raw[2] {
        FLAG_COMPRESSED => true,
        FLAG_UNCOMPRESSED => false,
        flag => {
            return Err(CryptoError::InvalidKey(format!(
                "unsupported BIP38 flag byte {flag:#04x}"
            )))
        }
    };
    let address_hash = &raw[3..7];
    let derived = derive_bip38(passphrase, address_hash, cost)?;
    let cipher = Aes256::new_from_slice(&derived[32..])
        .map_err(|e| CryptoError::Cipher(e.to_string()))?;

    let mut secret = Zeroizing::new([0u8; 32]);
    for (half, chunk) in raw[7..].chunks(16).enumerate() {
        let mut block = Block::clone_from_slice(chunk);
        cipher.decrypt_block(&mut block);
        for (i, byte) in block.iter().enumerate() {
            secret[half * 16 + i] = byte ^ derived[half * 16 + i];
        }
    }

    let inner = SecretKey::from_slice(&secret[..])
        .map_err(|_| CryptoError::WrongPassphrase)?;
    let mainnet_key = with_compression(inner, compressed, NetworkKind::Main);
    if bip38_address_hash(&mainnet_key) != address_hash {
        return Err(CryptoError::WrongPassphrase);
    }
    Ok(with_compression(
        inner,
        compressed,
        NetworkKind::from(bitcoin::Network::from(network)),
    ))
}

fn encrypt_bip38_with(
    key: &PrivateKey,
    passphrase: &str,
    cost: ScryptCost,
) -> Result<String, CryptoError> {
    let mainnet_key = with_compression(key.inner, key.compressed, NetworkKind::Main);
    let address_hash = bip38_address_hash(&mainnet_key);
    let derived = derive_bip38(passphrase, &address_hash, cost)?;
    let cipher = Aes256::new_from_slice(&derived[32..])
        .map_err(|e| CryptoError::Cipher(e.to_string()))?;

    let secret = key.inner.secret_bytes();
    let mut out = Vec::with_capacity(BIP38_LEN);
    out.extend_from_slice(&BIP38_PREFIX);
    out.push(if key.compressed {
        FLAG_COMPRESSED
    } else {
        FLAG_UNCOMPRESSED
    });
    out.extend_from_slice(&address_hash);
    for half in 0..2 {
        let mut block = Block::default();
        for i in 0..16 {
            block[i] = secret[half * 16 + i] ^ derived[half * 16 + i];
        }
        cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
    }
    Ok(base58::encode_check(&out))
}

fn with_compression(inner: SecretKey, compressed: bool, network: NetworkKind) -> PrivateKey {
    if compressed {
        PrivateKey::new(inner, network)
    } else {
        PrivateKey::new_uncompressed(inner, network)
    }
}

fn bip38_address_hash(key: &PrivateKey) -> [u8; 4] {
    let secp = Secp256k1::signing_only();
    let address = Address::p2pkh(key.public_key(&secp).pubkey_hash(), NetworkKind::Main);
    let digest = sha256d::Hash::hash(address.to_string().as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest.as_byte_array()[..4]);
    out
}

fn derive_bip38(
    passphrase: &str,
    salt: &[u8],
    cost: ScryptCost,
) -> Result<Zeroizing<[u8; 64]>, CryptoError> {
    let params = scrypt::Params::new(cost.log_n, cost.r, cost.p, 64)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    let mut derived = Zeroizing::new([0u8; 64]);
    scrypt::scrypt(passphrase.as_bytes(), salt, &params, &mut derived[..])
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Published BIP38 vectors, no EC multiply.
    const UNCOMPRESSED_BIP38: &str = "6PRVWUbkzzsbcVac2qwfssoUJAN1Xhrg6bNk8J7Nzm5H7kxEbn2Nh2ZoGg";
    const UNCOMPRESSED_WIF: &str = "5KN7MzqK5wt2TP1fQCYyHBtDrXdJuXbUzm4A9rKAteGu3Qi5CVR";
    const COMPRESSED_BIP38: &str = "6PYNKZ1EAgYgmQfmNVamxyXVWHzK5s6DGhwP4J5o44cvXdoY7sRzhtpUeo";
    const COMPRESSED_WIF: &str = "L44B5gGEpqEDRS9vVPz7QT35jcBG2r3CZwSwQ4fCewXAhAhqGVpP";
    const PASSPHRASE: &str = "TestingOneTwoThree";

    // Only the published vectors pay the full scrypt cost.
    const CHEAP: ScryptCost = ScryptCost { log_n: 4, r: 1, p: 1 };

    // Regtest/testnet WIF for secret key 0x01..01.
    fn testnet_wif(compressed: bool) -> String {
        let inner = SecretKey::from_slice(&[1u8; 32]).unwrap();
        with_compression(inner, compressed, NetworkKind::Test).to_wif()
    }

    #[test]
    fn parses_compressed_and_uncompressed_wif() {
        let compressed = parse_wif(&testnet_wif(true), NetworkId::Testnet).unwrap();
        let uncompressed = parse_wif(&testnet_wif(false), NetworkId::Testnet).unwrap();
        assert!(compressed.compressed);
        assert!(!uncompressed.compressed);
        assert_eq!(compressed.inner, uncompressed.inner);
    }

    #[test]
    fn wif_network_is_checked() {
        let result = parse_wif(UNCOMPRESSED_WIF, NetworkId::Testnet);
        assert!(matches!(result, Err(CryptoError::WrongNetwork)));
        assert!(parse_wif(UNCOMPRESSED_WIF, NetworkId::Mainnet).is_ok());
    }

    #[test]
    fn garbage_is_not_a_key() {
        assert!(matches!(
            import_private_key("not-a-key", None, NetworkId::Mainnet),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn detects_bip38() {
        assert!(is_bip38(UNCOMPRESSED_BIP38));
        assert!(is_bip38(COMPRESSED_BIP38));
        assert!(!is_bip38(UNCOMPRESSED_WIF));
    }

    #[test]
    fn bip38_needs_passphrase() {
        let result = import_private_key(COMPRESSED_BIP38, None, NetworkId::Mainnet);
        assert!(matches!(result, Err(CryptoError::PassphraseRequired)));
    }

    #[test]
    fn round_trips_both_compressions() {
        for wif in [COMPRESSED_WIF, UNCOMPRESSED_WIF] {
            let key = parse_wif(wif, NetworkId::Mainnet).unwrap();
            let encrypted = encrypt_bip38_with(&key, PASSPHRASE, CHEAP).unwrap();
            assert!(is_bip38(&encrypted));
            let decrypted = decrypt_bip38_with(&encrypted, PASSPHRASE, NetworkId::Mainnet, CHEAP).unwrap();
            assert_eq!(decrypted, key);
        }
    }

    #[test]
    fn wrong_passphrase_is_detected() {
        let key = parse_wif(COMPRESSED_WIF, NetworkId::Mainnet).unwrap();
        let encrypted = encrypt_bip38_with(&key, PASSPHRASE, CHEAP).unwrap();
        let result = decrypt_bip38_with(&encrypted, "wrong", NetworkId::Mainnet, CHEAP);
        assert!(matches!(result, Err(CryptoError::WrongPassphrase)));
    }

    #[test]
    fn decrypted_key_takes_session_network() {
        let key = parse_wif(COMPRESSED_WIF, NetworkId::Mainnet).unwrap();
        let encrypted = encrypt_bip38_with(&key, PASSPHRASE, CHEAP).unwrap();
        let decrypted = decrypt_bip38_with(&encrypted, PASSPHRASE, NetworkId::Testnet, CHEAP).unwrap();
        assert_eq!(decrypted.network, NetworkKind::Test);
        assert_eq!(decrypted.inner, key.inner);
    }

    #[test]
    fn decrypts_compressed_vector() {
        let key = import_private_key(COMPRESSED_BIP38, Some(PASSPHRASE), NetworkId::Mainnet).unwrap();
        assert!(key.compressed);
        assert_eq!(key.to_wif(), COMPRESSED_WIF);
    }

    #[test]
    #[ignore = "full scrypt cost; run with --ignored"]
    fn decrypts_uncompressed_vector() {
        let key = decrypt_bip38(UNCOMPRESSED_BIP38, PASSPHRASE, NetworkId::Mainnet).unwrap();
        assert!(!key.compressed);
        assert_eq!(key.to_wif(), UNCOMPRESSED_WIF);
    }

    #[test]
    #[ignore = "full scrypt cost; run with --ignored"]
    fn encrypt_matches_vector() {
        let key = parse_wif(COMPRESSED_WIF, NetworkId::Mainnet).unwrap();
        assert_eq!(encrypt_bip38(&key, PASSPHRASE).unwrap(), COMPRESSED_BIP38);
    }
}
