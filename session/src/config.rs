//! Session configuration with TOML file support.

use serde::{Deserialize, Serialize};

use satchel_crypto::VaultParams;
use satchel_types::NetworkId;
use satchel_utils::LogFormat;

use crate::SessionError;

/// Configuration for a wallet session.
///
/// Can be loaded from a TOML file via [`SessionConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Which network addresses and keys must belong to.
    #[serde(default)]
    pub network: NetworkId,

    /// Minimum relay fee rate in satoshi per 1000 vbytes.
    #[serde(default = "default_min_fee_rate")]
    pub min_fee_rate: u64,

    /// Outputs at or below this value are not created.
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold: u64,

    /// Seconds a pending two-factor challenge stays valid.
    #[serde(default = "default_challenge_timeout_secs")]
    pub challenge_timeout_secs: u64,

    /// Wrong codes allowed per challenge for code-delivered methods.
    #[serde(default = "default_twofactor_attempts")]
    pub twofactor_attempts: u32,

    /// Argon2id cost for the encryption vault.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Queued requests before callers wait.
    #[serde(default = "default_request_queue")]
    pub request_queue: usize,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_min_fee_rate() -> u64 {
    NetworkId::default().default_min_fee_rate()
}

fn default_dust_threshold() -> u64 {
    NetworkId::default().dust_threshold()
}

fn default_challenge_timeout_secs() -> u64 {
    300
}

fn default_twofactor_attempts() -> u32 {
    3
}

fn default_request_queue() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_memory_kib() -> u32 {
    VaultParams::default().memory_kib
}

fn default_iterations() -> u32 {
    VaultParams::default().iterations
}

fn default_parallelism() -> u32 {
    VaultParams::default().parallelism
}

// ── Impl ───────────────────────────────────────────────────────────────

impl SessionConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, SessionError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SessionError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, SessionError> {
        toml::from_str(s).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, SessionError> {
        toml::to_string_pretty(self).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Defaults tuned for `network`.
    pub fn for_network(network: NetworkId) -> Self {
        Self {
            network,
            min_fee_rate: network.default_min_fee_rate(),
            dust_threshold: network.dust_threshold(),
            ..Self::default()
        }
    }

    pub fn vault_params(&self) -> VaultParams {
        VaultParams {
            memory_kib: self.vault.memory_kib,
            iterations: self.vault.iterations,
            parallelism: self.vault.parallelism,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            network: NetworkId::default(),
            min_fee_rate: default_min_fee_rate(),
            dust_threshold: default_dust_threshold(),
            challenge_timeout_secs: default_challenge_timeout_secs(),
            twofactor_attempts: default_twofactor_attempts(),
            vault: VaultConfig::default(),
            request_queue: default_request_queue(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = SessionConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = SessionConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = SessionConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.network, NetworkId::Testnet);
        assert_eq!(config.min_fee_rate, 1000);
        assert_eq!(config.twofactor_attempts, 3);
        assert_eq!(config.log_format, LogFormat::Human);
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            network = "regtest"
            challenge_timeout_secs = 60

            [vault]
            memory_kib = 64
        "#;
        let config = SessionConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.network, NetworkId::Regtest);
        assert_eq!(config.challenge_timeout_secs, 60);
        assert_eq!(config.vault_params().memory_kib, 64);
        assert_eq!(config.vault_params().iterations, VaultParams::default().iterations);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = SessionConfig::from_toml_file("/nonexistent/satchel.toml");
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("satchel.toml");
        std::fs::write(&path, "dust_threshold = 1000\n").unwrap();
        let config = SessionConfig::from_toml_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.dust_threshold, 1000);
    }
}
