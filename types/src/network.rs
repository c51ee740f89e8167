//! Network identifier.

use serde::{Deserialize, Serialize};

/// Which Bitcoin network a session talks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    Mainnet,
    #[default]
    Testnet,
    Regtest,
}

impl NetworkId {
    /// Default minimum relay fee rate, satoshi per 1000 vbytes.
    pub fn default_min_fee_rate(&self) -> u64 {
        1000
    }

    /// Outputs below this value are not relayed.
    pub fn dust_threshold(&self) -> u64 {
        546
    }

    /// BIP44 coin type used in derivation paths.
    pub fn coin_type(&self) -> u32 {
        match self {
            Self::Mainnet => 0,
            Self::Testnet | Self::Regtest => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }
}

impl From<NetworkId> for bitcoin::Network {
    fn from(id: NetworkId) -> Self {
        match id {
            NetworkId::Mainnet => bitcoin::Network::Bitcoin,
            NetworkId::Testnet => bitcoin::Network::Testnet,
            NetworkId::Regtest => bitcoin::Network::Regtest,
        }
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NetworkId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" | "bitcoin" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "regtest" => Ok(Self::Regtest),
            other => Err(format!("unknown network: {other}")),
        }
    }
}
