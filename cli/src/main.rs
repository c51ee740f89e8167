//! satchel: offline wallet tools.
//!
//! Everything here runs without a backend: amount conversion, BIP21
//! parsing, fee tier tables and the metadata vault. Output is JSON on stdout.

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

use satchel_crypto::{parse_password, parse_salt, EncryptedBlob, Vault};
use satchel_session::SessionConfig;
use satchel_types::{convert, AmountFields, Decimal, FiatRate, NetworkId};
use satchel_utils::LogFormat;
use satchel_wallet_core::{parse_bip21, resolve_addressee, Addressee, FeeEstimates, FeeRate};

#[derive(Parser)]
#[command(name = "satchel", about = "satchel wallet tools", version)]
struct Cli {
    /// Network addresses must belong to: "mainnet", "testnet" or "regtest".
    /// When a config file is provided, defaults to the file's network value.
    #[arg(long, env = "SATCHEL_NETWORK")]
    network: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "SATCHEL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "SATCHEL_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Path to a TOML session configuration. Flags and env vars override it.
    #[arg(long, env = "SATCHEL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Convert one amount into every display unit.
    Convert {
        #[command(flatten)]
        amount: AmountArgs,

        #[command(flatten)]
        rate: RateArgs,
    },

    /// Validate an address or `bitcoin:` URI and show what it pays.
    ParseUri {
        uri: String,

        #[command(flatten)]
        rate: RateArgs,
    },

    /// Build the fee tier table from raw `BLOCKS=BTC_PER_KB` estimates.
    FeeTiers {
        #[arg(long = "estimate", value_parser = parse_estimate)]
        estimates: Vec<(u32, Decimal)>,
    },

    /// Encrypt data with a hex password.
    Encrypt {
        #[arg(long, env = "SATCHEL_VAULT_PASSWORD")]
        password: String,

        /// Hex salt of 16 bytes; random when omitted.
        #[arg(long)]
        salt: Option<String>,

        /// UTF-8 plaintext.
        #[arg(long, conflicts_with = "hex_data", required_unless_present = "hex_data")]
        text: Option<String>,

        /// Hex plaintext.
        #[arg(long = "hex")]
        hex_data: Option<String>,
    },

    /// Decrypt a blob produced by `encrypt`.
    Decrypt {
        #[arg(long, env = "SATCHEL_VAULT_PASSWORD")]
        password: String,

        #[arg(long)]
        ciphertext: String,

        #[arg(long)]
        salt: String,
    },
}

#[derive(clap::Args)]
#[group(required = true, multiple = false)]
struct AmountArgs {
    #[arg(long)]
    satoshi: Option<u64>,
    #[arg(long)]
    btc: Option<String>,
    #[arg(long)]
    mbtc: Option<String>,
    #[arg(long)]
    ubtc: Option<String>,
    #[arg(long)]
    bits: Option<String>,
    #[arg(long)]
    fiat: Option<String>,
}

impl From<AmountArgs> for AmountFields {
    fn from(args: AmountArgs) -> Self {
        AmountFields {
            satoshi: args.satoshi,
            btc: args.btc,
            mbtc: args.mbtc,
            ubtc: args.ubtc,
            bits: args.bits,
            fiat: args.fiat,
        }
    }
}

#[derive(clap::Args)]
struct RateArgs {
    /// Price of one bitcoin in `currency`.
    #[arg(long = "fiat-rate", env = "SATCHEL_FIAT_RATE")]
    fiat_rate: Option<Decimal>,

    #[arg(long, default_value = "USD", env = "SATCHEL_CURRENCY")]
    currency: String,
}

impl RateArgs {
    fn rate(&self) -> Option<FiatRate> {
        self.fiat_rate
            .map(|rate| FiatRate::new(self.currency.clone(), rate))
    }
}

fn parse_network(s: &str) -> anyhow::Result<NetworkId> {
    match s.to_ascii_lowercase().as_str() {
        "mainnet" | "main" | "bitcoin" => Ok(NetworkId::Mainnet),
        "testnet" | "test" => Ok(NetworkId::Testnet),
        "regtest" => Ok(NetworkId::Regtest),
        other => bail!("unknown network: {other}"),
    }
}

fn parse_estimate(s: &str) -> Result<(u32, Decimal), String> {
    let (blocks, rate) = s
        .split_once('=')
        .ok_or_else(|| format!("expected BLOCKS=BTC_PER_KB, got {s}"))?;
    let blocks = blocks
        .trim()
        .parse()
        .map_err(|e| format!("invalid block target {blocks}: {e}"))?;
    let rate = rate
        .trim()
        .parse()
        .map_err(|e| format!("invalid rate {rate}: {e}"))?;
    Ok((blocks, rate))
}

fn load_config(cli: &Cli) -> anyhow::Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let path = path.to_string_lossy();
            SessionConfig::from_toml_file(&path)
                .with_context(|| format!("loading config from {path}"))?
        }
        None => SessionConfig::default(),
    };
    if let Some(network) = &cli.network {
        config.network = parse_network(network)?;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    Ok(config)
}

fn run(command: Command, config: &SessionConfig) -> anyhow::Result<serde_json::Value> {
    match command {
        Command::Convert { amount, rate } => {
            let fields = AmountFields::from(amount);
            let input = fields
                .single()?
                .ok_or_else(|| anyhow!("no amount given"))?;
            let converted = convert(&input, rate.rate().as_ref())?;
            Ok(serde_json::to_value(converted)?)
        }
        Command::ParseUri { uri, rate } => {
            let parsed = parse_bip21(&uri).map_err(|e| anyhow!("{e}"))?;
            let addressee = Addressee::new(uri, AmountFields::default());
            let resolved = resolve_addressee(&addressee, config.network, rate.rate().as_ref(), true)
                .map_err(|e| anyhow!("{e}"))?;
            Ok(json!({
                "address": resolved.address,
                "satoshi": resolved.satoshi,
                "is_uri": parsed.is_some(),
                "bip21_params": resolved.bip21_params,
                "script_pubkey": resolved.script_pubkey.to_hex_string(),
            }))
        }
        Command::FeeTiers { estimates } => {
            let min_rate = FeeRate::from_sat_per_kvb(config.min_fee_rate);
            let tiers = FeeEstimates::from_block_targets(min_rate, &estimates);
            Ok(serde_json::to_value(tiers)?)
        }
        Command::Encrypt {
            password,
            salt,
            text,
            hex_data,
        } => {
            let plaintext = match (text, hex_data) {
                (Some(text), _) => text.into_bytes(),
                (None, Some(data)) => hex::decode(data).context("plaintext is not hex")?,
                (None, None) => bail!("nothing to encrypt"),
            };
            let password = parse_password(&password)?;
            let salt = salt.as_deref().map(parse_salt).transpose()?;
            let vault = Vault::new(config.vault_params());
            let blob = vault.encrypt(&plaintext, &password, salt.as_ref().map(|s| &s[..]))?;
            Ok(serde_json::to_value(blob)?)
        }
        Command::Decrypt {
            password,
            ciphertext,
            salt,
        } => {
            let password = parse_password(&password)?;
            let vault = Vault::new(config.vault_params());
            let plaintext = vault.decrypt(&EncryptedBlob { ciphertext, salt }, &password)?;
            Ok(json!({
                "hex": hex::encode(&plaintext),
                "text": String::from_utf8(plaintext).ok(),
            }))
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    satchel_utils::init_logging(config.log_format, &config.log_level)?;
    tracing::debug!(network = %config.network, "satchel starting");

    let output = run(cli.command, &config)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn fast_config() -> SessionConfig {
        let mut config = SessionConfig::default();
        config.vault.memory_kib = 64;
        config.vault.iterations = 1;
        config
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn estimate_parsing() {
        let (blocks, rate) = parse_estimate("3=0.0002").unwrap();
        assert_eq!(blocks, 3);
        assert_eq!(rate, "0.0002".parse::<Decimal>().unwrap());
        assert!(parse_estimate("3").is_err());
        assert!(parse_estimate("x=0.1").is_err());
    }

    #[test]
    fn network_names() {
        assert_eq!(parse_network("Mainnet").unwrap(), NetworkId::Mainnet);
        assert_eq!(parse_network("test").unwrap(), NetworkId::Testnet);
        assert!(parse_network("signet").is_err());
    }

    #[test]
    fn convert_btc() {
        let cli = Cli::try_parse_from(["satchel", "convert", "--btc", "1.1"]).unwrap();
        let out = run(cli.command, &fast_config()).unwrap();
        assert_eq!(out["satoshi"], 110_000_000);
        assert_eq!(out["mbtc"], "1100.00000");
    }

    #[test]
    fn convert_needs_exactly_one_unit() {
        assert!(Cli::try_parse_from(["satchel", "convert"]).is_err());
        assert!(Cli::try_parse_from(["satchel", "convert", "--btc", "1", "--satoshi", "5"]).is_err());
    }

    #[test]
    fn parse_uri_reports_amount_and_params() {
        let cli = Cli::try_parse_from([
            "satchel",
            "parse-uri",
            "bitcoin:tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx?amount=1.1",
        ])
        .unwrap();
        let out = run(cli.command, &fast_config()).unwrap();
        assert_eq!(out["satoshi"], 110_000_000);
        assert_eq!(out["bip21_params"]["amount"], "1.1");
        assert_eq!(out["is_uri"], true);
    }

    #[test]
    fn fee_tiers_fill_gaps() {
        let cli = Cli::try_parse_from(["satchel", "fee-tiers", "--estimate", "2=0.0002"]).unwrap();
        let out = run(cli.command, &fast_config()).unwrap();
        let tiers = out.as_array().unwrap();
        assert_eq!(tiers.len(), satchel_wallet_core::NUM_FEE_ESTIMATES);
        assert_eq!(tiers[1], tiers[2]);
    }

    #[test]
    fn vault_round_trip() {
        let config = fast_config();
        let cli = Cli::try_parse_from([
            "satchel", "encrypt", "--password", "0102", "--text", "hello",
        ])
        .unwrap();
        let blob = run(cli.command, &config).unwrap();
        let ciphertext = blob["ciphertext"].as_str().unwrap();
        let salt = blob["salt"].as_str().unwrap();

        let cli = Cli::try_parse_from([
            "satchel",
            "decrypt",
            "--password",
            "0102",
            "--ciphertext",
            ciphertext,
            "--salt",
            salt,
        ])
        .unwrap();
        let out = run(cli.command, &config).unwrap();
        assert_eq!(out["text"], "hello");
    }
}
