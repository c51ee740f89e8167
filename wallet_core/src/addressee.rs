//! Addressee resolution: BIP21 URIs, bare addresses and amount fields.
//!
//! The rules, in the order they are applied:
//! - a `bitcoin:` URI is split into address and query parameters; any
//!   `req-*` parameter fails with `UnknownRequiredBip21Parameter`
//! - the address must be valid for the session's network
//! - an `amount` in the URI wins over explicit amount fields and the URI
//!   parameters are returned as `bip21-params`
//! - otherwise exactly one explicit amount field must be present

use bitcoin::{Address, ScriptBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use satchel_types::amount::to_satoshi;
use satchel_types::{AmountFields, AmountInput, Denomination, ErrorCode, FiatRate, NetworkId};

pub const BIP21_SCHEME: &str = "bitcoin";
const REQUIRED_PREFIX: &str = "req-";

/// A payment target as the caller supplies it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addressee {
    /// A bare address or a BIP21 URI.
    pub address: String,
    #[serde(flatten)]
    pub amount: AmountFields,
}

impl Addressee {
    pub fn new(address: impl Into<String>, amount: AmountFields) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }

    pub fn without_amount(address: impl Into<String>) -> Self {
        Self::new(address, AmountFields::default())
    }
}

/// An addressee after validation, with its amount in satoshi.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAddressee {
    pub address: String,
    pub satoshi: u64,
    #[serde(
        rename = "bip21-params",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub bip21_params: Option<BTreeMap<String, String>>,
    pub script_pubkey: ScriptBuf,
}

/// The parts of a `bitcoin:` URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bip21Uri {
    pub address: String,
    pub params: BTreeMap<String, String>,
}

/// Split a BIP21 URI. Returns `None` when `input` has no URI scheme.
pub fn parse_bip21(input: &str) -> Result<Option<Bip21Uri>, ErrorCode> {
    let input = input.trim();
    let Some((scheme, rest)) = input.split_once(':') else {
        return Ok(None);
    };
    if !scheme.eq_ignore_ascii_case(BIP21_SCHEME) {
        return Err(ErrorCode::InvalidAddress);
    }

    let (address, query) = rest.split_once('?').unwrap_or((rest, ""));
    let mut params = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if key.starts_with(REQUIRED_PREFIX) {
            return Err(ErrorCode::UnknownRequiredBip21Parameter);
        }
        params.insert(key.into_owned(), value.into_owned());
    }

    Ok(Some(Bip21Uri {
        address: address.to_string(),
        params,
    }))
}

/// Parse `address` and check it belongs to `network`.
pub fn validate_address(address: &str, network: NetworkId) -> Result<Address, ErrorCode> {
    Address::from_str(address)
        .map_err(|_| ErrorCode::InvalidAddress)?
        .require_network(network.into())
        .map_err(|_| ErrorCode::InvalidAddress)
}

/// Resolve one addressee.
///
/// With `send_all` a missing amount is allowed and resolves to zero; the
/// builder fills in the real value.
pub fn resolve_addressee(
    addressee: &Addressee,
    network: NetworkId,
    rate: Option<&FiatRate>,
    send_all: bool,
) -> Result<ResolvedAddressee, ErrorCode> {
    let uri = parse_bip21(&addressee.address)?;
    let address_str = uri
        .as_ref()
        .map(|u| u.address.as_str())
        .unwrap_or_else(|| addressee.address.trim());
    let address = validate_address(address_str, network)?;

    let uri_amount = uri.as_ref().and_then(|u| u.params.get("amount")).cloned();
    let (satoshi, bip21_params) = match uri_amount {
        Some(amount) => {
            let btc = Denomination::Btc.parse_amount(&amount)?;
            let sat = to_satoshi(&AmountInput::Unit(Denomination::Btc, btc), None)?;
            (sat.value(), uri.map(|u| u.params))
        }
        None => match addressee.amount.single()? {
            Some(input) => (to_satoshi(&input, rate)?.value(), None),
            None if send_all => (0, None),
            None => return Err(ErrorCode::NoAmountSpecified),
        },
    };

    Ok(ResolvedAddressee {
        address: address.to_string(),
        satoshi,
        bip21_params,
        script_pubkey: address.script_pubkey(),
    })
}
