//! Two-factor authentication methods.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwoFactorMethod {
    Email,
    Sms,
    Phone,
    Gauth,
}

impl TwoFactorMethod {
    pub const ALL: [TwoFactorMethod; 4] = [Self::Email, Self::Sms, Self::Phone, Self::Gauth];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Phone => "phone",
            Self::Gauth => "gauth",
        }
    }

    /// Whether a code has to be sent to the user. Authenticator apps
    /// generate codes locally.
    pub fn delivers_code(&self) -> bool {
        !matches!(self, Self::Gauth)
    }
}

impl fmt::Display for TwoFactorMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TwoFactorMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown two-factor method: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for method in TwoFactorMethod::ALL {
            assert_eq!(method.as_str().parse::<TwoFactorMethod>(), Ok(method));
        }
        assert!("carrier-pigeon".parse::<TwoFactorMethod>().is_err());
    }

    #[test]
    fn only_gauth_skips_delivery() {
        assert!(TwoFactorMethod::Email.delivers_code());
        assert!(TwoFactorMethod::Sms.delivers_code());
        assert!(!TwoFactorMethod::Gauth.delivers_code());
    }
}
