//! Two-factor configuration and the authorization policy.
//!
//! Each method moves through `Disabled → PendingConfirmation → Enabled`.
//! Only enabled methods gate operations. The policy answers which
//! challenges an operation needs and applies a change once they are met;
//! it never mutates state for an operation that still needs a challenge.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use satchel_types::{FiatRate, SpendingLimits, TwoFactorMethod};

use crate::SessionError;

/// Shown instead of an enabled authenticator secret.
pub const MASKED_DATA: &str = "***";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodState {
    Disabled,
    PendingConfirmation,
    Enabled,
}

/// One method's settings as the caller sees them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodConfig {
    pub enabled: bool,
    pub confirmed: bool,
    /// Email address, phone number or authenticator secret.
    #[serde(default)]
    pub data: String,
}

impl MethodConfig {
    pub fn state(&self) -> MethodState {
        match (self.enabled, self.confirmed) {
            (true, true) => MethodState::Enabled,
            (true, false) => MethodState::PendingConfirmation,
            (false, _) => MethodState::Disabled,
        }
    }
}

/// A requested change to one method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoFactorChange {
    pub enabled: bool,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub data: String,
}

impl TwoFactorChange {
    pub fn enable(data: impl Into<String>) -> Self {
        Self {
            enabled: true,
            confirmed: true,
            data: data.into(),
        }
    }

    pub fn start(data: impl Into<String>) -> Self {
        Self {
            enabled: true,
            confirmed: false,
            data: data.into(),
        }
    }

    pub fn disable() -> Self {
        Self {
            enabled: false,
            confirmed: false,
            data: String::new(),
        }
    }

    /// Set the email used for notifications without enabling it for 2FA.
    pub fn set_email(address: impl Into<String>) -> Self {
        Self {
            enabled: false,
            confirmed: true,
            data: address.into(),
        }
    }
}

/// The session's two-factor configuration and spending limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoFactorConfig {
    pub methods: BTreeMap<TwoFactorMethod, MethodConfig>,
    #[serde(default)]
    pub limits: SpendingLimits,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            methods: TwoFactorMethod::ALL
                .into_iter()
                .map(|m| (m, MethodConfig::default()))
                .collect(),
            limits: SpendingLimits::default(),
        }
    }
}

impl TwoFactorConfig {
    pub fn method(&self, method: TwoFactorMethod) -> MethodConfig {
        self.methods.get(&method).cloned().unwrap_or_default()
    }

    /// Methods that currently gate operations, in a stable order.
    pub fn enabled_methods(&self) -> Vec<TwoFactorMethod> {
        self.methods
            .iter()
            .filter(|(_, config)| config.state() == MethodState::Enabled)
            .map(|(method, _)| *method)
            .collect()
    }

    pub fn any_enabled(&self) -> bool {
        !self.enabled_methods().is_empty()
    }

    /// The configuration with authenticator secrets of enabled methods masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if let Some(gauth) = config.methods.get_mut(&TwoFactorMethod::Gauth) {
            if gauth.state() == MethodState::Enabled {
                gauth.data = MASKED_DATA.to_string();
            }
        }
        config
    }
}

/// An operation that may need a two-factor challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatedAction {
    /// Spending `amount` satoshi of wallet funds.
    Spend { amount: u64 },
    ChangeLimits(SpendingLimits),
    ChangeMethod {
        method: TwoFactorMethod,
        change: TwoFactorChange,
    },
}

/// One challenge: a code from any of `methods` satisfies it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeStage {
    pub methods: Vec<TwoFactorMethod>,
}

impl ChallengeStage {
    fn any_of(methods: Vec<TwoFactorMethod>) -> Self {
        Self { methods }
    }

    fn via(method: TwoFactorMethod) -> Self {
        Self {
            methods: vec![method],
        }
    }
}

/// Decides which challenges an action needs and applies authorized changes.
#[derive(Clone, Debug, Default)]
pub struct AuthorizationPolicy {
    config: TwoFactorConfig,
}

impl AuthorizationPolicy {
    pub fn new(config: TwoFactorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TwoFactorConfig {
        &self.config
    }

    pub fn limits(&self) -> &SpendingLimits {
        &self.config.limits
    }

    pub fn requires_2fa(
        &self,
        action: &GatedAction,
        rate: Option<&FiatRate>,
    ) -> Result<bool, SessionError> {
        Ok(!self.challenges(action, rate)?.is_empty())
    }

    /// The challenges `action` needs, in the order they must be met. Empty
    /// when it can go ahead. Requests that can never succeed are errors.
    pub fn challenges(
        &self,
        action: &GatedAction,
        rate: Option<&FiatRate>,
    ) -> Result<Vec<ChallengeStage>, SessionError> {
        let enabled = self.config.enabled_methods();
        match action {
            GatedAction::Spend { amount } => {
                if enabled.is_empty() {
                    return Ok(Vec::new());
                }
                // A zero limit means every spend is challenged.
                let under_limit = self
                    .config
                    .limits
                    .threshold(rate)
                    .is_some_and(|limit| !limit.is_zero() && *amount <= limit.value());
                if under_limit {
                    Ok(Vec::new())
                } else {
                    Ok(vec![ChallengeStage::any_of(enabled)])
                }
            }
            GatedAction::ChangeLimits(new) => {
                if !enabled.is_empty() && self.config.limits.is_increase(new, rate) {
                    Ok(vec![ChallengeStage::any_of(enabled)])
                } else {
                    Ok(Vec::new())
                }
            }
            GatedAction::ChangeMethod { method, change } => {
                self.method_challenges(*method, change, enabled)
            }
        }
    }

    fn method_challenges(
        &self,
        method: TwoFactorMethod,
        change: &TwoFactorChange,
        enabled: Vec<TwoFactorMethod>,
    ) -> Result<Vec<ChallengeStage>, SessionError> {
        let current = self.config.method(method);
        let others: Vec<TwoFactorMethod> = enabled.into_iter().filter(|m| *m != method).collect();
        let guard = |stages: &mut Vec<ChallengeStage>| {
            if !others.is_empty() {
                stages.push(ChallengeStage::any_of(others.clone()));
            }
        };

        if is_set_email(method, change) {
            let mut stages = Vec::new();
            guard(&mut stages);
            return Ok(stages);
        }

        match (current.state(), change.enabled) {
            (MethodState::Enabled, true) => Err(SessionError::AlreadyEnabled(method)),
            (MethodState::Disabled, false) => Err(SessionError::AlreadyDisabled(method)),
            (MethodState::Enabled, false) => Ok(vec![ChallengeStage::via(method)]),
            // Abandoning a setup that never completed.
            (MethodState::PendingConfirmation, false) => Ok(Vec::new()),
            (MethodState::PendingConfirmation, true) if change.confirmed => {
                let mut stages = Vec::new();
                guard(&mut stages);
                stages.push(ChallengeStage::via(method));
                Ok(stages)
            }
            (_, true) => {
                if method == TwoFactorMethod::Gauth && change.data.is_empty() {
                    return Err(SessionError::InvalidTwoFactor(
                        "gauth needs the authenticator secret".to_string(),
                    ));
                }
                let mut stages = Vec::new();
                guard(&mut stages);
                // Going straight to enabled proves the method works unless
                // it is the first method on the wallet.
                if change.confirmed && !others.is_empty() {
                    stages.push(ChallengeStage::via(method));
                }
                Ok(stages)
            }
        }
    }

    /// Apply an authorized change to limits or methods. Spends leave the
    /// policy unchanged.
    pub fn apply(&mut self, action: &GatedAction) -> Result<(), SessionError> {
        match action {
            GatedAction::Spend { .. } => Ok(()),
            GatedAction::ChangeLimits(limits) => {
                info!(is_fiat = limits.is_fiat, "spending limits changed");
                self.config.limits = limits.clone();
                Ok(())
            }
            GatedAction::ChangeMethod { method, change } => self.apply_method(*method, change),
        }
    }

    fn apply_method(
        &mut self,
        method: TwoFactorMethod,
        change: &TwoFactorChange,
    ) -> Result<(), SessionError> {
        let entry = self.config.methods.entry(method).or_default();

        if is_set_email(method, change) {
            entry.confirmed = true;
            entry.data = change.data.clone();
            info!(%method, "notification email set");
            return Ok(());
        }

        match (entry.state(), change.enabled) {
            (MethodState::Enabled, true) => return Err(SessionError::AlreadyEnabled(method)),
            (MethodState::Disabled, false) => return Err(SessionError::AlreadyDisabled(method)),
            (_, true) => {
                entry.enabled = true;
                entry.confirmed = change.confirmed;
                if !change.data.is_empty() {
                    entry.data = change.data.clone();
                }
            }
            (_, false) => {
                entry.enabled = false;
                // Email stays usable for notifications.
                if method != TwoFactorMethod::Email {
                    entry.confirmed = false;
                    entry.data.clear();
                }
            }
        }
        info!(%method, state = ?entry.state(), "two-factor method changed");
        Ok(())
    }
}

fn is_set_email(method: TwoFactorMethod, change: &TwoFactorChange) -> bool {
    method == TwoFactorMethod::Email && !change.enabled && change.confirmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_types::Decimal;

    fn change(method: TwoFactorMethod, change: TwoFactorChange) -> GatedAction {
        GatedAction::ChangeMethod { method, change }
    }

    fn policy_with(methods: &[TwoFactorMethod], limit: u64) -> AuthorizationPolicy {
        let mut config = TwoFactorConfig::default();
        for m in methods {
            config.methods.insert(
                *m,
                MethodConfig {
                    enabled: true,
                    confirmed: true,
                    data: format!("{m}-data"),
                },
            );
        }
        config.limits = SpendingLimits::satoshi(limit);
        AuthorizationPolicy::new(config)
    }

    fn authorize(policy: &mut AuthorizationPolicy, action: &GatedAction) -> Vec<ChallengeStage> {
        let stages = policy.challenges(action, None).unwrap();
        policy.apply(action).unwrap();
        stages
    }

    #[test]
    fn first_method_enables_without_challenge() {
        let mut policy = AuthorizationPolicy::default();
        let stages = authorize(
            &mut policy,
            &change(TwoFactorMethod::Email, TwoFactorChange::enable("a@b.c")),
        );
        assert!(stages.is_empty());
        assert_eq!(policy.config().method(TwoFactorMethod::Email).state(), MethodState::Enabled);
    }

    #[test]
    fn pending_then_confirmed() {
        let mut policy = AuthorizationPolicy::default();
        let stages = authorize(
            &mut policy,
            &change(TwoFactorMethod::Sms, TwoFactorChange::start("+100")),
        );
        assert!(stages.is_empty());
        assert_eq!(
            policy.config().method(TwoFactorMethod::Sms).state(),
            MethodState::PendingConfirmation
        );
        assert!(!policy.config().any_enabled());

        let confirm = change(TwoFactorMethod::Sms, TwoFactorChange::enable(""));
        assert_eq!(
            policy.challenges(&confirm, None).unwrap(),
            vec![ChallengeStage::via(TwoFactorMethod::Sms)]
        );
        policy.apply(&confirm).unwrap();
        let sms = policy.config().method(TwoFactorMethod::Sms);
        assert_eq!(sms.state(), MethodState::Enabled);
        assert_eq!(sms.data, "+100");
    }

    #[test]
    fn enabling_second_method_needs_existing_then_own_code() {
        let policy = policy_with(&[TwoFactorMethod::Email], 0);
        let stages = policy
            .challenges(&change(TwoFactorMethod::Sms, TwoFactorChange::enable("+100")), None)
            .unwrap();
        assert_eq!(
            stages,
            vec![
                ChallengeStage::via(TwoFactorMethod::Email),
                ChallengeStage::via(TwoFactorMethod::Sms)
            ]
        );
    }

    #[test]
    fn already_enabled_and_disabled_are_errors() {
        let policy = policy_with(&[TwoFactorMethod::Email], 0);
        assert!(matches!(
            policy.challenges(&change(TwoFactorMethod::Email, TwoFactorChange::enable("x")), None),
            Err(SessionError::AlreadyEnabled(TwoFactorMethod::Email))
        ));
        assert!(matches!(
            policy.challenges(&change(TwoFactorMethod::Sms, TwoFactorChange::disable()), None),
            Err(SessionError::AlreadyDisabled(TwoFactorMethod::Sms))
        ));
    }

    #[test]
    fn disabling_sole_method_at_default_limit_is_challenged() {
        let mut policy = policy_with(&[TwoFactorMethod::Gauth], 0);
        let disable = change(TwoFactorMethod::Gauth, TwoFactorChange::disable());
        assert_eq!(
            policy.challenges(&disable, None).unwrap(),
            vec![ChallengeStage::via(TwoFactorMethod::Gauth)]
        );
        policy.apply(&disable).unwrap();
        assert!(!policy.config().any_enabled());
        assert_eq!(policy.config().method(TwoFactorMethod::Gauth), MethodConfig::default());
    }

    #[test]
    fn disabled_email_stays_confirmed() {
        let mut policy = policy_with(&[TwoFactorMethod::Email], 0);
        policy
            .apply(&change(TwoFactorMethod::Email, TwoFactorChange::disable()))
            .unwrap();
        let email = policy.config().method(TwoFactorMethod::Email);
        assert!(!email.enabled);
        assert!(email.confirmed);
        assert_eq!(email.data, "email-data");
    }

    #[test]
    fn set_email_does_not_enable() {
        let mut policy = AuthorizationPolicy::default();
        let stages = authorize(
            &mut policy,
            &change(TwoFactorMethod::Email, TwoFactorChange::set_email("n@b.c")),
        );
        assert!(stages.is_empty());
        let email = policy.config().method(TwoFactorMethod::Email);
        assert_eq!(email.state(), MethodState::Disabled);
        assert!(email.confirmed);
        assert_eq!(email.data, "n@b.c");
        assert!(!policy.config().any_enabled());
    }

    #[test]
    fn limit_increase_needs_2fa_decrease_does_not() {
        let policy = policy_with(&[TwoFactorMethod::Email, TwoFactorMethod::Sms], 10_000);
        let up = GatedAction::ChangeLimits(SpendingLimits::satoshi(20_000));
        let down = GatedAction::ChangeLimits(SpendingLimits::satoshi(5_000));
        assert!(policy.requires_2fa(&up, None).unwrap());
        assert_eq!(
            policy.challenges(&up, None).unwrap(),
            vec![ChallengeStage::any_of(vec![TwoFactorMethod::Email, TwoFactorMethod::Sms])]
        );
        assert!(!policy.requires_2fa(&down, None).unwrap());
    }

    #[test]
    fn limits_free_without_2fa() {
        let policy = AuthorizationPolicy::default();
        let up = GatedAction::ChangeLimits(SpendingLimits::satoshi(1_000_000));
        assert!(!policy.requires_2fa(&up, None).unwrap());
    }

    #[test]
    fn fiat_limit_switch_without_rate_is_an_increase() {
        let policy = policy_with(&[TwoFactorMethod::Email], 10_000);
        let fiat = GatedAction::ChangeLimits(SpendingLimits::fiat(Decimal::from_integer(5)));
        assert!(policy.requires_2fa(&fiat, None).unwrap());
    }

    #[test]
    fn spends_over_limit_are_challenged() {
        let policy = policy_with(&[TwoFactorMethod::Email], 10_000);
        assert!(!policy.requires_2fa(&GatedAction::Spend { amount: 10_000 }, None).unwrap());
        assert!(policy.requires_2fa(&GatedAction::Spend { amount: 10_001 }, None).unwrap());

        let zero_limit = policy_with(&[TwoFactorMethod::Email], 0);
        assert!(zero_limit.requires_2fa(&GatedAction::Spend { amount: 1 }, None).unwrap());

        let no_2fa = AuthorizationPolicy::default();
        assert!(!no_2fa.requires_2fa(&GatedAction::Spend { amount: u64::MAX }, None).unwrap());
    }

    #[test]
    fn fiat_limit_without_rate_challenges_every_spend() {
        let mut policy = policy_with(&[TwoFactorMethod::Email], 0);
        policy
            .apply(&GatedAction::ChangeLimits(SpendingLimits::fiat(Decimal::from_integer(100))))
            .unwrap();
        assert!(policy.requires_2fa(&GatedAction::Spend { amount: 1 }, None).unwrap());
        let rate = FiatRate::new("USD", Decimal::from_integer(10_000));
        // 100 USD at 10000 USD/BTC is one million satoshi
        assert!(!policy.requires_2fa(&GatedAction::Spend { amount: 1_000_000 }, Some(&rate)).unwrap());
    }

    #[test]
    fn gauth_secret_is_masked_once_enabled() {
        let mut policy = AuthorizationPolicy::default();
        policy
            .apply(&change(TwoFactorMethod::Gauth, TwoFactorChange::enable("otpauth://totp/x")))
            .unwrap();
        let redacted = policy.config().redacted();
        assert_eq!(redacted.method(TwoFactorMethod::Gauth).data, MASKED_DATA);
        assert_eq!(policy.config().method(TwoFactorMethod::Gauth).data, "otpauth://totp/x");
    }

    #[test]
    fn gauth_needs_secret() {
        let policy = AuthorizationPolicy::default();
        assert!(matches!(
            policy.challenges(&change(TwoFactorMethod::Gauth, TwoFactorChange::enable("")), None),
            Err(SessionError::InvalidTwoFactor(_))
        ));
    }
}
