//! Gated operations waiting on two-factor challenges.
//!
//! An operation submitted while a challenge is due is parked here under a
//! [`PendingId`]. The caller picks a method for the current challenge,
//! answers it, and the operation runs once every challenge is met. Until
//! then it changes nothing; cancelling, running out of attempts or letting
//! the challenge time out discards it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use satchel_types::{SpendingLimits, TwoFactorMethod};
use satchel_wallet_core::ResolvedTransaction;

use crate::twofactor::{ChallengeStage, GatedAction, TwoFactorChange, TwoFactorConfig};
use crate::SessionError;

pub type PendingId = u64;

/// An operation that goes through the authorization policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    SendTransaction(Box<ResolvedTransaction>),
    ChangeLimits(SpendingLimits),
    ChangeTwoFactor {
        method: TwoFactorMethod,
        change: TwoFactorChange,
    },
}

impl Operation {
    /// What the policy judges. Sweeps spend no wallet funds and are not
    /// gated.
    pub fn gated_action(&self) -> Option<GatedAction> {
        match self {
            Self::SendTransaction(tx) if tx.is_sweep => None,
            Self::SendTransaction(tx) => Some(GatedAction::Spend {
                amount: tx.spend_amount(),
            }),
            Self::ChangeLimits(limits) => Some(GatedAction::ChangeLimits(limits.clone())),
            Self::ChangeTwoFactor { method, change } => Some(GatedAction::ChangeMethod {
                method: *method,
                change: change.clone(),
            }),
        }
    }

    /// Name passed to the backend when a code is requested.
    pub fn action_name(&self) -> &'static str {
        match self {
            Self::SendTransaction(tx) if tx.replaces.is_some() => "bump_fee",
            Self::SendTransaction(_) => "send_raw_tx",
            Self::ChangeLimits(_) => "change_tx_limits",
            Self::ChangeTwoFactor { change, .. } if change.enabled => "enable_2fa",
            Self::ChangeTwoFactor { change, .. } if change.confirmed => "set_email",
            Self::ChangeTwoFactor { .. } => "disable_2fa",
        }
    }
}

/// The outcome of an operation that ran.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationResult {
    /// Broadcast; `txhash` is set.
    Sent(Box<ResolvedTransaction>),
    LimitsChanged(SpendingLimits),
    TwoFactorChanged(TwoFactorConfig),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChallengeStatus {
    /// Pick one of `methods` with `request_code`.
    RequestCode { methods: Vec<TwoFactorMethod> },
    /// Answer with the code `method` produced. `attempts_remaining` is
    /// absent for authenticator apps, which are not attempt-limited.
    ResolveCode {
        method: TwoFactorMethod,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attempts_remaining: Option<u32>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submitted {
    Done(OperationResult),
    Pending { id: PendingId, status: ChallengeStatus },
}

#[derive(Debug)]
pub struct PendingOperation {
    pub id: PendingId,
    pub operation: Operation,
    stages: VecDeque<ChallengeStage>,
    method: Option<TwoFactorMethod>,
    attempts_remaining: u32,
    expires_at: Instant,
}

impl PendingOperation {
    fn status(&self) -> ChallengeStatus {
        match self.method {
            Some(method) => ChallengeStatus::ResolveCode {
                method,
                attempts_remaining: method.delivers_code().then_some(self.attempts_remaining),
            },
            None => ChallengeStatus::RequestCode {
                methods: self
                    .stages
                    .front()
                    .map(|stage| stage.methods.clone())
                    .unwrap_or_default(),
            },
        }
    }
}

/// What happened after a correct code.
#[derive(Debug)]
pub enum Advance {
    /// Another challenge is due.
    Next(ChallengeStatus),
    /// Every challenge is met; the operation is handed back to run.
    Complete(PendingOperation),
}

#[derive(Debug)]
pub struct PendingOperations {
    next_id: PendingId,
    operations: BTreeMap<PendingId, PendingOperation>,
    attempts: u32,
    timeout: Duration,
}

impl PendingOperations {
    pub fn new(attempts: u32, timeout: Duration) -> Self {
        Self {
            next_id: 1,
            operations: BTreeMap::new(),
            attempts,
            timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Park `operation` behind `stages`, which must not be empty.
    pub fn insert(
        &mut self,
        operation: Operation,
        stages: Vec<ChallengeStage>,
        now: Instant,
    ) -> (PendingId, ChallengeStatus) {
        let id = self.next_id;
        self.next_id += 1;
        let pending = PendingOperation {
            id,
            operation,
            stages: stages.into(),
            method: None,
            attempts_remaining: self.attempts,
            expires_at: now + self.timeout,
        };
        let status = pending.status();
        self.operations.insert(id, pending);
        (id, status)
    }

    /// Choose `method` for the current challenge. Requesting again restarts
    /// the attempt count.
    pub fn request_code(
        &mut self,
        id: PendingId,
        method: TwoFactorMethod,
        now: Instant,
    ) -> Result<(&Operation, ChallengeStatus), SessionError> {
        let attempts = self.attempts;
        let pending = self.live(id, now)?;
        let allowed = pending
            .stages
            .front()
            .is_some_and(|stage| stage.methods.contains(&method));
        if !allowed {
            return Err(SessionError::InvalidTwoFactor(format!(
                "{method} cannot answer this challenge"
            )));
        }
        pending.method = Some(method);
        pending.attempts_remaining = attempts;
        let status = pending.status();
        Ok((&pending.operation, status))
    }

    /// The method whose code is expected next.
    pub fn awaiting(&mut self, id: PendingId, now: Instant) -> Result<TwoFactorMethod, SessionError> {
        let pending = self.live(id, now)?;
        match pending.method {
            Some(method) => Ok(method),
            None => Err(SessionError::AuthorizationRequired {
                methods: pending
                    .stages
                    .front()
                    .map(|stage| stage.methods.clone())
                    .unwrap_or_default(),
            }),
        }
    }

    /// Record a correct code.
    pub fn succeed(&mut self, id: PendingId) -> Result<Advance, SessionError> {
        let pending = self
            .operations
            .get_mut(&id)
            .ok_or(SessionError::UnknownPendingOperation(id))?;
        pending.stages.pop_front();
        pending.method = None;
        pending.attempts_remaining = self.attempts;
        if !pending.stages.is_empty() {
            return Ok(Advance::Next(pending.status()));
        }
        self.operations
            .remove(&id)
            .map(Advance::Complete)
            .ok_or(SessionError::UnknownPendingOperation(id))
    }

    /// Record a wrong code and return the error for the caller. The
    /// operation is dropped once its attempts run out.
    pub fn fail(&mut self, id: PendingId) -> SessionError {
        let Some(pending) = self.operations.get_mut(&id) else {
            return SessionError::UnknownPendingOperation(id);
        };
        let Some(method) = pending.method else {
            return SessionError::AuthorizationDenied {
                attempts_remaining: pending.attempts_remaining,
            };
        };
        if method.delivers_code() {
            pending.attempts_remaining = pending.attempts_remaining.saturating_sub(1);
        }
        let attempts_remaining = pending.attempts_remaining;
        warn!(id, %method, attempts_remaining, "two-factor code rejected");
        if attempts_remaining == 0 {
            self.operations.remove(&id);
        }
        SessionError::AuthorizationDenied { attempts_remaining }
    }

    pub fn cancel(&mut self, id: PendingId) -> Result<(), SessionError> {
        self.operations
            .remove(&id)
            .map(|_| ())
            .ok_or(SessionError::UnknownPendingOperation(id))
    }

    /// Drop operations whose challenge has timed out.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.operations.len();
        self.operations.retain(|_, pending| pending.expires_at > now);
        before - self.operations.len()
    }

    fn live(&mut self, id: PendingId, now: Instant) -> Result<&mut PendingOperation, SessionError> {
        let expired = match self.operations.get(&id) {
            None => return Err(SessionError::UnknownPendingOperation(id)),
            Some(pending) => pending.expires_at <= now,
        };
        if expired {
            self.operations.remove(&id);
            warn!(id, "two-factor challenge timed out");
            return Err(SessionError::AuthorizationDenied {
                attempts_remaining: 0,
            });
        }
        self.operations
            .get_mut(&id)
            .ok_or(SessionError::UnknownPendingOperation(id))
    }
}
