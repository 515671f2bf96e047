//! Failed unlock attempt limiting.
//!
//! After `max_failures` consecutive wrong passwords for an address, further
//! attempts are refused for a lockout period that doubles with every
//! lockout, up to `max_lockout_secs`. A successful unlock clears the
//! address's history.
//!
//! Deadlines are wall-clock times so the history can be persisted with
//! [`UnlockThrottle::records`] and restored with
//! [`UnlockThrottle::with_records`] by the next process.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use launcher_crypto_address::Address;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Upper bound accepted for `max_lockout_secs` (one week).
pub const MAX_LOCKOUT_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Consecutive failures before a lockout. Zero disables throttling.
    pub max_failures: u32,
    pub base_lockout_secs: u64,
    pub max_lockout_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            base_lockout_secs: 30,
            max_lockout_secs: 15 * 60,
        }
    }
}

impl ThrottleConfig {
    pub fn disabled() -> Self {
        Self {
            max_failures: 0,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_failures > 0
    }

    fn lockout_duration(&self, lockouts: u32) -> Duration {
        let factor = 1u64
            .checked_shl(lockouts.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let secs = self
            .base_lockout_secs
            .saturating_mul(factor)
            .min(self.max_lockout_secs)
            .min(MAX_LOCKOUT_SECS);
        Duration::from_secs(secs)
    }
}

/// Persisted attempt history for one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub address: Address,
    #[serde(default)]
    pub failures: u32,
    #[serde(default)]
    pub lockouts: u32,
    #[serde(default)]
    pub locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone)]
struct AttemptState {
    failures: u32,
    lockouts: u32,
    locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct UnlockThrottle {
    config: ThrottleConfig,
    attempts: HashMap<Address, AttemptState>,
}

impl UnlockThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            attempts: HashMap::new(),
        }
    }

    /// Restore history saved by [`UnlockThrottle::records`].
    pub fn with_records(
        config: ThrottleConfig,
        records: impl IntoIterator<Item = AttemptRecord>,
    ) -> Self {
        let attempts = records
            .into_iter()
            .map(|r| {
                let state = AttemptState {
                    failures: r.failures,
                    lockouts: r.lockouts,
                    locked_until: r.locked_until,
                };
                (r.address, state)
            })
            .collect();
        Self { config, attempts }
    }

    /// Current history, sorted by address.
    pub fn records(&self) -> Vec<AttemptRecord> {
        let mut records: Vec<AttemptRecord> = self
            .attempts
            .iter()
            .map(|(address, state)| AttemptRecord {
                address: *address,
                failures: state.failures,
                lockouts: state.lockouts,
                locked_until: state.locked_until,
            })
            .collect();
        records.sort_by_key(|r| r.address);
        records
    }

    /// Refuse the attempt if `address` is currently locked out.
    pub fn check(&mut self, address: &Address, now: DateTime<Utc>) -> Result<()> {
        if !self.config.is_enabled() {
            return Ok(());
        }
        let Some(state) = self.attempts.get_mut(address) else {
            return Ok(());
        };
        match state.locked_until {
            Some(until) if until > now => Err(Error::RateLimited {
                retry_after: (until - now).to_std().unwrap_or_default(),
            }),
            Some(_) => {
                state.locked_until = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn record_failure(&mut self, address: &Address, now: DateTime<Utc>) {
        if !self.config.is_enabled() {
            return;
        }
        let state = self.attempts.entry(*address).or_default();
        state.failures += 1;
        if state.failures >= self.config.max_failures {
            state.failures = 0;
            state.lockouts = state.lockouts.saturating_add(1);
            let lockout = self.config.lockout_duration(state.lockouts);
            state.locked_until = Some(deadline(now, lockout));
            warn!(
                %address,
                "Too many failed unlock attempts, locked for {}s",
                lockout.as_secs()
            );
        }
    }

    pub fn record_success(&mut self, address: &Address) {
        self.attempts.remove(address);
    }

    /// Forget the history for an address that no longer exists.
    pub fn forget(&mut self, address: &Address) {
        self.attempts.remove(address);
    }
}

/// `now + lockout`, saturating at the latest representable time.
fn deadline(now: DateTime<Utc>, lockout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lockout)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
