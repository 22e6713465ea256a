// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Balance reconciliation engine.
//!
//! The [`Engine`] turns status transitions of bets, deposits and withdrawals
//! into balance mutations. For every [`TransitionRequest`] it:
//!
//! 1. Locks the record's account. Transitions on one account are serialized
//!    (first committer wins); different accounts proceed in parallel.
//! 2. Replays the stored outcome if the idempotency journal already holds the
//!    transition.
//! 3. Evaluates the rule table in [`crate::transition`].
//! 4. Commits the record, the balance and the journal entry as one unit.
//!
//! Transient storage failures are retried with bounded backoff inside the
//! account lock. Nothing is written unless the commit succeeds.

use crate::audit::{AuditEntry, AuditSink, TracingAuditSink};
use crate::balance::Balance;
use crate::base::{AccountId, RecordId};
use crate::config::EngineConfig;
use crate::error::{ReconcileError, StoreError};
use crate::guard::{AccountLocks, AppliedTransition, Reservation};
use crate::record::{LedgerRecord, RecordKind};
use crate::report::LedgerSummary;
use crate::store::{BalanceWrite, Commit, MemoryStorage, Storage};
use crate::transition::{Effect, TransitionKey, TransitionRequest, evaluate};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// How [`Engine::apply`] handled a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The transition was committed by this call.
    Applied,
    /// The transition had been committed before; the original outcome is returned.
    Replayed,
    /// The record was already in the requested state; nothing was written.
    Unchanged,
}

/// Balance and record after a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub balance: Balance,
    pub record: LedgerRecord,
    pub delta: Decimal,
    pub disposition: Disposition,
}

impl Reconciliation {
    fn replayed(applied: AppliedTransition) -> Self {
        Self {
            balance: applied.balance,
            record: applied.record,
            delta: applied.delta,
            disposition: Disposition::Replayed,
        }
    }
}

/// Why one attempt failed.
enum Failure {
    /// Final; reported to the caller as is.
    Rejected(ReconcileError),
    /// May succeed on the next attempt.
    Transient(StoreError),
}

impl From<ReconcileError> for Failure {
    fn from(error: ReconcileError) -> Self {
        Failure::Rejected(error)
    }
}

impl From<StoreError> for Failure {
    fn from(error: StoreError) -> Self {
        if error.is_transient() {
            Failure::Transient(error)
        } else {
            Failure::Rejected(ReconcileError::Unavailable {
                attempts: 1,
                reason: error.to_string(),
            })
        }
    }
}

/// Reconciliation engine over a [`Storage`].
///
/// # Invariants
///
/// - A balance never goes negative.
/// - A bet's stake is debited at most once and its payout credited at most once.
/// - Deposits and withdrawals leave `pending` at most once.
/// - A failed call leaves record, balance and journal exactly as they were.
pub struct Engine<S = MemoryStorage> {
    storage: S,
    locks: AccountLocks,
    config: EngineConfig,
    audit: Arc<dyn AuditSink>,
}

impl Engine<MemoryStorage> {
    /// Creates an engine over empty in-memory storage.
    pub fn new() -> Self {
        Self::with_storage(MemoryStorage::new())
    }
}

impl Default for Engine<MemoryStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Storage> Engine<S> {
    pub fn with_storage(storage: S) -> Self {
        Engine {
            storage,
            locks: AccountLocks::new(),
            config: EngineConfig::default(),
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registers a new pending bet, deposit or withdrawal.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::InvalidRecord`] - Non-positive amount, negative possible win,
    ///   or a record that is not pending.
    /// - [`ReconcileError::DuplicateRecord`] - The record ID is taken.
    pub fn intake(&self, record: LedgerRecord) -> Result<LedgerRecord, ReconcileError> {
        record.validate_intake()?;
        let deadline = Instant::now() + self.config.default_timeout;
        let stored = self.with_retry(deadline, || {
            self.storage
                .insert_record(record.clone())
                .map_err(|error| match error {
                    StoreError::DuplicateKey { .. } => {
                        Failure::Rejected(ReconcileError::DuplicateRecord(record.id().clone()))
                    }
                    other => other.into(),
                })
        })?;
        debug!(record = %stored.id(), kind = %stored.kind(), account = %stored.account_id(), "record taken in");
        Ok(stored)
    }

    /// Current balance of `account_id`; zero if it was never credited.
    pub fn balance(&self, account_id: &AccountId) -> Result<Balance, ReconcileError> {
        let deadline = Instant::now() + self.config.default_timeout;
        self.with_retry(deadline, || self.load_balance(account_id))
    }

    pub fn record(&self, record_id: &RecordId) -> Result<LedgerRecord, ReconcileError> {
        let deadline = Instant::now() + self.config.default_timeout;
        self.with_retry(deadline, || self.load_record(record_id))
    }

    /// Every stored balance.
    pub fn balances(&self) -> Result<Vec<Balance>, ReconcileError> {
        let deadline = Instant::now() + self.config.default_timeout;
        self.with_retry(deadline, || Ok(self.storage.balances()?))
    }

    /// Stored records, newest first, optionally only those of one kind.
    pub fn records(&self, kind: Option<RecordKind>) -> Result<Vec<LedgerRecord>, ReconcileError> {
        let deadline = Instant::now() + self.config.default_timeout;
        let mut records = self.with_retry(deadline, || Ok(self.storage.records()?))?;
        if let Some(kind) = kind {
            records.retain(|record| record.kind() == kind);
        }
        Ok(records)
    }

    /// Per-kind record totals and the sum of all balances.
    ///
    /// Records and balances are read one after the other, so transitions
    /// committed in between may be reflected in only one of them.
    pub fn summary(&self) -> Result<LedgerSummary, ReconcileError> {
        let records = self.records(None)?;
        let balances = self.balances()?;
        Ok(LedgerSummary::from_parts(&records, &balances))
    }

    /// Deletes a bet that is still pending and unaccepted, so no money has
    /// moved for it.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::RecordNotFound`] - Unknown record.
    /// - [`ReconcileError::InvalidTransition`] - Not a bet, or the bet was accepted or settled.
    pub fn delete_bet(&self, record_id: &RecordId) -> Result<LedgerRecord, ReconcileError> {
        let deadline = Instant::now() + self.config.default_timeout;
        let owner = self.with_retry(deadline, || {
            Ok(self.load_record(record_id)?.account_id().clone())
        })?;

        let deleted = self.locked(&owner, deadline, || {
            self.with_retry(deadline, || {
                let record = self.load_record(record_id)?;
                record.check_deletable()?;
                self.storage
                    .remove_record(record_id, record.version())
                    .map_err(|error| match error {
                        StoreError::NotFound { .. } => {
                            Failure::Rejected(ReconcileError::RecordNotFound(record_id.clone()))
                        }
                        other => other.into(),
                    })
            })
        })?;
        info!(record = %record_id, account = %owner, "bet deleted");
        Ok(deleted)
    }

    /// Applies one transition.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::RecordNotFound`] - Unknown record.
    /// - [`ReconcileError::InvalidTransition`] - Not allowed from the record's state.
    /// - [`ReconcileError::InsufficientFunds`] - The balance does not cover the debit.
    /// - [`ReconcileError::Unavailable`] - Storage failed through every retry.
    /// - [`ReconcileError::DeadlineExceeded`] - The request's deadline expired first.
    pub fn apply(&self, request: TransitionRequest) -> Result<Reconciliation, ReconcileError> {
        let deadline = request
            .deadline
            .unwrap_or_else(|| Instant::now() + self.config.default_timeout);
        let key = request.transition.key(&request.record_id);

        // The owning account is fixed at intake, so it can be read before locking.
        let owner = self.with_retry(deadline, || {
            Ok(self.load_record(&request.record_id)?.account_id().clone())
        })?;

        self.locked(&owner, deadline, || {
            self.with_retry(deadline, || self.attempt(&request, &key))
        })
    }

    /// Runs `operation` holding the account's lock.
    fn locked<T>(
        &self,
        account_id: &AccountId,
        deadline: Instant,
        operation: impl FnOnce() -> Result<T, ReconcileError>,
    ) -> Result<T, ReconcileError> {
        let lock = self.locks.handle(account_id);
        let result = match lock.try_lock_until(deadline) {
            Some(_guard) => operation(),
            None => {
                warn!(account = %account_id, "timed out waiting for account lock");
                Err(ReconcileError::DeadlineExceeded)
            }
        };
        self.locks.release(account_id, lock);
        result
    }

    /// One locked attempt: replay, evaluate, commit.
    fn attempt(
        &self,
        request: &TransitionRequest,
        key: &TransitionKey,
    ) -> Result<Reconciliation, Failure> {
        if let Reservation::Applied(applied) = self.storage.check_and_reserve(key)? {
            if applied.record.kind() != request.kind {
                return Err(ReconcileError::InvalidTransition {
                    record: request.record_id.clone(),
                    reason: format!(
                        "requested as a {} but stored as a {}",
                        request.kind,
                        applied.record.kind()
                    ),
                }
                .into());
            }
            debug!(transition = %key, "replaying applied transition");
            return Ok(Reconciliation::replayed(applied));
        }

        let record = self.load_record(&request.record_id)?;
        let balance = self.load_balance(record.account_id())?;

        let plan = match evaluate(&record, request.kind, &request.transition, &balance) {
            Ok(Effect::Apply(plan)) => plan,
            Ok(Effect::NoOp) => {
                debug!(transition = %key, state = %record.state_label(), "record already in requested state");
                return Ok(Reconciliation {
                    balance,
                    record,
                    delta: Decimal::ZERO,
                    disposition: Disposition::Unchanged,
                });
            }
            Err(error) => {
                warn!(transition = %key, error = %error, "transition refused");
                return Err(error.into());
            }
        };

        let balance_after = plan.balance.clone().unwrap_or_else(|| balance.clone());
        self.storage.commit(Commit {
            record: plan.record.clone(),
            expected_record: record.version(),
            balance: plan.balance.map(|next| BalanceWrite {
                balance: next,
                expected: balance.version,
            }),
            applied: AppliedTransition {
                key: key.clone(),
                record: plan.record.clone(),
                balance: balance_after.clone(),
                delta: plan.delta,
                applied_at: Utc::now(),
            },
        })?;

        info!(
            transition = %key,
            account = %balance_after.account_id,
            delta = %plan.delta,
            balance = %balance_after.amount,
            "transition applied"
        );
        self.audit.record(AuditEntry {
            record_id: request.record_id.clone(),
            kind: request.kind,
            account_id: balance_after.account_id.clone(),
            from_state: plan.from_state,
            to_state: plan.to_state,
            delta: plan.delta,
            balance: balance_after.amount,
            operator: request.operator.clone(),
            at: Utc::now(),
        });

        Ok(Reconciliation {
            balance: balance_after,
            record: plan.record,
            delta: plan.delta,
            disposition: Disposition::Applied,
        })
    }

    fn load_record(&self, record_id: &RecordId) -> Result<LedgerRecord, Failure> {
        self.storage.record(record_id).map_err(|error| match error {
            StoreError::NotFound { .. } => {
                Failure::Rejected(ReconcileError::RecordNotFound(record_id.clone()))
            }
            other => other.into(),
        })
    }

    /// A missing balance reads as zero; the first credit creates it.
    fn load_balance(&self, account_id: &AccountId) -> Result<Balance, Failure> {
        match self.storage.balance(account_id) {
            Ok(balance) => Ok(balance),
            Err(StoreError::NotFound { .. }) => Ok(Balance::empty(account_id.clone())),
            Err(other) => Err(other.into()),
        }
    }

    fn with_retry<T>(
        &self,
        deadline: Instant,
        mut operation: impl FnMut() -> Result<T, Failure>,
    ) -> Result<T, ReconcileError> {
        let policy = self.config.retry;
        let mut attempt = 0;
        loop {
            if Instant::now() >= deadline {
                return Err(ReconcileError::DeadlineExceeded);
            }
            attempt += 1;
            let error = match operation() {
                Ok(value) => return Ok(value),
                Err(Failure::Rejected(error)) => return Err(error),
                Err(Failure::Transient(error)) => error,
            };
            if attempt >= policy.attempts() {
                error!(attempts = attempt, error = %error, "storage retries exhausted");
                return Err(ReconcileError::Unavailable {
                    attempts: attempt,
                    reason: error.to_string(),
                });
            }
            let backoff = policy.backoff(attempt);
            if Instant::now() + backoff >= deadline {
                warn!(attempts = attempt, error = %error, "deadline reached while retrying");
                return Err(ReconcileError::DeadlineExceeded);
            }
            warn!(attempt, error = %error, backoff_ms = backoff.as_millis() as u64, "transient storage failure, retrying");
            thread::sleep(backoff);
        }
    }
}
