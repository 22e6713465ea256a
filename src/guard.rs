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

//! Idempotency and concurrency guards.
//!
//! [`AccountLocks`] serializes transitions per account. [`IdempotencyJournal`]
//! remembers which transitions already produced their balance effect so a
//! retried request replays the stored outcome instead of applying it again.

use crate::balance::Balance;
use crate::base::AccountId;
use crate::record::LedgerRecord;
use crate::transition::TransitionKey;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Outcome stored for a transition that has been committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransition {
    pub key: TransitionKey,
    /// Record as committed by the transition.
    pub record: LedgerRecord,
    /// Balance right after the transition.
    pub balance: Balance,
    pub delta: Decimal,
    pub applied_at: DateTime<Utc>,
}

/// Result of [`IdempotencyJournal::check_and_reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// Not applied yet. The caller's commit must write the journal entry.
    Fresh,
    /// Already applied; carries the original outcome.
    Applied(AppliedTransition),
}

/// Write-once map of applied transitions.
#[derive(Debug, Default)]
pub struct IdempotencyJournal {
    pub(crate) entries: DashMap<TransitionKey, AppliedTransition>,
}

impl IdempotencyJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks `key` up without writing anything.
    ///
    /// [`Reservation::Fresh`] is not a claim on the key: two callers can both
    /// see it. The entry is only written by [`crate::Storage::commit`], which
    /// must refuse a key that is already present.
    pub fn check_and_reserve(&self, key: &TransitionKey) -> Reservation {
        match self.entries.get(key) {
            Some(applied) => Reservation::Applied(applied.clone()),
            None => Reservation::Fresh,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One mutex per account, created on first use and dropped again once no
/// caller holds it.
///
/// The map only hands out `Arc`s; waiting on a mutex never holds a map shard.
/// Every [`AccountLocks::handle`] must be given back through
/// [`AccountLocks::release`].
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mutex guarding `account_id`.
    pub fn handle(&self, account_id: &AccountId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(account_id) {
            return Arc::clone(&lock);
        }
        Arc::clone(&self.locks.entry(account_id.clone()).or_default())
    }

    /// Returns a handle and evicts the account's mutex if nobody else holds it.
    ///
    /// Handles are cloned under the map shard lock and the eviction check runs
    /// under it too, so a mutex still in use is never replaced.
    pub fn release(&self, account_id: &AccountId, handle: Arc<Mutex<()>>) {
        drop(handle);
        self.locks
            .remove_if(account_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of accounts with a live mutex.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
