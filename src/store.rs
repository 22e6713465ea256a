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

//! Balance, record and journal storage.
//!
//! [`AccountStore`] and [`RecordStore`] are passive keyed maps with
//! compare-and-swap updates; they know nothing about each other. The
//! [`Storage`] trait groups them with the [`IdempotencyJournal`] behind one
//! seam whose [`Storage::commit`] writes a record, a balance and a journal
//! entry as a single unit.

use crate::balance::Balance;
use crate::base::{AccountId, RecordId, Version};
use crate::error::StoreError;
use crate::guard::{AppliedTransition, IdempotencyJournal, Reservation};
use crate::record::LedgerRecord;
use crate::transition::TransitionKey;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

fn balance_key(account_id: &AccountId) -> String {
    format!("balance/{account_id}")
}

fn record_key(record_id: &RecordId) -> String {
    format!("record/{record_id}")
}

fn check_version(key: impl FnOnce() -> String, expected: Version, actual: Version) -> Result<(), StoreError> {
    if expected == actual {
        Ok(())
    } else {
        Err(StoreError::VersionConflict {
            key: key(),
            expected,
            actual,
        })
    }
}

/// A balance write, valid only if the stored balance is still at `expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceWrite {
    pub balance: Balance,
    pub expected: Version,
}

/// Everything one transition writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub record: LedgerRecord,
    /// Version the stored record must still have.
    pub expected_record: Version,
    /// `None` when the transition moves no money.
    pub balance: Option<BalanceWrite>,
    pub applied: AppliedTransition,
}

/// Durable state the engine reconciles.
///
/// Implementations must make [`Storage::commit`] all-or-nothing: either the
/// record, the balance and the journal entry are all written, or none is.
pub trait Storage: Send + Sync {
    /// Returns [`StoreError::NotFound`] for an account that was never credited.
    fn balance(&self, account_id: &AccountId) -> Result<Balance, StoreError>;

    fn record(&self, record_id: &RecordId) -> Result<LedgerRecord, StoreError>;

    /// Stores a new record at its first version and returns it.
    fn insert_record(&self, record: LedgerRecord) -> Result<LedgerRecord, StoreError>;

    /// Looks `key` up in the journal. This is a read: two callers can both see
    /// [`Reservation::Fresh`] for the same key, so [`Storage::commit`] must
    /// reject a key that is already journaled.
    fn check_and_reserve(&self, key: &TransitionKey) -> Result<Reservation, StoreError>;

    /// Writes the record, the balance and the journal entry, or nothing.
    ///
    /// Fails with [`StoreError::VersionConflict`] if the record or the balance
    /// moved past its expected version, or if the journal already holds
    /// `commit.applied.key`.
    fn commit(&self, commit: Commit) -> Result<(), StoreError>;

    /// Every stored balance.
    fn balances(&self) -> Result<Vec<Balance>, StoreError>;

    /// Every stored record, newest first.
    fn records(&self) -> Result<Vec<LedgerRecord>, StoreError>;

    /// Removes a record that is still at `expected` and returns it.
    fn remove_record(&self, record_id: &RecordId, expected: Version) -> Result<LedgerRecord, StoreError>;
}

/// One balance per account.
#[derive(Debug, Default)]
pub struct AccountStore {
    entries: DashMap<AccountId, Balance>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account_id: &AccountId) -> Result<Balance, StoreError> {
        self.entries
            .get(account_id)
            .map(|balance| balance.clone())
            .ok_or_else(|| StoreError::NotFound {
                key: balance_key(account_id),
            })
    }

    /// Replaces the balance if it is still at `expected`. A missing balance is at [`Version::ZERO`].
    pub fn compare_and_swap(&self, expected: Version, balance: Balance) -> Result<(), StoreError> {
        let entry = self.entries.entry(balance.account_id.clone());
        let actual = match &entry {
            Entry::Occupied(stored) => stored.get().version,
            Entry::Vacant(_) => Version::ZERO,
        };
        check_version(|| balance_key(&balance.account_id), expected, actual)?;
        entry.insert(balance);
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Balance> {
        let mut balances: Vec<Balance> = self.entries.iter().map(|b| b.clone()).collect();
        balances.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        balances
    }
}

/// Bets, deposits and withdrawals keyed by record ID.
#[derive(Debug, Default)]
pub struct RecordStore {
    entries: DashMap<RecordId, LedgerRecord>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, record_id: &RecordId) -> Result<LedgerRecord, StoreError> {
        self.entries
            .get(record_id)
            .map(|record| record.clone())
            .ok_or_else(|| StoreError::NotFound {
                key: record_key(record_id),
            })
    }

    pub fn insert(&self, mut record: LedgerRecord) -> Result<LedgerRecord, StoreError> {
        match self.entries.entry(record.id().clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateKey {
                key: record_key(record.id()),
            }),
            Entry::Vacant(slot) => {
                record.set_version(Version::ZERO.next());
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    pub fn remove(&self, record_id: &RecordId, expected: Version) -> Result<LedgerRecord, StoreError> {
        match self.entries.entry(record_id.clone()) {
            Entry::Occupied(stored) => {
                check_version(|| record_key(record_id), expected, stored.get().version())?;
                Ok(stored.remove())
            }
            Entry::Vacant(_) => Err(StoreError::NotFound {
                key: record_key(record_id),
            }),
        }
    }

    /// Every record, newest first.
    pub fn snapshot(&self) -> Vec<LedgerRecord> {
        let mut records: Vec<LedgerRecord> = self.entries.iter().map(|r| r.clone()).collect();
        records.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        records
    }

    pub fn compare_and_swap(&self, expected: Version, record: LedgerRecord) -> Result<(), StoreError> {
        let mut stored = self
            .entries
            .get_mut(record.id())
            .ok_or_else(|| StoreError::NotFound {
                key: record_key(record.id()),
            })?;
        check_version(|| record_key(record.id()), expected, stored.version())?;
        *stored = record;
        Ok(())
    }
}

/// In-process [`Storage`].
///
/// A commit holds the record's, the balance's and the journal entry's map
/// slots at the same time, always acquired in that order, so validation and
/// writes happen without any other commit touching the same keys.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    accounts: AccountStore,
    records: RecordStore,
    journal: IdempotencyJournal,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn journal(&self) -> &IdempotencyJournal {
        &self.journal
    }
}

impl Storage for MemoryStorage {
    fn balance(&self, account_id: &AccountId) -> Result<Balance, StoreError> {
        self.accounts.get(account_id)
    }

    fn record(&self, record_id: &RecordId) -> Result<LedgerRecord, StoreError> {
        self.records.get(record_id)
    }

    fn insert_record(&self, record: LedgerRecord) -> Result<LedgerRecord, StoreError> {
        self.records.insert(record)
    }

    fn check_and_reserve(&self, key: &TransitionKey) -> Result<Reservation, StoreError> {
        Ok(self.journal.check_and_reserve(key))
    }

    fn commit(&self, commit: Commit) -> Result<(), StoreError> {
        let Commit {
            record,
            expected_record,
            balance,
            applied,
        } = commit;

        let record_id = record.id().clone();
        let mut stored_record =
            self.records
                .entries
                .get_mut(&record_id)
                .ok_or_else(|| StoreError::NotFound {
                    key: record_key(&record_id),
                })?;
        check_version(|| record_key(&record_id), expected_record, stored_record.version())?;

        let balance_slot = match balance {
            Some(write) => {
                let entry = self.accounts.entries.entry(write.balance.account_id.clone());
                let actual = match &entry {
                    Entry::Occupied(stored) => stored.get().version,
                    Entry::Vacant(_) => Version::ZERO,
                };
                check_version(|| balance_key(&write.balance.account_id), write.expected, actual)?;
                Some((entry, write.balance))
            }
            None => None,
        };

        // Journal entries are write-once: an existing one reads as version 1.
        let journal_slot = match self.journal.entries.entry(applied.key.clone()) {
            Entry::Occupied(_) => {
                return Err(StoreError::VersionConflict {
                    key: format!("journal/{}", applied.key),
                    expected: Version::ZERO,
                    actual: Version::ZERO.next(),
                });
            }
            Entry::Vacant(slot) => slot,
        };

        *stored_record = record;
        if let Some((entry, balance)) = balance_slot {
            entry.insert(balance);
        }
        journal_slot.insert(applied);
        Ok(())
    }

    fn balances(&self) -> Result<Vec<Balance>, StoreError> {
        Ok(self.accounts.snapshot())
    }

    fn records(&self) -> Result<Vec<LedgerRecord>, StoreError> {
        Ok(self.records.snapshot())
    }

    fn remove_record(&self, record_id: &RecordId, expected: Version) -> Result<LedgerRecord, StoreError> {
        self.records.remove(record_id, expected)
    }
}
