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

//! Error types for reconciliation and storage.

use crate::base::{AccountId, RecordId, Version};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced to callers of the engine.
///
/// Every variant guarantees that no part of the requested transition was applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// The balance does not cover the debit the transition requires
    #[error("insufficient funds on account {account}: available {available}, required {required}")]
    InsufficientFunds {
        account: AccountId,
        available: Decimal,
        required: Decimal,
    },

    /// Referenced record does not exist
    #[error("record {0} not found")]
    RecordNotFound(RecordId),

    /// The requested transition is not allowed from the record's current state
    #[error("invalid transition for record {record}: {reason}")]
    InvalidTransition { record: RecordId, reason: String },

    /// A record submitted for intake violates its field constraints
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A record with the same ID was already taken in
    #[error("duplicate record {0}")]
    DuplicateRecord(RecordId),

    /// Balance arithmetic left the representable decimal range
    #[error("balance overflow on account {0}")]
    Overflow(AccountId),

    /// Storage stayed unavailable or conflicted through every retry
    #[error("storage unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },

    /// The caller's deadline expired before the transition could commit
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Errors reported by a [`Storage`](crate::store::Storage) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("key {key} not found")]
    NotFound { key: String },

    /// The stored version no longer matches the version the write was based on
    #[error("version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: Version,
        actual: Version,
    },

    #[error("key {key} already exists")]
    DuplicateKey { key: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::Unavailable(_)
        )
    }
}
