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

//! Account balances.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use balance_reconciler::{AccountId, Balance, Version};
//!
//! let balance = Balance::empty(AccountId::from("alice"));
//! assert_eq!(balance.amount, dec!(0));
//! assert_eq!(balance.version, Version::ZERO);
//! ```

use crate::base::{AccountId, Version};
use crate::error::ReconcileError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Money currently available to an account.
///
/// Invariant: `amount >= 0`. New amounts are only produced inside the crate,
/// by applying a transition's delta; a debit the amount cannot cover fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    pub account_id: AccountId,
    pub amount: Decimal,
    pub version: Version,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    const DECIMAL_PRECISION: u32 = 4;

    /// A balance that has never been written. Reads of a missing account return this.
    pub fn empty(account_id: AccountId) -> Self {
        Self {
            account_id,
            amount: Decimal::ZERO,
            version: Version::ZERO,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Whether the balance has ever been stored.
    pub fn exists(&self) -> bool {
        self.version != Version::ZERO
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.amount >= Decimal::ZERO,
            "Invariant violated: balance of {} went negative: {}",
            self.account_id,
            self.amount
        );
    }

    /// Applies a signed delta, producing the next version of this balance.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::InsufficientFunds`] if the result would be negative.
    /// - [`ReconcileError::Overflow`] if the result is not representable.
    pub(crate) fn apply_delta(&self, delta: Decimal) -> Result<Balance, ReconcileError> {
        if delta < Decimal::ZERO {
            self.debit(-delta)
        } else {
            self.credit(delta)
        }
    }

    /// Increases the balance by a non-negative amount.
    fn credit(&self, amount: Decimal) -> Result<Balance, ReconcileError> {
        let amount = self
            .amount
            .checked_add(amount)
            .ok_or_else(|| ReconcileError::Overflow(self.account_id.clone()))?;
        Ok(self.next(amount))
    }

    /// Decreases the balance by a non-negative amount.
    fn debit(&self, amount: Decimal) -> Result<Balance, ReconcileError> {
        if self.amount < amount {
            return Err(ReconcileError::InsufficientFunds {
                account: self.account_id.clone(),
                available: self.amount,
                required: amount,
            });
        }
        let amount = self
            .amount
            .checked_sub(amount)
            .ok_or_else(|| ReconcileError::Overflow(self.account_id.clone()))?;
        Ok(self.next(amount))
    }

    fn next(&self, amount: Decimal) -> Balance {
        let balance = Balance {
            account_id: self.account_id.clone(),
            amount,
            version: self.version.next(),
            updated_at: Utc::now(),
        };
        balance.assert_invariants();
        balance
    }
}

impl Serialize for Balance {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Balance", 3)?;
        state.serialize_field("account", &self.account_id)?;
        state.serialize_field("amount", &self.amount.round_dp(Balance::DECIMAL_PRECISION))?;
        state.serialize_field("version", &self.version.0)?;
        state.end()
    }
}
