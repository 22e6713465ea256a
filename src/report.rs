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

//! Totals across all records and balances, as shown on an operator dashboard.

use crate::balance::Balance;
use crate::record::{BetStatus, LedgerRecord, TransferStatus};
use rust_decimal::Decimal;
use serde::Serialize;

/// Count and summed amount of one record kind. Bets sum their stakes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindTotals {
    pub count: usize,
    /// Records still awaiting a decision.
    pub pending: usize,
    pub amount: Decimal,
}

impl KindTotals {
    fn add(&mut self, amount: Decimal, pending: bool) {
        self.count += 1;
        if pending {
            self.pending += 1;
        }
        self.amount = self.amount.saturating_add(amount);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub bets: KindTotals,
    pub deposits: KindTotals,
    pub withdrawals: KindTotals,
    /// Accounts with a stored balance.
    pub accounts: usize,
    pub total_balance: Decimal,
}

impl LedgerSummary {
    pub fn from_parts(records: &[LedgerRecord], balances: &[Balance]) -> Self {
        let mut summary = LedgerSummary::default();
        for record in records {
            match record {
                LedgerRecord::Bet(bet) => summary
                    .bets
                    .add(bet.stake, bet.status == BetStatus::Pending),
                LedgerRecord::Deposit(transfer) => summary
                    .deposits
                    .add(transfer.amount, transfer.status == TransferStatus::Pending),
                LedgerRecord::Withdrawal(transfer) => summary
                    .withdrawals
                    .add(transfer.amount, transfer.status == TransferStatus::Pending),
            }
        }
        summary.accounts = balances.len();
        summary.total_balance = balances
            .iter()
            .fold(Decimal::ZERO, |total, balance| total.saturating_add(balance.amount));
        summary
    }
}
