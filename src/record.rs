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

//! Ledger records: bets, deposits and withdrawals.
//!
//! Records follow small state machines:
//! - Bet acceptance: unaccepted → accepted (never back).
//! - Bet status: [`BetStatus::Pending`] → [`BetStatus::Win`] or [`BetStatus::Loss`].
//! - Deposit/withdrawal status: [`TransferStatus::Pending`] → [`TransferStatus::Approved`]
//!   or [`TransferStatus::Rejected`].
//!
//! Records carry a [`Version`] that the store bumps on every write.

use crate::base::{AccountId, RecordId, Version};
use crate::error::ReconcileError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Bet,
    Deposit,
    Withdrawal,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordKind::Bet => "bet",
            RecordKind::Deposit => "deposit",
            RecordKind::Withdrawal => "withdrawal",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Pending,
    Win,
    Loss,
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BetStatus::Pending => "pending",
            BetStatus::Win => "win",
            BetStatus::Loss => "loss",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Approved => "approved",
            TransferStatus::Rejected => "rejected",
        })
    }
}

/// A wager placed by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub id: RecordId,
    pub account_id: AccountId,
    /// Debited once, when the bet is accepted.
    pub stake: Decimal,
    /// Credited once, when the bet is settled as a win.
    pub possible_win: Decimal,
    pub prediction: String,
    pub accepted: bool,
    pub status: BetStatus,
    pub created_at: DateTime<Utc>,
    pub version: Version,
}

impl Bet {
    /// A freshly placed bet: pending, unaccepted and not yet stored.
    pub fn new(
        id: impl Into<RecordId>,
        account_id: impl Into<AccountId>,
        stake: Decimal,
        possible_win: Decimal,
        prediction: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            stake,
            possible_win,
            prediction: prediction.into(),
            accepted: false,
            status: BetStatus::Pending,
            created_at: Utc::now(),
            version: Version::ZERO,
        }
    }
}

/// A deposit or withdrawal request; the enclosing [`LedgerRecord`] variant tells which.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: RecordId,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    pub version: Version,
}

impl Transfer {
    pub fn new(id: impl Into<RecordId>, account_id: impl Into<AccountId>, amount: Decimal) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            amount,
            status: TransferStatus::Pending,
            created_at: Utc::now(),
            version: Version::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LedgerRecord {
    Bet(Bet),
    Deposit(Transfer),
    Withdrawal(Transfer),
}

impl LedgerRecord {
    pub fn id(&self) -> &RecordId {
        match self {
            Self::Bet(bet) => &bet.id,
            Self::Deposit(transfer) | Self::Withdrawal(transfer) => &transfer.id,
        }
    }

    pub fn account_id(&self) -> &AccountId {
        match self {
            Self::Bet(bet) => &bet.account_id,
            Self::Deposit(transfer) | Self::Withdrawal(transfer) => &transfer.account_id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Bet(bet) => bet.created_at,
            Self::Deposit(transfer) | Self::Withdrawal(transfer) => transfer.created_at,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Bet(_) => RecordKind::Bet,
            Self::Deposit(_) => RecordKind::Deposit,
            Self::Withdrawal(_) => RecordKind::Withdrawal,
        }
    }

    pub fn version(&self) -> Version {
        match self {
            Self::Bet(bet) => bet.version,
            Self::Deposit(transfer) | Self::Withdrawal(transfer) => transfer.version,
        }
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        match self {
            Self::Bet(bet) => bet.version = version,
            Self::Deposit(transfer) | Self::Withdrawal(transfer) => transfer.version = version,
        }
    }

    /// Human-readable state used in audit entries, e.g. `accepted/pending` or `approved`.
    pub fn state_label(&self) -> String {
        match self {
            Self::Bet(bet) => {
                let acceptance = if bet.accepted { "accepted" } else { "unaccepted" };
                format!("{acceptance}/{}", bet.status)
            }
            Self::Deposit(transfer) | Self::Withdrawal(transfer) => transfer.status.to_string(),
        }
    }

    /// Only a pending, unaccepted bet can be deleted: nothing has touched the
    /// balance for it and nothing will.
    pub fn check_deletable(&self) -> Result<(), ReconcileError> {
        match self {
            Self::Bet(bet) if !bet.accepted && bet.status == BetStatus::Pending => Ok(()),
            Self::Bet(bet) => Err(ReconcileError::InvalidTransition {
                record: bet.id.clone(),
                reason: format!("cannot delete a bet that is {}", self.state_label()),
            }),
            Self::Deposit(transfer) | Self::Withdrawal(transfer) => {
                Err(ReconcileError::InvalidTransition {
                    record: transfer.id.clone(),
                    reason: format!("{}s cannot be deleted", self.kind()),
                })
            }
        }
    }

    /// Checks the constraints a record must satisfy when it is first taken in.
    pub fn validate_intake(&self) -> Result<(), ReconcileError> {
        match self {
            Self::Bet(bet) => {
                if bet.stake <= Decimal::ZERO {
                    return Err(ReconcileError::InvalidRecord(format!(
                        "bet {} stake must be positive",
                        bet.id
                    )));
                }
                if bet.possible_win < Decimal::ZERO {
                    return Err(ReconcileError::InvalidRecord(format!(
                        "bet {} possible win must not be negative",
                        bet.id
                    )));
                }
                if bet.accepted || bet.status != BetStatus::Pending {
                    return Err(ReconcileError::InvalidRecord(format!(
                        "bet {} must be pending and unaccepted",
                        bet.id
                    )));
                }
            }
            Self::Deposit(transfer) | Self::Withdrawal(transfer) => {
                if transfer.amount <= Decimal::ZERO {
                    return Err(ReconcileError::InvalidRecord(format!(
                        "{} {} amount must be positive",
                        self.kind(),
                        transfer.id
                    )));
                }
                if transfer.status != TransferStatus::Pending {
                    return Err(ReconcileError::InvalidRecord(format!(
                        "{} {} must be pending",
                        self.kind(),
                        transfer.id
                    )));
                }
            }
        }
        Ok(())
    }
}
