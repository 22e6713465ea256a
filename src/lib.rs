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

//! # Balance Reconciler
//!
//! This library applies operator decisions on bets, deposits and withdrawals
//! to account balances, keeping every balance non-negative and every stake,
//! payout, credit and debit applied at most once.
//!
//! ## Core Components
//!
//! - [`Engine`]: Locks the account, evaluates the transition and commits it atomically
//! - [`Storage`]: Seam over the balance, record and journal stores; [`MemoryStorage`] in process
//! - [`Transition`]: Accept/settle a bet, approve/reject a deposit or withdrawal
//! - [`LedgerSummary`]: Dashboard totals per record kind and across balances
//! - [`ReconcileError`]: Why a transition was refused or could not be applied
//!
//! ## Example
//!
//! ```
//! use balance_reconciler::{AccountId, Engine, LedgerRecord, RecordKind, Transfer, TransitionRequest};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//! engine
//!     .intake(LedgerRecord::Deposit(Transfer::new("d-1", "alice", dec!(100.00))))
//!     .unwrap();
//!
//! let result = engine
//!     .apply(TransitionRequest::approve("d-1", RecordKind::Deposit))
//!     .unwrap();
//! assert_eq!(result.balance.amount, dec!(100.00));
//!
//! // Approving again replays the first outcome instead of crediting twice.
//! engine
//!     .apply(TransitionRequest::approve("d-1", RecordKind::Deposit))
//!     .unwrap();
//! let balance = engine.balance(&AccountId::from("alice")).unwrap();
//! assert_eq!(balance.amount, dec!(100.00));
//! ```
//!
//! ## Thread Safety
//!
//! Transitions on the same account are serialized by a per-account lock;
//! transitions on different accounts run in parallel.

pub mod audit;
mod balance;
mod base;
pub mod config;
mod engine;
pub mod error;
mod guard;
mod record;
mod report;
pub mod store;
pub mod transition;

pub use audit::{AuditEntry, AuditLog, AuditSink, TracingAuditSink};
pub use balance::Balance;
pub use base::{AccountId, OperatorId, RecordId, Version};
pub use config::{EngineConfig, RetryPolicy};
pub use engine::{Disposition, Engine, Reconciliation};
pub use error::{ReconcileError, StoreError};
pub use guard::{AccountLocks, AppliedTransition, IdempotencyJournal, Reservation};
pub use record::{Bet, BetStatus, LedgerRecord, RecordKind, Transfer, TransferStatus};
pub use report::{KindTotals, LedgerSummary};
pub use store::{AccountStore, BalanceWrite, Commit, MemoryStorage, RecordStore, Storage};
pub use transition::{BetOutcome, Transition, TransitionKey, TransitionRequest};
