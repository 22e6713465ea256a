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

//! Transition requests and the reconciliation rule table.
//!
//! [`evaluate`] is pure: given a record, the requested transition and the
//! account's current balance it decides whether the transition is a no-op,
//! invalid, refused for insufficient funds, or what the record and balance
//! must become.
//!
//! | Record | Transition | Precondition | Delta |
//! |--------|------------|--------------|-------|
//! | Bet | unaccepted → accepted | balance ≥ stake | −stake |
//! | Bet | pending → win | none | +possible win |
//! | Bet | pending → loss | none | 0 |
//! | Bet | unaccepted/pending → accepted/win | balance ≥ stake | −stake + possible win |
//! | Bet | unaccepted/pending → accepted/loss | balance ≥ stake | −stake |
//! | Deposit | pending → approved | none | +amount |
//! | Deposit | pending → rejected | none | 0 |
//! | Withdrawal | pending → approved | balance ≥ amount | −amount |
//! | Withdrawal | pending → rejected | none | 0 |
//!
//! The last two rows are [`Transition::AcceptAndSettle`]. Settling an
//! unaccepted bet as a win takes the same path, so a payout is never credited
//! for a stake that was not debited. Both moves happen in one commit.
//!
//! Requesting the state a record is already in is a no-op. Moving a resolved
//! record to a different terminal state is invalid.

use crate::balance::Balance;
use crate::base::{OperatorId, RecordId};
use crate::error::ReconcileError;
use crate::record::{Bet, BetStatus, LedgerRecord, RecordKind, TransferStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetOutcome {
    Win,
    Loss,
}

impl From<BetOutcome> for BetStatus {
    fn from(outcome: BetOutcome) -> Self {
        match outcome {
            BetOutcome::Win => BetStatus::Win,
            BetOutcome::Loss => BetStatus::Loss,
        }
    }
}

/// A requested change to a ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    /// Accept a pending bet, debiting its stake.
    AcceptBet { possible_win: Option<Decimal> },
    /// Settle a pending bet, crediting the possible win on [`BetOutcome::Win`].
    /// An unaccepted bet settled as a win is accepted in the same commit.
    SettleBet {
        outcome: BetOutcome,
        possible_win: Option<Decimal>,
    },
    /// Accept a pending bet and settle it in the same commit.
    AcceptAndSettle {
        outcome: BetOutcome,
        possible_win: Option<Decimal>,
    },
    /// Approve a pending deposit or withdrawal.
    Approve,
    /// Reject a pending deposit or withdrawal.
    Reject,
}

impl Transition {
    /// The idempotency key of this transition on `record_id`.
    ///
    /// Each key names a state change that can happen at most once in a record's
    /// lifetime, so it is independent of the record's current state. Accepting
    /// and settling together is keyed by its status change, like a plain settle.
    pub fn key(&self, record_id: &RecordId) -> TransitionKey {
        let (from, to) = match self {
            Transition::AcceptBet { .. } => ("unaccepted", "accepted"),
            Transition::SettleBet { outcome, .. } | Transition::AcceptAndSettle { outcome, .. } => {
                match outcome {
                    BetOutcome::Win => ("pending", "win"),
                    BetOutcome::Loss => ("pending", "loss"),
                }
            }
            Transition::Approve => ("pending", "approved"),
            Transition::Reject => ("pending", "rejected"),
        };
        TransitionKey {
            record_id: record_id.clone(),
            from,
            to,
        }
    }
}

/// Identifies an already-applied transition in the idempotency journal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransitionKey {
    pub record_id: RecordId,
    pub from: &'static str,
    pub to: &'static str,
}

impl fmt::Display for TransitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}->{}", self.record_id, self.from, self.to)
    }
}

/// An operator's request to transition one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub record_id: RecordId,
    /// Kind the caller believes the record has. A mismatch is rejected.
    pub kind: RecordKind,
    pub transition: Transition,
    pub operator: Option<OperatorId>,
    /// Falls back to the engine's default timeout when unset.
    pub deadline: Option<Instant>,
}

impl TransitionRequest {
    pub fn new(record_id: impl Into<RecordId>, kind: RecordKind, transition: Transition) -> Self {
        Self {
            record_id: record_id.into(),
            kind,
            transition,
            operator: None,
            deadline: None,
        }
    }

    pub fn accept_bet(record_id: impl Into<RecordId>) -> Self {
        Self::new(
            record_id,
            RecordKind::Bet,
            Transition::AcceptBet { possible_win: None },
        )
    }

    pub fn settle_bet(record_id: impl Into<RecordId>, outcome: BetOutcome) -> Self {
        Self::new(
            record_id,
            RecordKind::Bet,
            Transition::SettleBet {
                outcome,
                possible_win: None,
            },
        )
    }

    /// Accepts the bet if it is not accepted yet, then settles it.
    pub fn accept_and_settle(record_id: impl Into<RecordId>, outcome: BetOutcome) -> Self {
        Self::new(
            record_id,
            RecordKind::Bet,
            Transition::AcceptAndSettle {
                outcome,
                possible_win: None,
            },
        )
    }

    pub fn approve(record_id: impl Into<RecordId>, kind: RecordKind) -> Self {
        Self::new(record_id, kind, Transition::Approve)
    }

    pub fn reject(record_id: impl Into<RecordId>, kind: RecordKind) -> Self {
        Self::new(record_id, kind, Transition::Reject)
    }

    /// Sets the bet's possible win as part of an accept or settle transition.
    /// Has no effect on deposit and withdrawal transitions.
    pub fn with_possible_win(mut self, amount: Decimal) -> Self {
        match &mut self.transition {
            Transition::AcceptBet { possible_win }
            | Transition::SettleBet { possible_win, .. }
            | Transition::AcceptAndSettle { possible_win, .. } => {
                *possible_win = Some(amount);
            }
            Transition::Approve | Transition::Reject => {}
        }
        self
    }

    pub fn by(mut self, operator: OperatorId) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// The writes a transition requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Record after the transition, at the next version.
    pub record: LedgerRecord,
    /// New balance, or `None` when the delta is zero.
    pub balance: Option<Balance>,
    pub delta: Decimal,
    pub from_state: String,
    pub to_state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The record is already in the requested state.
    NoOp,
    Apply(Plan),
}

fn invalid(record: &LedgerRecord, reason: impl Into<String>) -> ReconcileError {
    ReconcileError::InvalidTransition {
        record: record.id().clone(),
        reason: reason.into(),
    }
}

fn check_possible_win(
    record: &LedgerRecord,
    possible_win: Option<Decimal>,
) -> Result<(), ReconcileError> {
    match possible_win {
        Some(amount) if amount < Decimal::ZERO => {
            Err(invalid(record, "possible win must not be negative"))
        }
        _ => Ok(()),
    }
}

/// Settles `bet`, accepting it first when `accept` is set, and returns the delta.
/// Returns `None` when the bet already has the requested status.
fn settle(
    record: &LedgerRecord,
    bet: &mut Bet,
    outcome: BetOutcome,
    possible_win: Option<Decimal>,
    accept: bool,
    balance: &Balance,
) -> Result<Option<Decimal>, ReconcileError> {
    let target = BetStatus::from(outcome);
    if bet.status == target {
        return Ok(None);
    }
    if bet.status != BetStatus::Pending {
        return Err(invalid(record, format!("bet already settled as {}", bet.status)));
    }
    check_possible_win(record, possible_win)?;

    let mut delta = Decimal::ZERO;
    if accept {
        // The stake must be covered by the current balance, not by the payout.
        if balance.amount < bet.stake {
            return Err(ReconcileError::InsufficientFunds {
                account: balance.account_id.clone(),
                available: balance.amount,
                required: bet.stake,
            });
        }
        bet.accepted = true;
        delta = -bet.stake;
    }
    bet.status = target;
    if let Some(amount) = possible_win {
        bet.possible_win = amount;
    }
    if outcome == BetOutcome::Win {
        delta += bet.possible_win;
    }
    Ok(Some(delta))
}

/// Evaluates `transition` against `record` and the owning account's `balance`.
///
/// # Errors
///
/// - [`ReconcileError::InvalidTransition`] - Kind mismatch, or the record already left the
///   state the transition starts from.
/// - [`ReconcileError::InsufficientFunds`] - A debit exceeds the balance.
/// - [`ReconcileError::Overflow`] - A credit leaves the decimal range.
pub fn evaluate(
    record: &LedgerRecord,
    kind: RecordKind,
    transition: &Transition,
    balance: &Balance,
) -> Result<Effect, ReconcileError> {
    if record.kind() != kind {
        return Err(invalid(
            record,
            format!("requested as a {kind} but stored as a {}", record.kind()),
        ));
    }
    debug_assert_eq!(record.account_id(), &balance.account_id);

    let mut next = record.clone();
    let delta = match (&mut next, transition) {
        (LedgerRecord::Bet(bet), Transition::AcceptBet { possible_win }) => {
            if bet.accepted {
                return Ok(Effect::NoOp);
            }
            if bet.status != BetStatus::Pending {
                return Err(invalid(record, format!("bet already settled as {}", bet.status)));
            }
            check_possible_win(record, *possible_win)?;
            bet.accepted = true;
            if let Some(amount) = possible_win {
                bet.possible_win = *amount;
            }
            -bet.stake
        }
        (
            LedgerRecord::Bet(bet),
            Transition::SettleBet {
                outcome,
                possible_win,
            },
        ) => {
            let accept = !bet.accepted && *outcome == BetOutcome::Win;
            match settle(record, bet, *outcome, *possible_win, accept, balance)? {
                Some(delta) => delta,
                None => return Ok(Effect::NoOp),
            }
        }
        (
            LedgerRecord::Bet(bet),
            Transition::AcceptAndSettle {
                outcome,
                possible_win,
            },
        ) => {
            let accept = !bet.accepted;
            match settle(record, bet, *outcome, *possible_win, accept, balance)? {
                Some(delta) => delta,
                None => return Ok(Effect::NoOp),
            }
        }
        (LedgerRecord::Bet(_), Transition::Approve | Transition::Reject) => {
            return Err(invalid(
                record,
                "bets are accepted or settled, not approved or rejected",
            ));
        }
        (
            LedgerRecord::Deposit(_) | LedgerRecord::Withdrawal(_),
            Transition::AcceptBet { .. }
            | Transition::SettleBet { .. }
            | Transition::AcceptAndSettle { .. },
        ) => {
            return Err(invalid(record, format!("a {kind} cannot be accepted or settled")));
        }
        (LedgerRecord::Deposit(transfer) | LedgerRecord::Withdrawal(transfer), resolution) => {
            let target = match resolution {
                Transition::Approve => TransferStatus::Approved,
                _ => TransferStatus::Rejected,
            };
            if transfer.status == target {
                return Ok(Effect::NoOp);
            }
            if transfer.status != TransferStatus::Pending {
                return Err(invalid(record, format!("{kind} already {}", transfer.status)));
            }
            transfer.status = target;
            match (kind, target) {
                (RecordKind::Deposit, TransferStatus::Approved) => transfer.amount,
                (RecordKind::Withdrawal, TransferStatus::Approved) => -transfer.amount,
                _ => Decimal::ZERO,
            }
        }
    };

    let balance = if delta.is_zero() {
        None
    } else {
        Some(balance.apply_delta(delta)?)
    };
    next.set_version(record.version().next());

    Ok(Effect::Apply(Plan {
        from_state: record.state_label(),
        to_state: next.state_label(),
        record: next,
        balance,
        delta,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{AccountId, Version};
    use crate::record::{Bet, Transfer};
    use rust_decimal_macros::dec;

    fn funded(amount: Decimal) -> Balance {
        Balance {
            amount,
            version: Version(3),
            ..Balance::empty(AccountId::from("alice"))
        }
    }

    fn bet(stake: Decimal, possible_win: Decimal) -> LedgerRecord {
        let mut bet = Bet::new("b-1", "alice", stake, possible_win, "home");
        bet.version = Version(1);
        LedgerRecord::Bet(bet)
    }

    fn accepted_bet(stake: Decimal, possible_win: Decimal) -> LedgerRecord {
        let mut record = bet(stake, possible_win);
        if let LedgerRecord::Bet(bet) = &mut record {
            bet.accepted = true;
        }
        record
    }

    fn deposit(amount: Decimal, status: TransferStatus) -> LedgerRecord {
        let mut transfer = Transfer::new("d-1", "alice", amount);
        transfer.status = status;
        transfer.version = Version(1);
        LedgerRecord::Deposit(transfer)
    }

    fn withdrawal(amount: Decimal, status: TransferStatus) -> LedgerRecord {
        let mut transfer = Transfer::new("w-1", "alice", amount);
        transfer.status = status;
        transfer.version = Version(1);
        LedgerRecord::Withdrawal(transfer)
    }

    fn plan(effect: Effect) -> Plan {
        match effect {
            Effect::Apply(plan) => plan,
            Effect::NoOp => panic!("expected a plan, got a no-op"),
        }
    }

    #[test]
    fn keys_are_independent_of_current_state() {
        let id = RecordId::from("b-1");
        let accept = Transition::AcceptBet {
            possible_win: Some(dec!(5)),
        };
        assert_eq!(accept.key(&id).to_string(), "b-1:unaccepted->accepted");
        assert_eq!(
            Transition::AcceptBet { possible_win: None }.key(&id),
            accept.key(&id)
        );
        assert_eq!(
            Transition::Approve.key(&RecordId::from("d-1")).to_string(),
            "d-1:pending->approved"
        );
    }

    #[test]
    fn accept_debits_stake() {
        let effect = evaluate(
            &bet(dec!(150), dec!(300)),
            RecordKind::Bet,
            &Transition::AcceptBet { possible_win: None },
            &funded(dec!(150)),
        )
        .unwrap();
        let plan = plan(effect);
        assert_eq!(plan.delta, dec!(-150));
        assert_eq!(plan.balance.unwrap().amount, Decimal::ZERO);
        assert_eq!(plan.record.version(), Version(2));
        assert_eq!(plan.from_state, "unaccepted/pending");
        assert_eq!(plan.to_state, "accepted/pending");
    }

    #[test]
    fn accept_with_insufficient_balance_fails() {
        let result = evaluate(
            &bet(dec!(150), dec!(300)),
            RecordKind::Bet,
            &Transition::AcceptBet { possible_win: None },
            &funded(dec!(149.99)),
        );
        assert!(matches!(
            result,
            Err(ReconcileError::InsufficientFunds { required, .. }) if required == dec!(150)
        ));
    }

    #[test]
    fn accept_twice_is_noop() {
        let effect = evaluate(
            &accepted_bet(dec!(10), dec!(20)),
            RecordKind::Bet,
            &Transition::AcceptBet { possible_win: None },
            &funded(dec!(100)),
        )
        .unwrap();
        assert_eq!(effect, Effect::NoOp);
    }

    #[test]
    fn accept_can_update_possible_win() {
        let effect = evaluate(
            &bet(dec!(10), dec!(20)),
            RecordKind::Bet,
            &Transition::AcceptBet {
                possible_win: Some(dec!(35)),
            },
            &funded(dec!(100)),
        )
        .unwrap();
        let LedgerRecord::Bet(bet) = plan(effect).record else {
            panic!("expected a bet");
        };
        assert_eq!(bet.possible_win, dec!(35));
    }

    #[test]
    fn win_credits_possible_win() {
        let effect = evaluate(
            &accepted_bet(dec!(150), dec!(300)),
            RecordKind::Bet,
            &Transition::SettleBet {
                outcome: BetOutcome::Win,
                possible_win: None,
            },
            &funded(dec!(0)),
        )
        .unwrap();
        let plan = plan(effect);
        assert_eq!(plan.delta, dec!(300));
        assert_eq!(plan.balance.unwrap().amount, dec!(300));
    }

    #[test]
    fn win_uses_updated_possible_win() {
        let effect = evaluate(
            &accepted_bet(dec!(10), dec!(20)),
            RecordKind::Bet,
            &Transition::SettleBet {
                outcome: BetOutcome::Win,
                possible_win: Some(dec!(45)),
            },
            &funded(dec!(0)),
        )
        .unwrap();
        assert_eq!(plan(effect).delta, dec!(45));
    }

    #[test]
    fn win_with_zero_possible_win_skips_balance_write() {
        let effect = evaluate(
            &accepted_bet(dec!(10), dec!(0)),
            RecordKind::Bet,
            &Transition::SettleBet {
                outcome: BetOutcome::Win,
                possible_win: None,
            },
            &funded(dec!(5)),
        )
        .unwrap();
        let plan = plan(effect);
        assert!(plan.delta.is_zero());
        assert!(plan.balance.is_none());
    }

    #[test]
    fn unaccepted_win_debits_stake_and_credits_payout() {
        let effect = evaluate(
            &bet(dec!(10), dec!(30)),
            RecordKind::Bet,
            &Transition::SettleBet {
                outcome: BetOutcome::Win,
                possible_win: None,
            },
            &funded(dec!(10)),
        )
        .unwrap();
        let plan = plan(effect);
        assert_eq!(plan.delta, dec!(20));
        assert_eq!(plan.balance.unwrap().amount, dec!(30));
        assert_eq!(plan.from_state, "unaccepted/pending");
        assert_eq!(plan.to_state, "accepted/win");
    }

    #[test]
    fn unaccepted_win_needs_the_stake_up_front() {
        let result = evaluate(
            &bet(dec!(10), dec!(30)),
            RecordKind::Bet,
            &Transition::SettleBet {
                outcome: BetOutcome::Win,
                possible_win: None,
            },
            &funded(dec!(9)),
        );
        assert_eq!(
            result,
            Err(ReconcileError::InsufficientFunds {
                account: AccountId::from("alice"),
                available: dec!(9),
                required: dec!(10),
            })
        );
    }

    #[test]
    fn accept_and_settle_as_loss_debits_stake() {
        let effect = evaluate(
            &bet(dec!(10), dec!(30)),
            RecordKind::Bet,
            &Transition::AcceptAndSettle {
                outcome: BetOutcome::Loss,
                possible_win: None,
            },
            &funded(dec!(25)),
        )
        .unwrap();
        let plan = plan(effect);
        assert_eq!(plan.delta, dec!(-10));
        assert_eq!(plan.balance.unwrap().amount, dec!(15));
        assert_eq!(plan.to_state, "accepted/loss");
    }

    #[test]
    fn accept_and_settle_on_accepted_bet_only_settles() {
        let effect = evaluate(
            &accepted_bet(dec!(10), dec!(30)),
            RecordKind::Bet,
            &Transition::AcceptAndSettle {
                outcome: BetOutcome::Win,
                possible_win: Some(dec!(40)),
            },
            &funded(dec!(0)),
        )
        .unwrap();
        assert_eq!(plan(effect).delta, dec!(40));
    }

    #[test]
    fn accept_and_settle_shares_the_settle_key() {
        let id = RecordId::from("b-1");
        let combined = Transition::AcceptAndSettle {
            outcome: BetOutcome::Win,
            possible_win: None,
        };
        assert_eq!(combined.key(&id).to_string(), "b-1:pending->win");
    }

    #[test]
    fn unaccepted_bet_can_lose() {
        let effect = evaluate(
            &bet(dec!(10), dec!(20)),
            RecordKind::Bet,
            &Transition::SettleBet {
                outcome: BetOutcome::Loss,
                possible_win: None,
            },
            &funded(dec!(0)),
        )
        .unwrap();
        let plan = plan(effect);
        assert!(plan.delta.is_zero());
        assert_eq!(plan.to_state, "unaccepted/loss");
    }

    #[test]
    fn loss_to_win_is_invalid() {
        let mut record = accepted_bet(dec!(10), dec!(20));
        if let LedgerRecord::Bet(bet) = &mut record {
            bet.status = BetStatus::Loss;
        }
        let result = evaluate(
            &record,
            RecordKind::Bet,
            &Transition::SettleBet {
                outcome: BetOutcome::Win,
                possible_win: None,
            },
            &funded(dec!(0)),
        );
        assert_eq!(
            result,
            Err(ReconcileError::InvalidTransition {
                record: RecordId::from("b-1"),
                reason: "bet already settled as loss".into(),
            })
        );
    }

    #[test]
    fn settled_bet_cannot_be_accepted() {
        let mut record = bet(dec!(10), dec!(20));
        if let LedgerRecord::Bet(bet) = &mut record {
            bet.status = BetStatus::Loss;
        }
        let result = evaluate(
            &record,
            RecordKind::Bet,
            &Transition::AcceptBet { possible_win: None },
            &funded(dec!(100)),
        );
        assert!(matches!(result, Err(ReconcileError::InvalidTransition { .. })));
    }

    #[test]
    fn negative_possible_win_is_invalid() {
        let result = evaluate(
            &bet(dec!(10), dec!(20)),
            RecordKind::Bet,
            &Transition::AcceptBet {
                possible_win: Some(dec!(-1)),
            },
            &funded(dec!(100)),
        );
        assert!(matches!(result, Err(ReconcileError::InvalidTransition { .. })));
    }

    #[test]
    fn deposit_approval_credits() {
        let effect = evaluate(
            &deposit(dec!(50), TransferStatus::Pending),
            RecordKind::Deposit,
            &Transition::Approve,
            &funded(dec!(100)),
        )
        .unwrap();
        let plan = plan(effect);
        assert_eq!(plan.delta, dec!(50));
        assert_eq!(plan.balance.unwrap().amount, dec!(150));
        assert_eq!(plan.to_state, "approved");
    }

    #[test]
    fn deposit_approval_on_missing_balance_creates_it() {
        let effect = evaluate(
            &deposit(dec!(50), TransferStatus::Pending),
            RecordKind::Deposit,
            &Transition::Approve,
            &Balance::empty(AccountId::from("alice")),
        )
        .unwrap();
        let balance = plan(effect).balance.unwrap();
        assert_eq!(balance.amount, dec!(50));
        assert_eq!(balance.version, Version(1));
    }

    #[test]
    fn deposit_rejection_has_no_delta() {
        let plan = plan(
            evaluate(
                &deposit(dec!(50), TransferStatus::Pending),
                RecordKind::Deposit,
                &Transition::Reject,
                &funded(dec!(100)),
            )
            .unwrap(),
        );
        assert!(plan.delta.is_zero());
        assert!(plan.balance.is_none());
    }

    #[test]
    fn reapproval_is_noop() {
        let effect = evaluate(
            &deposit(dec!(50), TransferStatus::Approved),
            RecordKind::Deposit,
            &Transition::Approve,
            &funded(dec!(100)),
        )
        .unwrap();
        assert_eq!(effect, Effect::NoOp);
    }

    #[test]
    fn rejected_deposit_cannot_be_approved() {
        let result = evaluate(
            &deposit(dec!(50), TransferStatus::Rejected),
            RecordKind::Deposit,
            &Transition::Approve,
            &funded(dec!(100)),
        );
        assert_eq!(
            result,
            Err(ReconcileError::InvalidTransition {
                record: RecordId::from("d-1"),
                reason: "deposit already rejected".into(),
            })
        );
    }

    #[test]
    fn withdrawal_approval_debits() {
        let plan = plan(
            evaluate(
                &withdrawal(dec!(40), TransferStatus::Pending),
                RecordKind::Withdrawal,
                &Transition::Approve,
                &funded(dec!(100)),
            )
            .unwrap(),
        );
        assert_eq!(plan.delta, dec!(-40));
        assert_eq!(plan.balance.unwrap().amount, dec!(60));
    }

    #[test]
    fn withdrawal_approval_beyond_balance_fails() {
        let result = evaluate(
            &withdrawal(dec!(200), TransferStatus::Pending),
            RecordKind::Withdrawal,
            &Transition::Approve,
            &funded(dec!(150)),
        );
        assert_eq!(
            result,
            Err(ReconcileError::InsufficientFunds {
                account: AccountId::from("alice"),
                available: dec!(150),
                required: dec!(200),
            })
        );
    }

    #[test]
    fn withdrawal_rejection_ignores_balance() {
        let plan = plan(
            evaluate(
                &withdrawal(dec!(200), TransferStatus::Pending),
                RecordKind::Withdrawal,
                &Transition::Reject,
                &funded(dec!(0)),
            )
            .unwrap(),
        );
        assert!(plan.delta.is_zero());
    }

    #[test]
    fn kind_mismatch_is_invalid() {
        let result = evaluate(
            &deposit(dec!(50), TransferStatus::Pending),
            RecordKind::Withdrawal,
            &Transition::Approve,
            &funded(dec!(100)),
        );
        assert!(matches!(result, Err(ReconcileError::InvalidTransition { .. })));
    }

    #[test]
    fn bet_cannot_be_approved() {
        let result = evaluate(
            &bet(dec!(1), dec!(2)),
            RecordKind::Bet,
            &Transition::Approve,
            &funded(dec!(100)),
        );
        assert!(matches!(result, Err(ReconcileError::InvalidTransition { .. })));
    }

    #[test]
    fn transfer_cannot_be_settled() {
        let result = evaluate(
            &withdrawal(dec!(1), TransferStatus::Pending),
            RecordKind::Withdrawal,
            &Transition::AcceptBet { possible_win: None },
            &funded(dec!(100)),
        );
        assert!(matches!(result, Err(ReconcileError::InvalidTransition { .. })));
    }

    #[test]
    fn request_builders() {
        let request = TransitionRequest::settle_bet("b-1", BetOutcome::Win)
            .with_possible_win(dec!(12))
            .by(OperatorId("ops".into()));
        assert_eq!(
            request.transition,
            Transition::SettleBet {
                outcome: BetOutcome::Win,
                possible_win: Some(dec!(12)),
            }
        );
        assert_eq!(request.operator, Some(OperatorId("ops".into())));

        let request = TransitionRequest::approve("d-1", RecordKind::Deposit).with_possible_win(dec!(1));
        assert_eq!(request.transition, Transition::Approve);
    }
}
