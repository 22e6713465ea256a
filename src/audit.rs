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

//! Audit entries emitted for every committed transition.

use crate::base::{AccountId, OperatorId, RecordId};
use crate::record::RecordKind;
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub record_id: RecordId,
    pub kind: RecordKind,
    pub account_id: AccountId,
    pub from_state: String,
    pub to_state: String,
    pub delta: Decimal,
    /// Balance after the transition.
    pub balance: Decimal,
    pub operator: Option<OperatorId>,
    pub at: DateTime<Utc>,
}

/// Passive receiver of audit entries, e.g. a reporting dashboard feed.
///
/// Called while the account is still locked, so entries for one account arrive
/// in commit order. Implementations must not block.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Emits entries as `tracing` events on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        info!(
            target: "audit",
            record = %entry.record_id,
            kind = %entry.kind,
            account = %entry.account_id,
            from = %entry.from_state,
            to = %entry.to_state,
            delta = %entry.delta,
            balance = %entry.balance,
            operator = entry.operator.as_ref().map(|o| o.0.as_str()).unwrap_or("-"),
            "transition applied"
        );
    }
}

/// Collects entries in arrival order.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: SegQueue<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every collected entry, oldest first.
    pub fn drain(&self) -> Vec<AuditEntry> {
        std::iter::from_fn(|| self.entries.pop()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AuditSink for AuditLog {
    fn record(&self, entry: AuditEntry) {
        self.entries.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(record: &str) -> AuditEntry {
        AuditEntry {
            record_id: RecordId::from(record),
            kind: RecordKind::Deposit,
            account_id: AccountId::from("alice"),
            from_state: "pending".into(),
            to_state: "approved".into(),
            delta: dec!(50),
            balance: dec!(150),
            operator: Some(OperatorId("ops-1".into())),
            at: Utc::now(),
        }
    }

    #[test]
    fn audit_log_drains_in_order() {
        let log = AuditLog::new();
        log.record(entry("d-1"));
        log.record(entry("d-2"));
        assert_eq!(log.len(), 2);

        let drained: Vec<_> = log.drain().into_iter().map(|e| e.record_id.0).collect();
        assert_eq!(drained, vec!["d-1", "d-2"]);
        assert!(log.is_empty());
    }

    #[test]
    fn tracing_sink_accepts_entries() {
        TracingAuditSink.record(entry("d-1"));
    }

    #[test]
    fn entries_serialize_for_reporting() {
        let json = serde_json::to_value(entry("d-1")).unwrap();
        assert_eq!(json["record_id"], "d-1");
        assert_eq!(json["kind"], "deposit");
        assert_eq!(json["delta"], "50");
        assert_eq!(json["operator"], "ops-1");
    }
}
