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

use balance_reconciler::{
    AuditLog, Bet, BetOutcome, Engine, EngineConfig, LedgerRecord, OperatorId, RecordId,
    RecordKind, RetryPolicy, Transfer, TransitionRequest,
};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Balance Reconciler - Apply operator decisions from a CSV file
///
/// Reads new bets, deposits and withdrawals together with operator actions
/// on them, and writes the resulting account balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "reconcile")]
#[command(about = "Reconciles account balances with bet, deposit and withdrawal decisions", long_about = None)]
struct Args {
    /// Path to CSV file with records and actions
    ///
    /// Expected format: type,record,account,amount,possible_win,prediction,operator
    /// Example: reconcile actions.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Attempts per transition before storage is reported unavailable
    #[arg(long, default_value_t = RetryPolicy::DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Initial retry backoff in milliseconds, doubled per attempt
    #[arg(long, default_value_t = 10)]
    backoff_ms: u64,

    /// Deadline for each transition in milliseconds
    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,

    /// Write audit entries as CSV to this file
    #[arg(long, value_name = "FILE")]
    audit: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        let initial_backoff = Duration::from_millis(self.backoff_ms);
        EngineConfig {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff,
                max_backoff: initial_backoff.saturating_mul(20),
            },
            default_timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let audit_log = Arc::new(AuditLog::new());
    let mut engine = Engine::new().with_config(args.engine_config());
    if args.audit.is_some() {
        engine = engine.with_audit_sink(audit_log.clone());
    }

    if let Err(e) = process_rows(BufReader::new(file), &engine) {
        eprintln!("Error processing actions: {}", e);
        process::exit(1);
    }

    if let Some(path) = &args.audit {
        let written = File::create(path)
            .map_err(csv::Error::from)
            .and_then(|file| write_audit(&audit_log, file));
        if let Err(e) = written {
            eprintln!("Error writing audit log '{}': {}", path.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = write_balances(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV row.
///
/// Intake rows (`bet`, `deposit`, `withdrawal`) need `account` and `amount`;
/// action rows (`accept`, `win`, `loss`, `accept_win`, `accept_loss`, `approve`,
/// `reject`) only `record`.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "type")]
    row_type: String,
    record: String,
    #[serde(default)]
    account: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    possible_win: Option<Decimal>,
    #[serde(default)]
    prediction: Option<String>,
    #[serde(default)]
    operator: Option<String>,
}

/// What a row asks for.
#[derive(Debug)]
enum Action {
    Intake(LedgerRecord),
    Transition(TransitionRequest),
}

impl CsvRow {
    /// Returns `None` for unknown row types, missing fields, or actions on
    /// records that were never taken in.
    fn into_action(self, kinds: &HashMap<RecordId, RecordKind>) -> Option<Action> {
        let record_id = RecordId(self.record);
        let row_type = self.row_type.to_lowercase();

        let intake = |kind: RecordKind| -> Option<Action> {
            let account = self.account.clone().filter(|a| !a.is_empty())?;
            let amount = self.amount?;
            let record = match kind {
                RecordKind::Bet => LedgerRecord::Bet(Bet::new(
                    record_id.clone(),
                    account.as_str(),
                    amount,
                    self.possible_win.unwrap_or(Decimal::ZERO),
                    self.prediction.clone().unwrap_or_default(),
                )),
                RecordKind::Deposit => {
                    LedgerRecord::Deposit(Transfer::new(record_id.clone(), account.as_str(), amount))
                }
                RecordKind::Withdrawal => LedgerRecord::Withdrawal(Transfer::new(
                    record_id.clone(),
                    account.as_str(),
                    amount,
                )),
            };
            Some(Action::Intake(record))
        };

        let mut request = match row_type.as_str() {
            "bet" => return intake(RecordKind::Bet),
            "deposit" => return intake(RecordKind::Deposit),
            "withdrawal" => return intake(RecordKind::Withdrawal),
            "accept" => TransitionRequest::accept_bet(record_id.clone()),
            "win" => TransitionRequest::settle_bet(record_id.clone(), BetOutcome::Win),
            "loss" => TransitionRequest::settle_bet(record_id.clone(), BetOutcome::Loss),
            "accept_win" => TransitionRequest::accept_and_settle(record_id.clone(), BetOutcome::Win),
            "accept_loss" => {
                TransitionRequest::accept_and_settle(record_id.clone(), BetOutcome::Loss)
            }
            "approve" => TransitionRequest::approve(record_id.clone(), *kinds.get(&record_id)?),
            "reject" => TransitionRequest::reject(record_id.clone(), *kinds.get(&record_id)?),
            _ => return None,
        };
        if let Some(possible_win) = self.possible_win {
            request = request.with_possible_win(possible_win);
        }
        if let Some(operator) = self.operator.filter(|o| !o.is_empty()) {
            request = request.by(OperatorId(operator));
        }
        Some(Action::Transition(request))
    }
}

/// Counts of what happened to the input rows.
#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    taken_in: usize,
    applied: usize,
    refused: usize,
    skipped: usize,
}

/// Process rows from a CSV reader in file order.
///
/// Malformed rows, intake failures and refused transitions are logged and
/// skipped; processing continues with the next row.
///
/// # Example
///
/// ```csv
/// type,record,account,amount,possible_win
/// deposit,d-1,alice,100.0,
/// approve,d-1,,,
/// bet,b-1,alice,40.0,90.0
/// accept,b-1,,,
/// win,b-1,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the header cannot be read.
fn process_rows<R: Read>(reader: R, engine: &Engine) -> Result<Summary, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut kinds = HashMap::new();
    let mut summary = Summary::default();

    for result in rdr.deserialize::<CsvRow>() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "skipping malformed row");
                summary.skipped += 1;
                continue;
            }
        };
        let Some(action) = row.into_action(&kinds) else {
            warn!("skipping invalid row");
            summary.skipped += 1;
            continue;
        };

        match action {
            Action::Intake(record) => match engine.intake(record) {
                Ok(stored) => {
                    kinds.insert(stored.id().clone(), stored.kind());
                    summary.taken_in += 1;
                }
                Err(e) => {
                    warn!(error = %e, "skipping record");
                    summary.skipped += 1;
                }
            },
            Action::Transition(request) => {
                let record_id = request.record_id.clone();
                match engine.apply(request) {
                    Ok(outcome) => {
                        debug!(record = %record_id, disposition = ?outcome.disposition, "row processed");
                        summary.applied += 1;
                    }
                    Err(e) => {
                        warn!(record = %record_id, error = %e, "transition refused");
                        summary.refused += 1;
                    }
                }
            }
        }
    }

    Ok(summary)
}

/// Write balances as CSV, sorted by account, amounts rounded to 4 decimal places.
///
/// ```csv
/// account,amount,version
/// alice,150.0000,3
/// ```
fn write_balances<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    let balances = engine
        .balances()
        .map_err(|e| csv::Error::from(std::io::Error::other(e)))?;
    for balance in &balances {
        wtr.serialize(balance)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_audit<W: Write>(log: &AuditLog, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for entry in log.drain() {
        wtr.serialize(&entry)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use balance_reconciler::AccountId;
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    fn run(csv: &str) -> (Engine, Summary) {
        let engine = Engine::new();
        let summary = process_rows(Cursor::new(csv), &engine).unwrap();
        (engine, summary)
    }

    fn balance_of(engine: &Engine, account: &str) -> Decimal {
        engine.balance(&AccountId::from(account)).unwrap().amount
    }

    #[test]
    fn deposit_then_approve() {
        let (engine, summary) = run("type,record,account,amount,possible_win\n\
                                     deposit,d-1,alice,100.0,\n\
                                     approve,d-1,,,\n");
        assert_eq!(summary.taken_in, 1);
        assert_eq!(summary.applied, 1);
        assert_eq!(balance_of(&engine, "alice"), dec!(100.0));
    }

    #[test]
    fn full_scenario() {
        let (engine, summary) = run("type,record,account,amount,possible_win\n\
                                     deposit,d-0,alice,100,\n\
                                     approve,d-0,,,\n\
                                     deposit,d-1,alice,50,\n\
                                     approve,d-1,,,\n\
                                     withdrawal,w-1,alice,200,\n\
                                     approve,w-1,,,\n\
                                     bet,b-1,alice,150,300\n\
                                     accept,b-1,,,\n\
                                     win,b-1,,,\n");
        assert_eq!(summary.refused, 1);
        assert_eq!(balance_of(&engine, "alice"), dec!(300));
    }

    #[test]
    fn possible_win_can_be_updated_on_settlement() {
        let (engine, _) = run("type,record,account,amount,possible_win\n\
                               deposit,d-1,alice,10,\n\
                               approve,d-1,,,\n\
                               bet,b-1,alice,10,15\n\
                               accept,b-1,,,\n\
                               win,b-1,,,25\n");
        assert_eq!(balance_of(&engine, "alice"), dec!(25));
    }

    #[test]
    fn accept_and_settle_rows() {
        let (engine, summary) = run("type,record,account,amount,possible_win\n\
                                     deposit,d-1,alice,100,\n\
                                     approve,d-1,,,\n\
                                     bet,b-1,alice,30,70\n\
                                     accept_win,b-1,,,\n\
                                     bet,b-2,alice,20,50\n\
                                     accept_loss,b-2,,,\n");
        assert_eq!(summary.applied, 3);
        assert_eq!(balance_of(&engine, "alice"), dec!(120));
    }

    #[test]
    fn duplicate_approval_is_not_double_credited() {
        let (engine, summary) = run("type,record,account,amount,possible_win\n\
                                     deposit,d-1,alice,50,\n\
                                     approve,d-1,,,\n\
                                     approve,d-1,,,\n");
        assert_eq!(summary.applied, 2);
        assert_eq!(balance_of(&engine, "alice"), dec!(50));
    }

    #[test]
    fn parse_with_whitespace_and_operator() {
        let (engine, summary) = run("type,record,account,amount,possible_win,prediction,operator\n \
                                     deposit , d-1 , alice , 5.5 , , , \n\
                                     approve,d-1,,,,,ops-7\n");
        assert_eq!(summary.applied, 1);
        assert_eq!(balance_of(&engine, "alice"), dec!(5.5));
    }

    #[test]
    fn skip_malformed_and_unknown_rows() {
        let (engine, summary) = run("type,record,account,amount,possible_win\n\
                                     deposit,d-1,alice,100.0,\n\
                                     teleport,d-1,,,\n\
                                     approve,nope,,,\n\
                                     deposit,d-2,bob,,\n\
                                     deposit,d-3,carol,-5,\n\
                                     approve,d-1,,,\n");
        assert_eq!(summary.skipped, 4);
        assert_eq!(summary.applied, 1);
        assert_eq!(balance_of(&engine, "alice"), dec!(100.0));
    }

    #[test]
    fn write_balances_to_csv() {
        let (engine, _) = run("type,record,account,amount,possible_win\n\
                               deposit,d-1,bob,1.23456,\n\
                               approve,d-1,,,\n\
                               deposit,d-2,alice,2,\n\
                               approve,d-2,,,\n");
        let mut output = Vec::new();
        write_balances(&engine, &mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_eq!(output, "account,amount,version\nalice,2,1\nbob,1.2346,1\n");
    }

    #[test]
    fn write_audit_entries_to_csv() {
        let log = Arc::new(AuditLog::new());
        let engine = Engine::new().with_audit_sink(log.clone());
        process_rows(
            Cursor::new(
                "type,record,account,amount,possible_win,prediction,operator\n\
                 deposit,d-1,alice,50,,,\n\
                 approve,d-1,,,,,ops-1\n",
            ),
            &engine,
        )
        .unwrap();

        let mut output = Vec::new();
        write_audit(&log, &mut output).unwrap();
        let output = String::from_utf8(output).unwrap();
        let mut lines = output.lines();
        assert_eq!(
            lines.next(),
            Some("record_id,kind,account_id,from_state,to_state,delta,balance,operator,at")
        );
        assert!(lines.next().unwrap().starts_with("d-1,deposit,alice,pending,approved,50,50,ops-1,"));
    }

    #[test]
    fn engine_config_from_flags() {
        let args = Args::parse_from(["reconcile", "in.csv", "--max-attempts", "5", "--backoff-ms", "2"]);
        let config = args.engine_config();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(2));
        assert_eq!(config.retry.max_backoff, Duration::from_millis(40));
        assert_eq!(config.default_timeout, Duration::from_secs(5));
    }
}
