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

//! Durability and all-or-nothing commit tests.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use wallet_ledger::{
    Engine, InMemoryOrders, InMemoryUsers, Journal, JournalRecord, LedgerConfig, LedgerError,
    PaymentMethod, PaymentStatus, UserId,
};

const USER: UserId = UserId(1);

fn users() -> Arc<InMemoryUsers> {
    let users = Arc::new(InMemoryUsers::new());
    users.register(USER);
    users
}

fn open(path: &Path) -> Engine {
    let config = LedgerConfig::default().with_journal_path(path);
    Engine::with_config(config, users(), Arc::new(InMemoryOrders::new())).unwrap()
}

/// Journal that can be told to reject appends.
#[derive(Debug, Default)]
struct FlakyJournal {
    failing: Arc<AtomicBool>,
    appended: Arc<AtomicUsize>,
}

impl Journal for FlakyJournal {
    fn append(&self, _record: &JournalRecord) -> Result<(), LedgerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LedgerError::Storage("disk full".into()));
        }
        self.appended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn flaky_engine() -> (Engine, Arc<AtomicBool>, Arc<AtomicUsize>) {
    let journal = FlakyJournal::default();
    let failing = journal.failing.clone();
    let appended = journal.appended.clone();
    let engine = Engine::with_journal(
        LedgerConfig::default(),
        Box::new(journal),
        users(),
        Arc::new(InMemoryOrders::new()),
    );
    (engine, failing, appended)
}

// === All-or-nothing ===

#[test]
fn failed_commit_leaves_no_trace() {
    let (engine, failing, _) = flaky_engine();
    let intent = engine
        .create_recharge_intent(USER, dec!(100.00), PaymentMethod::Alipay)
        .unwrap();

    failing.store(true, Ordering::SeqCst);
    let result = engine.process_payment_outcome(intent.id, "abc1234567");
    assert!(matches!(result, Err(LedgerError::Storage(_))));

    assert_eq!(engine.payment(intent.id).unwrap().status, PaymentStatus::Pending);
    assert_eq!(engine.ledger_entry(USER).unwrap().balance, Decimal::ZERO);
    assert_eq!(engine.idempotency().owner("abc1234567"), None);
}

#[test]
fn retry_with_same_transaction_id_after_storage_failure() {
    let (engine, failing, appended) = flaky_engine();
    let intent = engine
        .create_recharge_intent(USER, dec!(100.00), PaymentMethod::Alipay)
        .unwrap();

    failing.store(true, Ordering::SeqCst);
    assert!(engine.process_payment_outcome(intent.id, "abc1234567").is_err());
    failing.store(false, Ordering::SeqCst);

    engine.process_payment_outcome(intent.id, "abc1234567").unwrap();
    assert_eq!(engine.ledger_entry(USER).unwrap().balance, dec!(100.00));
    assert_eq!(engine.idempotency().owner("abc1234567"), Some(intent.id));
    assert_eq!(appended.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_intent_is_not_stored() {
    let (engine, failing, _) = flaky_engine();
    failing.store(true, Ordering::SeqCst);

    let result = engine.create_recharge_intent(USER, dec!(10.00), PaymentMethod::Wechat);
    assert!(matches!(result, Err(LedgerError::Storage(_))));
    assert!(engine.payments().is_empty());
}

#[test]
fn failed_refund_and_withdrawal_do_not_move_money() {
    let (engine, failing, _) = flaky_engine();
    let intent = engine
        .create_recharge_intent(USER, dec!(100.00), PaymentMethod::Alipay)
        .unwrap();
    engine.process_payment_outcome(intent.id, "abc1234567").unwrap();
    let before = engine.ledger_entry(USER).unwrap();
    let payments_before = engine.payments().len();

    failing.store(true, Ordering::SeqCst);
    assert!(engine.refund(intent.id, dec!(10.00)).is_err());
    assert!(engine.request_withdrawal(USER, dec!(10.00)).is_err());
    assert!(engine.freeze_balance(USER, dec!(10.00)).is_err());

    assert_eq!(engine.ledger_entry(USER).unwrap(), before);
    assert_eq!(engine.payments().len(), payments_before);
    assert_eq!(engine.payments().refunded_total(intent.id), Decimal::ZERO);
}

// === Restart ===

#[test]
fn restart_restores_wallets_payments_and_transaction_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.journal");

    let (recharge, pending, withdrawal, before) = {
        let engine = open(&path);
        let recharge = engine
            .create_recharge_intent(USER, dec!(100.00), PaymentMethod::Alipay)
            .unwrap();
        engine.process_payment_outcome(recharge.id, "abc1234567").unwrap();
        let pending = engine
            .create_recharge_intent(USER, dec!(5.00), PaymentMethod::Wechat)
            .unwrap();
        let withdrawal = engine.request_withdrawal(USER, dec!(30.00)).unwrap();
        engine.refund(recharge.id, dec!(20.00)).unwrap();
        (recharge, pending, withdrawal, engine.ledger_entry(USER).unwrap())
    };

    let engine = open(&path);
    assert_eq!(engine.ledger_entry(USER).unwrap(), before);
    assert_eq!(before.balance, dec!(90.00));
    assert_eq!(before.frozen_balance, dec!(30.00));
    assert_eq!(engine.payment(recharge.id).unwrap().status, PaymentStatus::Success);
    assert_eq!(engine.payment(pending.id).unwrap().status, PaymentStatus::Pending);
    assert_eq!(engine.payment(withdrawal.id).unwrap().status, PaymentStatus::Pending);
    assert_eq!(engine.payments().refunded_total(recharge.id), dec!(20.00));
    assert_eq!(engine.payments().len(), 4);
    assert_eq!(engine.idempotency().owner("abc1234567"), Some(recharge.id));

    // The replayed index still rejects reuse
    assert_eq!(
        engine.process_payment_outcome(pending.id, "abc1234567"),
        Err(LedgerError::DuplicateTransaction)
    );
    // State carried over keeps working
    engine.process_payment_outcome(withdrawal.id, "payout_000001").unwrap();
    let fresh = engine
        .create_recharge_intent(USER, dec!(1.00), PaymentMethod::Alipay)
        .unwrap();
    assert!(fresh.id > withdrawal.id);
    assert_eq!(engine.payment_by_no(&pending.payment_no).unwrap().id, pending.id);
}

#[test]
fn restart_after_torn_write_keeps_committed_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.journal");
    {
        let engine = open(&path);
        let intent = engine
            .create_recharge_intent(USER, dec!(40.00), PaymentMethod::Alipay)
            .unwrap();
        engine.process_payment_outcome(intent.id, "abc1234567").unwrap();
    }
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(br#"{"payments":[{"id":9"#).unwrap();
    drop(file);

    let engine = open(&path);
    assert_eq!(engine.ledger_entry(USER).unwrap().balance, dec!(40.00));
    assert_eq!(engine.payments().len(), 1);
}

#[test]
fn config_file_drives_journal_location() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("state").join("ledger.journal");
    let config_path = dir.path().join("ledger.toml");
    std::fs::write(
        &config_path,
        format!(
            "lock_timeout_ms = 250\njournal_path = {:?}\n",
            journal_path.display().to_string()
        ),
    )
    .unwrap();

    let config = LedgerConfig::load(&config_path).unwrap();
    assert_eq!(config.journal_path.as_deref(), Some(journal_path.as_path()));
    {
        let engine = Engine::with_config(config.clone(), users(), Arc::new(InMemoryOrders::new())).unwrap();
        engine.credit_income(USER, dec!(12.50)).unwrap();
    }
    assert!(journal_path.exists());

    let engine = Engine::with_config(config, users(), Arc::new(InMemoryOrders::new())).unwrap();
    let entry = engine.ledger_entry(USER).unwrap();
    assert_eq!(entry.balance, dec!(12.50));
    assert_eq!(entry.total_income, dec!(12.50));
}

#[test]
fn corrupt_journal_refuses_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.journal");
    std::fs::write(&path, "{\"payments\": 3}\n").unwrap();

    let config = LedgerConfig::default().with_journal_path(&path);
    let result = Engine::with_config(config, users(), Arc::new(InMemoryOrders::new()));
    assert!(matches!(result, Err(LedgerError::Storage(_))));
}
