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

//! Wallet public API integration tests.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::thread;
use wallet_ledger::{
    Engine, InMemoryOrders, InMemoryUsers, LedgerEntry, LedgerError, LedgerStore, UserId, Wallet,
};

// === Helper Functions ===

fn funded(amount: Decimal) -> LedgerEntry {
    let mut entry = LedgerEntry::new(UserId(1));
    entry.credit_recharge(amount).unwrap();
    entry
}

// === Basic Wallet Tests ===

#[test]
fn new_wallet_has_zero_balances() {
    let entry = LedgerEntry::new(UserId(1));
    assert_eq!(entry.balance, Decimal::ZERO);
    assert_eq!(entry.frozen_balance, Decimal::ZERO);
    assert_eq!(entry.total_recharge, Decimal::ZERO);
    assert_eq!(entry.total_withdraw, Decimal::ZERO);
    assert_eq!(entry.total_income, Decimal::ZERO);
    assert_eq!(entry.total(), Decimal::ZERO);
}

#[test]
fn recharges_accumulate() {
    let mut entry = funded(dec!(100.00));
    entry.credit_recharge(dec!(50.50)).unwrap();
    assert_eq!(entry.balance, dec!(150.50));
    assert_eq!(entry.total_recharge, dec!(150.50));
}

#[test]
fn total_equals_balance_plus_frozen() {
    let mut entry = funded(dec!(100.00));
    entry.freeze(dec!(30.00)).unwrap();
    assert_eq!(entry.balance, dec!(70.00));
    assert_eq!(entry.frozen_balance, dec!(30.00));
    assert_eq!(entry.total(), dec!(100.00));
}

#[test]
fn income_and_refund_credit_balance() {
    let mut entry = LedgerEntry::new(UserId(1));
    entry.credit_income(dec!(20.00)).unwrap();
    entry.credit_refund(dec!(5.00)).unwrap();
    assert_eq!(entry.balance, dec!(25.00));
    assert_eq!(entry.total_income, dec!(20.00));
    assert_eq!(entry.total_recharge, Decimal::ZERO);
}

// === Escrow ===

#[test]
fn settle_frozen_counts_as_income() {
    let mut entry = funded(dec!(100.00));
    entry.freeze(dec!(40.00)).unwrap();
    entry.settle_frozen(dec!(40.00)).unwrap();
    assert_eq!(entry.balance, dec!(60.00));
    assert_eq!(entry.frozen_balance, Decimal::ZERO);
    assert_eq!(entry.total_income, dec!(40.00));
}

#[test]
fn released_withdrawal_counts_as_withdrawn() {
    let mut entry = funded(dec!(100.00));
    entry.freeze(dec!(40.00)).unwrap();
    entry.release_frozen_withdrawal(dec!(40.00)).unwrap();
    assert_eq!(entry.frozen_balance, Decimal::ZERO);
    assert_eq!(entry.total_withdraw, dec!(40.00));
    assert_eq!(entry.total(), dec!(60.00));
}

#[test]
fn unfreeze_restores_balance() {
    let mut entry = funded(dec!(10.00));
    entry.freeze(dec!(10.00)).unwrap();
    entry.unfreeze(dec!(10.00)).unwrap();
    assert_eq!(entry, funded(dec!(10.00)));
}

// === Error Cases ===

#[test]
fn zero_and_negative_amounts_are_rejected() {
    let mut entry = funded(dec!(10.00));
    let before = entry.clone();
    assert_eq!(entry.credit_recharge(Decimal::ZERO), Err(LedgerError::InvalidAmount));
    assert_eq!(entry.debit_balance(dec!(-1)), Err(LedgerError::InvalidAmount));
    assert_eq!(entry.freeze(Decimal::ZERO), Err(LedgerError::InvalidAmount));
    assert_eq!(entry.settle_frozen(dec!(-0.01)), Err(LedgerError::InvalidAmount));
    assert_eq!(entry, before);
}

#[test]
fn overdraw_leaves_entry_untouched() {
    let mut entry = funded(dec!(10.00));
    entry.freeze(dec!(4.00)).unwrap();
    let before = entry.clone();

    assert_eq!(entry.debit_balance(dec!(6.01)), Err(LedgerError::InsufficientFunds));
    assert_eq!(entry.freeze(dec!(6.01)), Err(LedgerError::InsufficientFunds));
    assert_eq!(entry.unfreeze(dec!(4.01)), Err(LedgerError::InsufficientFunds));
    assert_eq!(entry.settle_frozen(dec!(4.01)), Err(LedgerError::InsufficientFunds));
    assert_eq!(
        entry.release_frozen_withdrawal(dec!(4.01)),
        Err(LedgerError::InsufficientFunds)
    );
    assert_eq!(entry, before);
}

// === Edge Cases ===

#[test]
fn debit_exact_balance_succeeds() {
    let mut entry = funded(dec!(100.00));
    entry.debit_balance(dec!(100.00)).unwrap();
    assert_eq!(entry.balance, Decimal::ZERO);
}

#[test]
fn small_decimal_precision() {
    let mut entry = LedgerEntry::new(UserId(1));
    entry.credit_recharge(dec!(0.0001)).unwrap();
    entry.credit_recharge(dec!(0.0002)).unwrap();
    assert_eq!(entry.balance, dec!(0.0003));
}

#[test]
fn large_amounts() {
    let entry = funded(dec!(999999999999.99));
    assert_eq!(entry.balance, dec!(999999999999.99));
}

// === Wallet Handle ===

#[test]
fn wallet_serializes_rounded_to_cents() {
    let users = Arc::new(InMemoryUsers::new());
    users.register(UserId(9));
    let engine = Engine::new(users, Arc::new(InMemoryOrders::new()));
    engine.credit_income(UserId(9), dec!(123.456)).unwrap();
    engine.freeze_balance(UserId(9), dec!(0.005)).unwrap();

    let wallet = engine.ledger().get(UserId(9)).unwrap();
    let json = serde_json::to_value(&*wallet).unwrap();
    assert_eq!(json["user"], 9);
    assert_eq!(json["balance"], "123.45");
    assert_eq!(json["frozen"], "0.00");
    assert_eq!(json["total"], "123.46");
    assert_eq!(json["total_income"], "123.46");
}

// === Store ===

#[test]
fn store_returns_same_wallet_per_user() {
    let store = LedgerStore::new();
    let a = store.get_or_create(UserId(1));
    let b = store.get_or_create(UserId(1));
    assert!(Arc::ptr_eq(&a, &b));
    assert!(store.get(UserId(2)).is_none());
    assert_eq!(store.len(), 1);
}

#[test]
fn snapshots_are_sorted_by_user() {
    let store = LedgerStore::new();
    for id in [5, 1, 3] {
        store.get_or_create(UserId(id));
    }
    let users: Vec<UserId> = store.snapshots().iter().map(|e| e.user_id).collect();
    assert_eq!(users, vec![UserId(1), UserId(3), UserId(5)]);
    let handles: Vec<UserId> = store.wallets().iter().map(|w| w.snapshot().user_id).collect();
    assert_eq!(handles, users);
}

#[test]
fn concurrent_get_or_create_yields_one_wallet() {
    let store = Arc::new(LedgerStore::new());
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || store.get_or_create(UserId(42)))
        })
        .collect();
    let wallets: Vec<Arc<Wallet>> = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .collect();
    assert!(wallets.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(store.len(), 1);
}
