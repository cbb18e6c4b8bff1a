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

//! Ledger store: one wallet per user.
//!
//! A [`LedgerEntry`] holds the spendable balance, the frozen (escrowed)
//! balance and three lifetime totals. Entries live behind a per-user
//! [`Wallet`] mutex; the mutating methods on [`LedgerEntry`] take `&mut self`,
//! so the only way to reach them for a stored wallet is through the guard
//! held by the engine's unit of work. Outside the crate a `Wallet` is
//! read-only.
//!
//! ```text
//!   credit_* ──► balance ──freeze──► frozen ──settle_frozen──────────► total_income
//!                   ▲                  │    └─release_frozen_withdrawal► total_withdraw
//!                   └─────unfreeze─────┘
//! ```
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use wallet_ledger::{LedgerEntry, UserId};
//!
//! let mut entry = LedgerEntry::new(UserId(1));
//! entry.credit_recharge(dec!(100.00)).unwrap();
//! entry.freeze(dec!(40.00)).unwrap();
//! assert_eq!(entry.balance, dec!(60.00));
//! assert_eq!(entry.total(), dec!(100.00));
//! ```

use crate::LedgerError;
use crate::base::UserId;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Point-in-time state of a user's wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub user_id: UserId,
    pub balance: Decimal,
    pub frozen_balance: Decimal,
    pub total_recharge: Decimal,
    pub total_withdraw: Decimal,
    pub total_income: Decimal,
}

fn ensure_positive(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(())
}

/// Addition that reports overflow as [`LedgerError::InvalidAmount`].
fn checked_sum(a: Decimal, b: Decimal) -> Result<Decimal, LedgerError> {
    a.checked_add(b).ok_or(LedgerError::InvalidAmount)
}

impl LedgerEntry {
    /// Creates an entry with every field at zero.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            frozen_balance: Decimal::ZERO,
            total_recharge: Decimal::ZERO,
            total_withdraw: Decimal::ZERO,
            total_income: Decimal::ZERO,
        }
    }

    /// Returns `balance + frozen_balance`.
    pub fn total(&self) -> Decimal {
        self.balance + self.frozen_balance
    }

    /// Balance after crediting `amount`.
    ///
    /// Credits are refused when `balance + frozen_balance` would no longer be
    /// representable, so [`LedgerEntry::total`] and the moves between the two
    /// balances cannot overflow.
    fn credited_balance(&self, amount: Decimal) -> Result<Decimal, LedgerError> {
        checked_sum(self.total(), amount)?;
        checked_sum(self.balance, amount)
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance went negative: {}",
            self.balance
        );
        debug_assert!(
            self.frozen_balance >= Decimal::ZERO,
            "Invariant violated: frozen balance went negative: {}",
            self.frozen_balance
        );
    }

    /// Increases balance and lifetime recharge (settled recharge).
    pub fn credit_recharge(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        ensure_positive(amount)?;
        let balance = self.credited_balance(amount)?;
        self.total_recharge = checked_sum(self.total_recharge, amount)?;
        self.balance = balance;
        self.assert_invariants();
        Ok(())
    }

    /// Increases balance and lifetime income (earnings paid out directly).
    pub fn credit_income(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        ensure_positive(amount)?;
        let balance = self.credited_balance(amount)?;
        self.total_income = checked_sum(self.total_income, amount)?;
        self.balance = balance;
        self.assert_invariants();
        Ok(())
    }

    /// Increases balance only (money returned by a refund).
    pub fn credit_refund(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        ensure_positive(amount)?;
        self.balance = self.credited_balance(amount)?;
        self.assert_invariants();
        Ok(())
    }

    /// Decreases balance.
    pub fn debit_balance(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        ensure_positive(amount)?;
        if self.balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }
        self.balance -= amount;
        self.assert_invariants();
        Ok(())
    }

    /// Moves funds from balance to frozen.
    pub fn freeze(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        ensure_positive(amount)?;
        if self.balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }
        let frozen_balance = checked_sum(self.frozen_balance, amount)?;
        self.balance -= amount;
        self.frozen_balance = frozen_balance;
        self.assert_invariants();
        Ok(())
    }

    /// Moves funds from frozen back to balance.
    pub fn unfreeze(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        ensure_positive(amount)?;
        if self.frozen_balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }
        let balance = checked_sum(self.balance, amount)?;
        self.frozen_balance -= amount;
        self.balance = balance;
        self.assert_invariants();
        Ok(())
    }

    /// Removes frozen funds as finally earned. They go to lifetime income and
    /// never return to the spendable balance.
    pub fn settle_frozen(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        ensure_positive(amount)?;
        if self.frozen_balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }
        let total_income = checked_sum(self.total_income, amount)?;
        self.frozen_balance -= amount;
        self.total_income = total_income;
        self.assert_invariants();
        Ok(())
    }

    /// Removes frozen funds paid out by a settled withdrawal.
    pub fn release_frozen_withdrawal(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        ensure_positive(amount)?;
        if self.frozen_balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }
        let total_withdraw = checked_sum(self.total_withdraw, amount)?;
        self.frozen_balance -= amount;
        self.total_withdraw = total_withdraw;
        self.assert_invariants();
        Ok(())
    }
}

/// A user's wallet: the ledger entry behind its exclusive lock.
#[derive(Debug)]
pub struct Wallet {
    inner: Mutex<LedgerEntry>,
}

impl Wallet {
    const DECIMAL_PRECISION: u32 = 2;

    pub fn new(user_id: UserId) -> Self {
        Self::from_entry(LedgerEntry::new(user_id))
    }

    pub(crate) fn from_entry(entry: LedgerEntry) -> Self {
        Self {
            inner: Mutex::new(entry),
        }
    }

    /// Acquires the wallet's exclusive lock, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::LockTimeout`] if the lock is still held by
    /// another operation when the timeout elapses.
    pub(crate) fn lock_for(&self, timeout: Duration) -> Result<MutexGuard<'_, LedgerEntry>, LedgerError> {
        self.inner
            .try_lock_for(timeout)
            .ok_or(LedgerError::LockTimeout)
    }

    /// Returns a copy of the current entry.
    pub fn snapshot(&self) -> LedgerEntry {
        self.inner.lock().clone()
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    pub fn frozen_balance(&self) -> Decimal {
        self.inner.lock().frozen_balance
    }

    /// Returns `balance + frozen_balance`.
    pub fn total(&self) -> Decimal {
        self.inner.lock().total()
    }
}

impl Serialize for Wallet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let precision = Wallet::DECIMAL_PRECISION;
        let mut state = serializer.serialize_struct("Wallet", 7)?;
        state.serialize_field("user", &data.user_id)?;
        state.serialize_field("balance", &data.balance.round_dp(precision))?;
        state.serialize_field("frozen", &data.frozen_balance.round_dp(precision))?;
        state.serialize_field("total", &data.total().round_dp(precision))?;
        state.serialize_field("total_recharge", &data.total_recharge.round_dp(precision))?;
        state.serialize_field("total_withdraw", &data.total_withdraw.round_dp(precision))?;
        state.serialize_field("total_income", &data.total_income.round_dp(precision))?;
        state.end()
    }
}

/// All wallets, indexed by owning user.
///
/// The store hands out shared [`Wallet`] handles and never locks an entry
/// itself; the engine takes the per-user lock for every write.
/// Wallets for different users share no lock, only a `DashMap` shard
/// while the handle is cloned out.
#[derive(Debug, Default)]
pub struct LedgerStore {
    wallets: DashMap<UserId, Arc<Wallet>>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the user's wallet, creating a zeroed one on first access.
    pub fn get_or_create(&self, user_id: UserId) -> Arc<Wallet> {
        // Clone the handle out so the shard guard is dropped before the
        // caller blocks on the wallet mutex.
        self.wallets
            .entry(user_id)
            .or_insert_with(|| Arc::new(Wallet::new(user_id)))
            .clone()
    }

    pub fn get(&self, user_id: UserId) -> Option<Arc<Wallet>> {
        self.wallets.get(&user_id).map(|wallet| Arc::clone(&wallet))
    }

    /// Snapshots of every wallet, ordered by user ID.
    pub fn snapshots(&self) -> Vec<LedgerEntry> {
        self.wallets()
            .iter()
            .map(|wallet| wallet.snapshot())
            .collect()
    }

    /// Wallet handles ordered by user ID.
    pub fn wallets(&self) -> Vec<Arc<Wallet>> {
        let mut wallets: Vec<(UserId, Arc<Wallet>)> = self
            .wallets
            .iter()
            .map(|wallet| (*wallet.key(), Arc::clone(wallet.value())))
            .collect();
        wallets.sort_by_key(|(user_id, _)| *user_id);
        wallets.into_iter().map(|(_, wallet)| wallet).collect()
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Replaces a wallet's state wholesale. Only used while replaying the
    /// journal, before any operation can hold a wallet lock.
    pub(crate) fn restore(&self, entry: LedgerEntry) {
        self.wallets
            .insert(entry.user_id, Arc::new(Wallet::from_entry(entry)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // === LedgerEntry Internal Tests ===

    #[test]
    fn freeze_moves_balance_to_frozen() {
        let mut entry = LedgerEntry::new(UserId(1));
        entry.credit_recharge(dec!(100.00)).unwrap();
        entry.freeze(dec!(30.00)).unwrap();
        assert_eq!(entry.balance, dec!(70.00));
        assert_eq!(entry.frozen_balance, dec!(30.00));
        assert_eq!(entry.total(), dec!(100.00));
    }

    #[test]
    fn unfreeze_returns_frozen_to_balance() {
        let mut entry = LedgerEntry::new(UserId(1));
        entry.credit_recharge(dec!(100.00)).unwrap();
        entry.freeze(dec!(30.00)).unwrap();
        entry.unfreeze(dec!(30.00)).unwrap();
        assert_eq!(entry.balance, dec!(100.00));
        assert_eq!(entry.frozen_balance, Decimal::ZERO);
    }

    #[test]
    fn settle_frozen_is_earned_not_returned() {
        let mut entry = LedgerEntry::new(UserId(1));
        entry.credit_recharge(dec!(100.00)).unwrap();
        entry.freeze(dec!(40.00)).unwrap();
        entry.settle_frozen(dec!(40.00)).unwrap();
        assert_eq!(entry.balance, dec!(60.00));
        assert_eq!(entry.frozen_balance, Decimal::ZERO);
        assert_eq!(entry.total_income, dec!(40.00));
    }

    #[test]
    fn release_frozen_withdrawal_counts_lifetime_withdraw() {
        let mut entry = LedgerEntry::new(UserId(1));
        entry.credit_recharge(dec!(100.00)).unwrap();
        entry.freeze(dec!(25.00)).unwrap();
        entry.release_frozen_withdrawal(dec!(25.00)).unwrap();
        assert_eq!(entry.total(), dec!(75.00));
        assert_eq!(entry.total_withdraw, dec!(25.00));
    }

    #[test]
    fn freeze_insufficient_is_not_partially_applied() {
        let mut entry = LedgerEntry::new(UserId(1));
        entry.credit_recharge(dec!(50.00)).unwrap();
        let result = entry.freeze(dec!(50.01));
        assert_eq!(result, Err(LedgerError::InsufficientFunds));
        assert_eq!(entry.balance, dec!(50.00));
        assert_eq!(entry.frozen_balance, Decimal::ZERO);
    }

    #[test]
    fn unfreeze_more_than_frozen_fails() {
        let mut entry = LedgerEntry::new(UserId(1));
        entry.credit_recharge(dec!(100.00)).unwrap();
        entry.freeze(dec!(10.00)).unwrap();
        assert_eq!(
            entry.unfreeze(dec!(10.01)),
            Err(LedgerError::InsufficientFunds)
        );
        assert_eq!(
            entry.settle_frozen(dec!(10.01)),
            Err(LedgerError::InsufficientFunds)
        );
    }

    #[test]
    fn zero_and_negative_amounts_are_rejected() {
        let mut entry = LedgerEntry::new(UserId(1));
        assert_eq!(entry.credit_recharge(Decimal::ZERO), Err(LedgerError::InvalidAmount));
        assert_eq!(entry.credit_income(dec!(-1)), Err(LedgerError::InvalidAmount));
        assert_eq!(entry.debit_balance(Decimal::ZERO), Err(LedgerError::InvalidAmount));
        assert_eq!(entry.freeze(dec!(-5)), Err(LedgerError::InvalidAmount));
        assert_eq!(entry.unfreeze(Decimal::ZERO), Err(LedgerError::InvalidAmount));
        assert_eq!(entry, LedgerEntry::new(UserId(1)));
    }

    #[test]
    fn credit_overflow_is_rejected_without_partial_apply() {
        let mut entry = LedgerEntry::new(UserId(1));
        entry.credit_recharge(Decimal::MAX).unwrap();
        let before = entry.clone();

        assert_eq!(entry.credit_recharge(Decimal::MAX), Err(LedgerError::InvalidAmount));
        assert_eq!(entry.credit_income(dec!(1)), Err(LedgerError::InvalidAmount));
        assert_eq!(entry.credit_refund(dec!(1)), Err(LedgerError::InvalidAmount));
        assert_eq!(entry, before);
    }

    #[test]
    fn credit_is_bounded_by_balance_plus_frozen() {
        let mut entry = LedgerEntry::new(UserId(1));
        entry.credit_income(Decimal::MAX).unwrap();
        entry.freeze(Decimal::MAX - dec!(1)).unwrap();
        let before = entry.clone();

        // Balance alone has headroom, the total does not
        assert_eq!(entry.credit_refund(dec!(2)), Err(LedgerError::InvalidAmount));
        assert_eq!(entry, before);
        entry.unfreeze(Decimal::MAX - dec!(1)).unwrap();
        assert_eq!(entry.total(), Decimal::MAX);
    }

    #[test]
    fn lifetime_total_overflow_is_rejected() {
        let mut entry = LedgerEntry::new(UserId(1));
        entry.credit_income(Decimal::MAX).unwrap();
        entry.debit_balance(Decimal::MAX).unwrap();
        entry.credit_recharge(dec!(10)).unwrap();
        entry.freeze(dec!(10)).unwrap();
        let before = entry.clone();

        assert_eq!(entry.settle_frozen(dec!(10)), Err(LedgerError::InvalidAmount));
        assert_eq!(entry.credit_income(dec!(1)), Err(LedgerError::InvalidAmount));
        assert_eq!(entry, before);
        entry.release_frozen_withdrawal(dec!(10)).unwrap();
        assert_eq!(entry.total_withdraw, dec!(10));
    }

    // === Locking ===

    #[test]
    fn lock_for_times_out_while_held() {
        let wallet = Wallet::new(UserId(1));
        let _guard = wallet.lock_for(Duration::from_millis(10)).unwrap();
        let result = wallet.lock_for(Duration::from_millis(10));
        assert!(matches!(result, Err(LedgerError::LockTimeout)));
    }

    #[test]
    fn get_or_create_returns_same_wallet() {
        let store = LedgerStore::new();
        let first = store.get_or_create(UserId(7));
        let second = store.get_or_create(UserId(7));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
        assert_eq!(first.snapshot(), LedgerEntry::new(UserId(7)));
    }

    // === Serialization Tests ===

    #[test]
    fn serializer_rounds_to_two_decimal_places() {
        let wallet = Wallet::new(UserId(1));
        {
            let mut data = wallet.inner.lock();
            data.balance = dec!(123.456);
            data.frozen_balance = dec!(0.001);
        }

        let json = serde_json::to_string(&wallet).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["user"], 1);
        assert_eq!(parsed["balance"].as_str().unwrap(), "123.46");
        assert_eq!(parsed["frozen"].as_str().unwrap(), "0.00");
        assert_eq!(parsed["total"].as_str().unwrap(), "123.46");
    }

    #[test]
    fn serializer_uses_bankers_rounding() {
        let wallet = Wallet::new(UserId(1));
        {
            let mut data = wallet.inner.lock();
            data.balance = dec!(0.015);
            data.frozen_balance = dec!(0.005);
        }

        let json = serde_json::to_string(&wallet).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["balance"].as_str().unwrap(), "0.02");
        assert_eq!(parsed["frozen"].as_str().unwrap(), "0.00");
    }
}
