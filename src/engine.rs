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

//! Transaction coordinator.
//!
//! The [`Engine`] is the only writer of wallets and payment records. Every
//! state-changing call follows the same sequence:
//!
//! 1. validate the arguments that need no lock;
//! 2. lock the owning user's wallet (bounded wait, [`LedgerError::LockTimeout`]);
//! 3. re-read the payment under the lock and validate its state;
//! 4. stage the payment and wallet changes in a unit of work;
//! 5. journal and apply them together, then release the lock.
//!
//! Any failure before step 5 completes leaves both stores untouched, so a
//! failed settlement can be retried with the same external transaction ID.
//!
//! # Thread Safety
//!
//! Wallets live in a [`DashMap`](dashmap::DashMap) of per-user mutexes, so
//! operations for different users proceed in parallel; operations for one
//! user are totally ordered by lock acquisition.

use crate::audit::{AuditEvent, AuditNotifier};
use crate::base::{OrderId, PaymentId, UserId};
use crate::config::LedgerConfig;
use crate::directory::{OrderBook, UserDirectory};
use crate::idempotency::IdempotencyGuard;
use crate::journal::{FileJournal, Journal, JournalRecord, NullJournal};
use crate::payment::{Payment, PaymentMethod, PaymentStatus, PaymentType, is_valid_transaction_id};
use crate::payment_store::PaymentStore;
use crate::unit_of_work::UnitOfWork;
use crate::wallet::{LedgerEntry, LedgerStore};
use crate::LedgerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Wallet and payment coordinator.
///
/// # Invariants
///
/// - Every wallet has `balance >= 0` and `frozen_balance >= 0`.
/// - A payment leaves PENDING at most once.
/// - An external transaction ID is carried by at most one SUCCESS payment.
/// - A settled RECHARGE credits its owner's wallet exactly once.
pub struct Engine {
    config: LedgerConfig,
    ledger: LedgerStore,
    payments: PaymentStore,
    idempotency: IdempotencyGuard,
    journal: Box<dyn Journal>,
    users: Arc<dyn UserDirectory>,
    orders: Arc<dyn OrderBook>,
    audit: AuditNotifier,
}

impl Engine {
    /// Creates an in-memory engine with default configuration.
    pub fn new(users: Arc<dyn UserDirectory>, orders: Arc<dyn OrderBook>) -> Self {
        Self::with_journal(LedgerConfig::default(), Box::new(NullJournal), users, orders)
    }

    /// Creates an engine from `config`, replaying the journal when one is
    /// configured.
    pub fn with_config(
        config: LedgerConfig,
        users: Arc<dyn UserDirectory>,
        orders: Arc<dyn OrderBook>,
    ) -> Result<Self, LedgerError> {
        let Some(path) = config.journal_path.clone() else {
            return Ok(Self::with_journal(config, Box::new(NullJournal), users, orders));
        };
        let (journal, records) = FileJournal::open(&path)?;
        let engine = Self::with_journal(config, Box::new(journal), users, orders);
        engine.replay(records);
        tracing::info!(
            path = %path.display(),
            payments = engine.payments.len(),
            wallets = engine.ledger.len(),
            "Ledger state restored"
        );
        Ok(engine)
    }

    /// Creates an engine writing to an arbitrary journal, starting empty.
    pub fn with_journal(
        config: LedgerConfig,
        journal: Box<dyn Journal>,
        users: Arc<dyn UserDirectory>,
        orders: Arc<dyn OrderBook>,
    ) -> Self {
        Engine {
            config,
            ledger: LedgerStore::new(),
            payments: PaymentStore::new(),
            idempotency: IdempotencyGuard::new(),
            journal,
            users,
            orders,
            audit: AuditNotifier::disabled(),
        }
    }

    /// Routes audit events (large recharges) to `audit`.
    pub fn with_audit(mut self, audit: AuditNotifier) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn payments(&self) -> &PaymentStore {
        &self.payments
    }

    pub fn idempotency(&self) -> &IdempotencyGuard {
        &self.idempotency
    }

    pub(crate) fn journal(&self) -> &dyn Journal {
        self.journal.as_ref()
    }

    fn replay(&self, records: Vec<JournalRecord>) {
        for record in records {
            for payment in record.payments {
                if payment.status == PaymentStatus::Success {
                    if let Some(transaction_id) = &payment.transaction_id {
                        self.idempotency.restore(transaction_id.clone(), payment.id);
                    }
                }
                self.payments.put(payment);
            }
            if let Some(entry) = record.wallet {
                self.ledger.restore(entry);
            }
        }
    }

    fn ensure_user(&self, user_id: UserId) -> Result<(), LedgerError> {
        if self.users.user_exists(user_id) {
            Ok(())
        } else {
            tracing::debug!(user = %user_id, "Unknown user");
            Err(LedgerError::UserNotFound)
        }
    }

    /// Journals and stores a record that touches no wallet.
    fn commit_unlocked(&self, payment: Payment) -> Result<Payment, LedgerError> {
        self.journal.append(&JournalRecord {
            payments: vec![payment.clone()],
            wallet: None,
        })?;
        self.payments.put(payment.clone());
        Ok(payment)
    }

    // === Queries ===

    /// Returns the user's wallet, creating a zeroed one on first access.
    pub fn ledger_entry(&self, user_id: UserId) -> Result<LedgerEntry, LedgerError> {
        self.ensure_user(user_id)?;
        Ok(self.ledger.get_or_create(user_id).snapshot())
    }

    pub fn payment(&self, payment_id: PaymentId) -> Option<Payment> {
        self.payments.get(payment_id)
    }

    pub fn payment_by_no(&self, payment_no: &str) -> Option<Payment> {
        self.payments.get_by_payment_no(payment_no)
    }

    // === Payment Intents ===

    /// Creates a PENDING recharge.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UserNotFound`] - The user directory does not know the user.
    /// - [`LedgerError::InvalidAmount`] - `amount <= 0`.
    pub fn create_recharge_intent(
        &self,
        user_id: UserId,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<Payment, LedgerError> {
        self.ensure_user(user_id)?;
        let payment = Payment::pending(
            self.payments.allocate_id(),
            user_id,
            None,
            amount,
            method,
            PaymentType::Recharge,
        )?;
        let payment = self.commit_unlocked(payment)?;
        tracing::debug!(payment = %payment.id, user = %user_id, %amount, "Recharge intent created");
        Ok(payment)
    }

    /// Creates a PENDING order payment.
    ///
    /// When `order_id` is given, `amount` must equal the order's amount. The
    /// check happens here, once; settlement does not repeat it.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UserNotFound`] - The user directory does not know the user.
    /// - [`LedgerError::InvalidAmount`] - `amount <= 0`.
    /// - [`LedgerError::OrderNotFound`] - The order book does not know the order.
    /// - [`LedgerError::AmountMismatch`] - `amount` differs from the order amount.
    pub fn create_order_payment_intent(
        &self,
        user_id: UserId,
        order_id: Option<OrderId>,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<Payment, LedgerError> {
        self.ensure_user(user_id)?;
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if let Some(order_id) = order_id {
            let order = self
                .orders
                .get_order(order_id)
                .ok_or(LedgerError::OrderNotFound)?;
            if order.amount != amount {
                tracing::debug!(order = %order_id, expected = %order.amount, %amount, "Order amount mismatch");
                return Err(LedgerError::AmountMismatch);
            }
        }
        let payment = Payment::pending(
            self.payments.allocate_id(),
            user_id,
            order_id,
            amount,
            method,
            PaymentType::Order,
        )?;
        self.commit_unlocked(payment)
    }

    // === Settlement ===

    /// Applies a successful gateway outcome to a PENDING payment.
    ///
    /// | Payment type | Wallet effect |
    /// |--------------|---------------|
    /// | Recharge | balance and lifetime recharge += amount |
    /// | Withdraw | frozen -= amount, lifetime withdraw += amount |
    /// | Order | none |
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidTransactionId`] - ID fails the format check.
    /// - [`LedgerError::PaymentNotFound`] - No such payment.
    /// - [`LedgerError::LockTimeout`] - The wallet stayed locked too long; retry.
    /// - [`LedgerError::InvalidState`] - The payment is not PENDING.
    /// - [`LedgerError::DuplicateTransaction`] - The ID already settled another payment.
    /// - [`LedgerError::LockTimeout`] - Another settlement with the same ID is still
    ///   committing; retry to learn its outcome.
    /// - [`LedgerError::Storage`] - The journal rejected the commit; retry.
    pub fn process_payment_outcome(
        &self,
        payment_id: PaymentId,
        transaction_id: &str,
    ) -> Result<Payment, LedgerError> {
        if !is_valid_transaction_id(transaction_id) {
            tracing::debug!(payment = %payment_id, "Rejected malformed transaction ID");
            return Err(LedgerError::InvalidTransactionId);
        }
        let owner = self
            .payments
            .get(payment_id)
            .ok_or(LedgerError::PaymentNotFound)?
            .user_id;

        let wallet = self.ledger.get_or_create(owner);
        let mut uow = UnitOfWork::begin(self, &wallet)?;

        // Re-read under the lock; a concurrent settle may have won.
        let mut payment = self
            .payments
            .get(payment_id)
            .ok_or(LedgerError::PaymentNotFound)?;
        payment.settle(transaction_id)?;
        uow.claim(transaction_id, payment_id)?;
        match payment.payment_type {
            PaymentType::Recharge => uow.wallet_mut().credit_recharge(payment.amount)?,
            PaymentType::Withdraw => uow.wallet_mut().release_frozen_withdrawal(payment.amount)?,
            PaymentType::Order | PaymentType::Refund => {}
        }
        uow.stage_payment(payment.clone());
        let entry = uow.commit()?;

        tracing::info!(
            payment = %payment.id,
            user = %owner,
            kind = ?payment.payment_type,
            amount = %payment.amount,
            balance = %entry.balance,
            "Payment settled"
        );
        if payment.payment_type == PaymentType::Recharge
            && payment.amount > self.config.large_recharge_threshold
        {
            self.audit.notify(AuditEvent::LargeRecharge {
                user_id: owner,
                payment_id: payment.id,
                amount: payment.amount,
            });
        }
        Ok(payment)
    }

    /// Same as [`Engine::process_payment_outcome`], addressed by payment number.
    pub fn process_payment_outcome_by_no(
        &self,
        payment_no: &str,
        transaction_id: &str,
    ) -> Result<Payment, LedgerError> {
        let payment_id = self
            .payments
            .get_by_payment_no(payment_no)
            .ok_or(LedgerError::PaymentNotFound)?
            .id;
        self.process_payment_outcome(payment_id, transaction_id)
    }

    /// Marks a PENDING payment FAILED.
    ///
    /// Failing an already FAILED payment is a no-op. A failed withdrawal
    /// returns its frozen amount to the balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::PaymentNotFound`] - No such payment.
    /// - [`LedgerError::LockTimeout`] - The wallet stayed locked too long; retry.
    /// - [`LedgerError::InvalidState`] - The payment is SUCCESS or REFUNDED.
    pub fn fail_payment(&self, payment_id: PaymentId, reason: &str) -> Result<Payment, LedgerError> {
        let owner = self
            .payments
            .get(payment_id)
            .ok_or(LedgerError::PaymentNotFound)?
            .user_id;

        let wallet = self.ledger.get_or_create(owner);
        let mut uow = UnitOfWork::begin(self, &wallet)?;

        let mut payment = self
            .payments
            .get(payment_id)
            .ok_or(LedgerError::PaymentNotFound)?;
        if !payment.fail(reason)? {
            return Ok(payment);
        }
        if payment.payment_type == PaymentType::Withdraw {
            uow.wallet_mut().unfreeze(payment.amount)?;
        }
        uow.stage_payment(payment.clone());
        uow.commit()?;

        tracing::info!(payment = %payment.id, user = %owner, reason, "Payment failed");
        Ok(payment)
    }

    /// Fails every PENDING payment created before `cutoff`.
    ///
    /// Returns the number of payments failed. Payments that cannot be failed
    /// right now (for example on lock timeout) are logged and left PENDING.
    pub fn expire_pending_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut expired = 0;
        for payment in self.payments.pending_before(cutoff) {
            match self.fail_payment(payment.id, "expired") {
                Ok(_) => expired += 1,
                Err(err) => {
                    tracing::warn!(payment = %payment.id, error = %err, "Could not expire payment")
                }
            }
        }
        expired
    }

    // === Wallet Operations ===

    /// Runs `op` against the user's wallet as one locked unit of work.
    fn mutate_wallet<F>(&self, user_id: UserId, op: F) -> Result<LedgerEntry, LedgerError>
    where
        F: FnOnce(&mut LedgerEntry) -> Result<(), LedgerError>,
    {
        self.ensure_user(user_id)?;
        let wallet = self.ledger.get_or_create(user_id);
        let mut uow = UnitOfWork::begin(self, &wallet)?;
        op(uow.wallet_mut())?;
        uow.commit()
    }

    /// Moves `amount` from balance to frozen and records a PENDING withdrawal.
    ///
    /// Settling the returned payment pays the frozen funds out; failing it
    /// returns them to the balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UserNotFound`] - The user directory does not know the user.
    /// - [`LedgerError::InvalidAmount`] - `amount <= 0`.
    /// - [`LedgerError::InsufficientFunds`] - `amount` exceeds the balance.
    /// - [`LedgerError::LockTimeout`] - The wallet stayed locked too long; retry.
    pub fn request_withdrawal(&self, user_id: UserId, amount: Decimal) -> Result<Payment, LedgerError> {
        self.ensure_user(user_id)?;
        let payment = Payment::pending(
            self.payments.allocate_id(),
            user_id,
            None,
            amount,
            PaymentMethod::Wallet,
            PaymentType::Withdraw,
        )?;

        let wallet = self.ledger.get_or_create(user_id);
        let mut uow = UnitOfWork::begin(self, &wallet)?;
        uow.wallet_mut().freeze(amount)?;
        uow.stage_payment(payment.clone());
        let entry = uow.commit()?;

        tracing::info!(payment = %payment.id, user = %user_id, %amount, balance = %entry.balance, "Withdrawal requested");
        Ok(payment)
    }

    /// Decreases the spendable balance.
    pub fn debit_balance(&self, user_id: UserId, amount: Decimal) -> Result<LedgerEntry, LedgerError> {
        self.mutate_wallet(user_id, |entry| entry.debit_balance(amount))
    }

    /// Escrows `amount` of the balance.
    pub fn freeze_balance(&self, user_id: UserId, amount: Decimal) -> Result<LedgerEntry, LedgerError> {
        self.mutate_wallet(user_id, |entry| entry.freeze(amount))
    }

    /// Returns escrowed funds to the balance.
    pub fn unfreeze_balance(&self, user_id: UserId, amount: Decimal) -> Result<LedgerEntry, LedgerError> {
        self.mutate_wallet(user_id, |entry| entry.unfreeze(amount))
    }

    /// Treats escrowed funds as finally earned (lifetime income).
    pub fn settle_frozen(&self, user_id: UserId, amount: Decimal) -> Result<LedgerEntry, LedgerError> {
        self.mutate_wallet(user_id, |entry| entry.settle_frozen(amount))
    }

    /// Pays earnings straight into the balance.
    pub fn credit_income(&self, user_id: UserId, amount: Decimal) -> Result<LedgerEntry, LedgerError> {
        self.mutate_wallet(user_id, |entry| entry.credit_income(amount))
    }
}
