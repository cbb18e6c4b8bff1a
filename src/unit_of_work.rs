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

//! One transactional scope over a user's wallet.
//!
//! A [`UnitOfWork`] holds the user's wallet lock from [`begin`] until it is
//! dropped. Wallet and payment changes are staged on copies; [`commit`]
//! journals them as a single record and only then makes them visible.
//! Dropping the unit without committing, including on an early `?` return,
//! discards the staged changes and releases any transaction-ID claims.
//!
//! [`begin`]: UnitOfWork::begin
//! [`commit`]: UnitOfWork::commit

use crate::LedgerError;
use crate::base::PaymentId;
use crate::engine::Engine;
use crate::idempotency::Claim;
use crate::journal::JournalRecord;
use crate::payment::Payment;
use crate::wallet::{LedgerEntry, Wallet};
use parking_lot::MutexGuard;

pub(crate) struct UnitOfWork<'a> {
    engine: &'a Engine,
    entry: MutexGuard<'a, LedgerEntry>,
    staged_wallet: Option<LedgerEntry>,
    staged_payments: Vec<Payment>,
    claims: Vec<Claim<'a>>,
}

impl<'a> UnitOfWork<'a> {
    /// Locks `wallet`, waiting at most the configured lock timeout.
    pub(crate) fn begin(engine: &'a Engine, wallet: &'a Wallet) -> Result<Self, LedgerError> {
        let entry = wallet.lock_for(engine.config().lock_timeout).inspect_err(|_| {
            tracing::debug!("Wallet lock wait timed out");
        })?;
        Ok(Self {
            engine,
            entry,
            staged_wallet: None,
            staged_payments: Vec::new(),
            claims: Vec::new(),
        })
    }

    /// Mutable access to the staged copy of the wallet.
    pub(crate) fn wallet_mut(&mut self) -> &mut LedgerEntry {
        let current = &self.entry;
        self.staged_wallet.get_or_insert_with(|| (**current).clone())
    }

    pub(crate) fn stage_payment(&mut self, payment: Payment) {
        self.staged_payments.push(payment);
    }

    /// Claims an external transaction ID for the duration of the unit.
    ///
    /// Waits up to the lock timeout while another unit holds the ID
    /// provisionally.
    pub(crate) fn claim(
        &mut self,
        transaction_id: &str,
        payment_id: PaymentId,
    ) -> Result<(), LedgerError> {
        let claim = self.engine.idempotency().claim(
            transaction_id,
            payment_id,
            self.engine.config().lock_timeout,
        )?;
        self.claims.push(claim);
        Ok(())
    }

    /// Journals the staged changes, then applies them, then releases the lock.
    ///
    /// Returns the wallet state after the commit.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Storage`] if the journal rejects the record, in
    /// which case nothing is applied.
    pub(crate) fn commit(mut self) -> Result<LedgerEntry, LedgerError> {
        let record = JournalRecord {
            payments: std::mem::take(&mut self.staged_payments),
            wallet: self.staged_wallet.take(),
        };
        if record.payments.is_empty() && record.wallet.is_none() {
            return Ok(self.entry.clone());
        }
        self.engine.journal().append(&record)?;

        // Payments first: a reader that sees a settled payment and then asks
        // for the balance blocks on this lock until the wallet is written.
        for payment in record.payments {
            self.engine.payments().put(payment);
        }
        for claim in self.claims.drain(..) {
            claim.confirm();
        }
        if let Some(wallet) = record.wallet {
            *self.entry = wallet;
        }
        Ok(self.entry.clone())
    }
}
