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

//! Refunds.
//!
//! A refund never rewrites the original payment. It creates a new REFUND
//! payment, already SUCCESS, linked to the original and its order, and
//! credits the original payer's balance in the same unit of work. Refunds
//! against one original are capped, in total, at the original amount.

use crate::LedgerError;
use crate::base::PaymentId;
use crate::engine::Engine;
use crate::payment::{Payment, PaymentStatus, PaymentType};
use crate::unit_of_work::UnitOfWork;
use rust_decimal::Decimal;

impl Engine {
    /// Refunds `refund_amount` of a settled payment to its payer's wallet.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `refund_amount <= 0`.
    /// - [`LedgerError::PaymentNotFound`] - No such payment.
    /// - [`LedgerError::LockTimeout`] - The wallet stayed locked too long; retry.
    /// - [`LedgerError::InvalidState`] - The original is not SUCCESS, or is itself a refund.
    /// - [`LedgerError::AmountExceedsOriginal`] - Refunds would exceed the original amount.
    pub fn refund(&self, original_id: PaymentId, refund_amount: Decimal) -> Result<Payment, LedgerError> {
        if refund_amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let payer = self
            .payments()
            .get(original_id)
            .ok_or(LedgerError::PaymentNotFound)?
            .user_id;

        let wallet = self.ledger().get_or_create(payer);
        let mut uow = UnitOfWork::begin(self, &wallet)?;

        let original = self
            .payments()
            .get(original_id)
            .ok_or(LedgerError::PaymentNotFound)?;
        check_refundable(&original)?;
        let already_refunded = self.payments().refunded_total(original_id);
        let exceeds = already_refunded
            .checked_add(refund_amount)
            .is_none_or(|total| total > original.amount);
        if exceeds {
            tracing::debug!(
                payment = %original_id,
                original = %original.amount,
                %already_refunded,
                requested = %refund_amount,
                "Refund exceeds original payment"
            );
            return Err(LedgerError::AmountExceedsOriginal);
        }

        let refund = Payment::refund_for(self.payments().allocate_id(), &original, refund_amount)?;
        if let Some(transaction_id) = &refund.transaction_id {
            uow.claim(transaction_id, refund.id)?;
        }
        uow.wallet_mut().credit_refund(refund_amount)?;
        uow.stage_payment(refund.clone());
        let entry = uow.commit()?;

        tracing::info!(
            refund = %refund.id,
            original = %original_id,
            user = %payer,
            amount = %refund_amount,
            balance = %entry.balance,
            "Refund issued"
        );
        Ok(refund)
    }
}

fn check_refundable(original: &Payment) -> Result<(), LedgerError> {
    if original.status != PaymentStatus::Success {
        return Err(LedgerError::InvalidState(format!(
            "only SUCCESS payments can be refunded, payment {} is {}",
            original.id, original.status
        )));
    }
    if original.payment_type == PaymentType::Refund {
        return Err(LedgerError::InvalidState(format!(
            "payment {} is itself a refund",
            original.id
        )));
    }
    Ok(())
}
