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

//! Payment record store.
//!
//! Holds every [`Payment`] by ID with a secondary index on the payment
//! number. Records are only written by the engine, after the journal has
//! accepted the change; readers always get owned clones.

use crate::base::{OrderId, PaymentId, UserId};
use crate::payment::{Payment, PaymentStatus, PaymentType};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct PaymentStore {
    /// Payments indexed by ID.
    payments: DashMap<PaymentId, Payment>,
    /// Payment number to ID.
    by_number: DashMap<String, PaymentId>,
    /// Next ID to hand out.
    next_id: AtomicU64,
}

impl PaymentStore {
    pub fn new() -> Self {
        Self {
            payments: DashMap::new(),
            by_number: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserves a fresh payment ID.
    pub fn allocate_id(&self) -> PaymentId {
        PaymentId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self, id: PaymentId) -> Option<Payment> {
        self.payments.get(&id).map(|payment| payment.clone())
    }

    pub fn get_by_payment_no(&self, payment_no: &str) -> Option<Payment> {
        let id = *self.by_number.get(payment_no)?;
        self.get(id)
    }

    /// All payments of a user, newest first.
    pub fn payments_for_user(&self, user_id: UserId) -> Vec<Payment> {
        self.collect_newest_first(|payment| payment.user_id == user_id)
    }

    /// SUCCESS payments of a user, newest first.
    pub fn successful_payments_for_user(&self, user_id: UserId) -> Vec<Payment> {
        self.collect_newest_first(|payment| {
            payment.user_id == user_id && payment.status == PaymentStatus::Success
        })
    }

    /// All payments linked to an order, refunds included, newest first.
    pub fn payments_for_order(&self, order_id: OrderId) -> Vec<Payment> {
        self.collect_newest_first(|payment| payment.order_id == Some(order_id))
    }

    /// PENDING payments created strictly before `cutoff`, newest first.
    pub fn pending_before(&self, cutoff: DateTime<Utc>) -> Vec<Payment> {
        self.collect_newest_first(|payment| {
            payment.status == PaymentStatus::Pending && payment.created_at < cutoff
        })
    }

    /// Sum of settled RECHARGE amounts for a user.
    pub fn total_recharged(&self, user_id: UserId) -> Decimal {
        self.sum_successful(user_id, PaymentType::Recharge)
    }

    /// Sum of settled ORDER amounts for a user.
    pub fn total_order_payments(&self, user_id: UserId) -> Decimal {
        self.sum_successful(user_id, PaymentType::Order)
    }

    pub fn successful_payment_count(&self, user_id: UserId) -> usize {
        self.payments
            .iter()
            .filter(|p| p.user_id == user_id && p.status == PaymentStatus::Success)
            .count()
    }

    /// Sum of all REFUND payments issued against `original`.
    pub fn refunded_total(&self, original: PaymentId) -> Decimal {
        self.payments
            .iter()
            .filter(|p| p.payment_type == PaymentType::Refund && p.refund_of == Some(original))
            .fold(Decimal::ZERO, |sum, p| sum.saturating_add(p.amount))
    }

    pub fn len(&self) -> usize {
        self.payments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payments.is_empty()
    }

    /// Inserts or replaces a record.
    pub(crate) fn put(&self, payment: Payment) {
        debug_assert!(
            self.payments
                .get(&payment.id)
                .is_none_or(|existing| existing.amount == payment.amount),
            "Invariant violated: amount of payment {} changed",
            payment.id
        );
        // Replayed IDs must never be handed out again.
        self.next_id.fetch_max(payment.id.0 + 1, Ordering::Relaxed);
        self.by_number.insert(payment.payment_no.clone(), payment.id);
        self.payments.insert(payment.id, payment);
    }

    fn sum_successful(&self, user_id: UserId, payment_type: PaymentType) -> Decimal {
        self.payments
            .iter()
            .filter(|p| {
                p.user_id == user_id
                    && p.status == PaymentStatus::Success
                    && p.payment_type == payment_type
            })
            .fold(Decimal::ZERO, |sum, p| sum.saturating_add(p.amount))
    }

    fn collect_newest_first<F>(&self, filter: F) -> Vec<Payment>
    where
        F: Fn(&Payment) -> bool,
    {
        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| filter(p.value()))
            .map(|p| p.value().clone())
            .collect();
        payments.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        payments
    }
}

impl Default for PaymentStore {
    fn default() -> Self {
        Self::new()
    }
}
