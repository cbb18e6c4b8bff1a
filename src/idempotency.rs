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

//! Idempotency guard for external transaction IDs.
//!
//! Every settled payment's external transaction ID is claimed here, so a
//! replayed gateway callback or retried webhook cannot credit a wallet twice.
//! Settled claims mirror the payment store (the transaction IDs of SUCCESS
//! payments) and are rebuilt from it when the journal is replayed.
//!
//! A claim is provisional while its unit of work is committing. Another
//! settlement presenting the same ID waits for that outcome instead of
//! failing: a confirmed claim makes it a duplicate, a released one lets it
//! proceed.

use crate::LedgerError;
use crate::base::PaymentId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::thread;
use std::time::{Duration, Instant};

const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
struct Holder {
    payment_id: PaymentId,
    settled: bool,
}

#[derive(Debug, Default)]
pub struct IdempotencyGuard {
    /// External transaction ID to the payment holding it.
    claimed: DashMap<String, Holder>,
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `transaction_id` for `payment_id`.
    ///
    /// The claim is provisional: it is released when the returned [`Claim`]
    /// is dropped, unless [`Claim::confirm`] was called first. While another
    /// payment holds the ID provisionally, this waits up to `wait` for that
    /// claim to be confirmed or released.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DuplicateTransaction`] - A settled payment carries the ID.
    /// - [`LedgerError::LockTimeout`] - The provisional holder did not finish in time; retry.
    pub(crate) fn claim(
        &self,
        transaction_id: &str,
        payment_id: PaymentId,
        wait: Duration,
    ) -> Result<Claim<'_>, LedgerError> {
        let deadline = Instant::now() + wait;
        loop {
            // Entry API gives an atomic check-and-insert across threads.
            match self.claimed.entry(transaction_id.to_owned()) {
                Entry::Occupied(entry) if entry.get().settled => {
                    return Err(LedgerError::DuplicateTransaction);
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(entry) => {
                    entry.insert(Holder {
                        payment_id,
                        settled: false,
                    });
                    return Ok(Claim {
                        guard: self,
                        transaction_id: transaction_id.to_owned(),
                        payment_id,
                        confirmed: false,
                    });
                }
            }
            if Instant::now() >= deadline {
                tracing::debug!(transaction_id, "Transaction ID still held by an in-flight settlement");
                return Err(LedgerError::LockTimeout);
            }
            thread::sleep(CLAIM_POLL_INTERVAL);
        }
    }

    /// Returns the settled payment carrying `transaction_id`, if any.
    pub fn owner(&self, transaction_id: &str) -> Option<PaymentId> {
        self.claimed
            .get(transaction_id)
            .filter(|holder| holder.settled)
            .map(|holder| holder.payment_id)
    }

    /// Number of claimed IDs, in-flight claims included.
    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }

    /// Records an already-committed claim while replaying the journal.
    pub(crate) fn restore(&self, transaction_id: String, payment_id: PaymentId) {
        self.claimed.insert(
            transaction_id,
            Holder {
                payment_id,
                settled: true,
            },
        );
    }
}

/// A provisional hold on an external transaction ID.
#[derive(Debug)]
pub(crate) struct Claim<'a> {
    guard: &'a IdempotencyGuard,
    transaction_id: String,
    payment_id: PaymentId,
    confirmed: bool,
}

impl Claim<'_> {
    /// Makes the claim permanent.
    pub(crate) fn confirm(mut self) {
        if let Some(mut holder) = self.guard.claimed.get_mut(&self.transaction_id) {
            holder.settled = true;
        }
        self.confirmed = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.confirmed {
            let payment_id = self.payment_id;
            self.guard.claimed.remove_if(&self.transaction_id, |_, holder| {
                holder.payment_id == payment_id && !holder.settled
            });
        }
    }
}
