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

//! Error types for wallet and payment processing.

use thiserror::Error;

/// Ledger processing errors.
///
/// Every failure surfaced by the [`Engine`](crate::Engine) is one of these
/// kinds, so callers can tell a retryable condition from a permanent one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// The payment is not in a state that permits the requested transition
    #[error("invalid payment state: {0}")]
    InvalidState(String),

    /// Debit or freeze would exceed the relevant balance
    #[error("insufficient funds")]
    InsufficientFunds,

    /// External transaction ID is already attached to a settled payment
    #[error("duplicate transaction ID")]
    DuplicateTransaction,

    /// External transaction ID fails the format check
    #[error("invalid transaction ID format")]
    InvalidTransactionId,

    /// Payment amount does not match the linked order amount
    #[error("payment amount does not match order amount")]
    AmountMismatch,

    /// Refund would exceed the original payment amount
    #[error("refund amount exceeds original payment")]
    AmountExceedsOriginal,

    /// Referenced user does not exist
    #[error("user not found")]
    UserNotFound,

    /// Referenced order does not exist
    #[error("order not found")]
    OrderNotFound,

    /// Referenced payment does not exist
    #[error("payment not found")]
    PaymentNotFound,

    /// Waiting for the per-user wallet lock, or for an in-flight settlement
    /// holding the same transaction ID, exceeded the configured timeout
    #[error("timed out waiting for wallet lock")]
    LockTimeout,

    /// The journal could not be read or written
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Returns `true` when retrying the same call later may succeed.
    ///
    /// Only [`LedgerError::LockTimeout`] is transient; everything else is a
    /// terminal outcome for that attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::LockTimeout)
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}
