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

//! Payment records and their lifecycle.
//!
//! Payments follow a state machine encoded once, in
//! [`PaymentStatus::permitted_next`]:
//!
//! ```text
//!   PENDING ──settle──► SUCCESS ──(refund tag)──► REFUNDED
//!      │                   ▲
//!      └──fail──► FAILED   │
//!   PROCESSING ────────────┘ (and ──► FAILED)
//! ```

use crate::LedgerError;
use crate::base::{OrderId, PaymentId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Transition table: the states reachable from `self` in one step.
    pub fn permitted_next(self) -> &'static [PaymentStatus] {
        use PaymentStatus::*;
        match self {
            Pending => &[Success, Failed],
            Processing => &[Success, Failed],
            Success => &[Refunded],
            Failed | Refunded => &[],
        }
    }

    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        self.permitted_next().contains(&next)
    }

    /// Validates a transition against the table.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidState`] if `next` is not reachable from `self`.
    pub fn transition_to(self, next: PaymentStatus) -> Result<PaymentStatus, LedgerError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LedgerError::InvalidState(format!(
                "cannot move payment from {self} to {next}"
            )))
        }
    }

    pub fn is_terminal(self) -> bool {
        self.permitted_next().is_empty()
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Wallet,
    Alipay,
    Wechat,
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wallet" => Ok(PaymentMethod::Wallet),
            "alipay" => Ok(PaymentMethod::Alipay),
            "wechat" => Ok(PaymentMethod::Wechat),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Recharge,
    Order,
    Withdraw,
    Refund,
}

/// One money-movement intent.
///
/// `amount` is fixed when the record is created; the store never writes a
/// different amount for an existing ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payment {
    pub id: PaymentId,
    /// Human-readable unique number, e.g. `PAY1718000000000AB12CD34`.
    pub payment_no: String,
    pub user_id: UserId,
    pub order_id: Option<OrderId>,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub payment_type: PaymentType,
    /// External transaction ID, set on settlement.
    pub transaction_id: Option<String>,
    /// For refunds, the payment being refunded.
    pub refund_of: Option<PaymentId>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Builds a new PENDING payment.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidAmount`] if `amount <= 0`.
    pub fn pending(
        id: PaymentId,
        user_id: UserId,
        order_id: Option<OrderId>,
        amount: Decimal,
        method: PaymentMethod,
        payment_type: PaymentType,
    ) -> Result<Self, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let now = Utc::now();
        Ok(Self {
            id,
            payment_no: generate_payment_no(),
            user_id,
            order_id,
            amount,
            status: PaymentStatus::Pending,
            method,
            payment_type,
            transaction_id: None,
            refund_of: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
        })
    }

    /// Builds the already-settled REFUND payment for `original`.
    ///
    /// The refund inherits the original's payer, order and method, and gets a
    /// freshly generated transaction ID.
    pub fn refund_for(
        id: PaymentId,
        original: &Payment,
        amount: Decimal,
    ) -> Result<Self, LedgerError> {
        let mut refund = Self::pending(
            id,
            original.user_id,
            original.order_id,
            amount,
            original.method,
            PaymentType::Refund,
        )?;
        refund.status = PaymentStatus::Success;
        refund.transaction_id = Some(generate_refund_transaction_id());
        refund.refund_of = Some(original.id);
        refund.paid_at = Some(refund.created_at);
        Ok(refund)
    }

    /// Marks the payment settled with the given external transaction ID.
    ///
    /// Only mutates `self`; the caller decides whether the change is committed.
    pub fn settle(&mut self, transaction_id: &str) -> Result<(), LedgerError> {
        self.status = self.status.transition_to(PaymentStatus::Success)?;
        let now = Utc::now();
        self.transaction_id = Some(transaction_id.to_owned());
        self.paid_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Marks the payment failed.
    ///
    /// Returns `Ok(false)` without touching the record if it is already FAILED.
    pub fn fail(&mut self, reason: &str) -> Result<bool, LedgerError> {
        if self.status == PaymentStatus::Failed {
            return Ok(false);
        }
        self.status = self.status.transition_to(PaymentStatus::Failed)?;
        self.failure_reason = Some(reason.to_owned());
        self.updated_at = Utc::now();
        Ok(true)
    }
}

/// Format check for external transaction IDs: 10 to 100 characters drawn
/// from ASCII letters, digits and underscore.
pub fn is_valid_transaction_id(transaction_id: &str) -> bool {
    (10..=100).contains(&transaction_id.len())
        && transaction_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn generate_payment_no() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "PAY{}{}",
        Utc::now().timestamp_millis(),
        suffix[..8].to_ascii_uppercase()
    )
}

fn generate_refund_transaction_id() -> String {
    format!("REFUND_{}", Uuid::new_v4().simple())
}
