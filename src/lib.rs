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

//! # Wallet Ledger
//!
//! This library turns payment outcomes, refunds and wallet operations into
//! durable per-user balance changes without double-crediting, losing money,
//! or racing under concurrent requests.
//!
//! ## Core Components
//!
//! - [`LedgerStore`] / [`LedgerEntry`]: per-user wallet (balance, frozen balance, lifetime totals)
//! - [`PaymentStore`] / [`Payment`]: payment records and their [`PaymentStatus`] state machine
//! - [`IdempotencyGuard`]: one SUCCESS payment per external transaction ID
//! - [`Engine`]: the transaction coordinator, the only writer of both stores
//! - [`Engine::refund`]: refunds bounded by the original payment
//! - [`FileJournal`]: append-only journal that makes commits survive restarts
//! - [`LedgerError`]: error kinds returned to callers
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use rust_decimal_macros::dec;
//! use wallet_ledger::{Engine, InMemoryOrders, InMemoryUsers, PaymentMethod, PaymentStatus, UserId};
//!
//! let users = Arc::new(InMemoryUsers::new());
//! users.register(UserId(1));
//! let engine = Engine::new(users, Arc::new(InMemoryOrders::new()));
//!
//! // The gateway confirms a recharge
//! let intent = engine
//!     .create_recharge_intent(UserId(1), dec!(100.00), PaymentMethod::Alipay)
//!     .unwrap();
//! let settled = engine.process_payment_outcome(intent.id, "abc1234567").unwrap();
//! assert_eq!(settled.status, PaymentStatus::Success);
//!
//! // Check the wallet
//! let wallet = engine.ledger_entry(UserId(1)).unwrap();
//! assert_eq!(wallet.balance, dec!(100.00));
//! ```
//!
//! ## Thread Safety
//!
//! The engine handles concurrent calls. Each user's wallet has its own lock,
//! so calls for different users run in parallel and calls for the same user
//! are applied one at a time.

mod audit;
mod base;
pub mod config;
mod directory;
mod engine;
pub mod error;
mod idempotency;
pub mod journal;
pub mod payment;
mod payment_store;
mod refund;
mod unit_of_work;
pub mod wallet;

pub use audit::{AuditEvent, AuditNotifier};
pub use base::{OrderId, PaymentId, UserId};
pub use config::LedgerConfig;
pub use directory::{InMemoryOrders, InMemoryUsers, OrderBook, OrderInfo, OrderStatus, UserDirectory};
pub use engine::Engine;
pub use error::LedgerError;
pub use idempotency::IdempotencyGuard;
pub use journal::{FileJournal, Journal, JournalRecord, NullJournal};
pub use payment::{Payment, PaymentMethod, PaymentStatus, PaymentType, is_valid_transaction_id};
pub use payment_store::PaymentStore;
pub use wallet::{LedgerEntry, LedgerStore, Wallet};
