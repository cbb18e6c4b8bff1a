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

//! Collaborators consulted by the engine: the user directory and the order
//! book. The engine trusts their answers; in-memory registries are provided
//! for tests and the command-line tool.

use crate::base::{OrderId, UserId};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Answers whether a user exists.
pub trait UserDirectory: Send + Sync {
    fn user_exists(&self, user_id: UserId) -> bool;
}

/// Looks up orders for amount matching at payment-intent creation.
pub trait OrderBook: Send + Sync {
    fn get_order(&self, order_id: OrderId) -> Option<OrderInfo>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderInfo {
    pub amount: Decimal,
    pub status: OrderStatus,
}

#[derive(Debug, Default)]
pub struct InMemoryUsers {
    users: DashMap<UserId, ()>,
}

impl InMemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user; returns `false` if it was already present.
    pub fn register(&self, user_id: UserId) -> bool {
        self.users.insert(user_id, ()).is_none()
    }
}

impl UserDirectory for InMemoryUsers {
    fn user_exists(&self, user_id: UserId) -> bool {
        self.users.contains_key(&user_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOrders {
    orders: DashMap<OrderId, OrderInfo>,
}

impl InMemoryOrders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order_id: OrderId, order: OrderInfo) {
        self.orders.insert(order_id, order);
    }
}

impl OrderBook for InMemoryOrders {
    fn get_order(&self, order_id: OrderId) -> Option<OrderInfo> {
        self.orders.get(&order_id).map(|order| *order)
    }
}
