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

//! Fire-and-forget audit notifications.
//!
//! Events travel over an unbounded `crossbeam` channel to a background
//! thread. Sending never blocks the ledger, and a missing or disconnected
//! receiver only costs a debug log line.

use crate::base::{PaymentId, UserId};
use crossbeam::channel::{self, Receiver, Sender};
use rust_decimal::Decimal;
use std::thread;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    /// A settled recharge above the configured threshold.
    LargeRecharge {
        user_id: UserId,
        payment_id: PaymentId,
        amount: Decimal,
    },
}

#[derive(Debug, Clone, Default)]
pub struct AuditNotifier {
    sender: Option<Sender<AuditEvent>>,
}

impl AuditNotifier {
    /// Notifier that drops every event.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Notifier paired with the receiving end, for callers that consume
    /// events themselves.
    pub fn channel() -> (Self, Receiver<AuditEvent>) {
        let (sender, receiver) = channel::unbounded();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Notifier backed by a background thread that logs every event.
    ///
    /// The thread exits once every clone of the notifier is dropped.
    pub fn spawn_logger() -> Self {
        let (notifier, receiver) = Self::channel();
        let spawned = thread::Builder::new()
            .name("ledger-audit".into())
            .spawn(move || {
                for event in receiver {
                    match event {
                        AuditEvent::LargeRecharge {
                            user_id,
                            payment_id,
                            amount,
                        } => tracing::warn!(
                            user = %user_id,
                            payment = %payment_id,
                            %amount,
                            "Large recharge settled"
                        ),
                    }
                }
            });
        match spawned {
            Ok(_) => notifier,
            Err(err) => {
                tracing::warn!(error = %err, "Audit thread unavailable; audit events disabled");
                Self::disabled()
            }
        }
    }

    pub fn notify(&self, event: AuditEvent) {
        if let Some(sender) = &self.sender {
            if let Err(err) = sender.try_send(event) {
                tracing::debug!(event = ?err.into_inner(), "Audit event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event() -> AuditEvent {
        AuditEvent::LargeRecharge {
            user_id: UserId(1),
            payment_id: PaymentId(1),
            amount: dec!(20000),
        }
    }

    #[test]
    fn channel_delivers_events() {
        let (notifier, receiver) = AuditNotifier::channel();
        notifier.notify(event());
        assert_eq!(receiver.try_recv(), Ok(event()));
    }

    #[test]
    fn notify_without_receiver_does_not_panic() {
        let (notifier, receiver) = AuditNotifier::channel();
        drop(receiver);
        notifier.notify(event());
        AuditNotifier::disabled().notify(event());
    }
}
