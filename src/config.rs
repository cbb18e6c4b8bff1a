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

//! Engine configuration.
//!
//! Defaults suit tests and the CLI; a TOML file can override any subset:
//!
//! ```toml
//! lock_timeout_ms = 2500
//! large_recharge_threshold = "5000.00"
//! journal_path = "/var/lib/wallet-ledger/ledger.journal"
//! ```

use crate::LedgerError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Longest wait for a user's wallet lock before failing with
    /// [`LedgerError::LockTimeout`].
    pub lock_timeout: Duration,
    /// Recharges strictly above this amount raise an audit notification.
    pub large_recharge_threshold: Decimal,
    /// Journal location; `None` keeps all state in memory.
    pub journal_path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            large_recharge_threshold: dec!(10000),
            journal_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    lock_timeout_ms: Option<u64>,
    large_recharge_threshold: Option<Decimal>,
    journal_path: Option<PathBuf>,
}

impl LedgerConfig {
    /// Reads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|err| {
            LedgerError::Config(format!("reading {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&contents)
            .map_err(|err| LedgerError::Config(format!("{} ({})", err, path.display())))
    }

    /// Parses TOML, filling absent keys with defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, LedgerError> {
        let file_cfg: FileConfig =
            toml::from_str(contents).map_err(|err| LedgerError::Config(err.to_string()))?;
        let defaults = Self::default();

        let large_recharge_threshold = file_cfg
            .large_recharge_threshold
            .unwrap_or(defaults.large_recharge_threshold);
        if large_recharge_threshold <= Decimal::ZERO {
            return Err(LedgerError::Config(
                "large_recharge_threshold must be positive".into(),
            ));
        }

        Ok(Self {
            lock_timeout: file_cfg
                .lock_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            large_recharge_threshold,
            journal_path: file_cfg.journal_path.or(defaults.journal_path),
        })
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_large_recharge_threshold(mut self, threshold: Decimal) -> Self {
        self.large_recharge_threshold = threshold;
        self
    }

    pub fn with_journal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal_path = Some(path.into());
        self
    }
}
