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

//! Durable journal of committed units of work.
//!
//! Each commit is one JSON line holding the post-images of every payment it
//! touched and, when a wallet changed, that wallet's new state. A line only
//! counts once its trailing newline is on disk; replay applies lines in order
//! and the last image of a record wins.

use crate::LedgerError;
use crate::payment::Payment;
use crate::wallet::LedgerEntry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// One committed unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub payments: Vec<Payment>,
    pub wallet: Option<LedgerEntry>,
}

/// Destination for committed records.
///
/// `append` must not return `Ok` until the record would survive a restart.
pub trait Journal: Send + Sync + Debug {
    fn append(&self, record: &JournalRecord) -> Result<(), LedgerError>;
}

/// Journal that keeps nothing; state lives only in memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullJournal;

impl Journal for NullJournal {
    fn append(&self, _record: &JournalRecord) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[derive(Debug)]
struct JournalFile {
    file: File,
    /// Length of the committed prefix.
    len: u64,
    /// A failed write could not be rolled back; the tail is unknown.
    poisoned: bool,
}

/// Append-only JSON-lines journal on the local filesystem.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    inner: Mutex<JournalFile>,
}

impl FileJournal {
    /// Opens (or creates) the journal at `path` and returns it together with
    /// every committed record, oldest first.
    ///
    /// An unterminated final line is a torn write: it is logged, dropped and
    /// truncated away. Any other unreadable line fails the open.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<JournalRecord>), LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let (records, committed) = parse_records(&bytes)?;
        if committed < bytes.len() {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = bytes.len() - committed,
                "Discarding torn journal tail"
            );
            file.set_len(committed as u64)?;
            file.sync_data()?;
        }
        tracing::debug!(path = %path.display(), records = records.len(), "Journal opened");

        let journal = Self {
            path,
            inner: Mutex::new(JournalFile {
                file,
                len: committed as u64,
                poisoned: false,
            }),
        };
        Ok((journal, records))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Journal for FileJournal {
    fn append(&self, record: &JournalRecord) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut inner = self.inner.lock();
        if inner.poisoned {
            return Err(LedgerError::Storage(format!(
                "journal {} poisoned by a failed rollback; reopen it to recover",
                self.path.display()
            )));
        }
        let result = inner
            .file
            .write_all(&line)
            .and_then(|()| inner.file.sync_data());
        match result {
            Ok(()) => {
                inner.len += line.len() as u64;
                Ok(())
            }
            Err(err) => {
                // Cut any partial line so later appends start on a clean boundary.
                let committed = inner.len;
                if let Err(truncate_err) = inner.file.set_len(committed) {
                    tracing::error!(
                        path = %self.path.display(),
                        error = %truncate_err,
                        "Failed to roll back partial journal write; refusing further appends"
                    );
                    inner.poisoned = true;
                }
                Err(err.into())
            }
        }
    }
}

/// Parses committed records and returns them with the byte length of the
/// committed prefix.
fn parse_records(bytes: &[u8]) -> Result<(Vec<JournalRecord>, usize), LedgerError> {
    let mut records = Vec::new();
    let mut committed = 0;

    for line in bytes.split_inclusive(|b| *b == b'\n') {
        let Some(body) = line.strip_suffix(b"\n") else {
            // Unterminated, so necessarily the last line.
            break;
        };
        if !body.iter().all(u8::is_ascii_whitespace) {
            let record = serde_json::from_slice(body).map_err(|err| {
                LedgerError::Storage(format!("corrupt journal record at byte {committed}: {err}"))
            })?;
            records.push(record);
        }
        committed += line.len();
    }

    Ok((records, committed))
}
