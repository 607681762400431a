//-
// Copyright (c) 2026, Mailstore developers
//
// This file is part of Mailstore.
//
// Mailstore is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailstore is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with Mailstore. If not, see <http://www.gnu.org/licenses/>.

//! The pending-archive spool.
//!
//! Each message which could not be archived immediately is held as one file
//! directly under the spool directory, named
//! `msg-{message_id}-{enqueue_unix_nanos}-{salt}`. A file exists exactly as
//! long as its archival has not been confirmed; removal is the only thing
//! that retires an entry.
//!
//! Entries are staged under `tmp/` and then linked into place without
//! clobbering, so a scanner never observes a partially-written entry and two
//! concurrent enqueues of the same message can never overwrite each other.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::prelude::*;
use log::{debug, warn};
use rand::{rngs::OsRng, Rng};

use crate::support::{
    error::Error,
    file_ops::{self, IgnoreKinds},
};

const ENTRY_PREFIX: &str = "msg-";
const TMP_DIR: &str = "tmp";
/// Staging files older than this are assumed abandoned by a crashed writer.
const STALE_TMP_AGE: Duration = Duration::from_secs(24 * 3600);

/// A message awaiting archival.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpoolEntry {
    message_id: i64,
    name: String,
}

impl SpoolEntry {
    pub fn message_id(&self) -> i64 {
        self.message_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for SpoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Handle on a spool directory.
///
/// Creating a `Spool` does not touch the file system; directories are created
/// on the first enqueue.
#[derive(Clone, Debug)]
pub struct Spool {
    root: PathBuf,
}

impl Spool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tmp(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    fn path(&self, entry: &SpoolEntry) -> PathBuf {
        self.root.join(&entry.name)
    }

    /// Durably add a copy of `data` to the spool.
    ///
    /// On success, the entry is fully written and synced before this returns.
    pub fn enqueue(
        &self,
        message_id: i64,
        data: &[u8],
    ) -> Result<SpoolEntry, Error> {
        file_ops::ensure_dir(&self.root, 0o700)?;
        file_ops::ensure_dir(self.tmp(), 0o700)?;

        loop {
            let name = entry_name(
                message_id,
                Utc::now().timestamp_nanos_opt().unwrap_or_default(),
                OsRng.gen::<u32>(),
            );
            let entry = SpoolEntry { message_id, name };

            match file_ops::spit(
                self.tmp(),
                self.path(&entry),
                false,
                0o600,
                data,
            ) {
                Ok(()) => {
                    metrics::counter!("mailstore_spool_enqueued_total")
                        .increment(1);
                    debug!("Spooled message {message_id} as {entry}");
                    return Ok(entry);
                },
                // Same nanosecond and salt; just pick another name.
                Err(e) if io::ErrorKind::AlreadyExists == e.kind() => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Return a snapshot of the entries currently in the spool.
    ///
    /// Subdirectories and files whose names are not spool entry names are
    /// skipped. A spool directory which does not exist yet is empty.
    pub fn scan_pending(
        &self,
    ) -> Result<impl Iterator<Item = SpoolEntry>, Error> {
        let readdir = match fs::read_dir(&self.root) {
            Ok(readdir) => readdir,
            Err(e) if io::ErrorKind::NotFound == e.kind() => {
                return Ok(Vec::new().into_iter());
            },
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for dirent in readdir {
            let dirent = dirent?;
            if dirent.file_type().map_or(true, |ft| ft.is_dir()) {
                continue;
            }

            let Ok(name) = dirent.file_name().into_string() else {
                continue;
            };

            if let Some(message_id) = parse_entry_name(&name) {
                entries.push(SpoolEntry { message_id, name });
            }
        }

        Ok(entries.into_iter())
    }

    /// Read the full content of `entry`.
    pub fn read(&self, entry: &SpoolEntry) -> Result<Vec<u8>, Error> {
        fs::read(self.path(entry)).map_err(Into::into)
    }

    /// Retire `entry`.
    ///
    /// Removing an entry which is already gone is not an error.
    pub fn remove(&self, entry: &SpoolEntry) -> Result<(), Error> {
        fs::remove_file(self.path(entry)).ignore_not_found()?;
        Ok(())
    }

    /// Delete staging files abandoned by writers that died mid-enqueue.
    pub fn clean_tmp(&self) {
        let removed = file_ops::remove_stale_files(self.tmp(), STALE_TMP_AGE);
        if removed > 0 {
            warn!(
                "Removed {removed} abandoned staging files from {}",
                self.tmp().display(),
            );
        }
    }
}

fn entry_name(message_id: i64, nanos: i64, salt: u32) -> String {
    format!("{ENTRY_PREFIX}{message_id}-{nanos}-{salt}")
}

/// Extract the message ID from a spool entry name, or `None` if `name` is not
/// an entry name.
fn parse_entry_name(name: &str) -> Option<i64> {
    let rest = name.strip_prefix(ENTRY_PREFIX)?;
    // The message ID may itself be negative, so split from the right.
    let mut parts = rest.rsplitn(3, '-');
    let salt = parts.next()?;
    let nanos = parts.next()?;
    let message_id = parts.next()?;

    if salt.is_empty() || !salt.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    nanos.parse::<i64>().ok()?;
    message_id.parse::<i64>().ok()
}
