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

//! The authentication database, `auth.sqlite`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::info;

use super::types::*;
use crate::support::error::Error;

pub const AUTH_DB_NAME: &str = "auth.sqlite";

static MIGRATIONS: &[&str] = &[include_str!("authdb.v1.sql")];

/// A connection to the authentication database.
pub struct Connection {
    cxn: rusqlite::Connection,
}

/// A connection shared between the lifecycle manager and its workers.
///
/// The lock is only ever held for the duration of a single operation, never
/// across an await point.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Lock `db`, recovering the connection if a previous holder panicked.
///
/// Every operation on `Connection` is a single statement or transaction, so a
/// panic cannot leave it half-modified.
pub fn lock(db: &SharedConnection) -> MutexGuard<'_, Connection> {
    db.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connection {
    pub fn new(path: &Path) -> Result<Self, Error> {
        let mut cxn = rusqlite::Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o660));

        cxn.pragma_update(None, "foreign_keys", true)?;
        cxn.pragma_update(None, "journal_mode", "PERSIST")?;
        cxn.pragma_update(None, "journal_size_limit", 64 * 1024)?;
        cxn.busy_timeout(Duration::from_secs(5))?;

        apply_migrations(&mut cxn, "auth", MIGRATIONS)?;

        Ok(Self { cxn })
    }

    pub fn close(self) -> Result<(), Error> {
        self.cxn.close().map_err(|(_, e)| e.into())
    }

    pub fn list_account_removals(
        &mut self,
    ) -> Result<Vec<AccountRemoval>, Error> {
        self.cxn
            .prepare_cached(
                "SELECT `account_name` FROM `account_removal` \
                 ORDER BY `account_name`",
            )?
            .query_map((), |row| {
                Ok(AccountRemoval {
                    account_name: row.get(0)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Record that `account_name` is to be removed at the next startup.
    ///
    /// Scheduling an account that is already scheduled has no effect.
    pub fn schedule_account_removal(
        &mut self,
        account_name: &str,
    ) -> Result<(), Error> {
        self.cxn.execute(
            "INSERT OR IGNORE INTO `account_removal` (`account_name`) \
             VALUES (?)",
            (account_name,),
        )?;
        Ok(())
    }

    pub fn delete_account_removal(
        &mut self,
        account_name: &str,
    ) -> Result<(), Error> {
        self.cxn.execute(
            "DELETE FROM `account_removal` WHERE `account_name` = ?",
            (account_name,),
        )?;
        Ok(())
    }

    /// Write `attempts` and update the per-account state, in one
    /// transaction.
    pub fn insert_login_attempts(
        &mut self,
        attempts: &[LoginAttempt],
    ) -> Result<(), Error> {
        let txn = self.cxn.transaction()?;
        {
            let mut insert = txn.prepare_cached(
                "INSERT INTO `login_attempt` (\
                 `time`, `account_name`, `login_address`, `remote_ip`, \
                 `protocol`, `auth_mechanism`, `result`) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )?;
            let mut success = txn.prepare_cached(
                "INSERT INTO `login_attempt_state` \
                 (`account_name`, `last_success`) VALUES (?1, ?2) \
                 ON CONFLICT (`account_name`) DO UPDATE \
                 SET `last_success` = MAX(COALESCE(`last_success`, 0), ?2)",
            )?;
            let mut failure = txn.prepare_cached(
                "INSERT INTO `login_attempt_state` \
                 (`account_name`, `last_failure`) VALUES (?1, ?2) \
                 ON CONFLICT (`account_name`) DO UPDATE \
                 SET `last_failure` = MAX(COALESCE(`last_failure`, 0), ?2)",
            )?;

            for attempt in attempts {
                insert.execute((
                    attempt.time,
                    &attempt.account_name,
                    &attempt.login_address,
                    &attempt.remote_ip,
                    &attempt.protocol,
                    &attempt.auth_mechanism,
                    attempt.result,
                ))?;

                let state = if attempt.result.is_success() {
                    &mut success
                } else {
                    &mut failure
                };
                state.execute((&attempt.account_name, attempt.time))?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Delete login attempts made before `cutoff`, along with the state of
    /// accounts left without any attempts.
    ///
    /// Returns the number of attempts deleted.
    pub fn delete_login_attempts_before(
        &mut self,
        cutoff: UnixTimestamp,
    ) -> Result<usize, Error> {
        let txn = self.cxn.transaction()?;
        let deleted = txn.execute(
            "DELETE FROM `login_attempt` WHERE `time` < ?",
            (cutoff,),
        )?;
        txn.execute(
            "DELETE FROM `login_attempt_state` WHERE `account_name` NOT IN \
             (SELECT `account_name` FROM `login_attempt`)",
            (),
        )?;
        txn.commit()?;
        Ok(deleted)
    }

    /// Fetch the login attempts for `account_name`, oldest first.
    pub fn fetch_login_attempts(
        &mut self,
        account_name: &str,
    ) -> Result<Vec<LoginAttempt>, Error> {
        self.cxn
            .prepare_cached(
                "SELECT * FROM `login_attempt` WHERE `account_name` = ? \
                 ORDER BY `time`, `id`",
            )?
            .query_map((account_name,), LoginAttempt::from_row)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn fetch_login_attempt_state(
        &mut self,
        account_name: &str,
    ) -> Result<Option<LoginAttemptState>, Error> {
        use rusqlite::OptionalExtension as _;

        self.cxn
            .prepare_cached(
                "SELECT * FROM `login_attempt_state` WHERE `account_name` = ?",
            )?
            .query_row((account_name,), LoginAttemptState::from_row)
            .optional()
            .map_err(Into::into)
    }
}

fn apply_migrations(
    cxn: &mut rusqlite::Connection,
    db_name: &str,
    migrations: &[&str],
) -> Result<(), Error> {
    let txn = cxn
        .transaction_with_behavior(rusqlite::TransactionBehavior::Exclusive)?;
    txn.execute(
        "CREATE TABLE IF NOT EXISTS `migration` (\
         `version` INTEGER NOT NULL PRIMARY KEY, \
         `applied_at` INTEGER NOT NULL\
         ) STRICT",
        (),
    )?;

    let current_version = txn
        .query_row("SELECT MAX(`version`) FROM `migration`", (), |row| {
            row.get::<_, Option<i64>>(0)
        })?
        .unwrap_or(0);

    for (version, migration) in (1i64..).zip(migrations.iter().copied()) {
        if version <= current_version {
            continue;
        }

        info!("Applying #{version} migration to {db_name} DB");
        txn.execute_batch(migration)?;
        txn.execute(
            "INSERT INTO `migration` (`version`, `applied_at`) VALUES (?, ?)",
            (version, UnixTimestamp::now()),
        )?;
    }

    txn.commit()?;
    Ok(())
}
