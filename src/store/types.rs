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

//! Records kept in the authentication database, and their bindings to
//! `rusqlite`.

use std::fmt;
use std::str::FromStr;

use chrono::prelude::*;
use rusqlite::types::{
    FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef,
};

/// A point in time, stored as whole seconds since the UNIX epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixTimestamp(pub DateTime<Utc>);

impl UnixTimestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl ToSql for UnixTimestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.timestamp()))
    }
}

impl FromSql for UnixTimestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let inner = i64::column_result(value)?;
        DateTime::<Utc>::from_timestamp(inner, 0)
            .ok_or(FromSqlError::OutOfRange(inner))
            .map(Self)
    }
}

/// The scheduled removal of an account, made when its last reference goes
/// away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountRemoval {
    pub account_name: String,
}

/// The outcome of a login attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginResult {
    Ok,
    BadCredentials,
    UnknownUser,
    Disabled,
    RateLimited,
    Error,
}

impl LoginResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::BadCredentials => "bad_credentials",
            Self::UnknownUser => "unknown_user",
            Self::Disabled => "disabled",
            Self::RateLimited => "rate_limited",
            Self::Error => "error",
        }
    }

    pub fn is_success(self) -> bool {
        Self::Ok == self
    }
}

impl fmt::Display for LoginResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoginResult {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "ok" => Ok(Self::Ok),
            "bad_credentials" => Ok(Self::BadCredentials),
            "unknown_user" => Ok(Self::UnknownUser),
            "disabled" => Ok(Self::Disabled),
            "rate_limited" => Ok(Self::RateLimited),
            "error" => Ok(Self::Error),
            _ => Err(()),
        }
    }
}

impl ToSql for LoginResult {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for LoginResult {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|()| FromSqlError::InvalidType)
    }
}

/// One attempt to log in to an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginAttempt {
    pub time: UnixTimestamp,
    pub account_name: String,
    /// The address the client gave as its login name.
    pub login_address: String,
    pub remote_ip: String,
    /// E.g. `imap` or `submission`.
    pub protocol: String,
    pub auth_mechanism: String,
    pub result: LoginResult,
}

impl LoginAttempt {
    pub(super) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            time: row.get("time")?,
            account_name: row.get("account_name")?,
            login_address: row.get("login_address")?,
            remote_ip: row.get("remote_ip")?,
            protocol: row.get("protocol")?,
            auth_mechanism: row.get("auth_mechanism")?,
            result: row.get("result")?,
        })
    }
}

/// Summary of the login history of one account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginAttemptState {
    pub account_name: String,
    pub last_success: Option<UnixTimestamp>,
    pub last_failure: Option<UnixTimestamp>,
}

impl LoginAttemptState {
    pub(super) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            account_name: row.get("account_name")?,
            last_success: row.get("last_success")?,
            last_failure: row.get("last_failure")?,
        })
    }
}
