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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Already initialized")]
    AlreadyInitialized,
    #[error("Not initialized")]
    NotInitialized,
    #[error("Auth database still in use")]
    DatabaseInUse,
    #[error("Archive client closed")]
    ArchiveClosed,
    #[error("Archive operation timed out")]
    ArchiveTimeout,
    #[error("Object store bucket not found")]
    BucketNotFound,
    #[error("Object store unavailable: {0}")]
    ObjectStoreUnavailable(String),
    #[error("Unsupported archive URL scheme: {0}")]
    UnsupportedArchiveScheme(String),
    #[error("Unsafe bucket or object name")]
    UnsafeName,
    #[error("Account removal failed: {0}")]
    AccountRemoval(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
