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

//! The account store: the authentication database, the workers attached to
//! it, and archival of delivered messages into an object store.

pub mod archive;
pub mod authdb;
pub mod dispatch;
pub mod lifecycle;
pub mod login_attempts;
pub mod nats;
pub mod object_store;
pub mod retry;
pub mod spool;
pub mod types;
pub mod worker;
