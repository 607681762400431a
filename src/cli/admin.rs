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

use std::path::PathBuf;

use crate::store::authdb::{Connection, AUTH_DB_NAME};
use crate::store::spool::Spool;
use crate::support::file_ops;
use crate::support::system_config::SystemConfig;

use super::main::ScheduleRemovalSubcommand;

pub fn schedule_removal(
    system_config: SystemConfig,
    root: PathBuf,
    cmd: ScheduleRemovalSubcommand,
) {
    if !crate::support::safe_name::is_safe_name(&cmd.name) {
        die!(EX_USAGE, "'{}' is not a valid account name", cmd.name);
    }

    let data_dir = system_config.data_dir(&root);
    if let Err(e) = file_ops::ensure_dir(&data_dir, 0o750) {
        die!(EX_IOERR, "Unable to create '{}': {}", data_dir.display(), e);
    }

    let result = Connection::new(&data_dir.join(AUTH_DB_NAME)).and_then(
        |mut db| {
            db.schedule_account_removal(&cmd.name)?;
            db.close()
        },
    );
    if let Err(e) = result {
        die!(EX_SOFTWARE, "Failed to schedule removal: {}", e);
    }

    println!(
        "Account '{}' will be removed the next time the store starts.",
        cmd.name
    );
}

pub fn list_spool(system_config: SystemConfig, root: PathBuf) {
    let spool = Spool::new(system_config.spool_dir(&root));
    let entries = match spool.scan_pending() {
        Ok(entries) => entries,
        Err(e) => die!(
            EX_IOERR,
            "Unable to read spool '{}': {}",
            spool.root().display(),
            e
        ),
    };

    let mut count = 0;
    for entry in entries {
        println!("{}\t{}", entry.message_id(), entry.name());
        count += 1;
    }
    eprintln!("{} message(s) awaiting archival", count);
}
