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

use std::fs;
use std::mem;
use std::path::{Path, PathBuf};

use structopt::StructOpt;

use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Run the account store until interrupted.
    ///
    /// This opens the authentication database, carries out pending account
    /// removals, and keeps the login attempt workers and the archive retry
    /// loop running until SIGINT or SIGTERM is received.
    Serve(CommonOptions),
    /// Schedule an account to be removed the next time the store starts.
    ScheduleRemoval(ScheduleRemovalSubcommand),
    /// List the messages waiting in the archive spool.
    Spool(CommonOptions),
}

#[derive(StructOpt, Default)]
pub(super) struct CommonOptions {
    /// The directory containing `mailstore.toml` etc
    /// [default: /etc/mailstore or /usr/local/etc/mailstore]
    #[structopt(long, parse(from_os_str))]
    root: Option<PathBuf>,
}

#[derive(StructOpt)]
pub(super) struct ScheduleRemovalSubcommand {
    #[structopt(flatten)]
    common: CommonOptions,

    /// Name of the account to remove.
    pub(super) name: String,
}

impl Command {
    fn common_options(&mut self) -> CommonOptions {
        match *self {
            Command::Serve(ref mut c) | Command::Spool(ref mut c) => {
                mem::take(c)
            },
            Command::ScheduleRemoval(ref mut c) => mem::take(&mut c.common),
        }
    }
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let mut cmd = Command::from_clap(&match Command::clap().get_matches_safe()
    {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    let common = cmd.common_options();
    let root = common.root.unwrap_or_else(|| {
        if Path::new("/etc/mailstore/mailstore.toml").is_file() {
            "/etc/mailstore".to_owned().into()
        } else if Path::new("/usr/local/etc/mailstore/mailstore.toml").is_file()
        {
            "/usr/local/etc/mailstore".to_owned().into()
        } else {
            die!(
                EX_CONFIG,
                "Neither /etc/mailstore nor /usr/local/etc/mailstore looks\n\
                 like the Mailstore root; use --root=/path/to/mailstore if\n\
                 your installation is elsewhere."
            )
        }
    });

    let system_config_path = root.join("mailstore.toml");
    let system_config_toml = match fs::read_to_string(&system_config_path) {
        Ok(text) => text,
        Err(e) => die!(
            EX_CONFIG,
            "Error reading '{}': {}",
            system_config_path.display(),
            e
        ),
    };

    let system_config = match SystemConfig::from_toml(&system_config_toml) {
        Ok(config) => config,
        Err(e) => die!(
            EX_CONFIG,
            "Error in config file at '{}': {}",
            system_config_path.display(),
            e
        ),
    };

    init_logging(&root);

    match cmd {
        Command::Serve(_) => super::serve::serve(system_config, root),
        Command::ScheduleRemoval(cmd) => {
            super::admin::schedule_removal(system_config, root, cmd)
        },
        Command::Spool(_) => super::admin::list_spool(system_config, root),
    }
}

fn init_logging(root: &Path) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
        return;
    }

    let log_config_file = root.join("logging.toml");
    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            die!(EX_CONFIG, "Failed to initialise logging: {}", e);
        }
        return;
    }

    let formatter = syslog::Formatter3164 {
        facility: syslog::Facility::LOG_MAIL,
        hostname: None,
        process: env!("CARGO_PKG_NAME").to_owned(),
        pid: nix::unistd::getpid().as_raw(),
    };

    let logger = match syslog::unix(formatter) {
        Ok(logger) => logger,
        Err(e) => die!(EX_OSERR, "Failed to connect to syslog: {}", e),
    };
    if let Err(e) =
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|_| log::set_max_level(log::LevelFilter::Info))
    {
        die!(EX_SOFTWARE, "Failed to initialise logging: {}", e);
    }
}
