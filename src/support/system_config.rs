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

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// The system-wide configuration for Mailstore.
///
/// This is stored in a file named `mailstore.toml` under the Mailstore system
/// root, which is typically `/usr/local/etc/mailstore` or `/etc/mailstore`.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Where the authentication database and default spool live.
    ///
    /// Relative paths are resolved against the system root.
    #[serde(default)]
    pub data_dir: PathBuf,

    /// Configuration for mirroring messages into an object store.
    ///
    /// If absent, archival is disabled entirely.
    #[serde(default)]
    pub archive: Option<ArchiveConfig>,
}

impl SystemConfig {
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        toml::from_str(text).map_err(Into::into)
    }

    /// Returns the data directory, resolved against `root`.
    pub fn data_dir(&self, root: &Path) -> PathBuf {
        if self.data_dir.as_os_str().is_empty() {
            root.join("data")
        } else {
            root.join(&self.data_dir)
        }
    }

    /// Returns the archive spool directory, resolved against `root`.
    pub fn spool_dir(&self, root: &Path) -> PathBuf {
        let data_dir = self.data_dir(root);
        match self.archive {
            Some(ref archive) => archive.spool_dir(&data_dir),
            None => data_dir.join(DEFAULT_SPOOL_DIR),
        }
    }
}

/// The spool directory, relative to the data directory, used when the archive
/// configuration does not name one.
pub const DEFAULT_SPOOL_DIR: &str = "archive-spool";

/// Connection descriptor for the archive object store.
///
/// This is loaded once at startup and never mutated.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ArchiveConfig {
    /// The URL of the object store, e.g. `file:///mnt/archive`.
    pub url: String,
    /// The bucket messages are stored into. It is created if it does not
    /// exist.
    pub bucket_name: String,

    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub credentials_file: PathBuf,

    /// How long to wait for the connection to be established, in seconds.
    ///
    /// 0 selects the default of 30.
    #[serde(default)]
    pub connect_timeout_secs: u64,
    /// How long to wait for any single request, in seconds.
    ///
    /// 0 selects the default of 30.
    #[serde(default)]
    pub request_timeout_secs: u64,

    /// If true, a message's local copy may only be deleted once the archive
    /// has confirmed storing it ("forward-only" mode).
    #[serde(default)]
    pub delete_after_store: bool,

    /// Seconds between passes over the pending-archive spool.
    ///
    /// 0 selects the default of 30.
    #[serde(default)]
    pub retry_interval_secs: u64,
    /// Where messages awaiting archival are spooled.
    ///
    /// Defaults to `archive-spool` under the data directory.
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
}

/// The credentials to present to the object store.
///
/// At most one kind is ever used; see `ArchiveConfig::credentials()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    None,
    UserPassword { username: String, password: String },
    Token(String),
    File(PathBuf),
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn secs_or_default(secs: u64) -> Duration {
    if 0 == secs {
        DEFAULT_TIMEOUT
    } else {
        Duration::from_secs(secs)
    }
}

impl ArchiveConfig {
    pub fn new(url: impl Into<String>, bucket_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bucket_name: bucket_name.into(),
            username: String::new(),
            password: String::new(),
            token: String::new(),
            credentials_file: PathBuf::new(),
            connect_timeout_secs: 0,
            request_timeout_secs: 0,
            delete_after_store: false,
            retry_interval_secs: 0,
            spool_dir: None,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        secs_or_default(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        secs_or_default(self.request_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        secs_or_default(self.retry_interval_secs)
    }

    /// Select the credentials to use.
    ///
    /// A credentials file takes precedence over a token, which takes
    /// precedence over a user name and password.
    pub fn credentials(&self) -> Credentials {
        if !self.credentials_file.as_os_str().is_empty() {
            Credentials::File(self.credentials_file.clone())
        } else if !self.token.is_empty() {
            Credentials::Token(self.token.clone())
        } else if !self.username.is_empty() {
            Credentials::UserPassword {
                username: self.username.clone(),
                password: self.password.clone(),
            }
        } else {
            Credentials::None
        }
    }

    pub fn spool_dir(&self, data_dir: &Path) -> PathBuf {
        match self.spool_dir {
            Some(ref dir) => data_dir.join(dir),
            None => data_dir.join(DEFAULT_SPOOL_DIR),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_without_archive() {
        let config = SystemConfig::from_toml("data_dir = \"/srv/mail\"\n")
            .unwrap();
        assert!(config.archive.is_none());
        assert_eq!(
            PathBuf::from("/srv/mail"),
            config.data_dir(Path::new("/etc/mailstore"))
        );
        assert_eq!(
            PathBuf::from("/srv/mail/archive-spool"),
            config.spool_dir(Path::new("/etc/mailstore"))
        );
    }

    #[test]
    fn parse_archive_defaults() {
        let config = SystemConfig::from_toml(
            "[archive]\n\
             url = \"file:///mnt/archive\"\n\
             bucket_name = \"mail\"\n",
        )
        .unwrap();
        let archive = config.archive.unwrap();
        assert_eq!(Duration::from_secs(30), archive.connect_timeout());
        assert_eq!(Duration::from_secs(30), archive.request_timeout());
        assert_eq!(Duration::from_secs(30), archive.retry_interval());
        assert!(!archive.delete_after_store);
        assert_eq!(Credentials::None, archive.credentials());
        assert_eq!(
            PathBuf::from("/d/archive-spool"),
            archive.spool_dir(Path::new("/d"))
        );
    }

    #[test]
    fn credentials_precedence() {
        let mut config = ArchiveConfig::new("file:///x", "b");
        config.username = "user".to_owned();
        config.password = "hunter2".to_owned();
        assert_eq!(
            Credentials::UserPassword {
                username: "user".to_owned(),
                password: "hunter2".to_owned(),
            },
            config.credentials()
        );

        config.token = "tok".to_owned();
        assert_eq!(Credentials::Token("tok".to_owned()), config.credentials());

        config.credentials_file = PathBuf::from("/etc/creds");
        assert_eq!(
            Credentials::File(PathBuf::from("/etc/creds")),
            config.credentials()
        );
    }

    #[test]
    fn explicit_timeouts() {
        let config = SystemConfig::from_toml(
            "[archive]\n\
             url = \"file:///mnt/archive\"\n\
             bucket_name = \"mail\"\n\
             connect_timeout_secs = 5\n\
             request_timeout_secs = 7\n\
             delete_after_store = true\n",
        )
        .unwrap();
        let archive = config.archive.unwrap();
        assert_eq!(Duration::from_secs(5), archive.connect_timeout());
        assert_eq!(Duration::from_secs(7), archive.request_timeout());
        assert!(archive.delete_after_store);
    }
}
