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

//! Bringing the account store up and taking it down.
//!
//! `AccountStore` owns the authentication database and every background
//! worker attached to it. `init()` opens the database, carries out pending
//! account removals, and starts the workers; `close()` stops the workers one
//! at a time, waiting for each to acknowledge, before closing the database.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{error, info};

use super::archive::ArchiveHandle;
use super::authdb::{self, Connection, SharedConnection, AUTH_DB_NAME};
use super::dispatch::Dispatcher;
use super::login_attempts::{self, LoginAttemptLogger, CLEANUP_INTERVAL};
use super::object_store::Connector;
use super::retry::RetryLoop;
use super::spool::Spool;
use super::worker::{ShutdownSignal, WorkerHandle};
use crate::support::{
    error::Error,
    file_ops::{self, IgnoreKinds},
    safe_name::is_safe_name,
    system_config::{ArchiveConfig, DEFAULT_SPOOL_DIR},
};

/// Deletes the data of an account whose removal was scheduled.
pub trait AccountRemover: Send + Sync {
    /// Remove everything belonging to `account_name`.
    ///
    /// Removing an account which no longer exists must succeed.
    fn remove_account(&self, account_name: &str) -> Result<(), Error>;
}

/// Removes accounts stored as one directory each under a common root.
pub struct DirectoryAccountRemover {
    accounts_root: PathBuf,
}

impl DirectoryAccountRemover {
    pub fn new(accounts_root: impl Into<PathBuf>) -> Self {
        Self {
            accounts_root: accounts_root.into(),
        }
    }
}

impl AccountRemover for DirectoryAccountRemover {
    fn remove_account(&self, account_name: &str) -> Result<(), Error> {
        if !is_safe_name(account_name) {
            return Err(Error::UnsafeName);
        }

        fs::remove_dir_all(self.accounts_root.join(account_name))
            .ignore_not_found()?;
        Ok(())
    }
}

pub struct AccountStore {
    data_dir: PathBuf,
    archive_config: Option<ArchiveConfig>,
    connector: Arc<dyn Connector>,
    remover: Arc<dyn AccountRemover>,
    cleanup_interval: Duration,
    running: Option<Running>,
}

struct Running {
    db: SharedConnection,
    login_attempts: LoginAttemptLogger,
    writer: WorkerHandle,
    cleaner: WorkerHandle,
    retry: WorkerHandle,
    dispatcher: Dispatcher,
}

impl AccountStore {
    /// Set up an account store over `data_dir`.
    ///
    /// Nothing is opened or started until `init()`. Archival is disabled if
    /// `archive_config` is `None`; otherwise `connector` is used to reach the
    /// object store.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        archive_config: Option<ArchiveConfig>,
        connector: Arc<dyn Connector>,
        remover: Arc<dyn AccountRemover>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            archive_config,
            connector,
            remover,
            cleanup_interval: CLEANUP_INTERVAL,
            running: None,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn is_initialized(&self) -> bool {
        self.running.is_some()
    }

    fn spool_dir(&self) -> PathBuf {
        match self.archive_config {
            Some(ref config) => config.spool_dir(&self.data_dir),
            None => self.data_dir.join(DEFAULT_SPOOL_DIR),
        }
    }

    /// Open the database and start all background work.
    ///
    /// Failing to reach the archive is not an error; archival simply stays
    /// disabled until the next `init()`.
    pub async fn init(&mut self, shutdown: ShutdownSignal) -> Result<(), Error> {
        if self.running.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        file_ops::ensure_dir(&self.data_dir, 0o750)?;
        let db: SharedConnection = Arc::new(Mutex::new(Connection::new(
            &self.data_dir.join(AUTH_DB_NAME),
        )?));

        self.process_account_removals(&db)?;

        let (login_attempts, writer) =
            login_attempts::start_writer(Arc::clone(&db), shutdown.clone());
        let cleaner = login_attempts::start_cleaner(
            Arc::clone(&db),
            self.cleanup_interval,
            shutdown.clone(),
        );

        let archive = ArchiveHandle::default();
        if let Err(e) = archive
            .init(&*self.connector, self.archive_config.as_ref())
            .await
        {
            error!("Archive unavailable, archival disabled until restart: {e}");
        }

        let spool = Arc::new(Spool::new(self.spool_dir()));
        let retry_interval = self
            .archive_config
            .as_ref()
            .map_or(Duration::from_secs(30), ArchiveConfig::retry_interval);
        let retry =
            RetryLoop::new(Arc::clone(&spool), archive.clone(), retry_interval)
                .start(shutdown);

        self.running = Some(Running {
            db,
            login_attempts,
            writer,
            cleaner,
            retry,
            dispatcher: Dispatcher::new(archive, spool),
        });
        info!("Account store initialised in {}", self.data_dir.display());
        Ok(())
    }

    /// Remove every account whose removal is pending.
    ///
    /// Each removal stands alone: a failure is logged and its record kept for
    /// the next startup, without affecting the others.
    fn process_account_removals(
        &self,
        db: &SharedConnection,
    ) -> Result<(), Error> {
        let removals = authdb::lock(db).list_account_removals()?;
        for removal in removals {
            let name = &removal.account_name;
            if let Err(e) = self.remover.remove_account(name) {
                error!("Failed to remove account {name}, will retry: {e}");
                continue;
            }

            match authdb::lock(db).delete_account_removal(name) {
                Ok(()) => info!("Removed account {name}"),
                Err(e) => error!(
                    "Removed account {name} but failed to clear its \
                     removal record: {e}"
                ),
            }
        }

        Ok(())
    }

    /// Stop all background work and close the database.
    ///
    /// Workers are stopped in order: the login attempt writer (which writes
    /// out everything still queued), the cleaner, then the archive retry loop
    /// and the archive client.
    pub async fn close(&mut self) -> Result<(), Error> {
        let Running {
            db,
            login_attempts,
            writer,
            cleaner,
            retry,
            dispatcher,
        } = self.running.take().ok_or(Error::NotInitialized)?;

        drop(login_attempts);
        writer.stop().await;
        cleaner.stop().await;
        retry.stop().await;
        dispatcher.archive().close().await;
        drop(dispatcher);

        // Every worker holding the connection has exited by now, so another
        // reference means the connection would outlive the store.
        Arc::try_unwrap(db)
            .map_err(|_| Error::DatabaseInUse)?
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .close()?;

        info!("Account store closed");
        Ok(())
    }

    fn running(&self) -> Result<&Running, Error> {
        self.running.as_ref().ok_or(Error::NotInitialized)
    }

    pub fn dispatcher(&self) -> Result<&Dispatcher, Error> {
        Ok(&self.running()?.dispatcher)
    }

    pub fn login_attempts(&self) -> Result<&LoginAttemptLogger, Error> {
        Ok(&self.running()?.login_attempts)
    }

    /// Schedule `account_name` for removal at the next `init()`.
    pub fn schedule_account_removal(
        &self,
        account_name: &str,
    ) -> Result<(), Error> {
        authdb::lock(&self.running()?.db).schedule_account_removal(account_name)
    }

    /// Run `f` against the open database.
    pub fn with_db<R>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<R, Error>,
    ) -> Result<R, Error> {
        f(&mut authdb::lock(&self.running()?.db))
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use chrono::prelude::*;
    use tempfile::TempDir;

    use super::super::object_store::memory::MemoryObjectStore;
    use super::super::types::{LoginAttempt, LoginResult, UnixTimestamp};
    use super::*;

    #[derive(Default)]
    struct TestRemover {
        failing: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl AccountRemover for TestRemover {
        fn remove_account(&self, account_name: &str) -> Result<(), Error> {
            self.calls.lock().unwrap().push(account_name.to_owned());
            if self.failing.contains(account_name) {
                Err(Error::AccountRemoval(account_name.to_owned()))
            } else {
                Ok(())
            }
        }
    }

    fn account_store(
        tmpdir: &TempDir,
        archive_config: Option<ArchiveConfig>,
        store: &MemoryObjectStore,
        remover: Arc<dyn AccountRemover>,
    ) -> AccountStore {
        AccountStore::new(
            tmpdir.path().join("data"),
            archive_config,
            Arc::new(store.clone()),
            remover,
        )
    }

    #[tokio::test]
    async fn init_and_close_are_checked() {
        let tmpdir = TempDir::new().unwrap();
        let mut store = account_store(
            &tmpdir,
            None,
            &MemoryObjectStore::new(),
            Arc::new(TestRemover::default()),
        );

        assert!(matches!(store.close().await, Err(Error::NotInitialized)));
        assert!(matches!(store.dispatcher(), Err(Error::NotInitialized)));

        store.init(ShutdownSignal::never()).await.unwrap();
        assert!(store.is_initialized());
        assert!(matches!(
            store.init(ShutdownSignal::never()).await,
            Err(Error::AlreadyInitialized)
        ));

        store.close().await.unwrap();
        assert!(!store.is_initialized());
        assert!(matches!(store.close().await, Err(Error::NotInitialized)));

        // The store can be brought up again after closing.
        store.init(ShutdownSignal::never()).await.unwrap();
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn removal_failures_are_kept_for_next_startup() {
        crate::init_test_log();

        let tmpdir = TempDir::new().unwrap();
        let data_dir = tmpdir.path().join("data");
        fs::create_dir_all(&data_dir).unwrap();
        {
            let mut db = Connection::new(&data_dir.join(AUTH_DB_NAME)).unwrap();
            db.schedule_account_removal("a").unwrap();
            db.schedule_account_removal("b").unwrap();
            db.close().unwrap();
        }

        let remover = Arc::new(TestRemover {
            failing: ["a".to_owned()].into_iter().collect(),
            calls: Mutex::default(),
        });
        let mut store = account_store(
            &tmpdir,
            None,
            &MemoryObjectStore::new(),
            Arc::clone(&remover) as Arc<dyn AccountRemover>,
        );
        store.init(ShutdownSignal::never()).await.unwrap();

        let mut calls = remover.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(vec!["a".to_owned(), "b".to_owned()], calls);

        let remaining = store
            .with_db(|db| db.list_account_removals())
            .unwrap()
            .into_iter()
            .map(|r| r.account_name)
            .collect::<Vec<_>>();
        assert_eq!(vec!["a".to_owned()], remaining);

        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn unconfigured_archive_touches_nothing() {
        let tmpdir = TempDir::new().unwrap();
        let objects = MemoryObjectStore::new();
        let mut store = account_store(
            &tmpdir,
            None,
            &objects,
            Arc::new(TestRemover::default()),
        );
        store.init(ShutdownSignal::never()).await.unwrap();

        let dispatcher = store.dispatcher().unwrap().clone();
        dispatcher.store_sync(1, b"message").await.unwrap();
        dispatcher
            .store_async(2, std::io::Cursor::new(&b"message"[..]))
            .unwrap();
        assert!(!dispatcher.archive().is_connected());

        store.close().await.unwrap();
        assert!(!tmpdir.path().join("data/archive-spool").exists());
        assert_eq!(0, objects.put_count());
    }

    #[tokio::test]
    async fn close_waits_for_queued_login_attempts() {
        let tmpdir = TempDir::new().unwrap();
        let mut store = account_store(
            &tmpdir,
            None,
            &MemoryObjectStore::new(),
            Arc::new(TestRemover::default()),
        );
        store.init(ShutdownSignal::never()).await.unwrap();

        store.login_attempts().unwrap().record(LoginAttempt {
            time: UnixTimestamp(Utc::now()),
            account_name: "alice".to_owned(),
            login_address: "alice@example.com".to_owned(),
            remote_ip: "203.0.113.9".to_owned(),
            protocol: "imap".to_owned(),
            auth_mechanism: "PLAIN".to_owned(),
            result: LoginResult::Ok,
        });
        store.close().await.unwrap();

        let mut db =
            Connection::new(&tmpdir.path().join("data").join(AUTH_DB_NAME))
                .unwrap();
        assert_eq!(1, db.fetch_login_attempts("alice").unwrap().len());
        assert!(db
            .fetch_login_attempt_state("alice")
            .unwrap()
            .unwrap()
            .last_success
            .is_some());
    }

    #[tokio::test]
    async fn scheduled_removal_happens_on_next_init() {
        let tmpdir = TempDir::new().unwrap();
        let remover = Arc::new(TestRemover::default());
        let mut store = account_store(
            &tmpdir,
            None,
            &MemoryObjectStore::new(),
            Arc::clone(&remover) as Arc<dyn AccountRemover>,
        );

        store.init(ShutdownSignal::never()).await.unwrap();
        store.schedule_account_removal("carol").unwrap();
        assert!(remover.calls.lock().unwrap().is_empty());
        store.close().await.unwrap();

        store.init(ShutdownSignal::never()).await.unwrap();
        assert_eq!(vec!["carol".to_owned()], *remover.calls.lock().unwrap());
        assert!(store
            .with_db(|db| db.list_account_removals())
            .unwrap()
            .is_empty());
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn spooled_messages_reach_archive_after_outage() {
        crate::init_test_log();

        let tmpdir = TempDir::new().unwrap();
        let objects = MemoryObjectStore::new();
        let mut config = ArchiveConfig::new("mem://test", "mail");
        config.retry_interval_secs = 1;
        config.request_timeout_secs = 2;

        let mut store = account_store(
            &tmpdir,
            Some(config),
            &objects,
            Arc::new(TestRemover::default()),
        );
        store.init(ShutdownSignal::never()).await.unwrap();
        let dispatcher = store.dispatcher().unwrap().clone();

        objects.set_online(false);
        for id in 0..3 {
            assert!(dispatcher.store_sync(id, b"payload").await.is_err());
        }
        assert_eq!(3, dispatcher.spool().scan_pending().unwrap().count());

        objects.set_online(true);
        for _ in 0..50 {
            if 0 == dispatcher.spool().scan_pending().unwrap().count() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(0, dispatcher.spool().scan_pending().unwrap().count());
        let names = objects
            .objects("mail")
            .into_iter()
            .map(|(name, _)| name)
            .collect::<Vec<_>>();
        for id in 0..3 {
            let prefix = format!("msg-{id}-");
            assert!(names.iter().any(|n| n.starts_with(&prefix)));
        }

        store.close().await.unwrap();
        assert!(!dispatcher.archive().is_connected());
    }

    #[tokio::test]
    async fn close_refuses_to_abandon_shared_database() {
        let tmpdir = TempDir::new().unwrap();
        let mut store = account_store(
            &tmpdir,
            None,
            &MemoryObjectStore::new(),
            Arc::new(TestRemover::default()),
        );
        store.init(ShutdownSignal::never()).await.unwrap();
        let leaked = Arc::clone(&store.running.as_ref().unwrap().db);

        assert!(matches!(store.close().await, Err(Error::DatabaseInUse)));
        assert!(!store.is_initialized());

        // Once the stray reference is gone, the store can be brought up again.
        drop(leaked);
        store.init(ShutdownSignal::never()).await.unwrap();
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn nothing_is_delivered_after_close() {
        let tmpdir = TempDir::new().unwrap();
        let objects = MemoryObjectStore::new();
        let mut config = ArchiveConfig::new("mem://test", "mail");
        config.retry_interval_secs = 1;

        let mut store = account_store(
            &tmpdir,
            Some(config),
            &objects,
            Arc::new(TestRemover::default()),
        );
        store.init(ShutdownSignal::never()).await.unwrap();
        store.close().await.unwrap();

        let spool = Spool::new(tmpdir.path().join("data/archive-spool"));
        spool.enqueue(5, b"late").unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(1, spool.scan_pending().unwrap().count());
        assert_eq!(0, objects.put_count());
    }

    #[test]
    fn directory_remover() {
        let tmpdir = TempDir::new().unwrap();
        fs::create_dir_all(tmpdir.path().join("dave/mail")).unwrap();
        fs::write(tmpdir.path().join("dave/mail/1"), b"x").unwrap();

        let remover = DirectoryAccountRemover::new(tmpdir.path());
        remover.remove_account("dave").unwrap();
        assert!(!tmpdir.path().join("dave").exists());
        remover.remove_account("dave").unwrap();

        assert!(matches!(
            remover.remove_account(".."),
            Err(Error::UnsafeName)
        ));
        assert!(tmpdir.path().exists());
    }
}
