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

//! Entry points for archiving delivered messages.
//!
//! Every path tries the archive directly first and falls back to the spool,
//! from which the retry loop eventually delivers the message. When archival
//! is disabled, every path is a no-op.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use super::archive::{ArchiveClient, ArchiveHandle};
use super::spool::Spool;
use crate::support::{error::Error, threading::blocking};

/// Upper bound on an asynchronous store attempt.
pub const ASYNC_STORE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Dispatcher {
    archive: ArchiveHandle,
    spool: Arc<Spool>,
}

impl Dispatcher {
    pub fn new(archive: ArchiveHandle, spool: Arc<Spool>) -> Self {
        Self { archive, spool }
    }

    pub fn archive(&self) -> &ArchiveHandle {
        &self.archive
    }

    pub fn spool(&self) -> &Spool {
        &self.spool
    }

    /// Archive `data` as message `message_id`, waiting for the outcome.
    ///
    /// If the archive rejects the message, a copy is spooled and the
    /// archive's error is still returned, so the caller knows the message is
    /// not stored remotely yet. If spooling fails too, the spool error is
    /// returned instead.
    pub async fn store_sync(
        &self,
        message_id: i64,
        data: &[u8],
    ) -> Result<(), Error> {
        let Some(client) = self.archive.client() else {
            return Ok(());
        };

        store_or_spool(
            client,
            &self.spool,
            message_id,
            data,
            client.config().request_timeout(),
        )
        .await
    }

    /// Archive the content of `source` as message `message_id` in the
    /// background.
    ///
    /// The whole of `source` is read before this returns, so the caller may
    /// reuse or discard it immediately. Only a failure to read `source` is
    /// reported; the outcome of the store itself is only logged.
    pub fn store_async(
        &self,
        message_id: i64,
        mut source: impl Read + Seek,
    ) -> Result<(), Error> {
        let Some(client) = self.archive.client() else {
            return Ok(());
        };

        source.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;

        let client = Arc::clone(client);
        let spool = Arc::clone(&self.spool);
        tokio::spawn(async move {
            match store_or_spool(
                &client,
                &spool,
                message_id,
                &data,
                ASYNC_STORE_TIMEOUT,
            )
            .await
            {
                Ok(()) => debug!("Asynchronously archived message {message_id}"),
                Err(e) => warn!(
                    "Asynchronous archival of message {message_id} failed: {e}"
                ),
            }
        });

        Ok(())
    }

    /// Archive message `message_id`, deleting the local copy only once the
    /// archive holds it when forward-only mode is configured.
    ///
    /// In forward-only mode, the store is synchronous and `delete_local` is
    /// called exactly once if and only if it succeeds. Otherwise the store
    /// runs in the background and `delete_local` is never called. Returns
    /// whether the local copy was deleted.
    pub async fn forward(
        &self,
        message_id: i64,
        data: &[u8],
        delete_local: impl FnOnce() -> Result<(), Error>,
    ) -> Result<bool, Error> {
        let Some(client) = self.archive.client() else {
            return Ok(false);
        };

        if client.config().delete_after_store {
            self.store_sync(message_id, data).await?;
            delete_local()?;
            Ok(true)
        } else {
            self.store_async(message_id, std::io::Cursor::new(data))?;
            Ok(false)
        }
    }
}

async fn store_or_spool(
    client: &ArchiveClient,
    spool: &Arc<Spool>,
    message_id: i64,
    data: &[u8],
    timeout: Duration,
) -> Result<(), Error> {
    let e = match client.put(message_id, data, timeout).await {
        Ok(_) => return Ok(()),
        Err(e) => e,
    };

    warn!("Archiving message {message_id} failed, spooling for retry: {e}");
    let enqueued = {
        let spool = Arc::clone(spool);
        let data = data.to_vec();
        blocking(move || spool.enqueue(message_id, &data)).await
    };
    match enqueued {
        Ok(entry) => {
            info!("Message {message_id} spooled as {entry}");
            Err(e)
        },
        Err(spool_error) => {
            error!("Failed to spool message {message_id}: {spool_error}");
            Err(spool_error)
        },
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use super::super::object_store::memory::MemoryObjectStore;
    use super::*;
    use crate::support::system_config::ArchiveConfig;

    struct Setup {
        _tmpdir: TempDir,
        store: MemoryObjectStore,
        dispatcher: Dispatcher,
    }

    async fn set_up(archive: Option<ArchiveConfig>) -> Setup {
        let tmpdir = TempDir::new().unwrap();
        let store = MemoryObjectStore::new();
        let handle = ArchiveHandle::default();
        handle.init(&store, archive.as_ref()).await.unwrap();
        let dispatcher = Dispatcher::new(
            handle,
            Arc::new(Spool::new(tmpdir.path().join("spool"))),
        );

        Setup {
            _tmpdir: tmpdir,
            store,
            dispatcher,
        }
    }

    fn config(delete_after_store: bool) -> ArchiveConfig {
        let mut config = ArchiveConfig::new("mem://test", "mail");
        config.delete_after_store = delete_after_store;
        config.request_timeout_secs = 2;
        config
    }

    fn pending(dispatcher: &Dispatcher) -> Vec<i64> {
        dispatcher
            .spool()
            .scan_pending()
            .unwrap()
            .map(|e| e.message_id())
            .collect()
    }

    #[tokio::test]
    async fn unconfigured_is_noop() {
        let setup = set_up(None).await;

        setup.dispatcher.store_sync(1, b"data").await.unwrap();
        setup
            .dispatcher
            .store_async(2, Cursor::new(b"data".to_vec()))
            .unwrap();
        let deleted = setup
            .dispatcher
            .forward(3, b"data", || panic!("must not delete"))
            .await
            .unwrap();

        assert!(!deleted);
        assert!(!setup.dispatcher.spool().root().exists());
        assert_eq!(0, setup.store.put_count());
    }

    #[tokio::test]
    async fn sync_failure_spools_and_returns_original_error() {
        let setup = set_up(Some(config(false))).await;
        setup.store.set_online(false);

        let result = setup.dispatcher.store_sync(42, b"hello").await;
        assert!(matches!(result, Err(Error::ObjectStoreUnavailable(_))));

        let entries = setup
            .dispatcher
            .spool()
            .scan_pending()
            .unwrap()
            .collect::<Vec<_>>();
        assert_eq!(1, entries.len());
        assert_eq!(42, entries[0].message_id());
        assert_eq!(
            b"hello".to_vec(),
            setup.dispatcher.spool().read(&entries[0]).unwrap()
        );
    }

    #[tokio::test]
    async fn sync_failure_returns_spool_error_if_spool_fails() {
        let setup = set_up(Some(config(false))).await;
        setup.store.set_online(false);
        // A plain file where the spool directory should be.
        std::fs::write(setup.dispatcher.spool().root(), b"").unwrap();

        let result = setup.dispatcher.store_sync(42, b"hello").await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn sync_success_does_not_spool() {
        let setup = set_up(Some(config(false))).await;
        setup.dispatcher.store_sync(7, b"hello").await.unwrap();
        assert_eq!(1, setup.store.put_count());
        assert!(pending(&setup.dispatcher).is_empty());
    }

    #[tokio::test]
    async fn async_store_snapshots_source() {
        let setup = set_up(Some(config(false))).await;

        let mut source = Cursor::new(b"original".to_vec());
        source.set_position(3);
        setup.dispatcher.store_async(9, &mut source).unwrap();
        // The caller is free to reuse the source immediately.
        source.get_mut().clear();
        source.get_mut().extend_from_slice(b"clobbered");

        for _ in 0..100 {
            if setup.store.put_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let objects = setup.store.objects("mail");
        assert_eq!(1, objects.len());
        assert_eq!(b"original".to_vec(), objects[0].1);
    }

    #[tokio::test]
    async fn forward_only_deletes_after_confirmed_store() {
        let setup = set_up(Some(config(true))).await;
        let deletions = AtomicUsize::new(0);
        let delete = || {
            deletions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        setup.store.set_online(false);
        assert!(setup.dispatcher.forward(1, b"a", delete).await.is_err());
        assert_eq!(0, deletions.load(Ordering::SeqCst));
        assert_eq!(vec![1], pending(&setup.dispatcher));

        setup.store.set_online(true);
        assert!(setup.dispatcher.forward(2, b"b", delete).await.unwrap());
        assert_eq!(1, deletions.load(Ordering::SeqCst));
        assert_eq!(1, setup.store.put_count());
    }

    #[tokio::test]
    async fn standard_mode_never_deletes() {
        let setup = set_up(Some(config(false))).await;
        let deleted = setup
            .dispatcher
            .forward(5, b"x", || panic!("must not delete"))
            .await
            .unwrap();
        assert!(!deleted);
    }
}
