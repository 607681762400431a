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

//! The archive client: one connection to the object store, shared by
//! everything that archives messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::prelude::*;
use log::{debug, info};
use tokio::sync::{Mutex, OnceCell};

use super::object_store::{Bucket, Connection, Connector, ObjectInfo, ObjectMeta};
use crate::support::{error::Error, system_config::ArchiveConfig};

const BUCKET_DESCRIPTION: &str = "Email message storage for mailstore";

pub struct ArchiveClient {
    connection: Box<dyn Connection>,
    /// Held for the whole of each put so that at most one store is in flight.
    bucket: Mutex<Box<dyn Bucket>>,
    config: ArchiveConfig,
    closed: AtomicBool,
}

async fn with_timeout<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or(Err(Error::ArchiveTimeout))
}

async fn resolve_bucket(
    connection: &dyn Connection,
    name: &str,
) -> Result<Box<dyn Bucket>, Error> {
    match connection.bucket(name).await {
        Err(Error::BucketNotFound) => {
            info!("Creating archive bucket {name}");
            connection.create_bucket(name, BUCKET_DESCRIPTION).await
        },
        r => r,
    }
}

impl ArchiveClient {
    /// Connect to the store described by `config` and resolve its bucket,
    /// creating the bucket if it does not exist.
    ///
    /// No retries are made; a failure here leaves archival disabled.
    pub async fn connect(
        connector: &dyn Connector,
        config: ArchiveConfig,
    ) -> Result<Self, Error> {
        let connection =
            with_timeout(config.connect_timeout(), connector.connect(&config))
                .await?;

        let bucket = match with_timeout(
            config.request_timeout(),
            resolve_bucket(&*connection, &config.bucket_name),
        )
        .await
        {
            Ok(bucket) => bucket,
            Err(e) => {
                connection.close();
                return Err(e);
            },
        };

        info!(
            "Archive client initialised: url={} bucket={}",
            config.url, config.bucket_name,
        );

        Ok(Self {
            connection,
            bucket: Mutex::new(bucket),
            config,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.connection.is_connected()
    }

    /// Store `data` as the archived copy of message `message_id`.
    ///
    /// The object is named `msg-{message_id}-{unix_seconds}`. `timeout`
    /// bounds the whole operation, including waiting for other stores.
    pub async fn put(
        &self,
        message_id: i64,
        data: &[u8],
        timeout: Duration,
    ) -> Result<ObjectInfo, Error> {
        with_timeout(timeout, async {
            let bucket = self.bucket.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::ArchiveClosed);
            }

            let meta = ObjectMeta {
                name: format!("msg-{message_id}-{}", Utc::now().timestamp()),
                description: format!("Email message ID {message_id}"),
            };
            let info = bucket.put(&meta, data).await?;
            debug!(
                "Archived message {message_id} as {} ({} bytes) in {}",
                info.name, info.size, info.bucket,
            );
            Ok(info)
        })
        .await
    }

    /// Close the connection. Calls after the first do nothing.
    pub async fn close(&self) {
        let _bucket = self.bucket.lock().await;
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.connection.close();
            info!("Archive connection closed");
        }
    }
}

/// A shared reference to the archive client, which may be absent.
///
/// An absent client means archival is disabled, and every operation through
/// the handle is then a successful no-op. The client is constructed at most
/// once per handle; concurrent initialisers wait for the first one, and a
/// failed construction is remembered as "absent" rather than retried.
#[derive(Clone, Default)]
pub struct ArchiveHandle {
    client: Arc<OnceCell<Option<Arc<ArchiveClient>>>>,
}

impl ArchiveHandle {
    /// Construct the client if `config` is present and this handle has not
    /// been initialised yet.
    ///
    /// Returns the construction error to the caller that made the attempt.
    pub async fn init(
        &self,
        connector: &dyn Connector,
        config: Option<&ArchiveConfig>,
    ) -> Result<(), Error> {
        let Some(config) = config else {
            debug!("Archive not configured, skipping initialisation");
            return Ok(());
        };

        let mut init_error = None;
        let slot = &mut init_error;
        self.client
            .get_or_init(|| async move {
                match ArchiveClient::connect(connector, config.clone()).await {
                    Ok(client) => Some(Arc::new(client)),
                    Err(e) => {
                        *slot = Some(e);
                        None
                    },
                }
            })
            .await;

        match init_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    pub fn client(&self) -> Option<&Arc<ArchiveClient>> {
        self.client.get().and_then(Option::as_ref)
    }

    pub fn is_connected(&self) -> bool {
        self.client().map_or(false, |c| c.is_connected())
    }

    /// Store a message through the client, if there is one.
    ///
    /// Returns `None` when archival is disabled.
    pub async fn put(
        &self,
        message_id: i64,
        data: &[u8],
        timeout: Duration,
    ) -> Result<Option<ObjectInfo>, Error> {
        match self.client() {
            None => Ok(None),
            Some(client) => client.put(message_id, data, timeout).await.map(Some),
        }
    }

    pub async fn close(&self) {
        if let Some(client) = self.client() {
            client.close().await;
        }
    }
}
