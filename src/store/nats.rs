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

//! Archiving into a NATS JetStream object store, for `nats://` URLs.
//!
//! The client reconnects on its own after network loss, without limit, for
//! as long as the connection is open. Disconnects and reconnects are logged
//! as they happen; callers see them only through `is_connected()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_nats::connection::State;
use async_nats::jetstream::{
    self, context::GetStreamErrorKind, object_store, ErrorCode,
};
use async_nats::{ConnectOptions, Event};
use async_trait::async_trait;
use log::{debug, info, warn};

use super::object_store::{
    Bucket, Connection, Connector, ObjectInfo, ObjectMeta,
};
use crate::support::{
    error::Error,
    system_config::{ArchiveConfig, Credentials},
};

/// JetStream keeps the chunks of object store bucket `X` in stream `OBJ_X`.
const OBJECT_STREAM_PREFIX: &str = "OBJ_";

pub struct NatsConnector;

struct NatsConnection {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    closed: Arc<AtomicBool>,
}

struct NatsBucket {
    store: object_store::ObjectStore,
    closed: Arc<AtomicBool>,
}

fn unavailable(e: impl std::fmt::Display) -> Error {
    Error::ObjectStoreUnavailable(e.to_string())
}

async fn connect_options(
    config: &ArchiveConfig,
) -> Result<ConnectOptions, Error> {
    let options = match config.credentials() {
        Credentials::File(path) => {
            debug!("Authenticating to NATS with {}", path.display());
            ConnectOptions::with_credentials_file(path).await?
        },
        Credentials::Token(token) => ConnectOptions::with_token(token),
        Credentials::UserPassword { username, password } => {
            ConnectOptions::with_user_and_password(username, password)
        },
        Credentials::None => ConnectOptions::new(),
    };

    Ok(options
        .max_reconnects(None::<usize>)
        .connection_timeout(config.connect_timeout())
        .request_timeout(Some(config.request_timeout()))
        .event_callback(|event| async move { log_event(event) }))
}

fn log_event(event: Event) {
    match event {
        Event::Connected => info!("Archive connection to NATS established"),
        Event::Disconnected => {
            warn!("Archive connection to NATS lost, reconnecting")
        },
        event => info!("Archive connection to NATS: {event}"),
    }
}

#[async_trait]
impl Connector for NatsConnector {
    async fn connect(
        &self,
        config: &ArchiveConfig,
    ) -> Result<Box<dyn Connection>, Error> {
        let client = connect_options(config)
            .await?
            .connect(config.url.as_str())
            .await
            .map_err(unavailable)?;

        Ok(Box::new(NatsConnection {
            jetstream: jetstream::new(client.clone()),
            client,
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

impl NatsConnection {
    fn open_bucket(&self, store: object_store::ObjectStore) -> Box<dyn Bucket> {
        Box::new(NatsBucket {
            store,
            closed: Arc::clone(&self.closed),
        })
    }

    /// Whether the stream backing bucket `name` is definitely absent, as
    /// opposed to unreachable.
    async fn bucket_missing(&self, name: &str) -> bool {
        match self
            .jetstream
            .get_stream(format!("{OBJECT_STREAM_PREFIX}{name}"))
            .await
        {
            Ok(_) => false,
            Err(e) => match e.kind() {
                GetStreamErrorKind::JetStream(e) => {
                    ErrorCode::STREAM_NOT_FOUND == e.error_code()
                },
                _ => false,
            },
        }
    }
}

#[async_trait]
impl Connection for NatsConnection {
    async fn bucket(&self, name: &str) -> Result<Box<dyn Bucket>, Error> {
        match self.jetstream.get_object_store(name).await {
            Ok(store) => Ok(self.open_bucket(store)),
            Err(_) if self.bucket_missing(name).await => {
                Err(Error::BucketNotFound)
            },
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn create_bucket(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Box<dyn Bucket>, Error> {
        let store = self
            .jetstream
            .create_object_store(object_store::Config {
                bucket: name.to_owned(),
                description: Some(description.to_owned()),
                ..Default::default()
            })
            .await
            .map_err(unavailable)?;

        info!("Created NATS object store bucket {name}");
        Ok(self.open_bucket(store))
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && matches!(self.client.connection_state(), State::Connected)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Archive connection to NATS closed");
        }
    }
}

#[async_trait]
impl Bucket for NatsBucket {
    async fn put(
        &self,
        meta: &ObjectMeta,
        data: &[u8],
    ) -> Result<ObjectInfo, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ArchiveClosed);
        }

        let mut reader = data;
        let info = self
            .store
            .put(
                object_store::ObjectMetadata {
                    name: meta.name.clone(),
                    description: Some(meta.description.clone()),
                    ..Default::default()
                },
                &mut reader,
            )
            .await
            .map_err(unavailable)?;

        Ok(ObjectInfo {
            name: info.name,
            bucket: info.bucket,
            size: info.size as u64,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn credentials_file_takes_precedence() {
        let tmpdir = tempfile::TempDir::new().unwrap();
        let mut config = ArchiveConfig::new("nats://127.0.0.1:4222", "mail");
        config.credentials_file = tmpdir.path().join("missing.creds");
        config.token = "s3cret".to_owned();
        config.username = "archiver".to_owned();

        // The file is read before any network activity, so a missing file
        // fails the connection outright instead of falling back.
        assert!(matches!(
            NatsConnector.connect(&config).await,
            Err(Error::Io(..))
        ));
    }

    #[tokio::test]
    async fn token_and_password_need_no_files() {
        let mut config = ArchiveConfig::new("nats://127.0.0.1:4222", "mail");
        config.token = "s3cret".to_owned();
        connect_options(&config).await.unwrap();

        config.token.clear();
        config.username = "archiver".to_owned();
        config.password = "hunter2".to_owned();
        connect_options(&config).await.unwrap();

        connect_options(&ArchiveConfig::new("nats://127.0.0.1:4222", "mail"))
            .await
            .unwrap();
    }
}
