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

//! Interface to the remote object store messages are archived into.
//!
//! The archive client only needs three things from a store: a connection
//! that reports its liveness, bucket lookup and creation on that connection,
//! and putting a named object into a bucket. Reconnecting after transient
//! network loss is the connection's own business.
//!
//! `nats://` URLs are served by a NATS JetStream object store (see `nats`).
//! `DirectoryConnector` serves `file://` URLs by mirroring buckets as
//! directories, which is suitable for archiving onto a mounted volume.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use super::nats::NatsConnector;
use crate::support::{
    error::Error,
    file_ops::{self, IgnoreKinds},
    safe_name,
    system_config::{ArchiveConfig, Credentials},
    threading::blocking,
};

/// Metadata attached to a stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    pub name: String,
    pub description: String,
}

/// What the store reports back about a stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub bucket: String,
    pub size: u64,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection described by `config`.
    ///
    /// This makes exactly one attempt. The caller bounds it with the
    /// configured connect timeout.
    async fn connect(
        &self,
        config: &ArchiveConfig,
    ) -> Result<Box<dyn Connection>, Error>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Look up an existing bucket.
    ///
    /// Fails with `Error::BucketNotFound` if there is no such bucket.
    async fn bucket(&self, name: &str) -> Result<Box<dyn Bucket>, Error>;

    async fn create_bucket(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Box<dyn Bucket>, Error>;

    fn is_connected(&self) -> bool;

    fn close(&self);
}

#[async_trait]
pub trait Bucket: Send + Sync {
    async fn put(
        &self,
        meta: &ObjectMeta,
        data: &[u8],
    ) -> Result<ObjectInfo, Error>;
}

/// Return the connector responsible for `url`.
pub fn connector_for_url(url: &str) -> Result<Arc<dyn Connector>, Error> {
    let parsed = url::Url::parse(url)?;
    match parsed.scheme() {
        "file" => Ok(Arc::new(DirectoryConnector)),
        "nats" => Ok(Arc::new(NatsConnector)),
        scheme => Err(Error::UnsupportedArchiveScheme(scheme.to_owned())),
    }
}

/// Serves `file://` URLs, storing each bucket as a directory under the URL's
/// path.
pub struct DirectoryConnector;

struct DirectoryConnection {
    root: PathBuf,
    closed: Arc<AtomicBool>,
}

struct DirectoryBucket {
    name: String,
    path: PathBuf,
    closed: Arc<AtomicBool>,
}

const BUCKET_DESCRIPTION_FILE: &str = ".description";
const BUCKET_TMP_DIR: &str = ".tmp";
const BUCKET_META_DIR: &str = ".meta";

fn check_name(name: &str) -> Result<(), Error> {
    if safe_name::is_safe_name(name) {
        Ok(())
    } else {
        Err(Error::UnsafeName)
    }
}

#[async_trait]
impl Connector for DirectoryConnector {
    async fn connect(
        &self,
        config: &ArchiveConfig,
    ) -> Result<Box<dyn Connection>, Error> {
        let url = url::Url::parse(&config.url)?;
        if "file" != url.scheme() {
            return Err(Error::UnsupportedArchiveScheme(
                url.scheme().to_owned(),
            ));
        }

        let root = url.to_file_path().map_err(|()| {
            Error::ObjectStoreUnavailable(format!(
                "{} does not name a local path",
                config.url,
            ))
        })?;

        if Credentials::None != config.credentials() {
            debug!("Credentials are not used by file:// archives; ignoring");
        }

        let root = {
            let root = root.clone();
            blocking(move || {
                if root.is_dir() {
                    Ok(root)
                } else {
                    Err(Error::ObjectStoreUnavailable(format!(
                        "{} is not a directory",
                        root.display(),
                    )))
                }
            })
            .await?
        };

        Ok(Box::new(DirectoryConnection {
            root,
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

impl DirectoryConnection {
    fn open_bucket(&self, name: &str, path: PathBuf) -> Box<dyn Bucket> {
        Box::new(DirectoryBucket {
            name: name.to_owned(),
            path,
            closed: Arc::clone(&self.closed),
        })
    }
}

#[async_trait]
impl Connection for DirectoryConnection {
    async fn bucket(&self, name: &str) -> Result<Box<dyn Bucket>, Error> {
        check_name(name)?;
        let path = self.root.join(name);
        let exists = {
            let path = path.clone();
            blocking(move || Ok(path.is_dir())).await?
        };

        if exists {
            Ok(self.open_bucket(name, path))
        } else {
            Err(Error::BucketNotFound)
        }
    }

    async fn create_bucket(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Box<dyn Bucket>, Error> {
        check_name(name)?;
        let path = self.root.join(name);
        {
            let path = path.clone();
            let description = description.to_owned();
            blocking(move || {
                fs::create_dir(&path).ignore_already_exists()?;
                file_ops::ensure_dir(path.join(BUCKET_TMP_DIR), 0o750)?;
                file_ops::ensure_dir(path.join(BUCKET_META_DIR), 0o750)?;
                file_ops::spit(
                    path.join(BUCKET_TMP_DIR),
                    path.join(BUCKET_DESCRIPTION_FILE),
                    true,
                    0o640,
                    description.as_bytes(),
                )?;
                Ok(())
            })
            .await?;
        }

        info!("Created archive bucket {}", path.display());
        Ok(self.open_bucket(name, path))
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.root.is_dir()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn write_object(
    bucket: &Path,
    meta: &ObjectMeta,
    data: &[u8],
) -> io::Result<()> {
    let tmp = bucket.join(BUCKET_TMP_DIR);
    let meta_dir = bucket.join(BUCKET_META_DIR);
    file_ops::ensure_dir(&tmp, 0o750)?;
    file_ops::ensure_dir(&meta_dir, 0o750)?;

    file_ops::spit(&tmp, bucket.join(&meta.name), true, 0o640, data)?;
    file_ops::spit(
        &tmp,
        meta_dir.join(&meta.name),
        true,
        0o640,
        meta.description.as_bytes(),
    )
}

#[async_trait]
impl Bucket for DirectoryBucket {
    async fn put(
        &self,
        meta: &ObjectMeta,
        data: &[u8],
    ) -> Result<ObjectInfo, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ArchiveClosed);
        }
        check_name(&meta.name)?;

        let path = self.path.clone();
        let owned_meta = meta.clone();
        let owned_data = data.to_vec();
        blocking(move || {
            write_object(&path, &owned_meta, &owned_data).map_err(Into::into)
        })
        .await?;

        Ok(ObjectInfo {
            name: meta.name.clone(),
            bucket: self.name.clone(),
            size: data.len() as u64,
        })
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn file_config(root: &Path) -> ArchiveConfig {
        ArchiveConfig::new(
            url::Url::from_directory_path(root).unwrap().to_string(),
            "mail",
        )
    }

    #[tokio::test]
    async fn directory_bucket_lifecycle() {
        let root = tempfile::TempDir::new().unwrap();
        let config = file_config(root.path());

        let cxn = DirectoryConnector.connect(&config).await.unwrap();
        assert!(cxn.is_connected());
        assert!(matches!(cxn.bucket("mail").await, Err(Error::BucketNotFound)));

        let bucket = cxn.create_bucket("mail", "Mail archive").await.unwrap();
        let info = bucket
            .put(
                &ObjectMeta {
                    name: "msg-1-100".to_owned(),
                    description: "Email message ID 1".to_owned(),
                },
                b"hello",
            )
            .await
            .unwrap();
        assert_eq!(
            ObjectInfo {
                name: "msg-1-100".to_owned(),
                bucket: "mail".to_owned(),
                size: 5,
            },
            info
        );
        assert_eq!(
            b"hello".to_vec(),
            fs::read(root.path().join("mail/msg-1-100")).unwrap()
        );
        assert_eq!(
            b"Email message ID 1".to_vec(),
            fs::read(root.path().join("mail/.meta/msg-1-100")).unwrap()
        );

        // The bucket can now be found, and creating it again is harmless.
        cxn.bucket("mail").await.unwrap();
        cxn.create_bucket("mail", "Mail archive").await.unwrap();

        cxn.close();
        assert!(!cxn.is_connected());
        assert!(matches!(
            bucket
                .put(
                    &ObjectMeta {
                        name: "msg-2-100".to_owned(),
                        description: String::new(),
                    },
                    b"x",
                )
                .await,
            Err(Error::ArchiveClosed)
        ));
    }

    #[tokio::test]
    async fn directory_connect_requires_directory() {
        let root = tempfile::TempDir::new().unwrap();
        let config = file_config(&root.path().join("nx"));
        assert!(matches!(
            DirectoryConnector.connect(&config).await,
            Err(Error::ObjectStoreUnavailable(..))
        ));
    }

    #[tokio::test]
    async fn directory_rejects_unsafe_names() {
        let root = tempfile::TempDir::new().unwrap();
        let cxn = DirectoryConnector
            .connect(&file_config(root.path()))
            .await
            .unwrap();
        assert!(matches!(
            cxn.create_bucket("../escape", "").await,
            Err(Error::UnsafeName)
        ));
        assert!(matches!(cxn.bucket(".tmp").await, Err(Error::UnsafeName)));
    }

    #[test]
    fn connector_selection() {
        assert!(connector_for_url("file:///var/archive").is_ok());
        assert!(connector_for_url("nats://localhost:4222").is_ok());
        assert!(matches!(
            connector_for_url("s3://archive"),
            Err(Error::UnsupportedArchiveScheme(ref s)) if "s3" == s
        ));
        assert!(matches!(
            connector_for_url("not a url"),
            Err(Error::Url(..))
        ));
    }
}
