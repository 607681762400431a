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

//! The worker that drains the spool into the archive.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::archive::ArchiveHandle;
use super::spool::Spool;
use super::worker::{ShutdownSignal, WorkerHandle};
use crate::support::threading::blocking;

/// Bound on archiving any single spooled message.
pub const ITEM_TIMEOUT: Duration = Duration::from_secs(30);

/// What happened during one pass over the spool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    pub delivered: usize,
    pub failed: usize,
    /// True if the pass was abandoned because the archive was unavailable.
    pub skipped: bool,
}

pub struct RetryLoop {
    spool: Arc<Spool>,
    archive: ArchiveHandle,
    interval: Duration,
    item_timeout: Duration,
}

impl RetryLoop {
    pub fn new(
        spool: Arc<Spool>,
        archive: ArchiveHandle,
        interval: Duration,
    ) -> Self {
        Self {
            spool,
            archive,
            interval,
            item_timeout: ITEM_TIMEOUT,
        }
    }

    /// Make one attempt at every entry currently in the spool.
    ///
    /// Nothing is consumed unless the archive is live, and liveness is
    /// checked again before every entry so that an outage in the middle of a
    /// pass stops it. Entries are attempted in listing order; an entry is
    /// removed only once the archive has accepted it.
    pub async fn run_pass(&self) -> PassStats {
        let mut stats = PassStats::default();

        if !self.archive.is_connected() {
            stats.skipped = true;
            return stats;
        }

        let scanned = {
            let spool = Arc::clone(&self.spool);
            blocking(move || Ok(spool.scan_pending()?.collect::<Vec<_>>()))
                .await
        };
        let entries = match scanned {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Failed to scan archive spool {}: {e}",
                    self.spool.root().display(),
                );
                stats.skipped = true;
                return stats;
            },
        };

        for entry in entries {
            if !self.archive.is_connected() {
                debug!("Archive went away; abandoning retry pass at {entry}");
                stats.skipped = true;
                break;
            }

            let read = {
                let spool = Arc::clone(&self.spool);
                let entry = entry.clone();
                blocking(move || spool.read(&entry)).await
            };
            let data = match read {
                Ok(data) => data,
                Err(e) => {
                    debug!("Skipping unreadable spool entry {entry}: {e}");
                    continue;
                },
            };

            match self
                .archive
                .put(entry.message_id(), &data, self.item_timeout)
                .await
            {
                Ok(Some(_)) => {
                    let removed = {
                        let spool = Arc::clone(&self.spool);
                        let entry = entry.clone();
                        blocking(move || spool.remove(&entry)).await
                    };
                    if let Err(e) = removed {
                        warn!("Archived {entry} but failed to remove it: {e}");
                    }
                    stats.delivered += 1;
                },
                Ok(None) => {
                    stats.skipped = true;
                    break;
                },
                Err(e) => {
                    debug!("Retry of {entry} failed: {e}");
                    stats.failed += 1;
                },
            }
        }

        if stats.delivered > 0 || stats.failed > 0 {
            info!(
                "Archive retry pass: {} delivered, {} failed",
                stats.delivered, stats.failed,
            );
        }

        stats
    }

    /// Run passes every `interval` until stopped or until process shutdown.
    pub fn start(self, shutdown: ShutdownSignal) -> WorkerHandle {
        WorkerHandle::spawn("archive-retry", move |mut stop| {
            let mut shutdown = shutdown;
            async move {
                {
                    let spool = Arc::clone(&self.spool);
                    let _ = blocking(move || {
                        spool.clean_tmp();
                        Ok(())
                    })
                    .await;
                }

                loop {
                    tokio::select! {
                        request = stop.requested() => {
                            request.acknowledge();
                            return;
                        },
                        _ = shutdown.wait() => return,
                        _ = self.run_pass() => {},
                    }

                    tokio::select! {
                        request = stop.requested() => {
                            request.acknowledge();
                            return;
                        },
                        _ = shutdown.wait() => return,
                        _ = tokio::time::sleep(self.interval) => {},
                    }
                }
            }
        })
    }
}
