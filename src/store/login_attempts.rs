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

//! Recording login attempts and expiring old ones.
//!
//! Attempts are submitted through a `LoginAttemptLogger`, which never blocks
//! the authenticating task. A writer worker collects submissions into batches
//! and writes each batch in one transaction. A separate cleaner worker
//! periodically deletes attempts past the retention horizon.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use chrono::prelude::*;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::authdb::{self, SharedConnection};
use super::types::{LoginAttempt, UnixTimestamp};
use super::worker::{ShutdownSignal, WorkerHandle};

/// How long login attempts are kept.
pub const RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);
/// The default interval between cleanup passes.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

const QUEUE_SIZE: usize = 1024;
const MAX_BATCH: usize = 100;

/// Non-blocking submission handle for login attempts.
#[derive(Clone)]
pub struct LoginAttemptLogger {
    tx: mpsc::Sender<LoginAttempt>,
}

impl LoginAttemptLogger {
    /// Queue `attempt` for writing.
    ///
    /// If the writer has fallen too far behind, the attempt is dropped with a
    /// warning rather than delaying the caller.
    pub fn record(&self, attempt: LoginAttempt) {
        match self.tx.try_send(attempt) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(attempt)) => warn!(
                "Login attempt queue full, dropped attempt for {}",
                attempt.account_name,
            ),
            Err(mpsc::error::TrySendError::Closed(attempt)) => debug!(
                "Login attempt writer stopped, dropped attempt for {}",
                attempt.account_name,
            ),
        }
    }
}

/// Start the writer worker.
///
/// On a stop request or process shutdown, everything already queued is
/// written before the worker exits.
pub fn start_writer(
    db: SharedConnection,
    shutdown: ShutdownSignal,
) -> (LoginAttemptLogger, WorkerHandle) {
    let (tx, mut rx) = mpsc::channel::<LoginAttempt>(QUEUE_SIZE);

    let worker = WorkerHandle::spawn("login-attempt-writer", move |mut stop| {
        let mut shutdown = shutdown;
        async move {
            let mut batch = Vec::with_capacity(MAX_BATCH);
            loop {
                tokio::select! {
                    request = stop.requested() => {
                        flush_remaining(&db, &mut rx, &mut batch);
                        request.acknowledge();
                        return;
                    },

                    _ = shutdown.wait() => {
                        flush_remaining(&db, &mut rx, &mut batch);
                        return;
                    },

                    Some(attempt) = rx.recv() => {
                        batch.push(attempt);
                        while batch.len() < MAX_BATCH {
                            match rx.try_recv() {
                                Ok(attempt) => batch.push(attempt),
                                Err(_) => break,
                            }
                        }
                        write_batch(&db, &mut batch);
                    },
                }
            }
        }
    });

    (LoginAttemptLogger { tx }, worker)
}

fn flush_remaining(
    db: &SharedConnection,
    rx: &mut mpsc::Receiver<LoginAttempt>,
    batch: &mut Vec<LoginAttempt>,
) {
    rx.close();
    while let Ok(attempt) = rx.try_recv() {
        batch.push(attempt);
    }
    write_batch(db, batch);
}

fn write_batch(db: &SharedConnection, batch: &mut Vec<LoginAttempt>) {
    if batch.is_empty() {
        return;
    }

    if let Err(e) = authdb::lock(db).insert_login_attempts(batch) {
        error!("Failed to write {} login attempts: {e}", batch.len());
    }
    batch.clear();
}

/// Start the cleaner worker.
///
/// The first pass runs immediately; later passes run every `interval`.
pub fn start_cleaner(
    db: SharedConnection,
    interval: Duration,
    shutdown: ShutdownSignal,
) -> WorkerHandle {
    start_periodic("login-attempt-cleaner", interval, shutdown, move || {
        delete_expired(&db)
    })
}

fn delete_expired(db: &SharedConnection) {
    let cutoff = match chrono::Duration::from_std(RETENTION) {
        Ok(retention) => UnixTimestamp(Utc::now() - retention),
        Err(_) => return,
    };

    match authdb::lock(db).delete_login_attempts_before(cutoff) {
        Ok(0) => {},
        Ok(n) => info!("Deleted {n} expired login attempts"),
        Err(e) => error!("Failed to delete expired login attempts: {e}"),
    }
}

/// Run `tick` every `interval` until stopped.
///
/// A panic inside `tick` does not end the worker; it is logged and counted,
/// and the next tick runs as usual.
fn start_periodic<F>(
    name: &'static str,
    interval: Duration,
    shutdown: ShutdownSignal,
    mut tick: F,
) -> WorkerHandle
where
    F: FnMut() + Send + 'static,
{
    WorkerHandle::spawn(name, move |mut stop| {
        let mut shutdown = shutdown;
        async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    request = stop.requested() => {
                        request.acknowledge();
                        return;
                    },
                    _ = shutdown.wait() => return,
                    _ = timer.tick() => {
                        if let Err(payload) =
                            panic::catch_unwind(AssertUnwindSafe(&mut tick))
                        {
                            report_panic(name, &*payload);
                        }
                    },
                }
            }
        }
    })
}

fn report_panic(name: &str, payload: &(dyn Any + Send)) {
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("(non-string panic payload)");
    error!(
        "{name} panicked: {message}\n{}",
        Backtrace::force_capture(),
    );
    metrics::counter!("mailstore_panics_total", "pkg" => "store").increment(1);
}
