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

//! Background workers and how they are stopped.
//!
//! Each long-running worker is a Tokio task with a stop channel. To stop a
//! worker, its owner sends a fresh one-shot acknowledgement channel; the
//! worker notices the request at its next suspension point, finishes whatever
//! cleanup it needs, acknowledges, and exits. The owner does not proceed
//! until both the acknowledgement has arrived and the task has ended, so
//! resources the worker used (e.g. the database) can be closed safely
//! afterwards.
//!
//! Independently of that, every worker also watches the process-wide
//! `ShutdownSignal` and exits promptly once it fires.

use std::future::Future;

use log::{debug, error};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// A pending request for a worker to stop.
pub struct StopRequest(Option<oneshot::Sender<()>>);

impl StopRequest {
    /// Tell the owner that the worker has finished its cleanup.
    pub fn acknowledge(self) {
        if let Some(ack) = self.0 {
            let _ = ack.send(());
        }
    }
}

/// The worker side of the stop channel.
pub struct StopReceiver(mpsc::Receiver<StopRequest>);

impl StopReceiver {
    /// Wait for a stop request.
    ///
    /// If the owning `WorkerHandle` has been dropped, this returns a request
    /// nobody is waiting on, so the worker still exits.
    pub async fn requested(&mut self) -> StopRequest {
        self.0.recv().await.unwrap_or(StopRequest(None))
    }
}

/// The owner side of a running worker.
pub struct WorkerHandle {
    name: &'static str,
    stop: mpsc::Sender<StopRequest>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn `body` as a worker task, handing it the receiving end of its
    /// stop channel.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(StopReceiver) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(body(StopReceiver(stop_rx)));
        debug!("Started {name} worker");
        Self { name, stop, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the worker and wait until it has fully exited.
    ///
    /// A worker that already exited because of process shutdown counts as
    /// stopped.
    pub async fn stop(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.stop.send(StopRequest(Some(ack_tx))).await.is_ok() {
            // An error here means the worker exited without acknowledging,
            // which is just as good.
            let _ = ack_rx.await;
        }

        if let Err(e) = self.task.await {
            error!("{} worker ended abnormally: {e}", self.name);
        }
        debug!("Stopped {} worker", self.name);
    }
}

/// Triggers the process-wide shutdown signal.
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Observes the process-wide shutdown signal.
#[derive(Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), ShutdownSignal(rx))
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        shutdown_channel().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait until shutdown is triggered.
    ///
    /// If the trigger is dropped without firing, this never completes.
    pub async fn wait(&mut self) {
        if self.0.wait_for(|&triggered| triggered).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn stop_waits_for_cleanup() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicUsize::new(0));

        let worker = {
            let cleaned = Arc::clone(&cleaned);
            let ticks = Arc::clone(&ticks);
            WorkerHandle::spawn("test", move |mut stop| async move {
                loop {
                    tokio::select! {
                        request = stop.requested() => {
                            // Slow cleanup must still finish before stop()
                            // returns.
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            cleaned.store(true, Ordering::SeqCst);
                            request.acknowledge();
                            return;
                        },
                        _ = tokio::time::sleep(Duration::from_millis(5)) => {
                            ticks.fetch_add(1, Ordering::SeqCst);
                        },
                    }
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        worker.stop().await;
        assert!(cleaned.load(Ordering::SeqCst));

        let ticks_at_stop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks_at_stop, ticks.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_after_shutdown_exit() {
        let (trigger, signal) = shutdown_channel();
        let worker = WorkerHandle::spawn("test", move |mut stop| {
            let mut signal = signal;
            async move {
                tokio::select! {
                    request = stop.requested() => request.acknowledge(),
                    _ = signal.wait() => {},
                }
            }
        });

        trigger.trigger();
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(5), worker.stop())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_signal_states() {
        let (trigger, mut signal) = shutdown_channel();
        assert!(!signal.is_triggered());

        let never = ShutdownSignal::never();
        assert!(!never.is_triggered());
        let mut never_wait = never.clone();
        assert!(tokio::time::timeout(
            Duration::from_millis(20),
            never_wait.wait()
        )
        .await
        .is_err());

        trigger.trigger();
        assert!(signal.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .unwrap();
    }
}
