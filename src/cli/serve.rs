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

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::signal::unix::{signal, SignalKind};

use crate::store::lifecycle::{AccountStore, DirectoryAccountRemover};
use crate::store::object_store::{self, Connector, DirectoryConnector};
use crate::store::worker;
use crate::support::system_config::SystemConfig;

// Need to use a this and not die! so that errors go to syslog/etc
macro_rules! fatal {
    ($ex:ident, $($stuff:tt)*) => {{
        error!($($stuff)*);
        crate::support::sysexits::$ex.exit()
    }}
}

pub fn serve(system_config: SystemConfig, root: PathBuf) {
    let data_dir = system_config.data_dir(&root);
    let mut archive_config = system_config.archive;

    let connector = match archive_config
        .as_ref()
        .map(|config| object_store::connector_for_url(&config.url))
    {
        None => Arc::new(DirectoryConnector) as Arc<dyn Connector>,
        Some(Ok(connector)) => connector,
        Some(Err(e)) => {
            error!("Cannot use archive URL, archival disabled: {}", e);
            archive_config = None;
            Arc::new(DirectoryConnector)
        },
    };

    let remover =
        Arc::new(DirectoryAccountRemover::new(data_dir.join("accounts")));
    let store = AccountStore::new(data_dir, archive_config, connector, remover);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => fatal!(EX_OSERR, "Failed to start async runtime: {}", e),
    };

    runtime.block_on(run(store));
}

async fn run(mut store: AccountStore) {
    let (trigger, shutdown) = worker::shutdown_channel();

    if let Err(e) = store.init(shutdown).await {
        fatal!(EX_SOFTWARE, "Failed to start account store: {}", e);
    }

    wait_for_termination().await;
    info!("Shutting down");

    trigger.trigger();
    if let Err(e) = store.close().await {
        fatal!(EX_SOFTWARE, "Failed to close account store: {}", e);
    }
}

async fn wait_for_termination() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                fatal!(EX_OSERR, "Unable to listen for SIGINT: {}", e);
            }
            return;
        },
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        r = tokio::signal::ctrl_c() => match r {
            Ok(()) => info!("Received SIGINT"),
            Err(e) => warn!("Unable to listen for SIGINT: {}", e),
        },
    }
}
