// Copyright 2024 Algorealm Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Triggr Node Binary.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use tokio::signal::unix;

use triggr::service;
use triggr_config::cli::{create_store, load_config, setup_logger, Opts};
use triggr_context::TriggrContext;
use triggr_router::TriggerIndex;

/// Exit code for a configuration error at startup.
const EXIT_CONFIG: i32 = 1;
/// Exit code for a fatal storage error.
const EXIT_STORAGE: i32 = 2;
/// Exit code for an unrecoverable binding failure.
const EXIT_BIND: i32 = 3;

/// The main entry point for the node.
///
/// # Arguments
///
/// * `args` - The command line arguments.
#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose, "triggr")?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::trace!("Failed to load .env file: {e}");
        }
    }

    // The configuration is validated and loaded from the given directory
    let config = match load_config(args.config_dir.clone()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {e}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    // persistent storage for the node
    let store = match create_store(&args).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open the store: {e}");
            std::process::exit(EXIT_STORAGE);
        }
    };

    // The TriggrContext takes the configuration and the store, and
    // populates everything needed throughout the lifetime of the node:
    // registries, metrics, the pub/sub bus and the shutdown broadcast.
    let ctx = match TriggrContext::new(config, store) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!("Failed to initialize node state: {e}");
            std::process::exit(EXIT_STORAGE);
        }
    };
    let index = Arc::new(TriggerIndex::new());

    // routing (endpoint queries / requests mapped to handler code) so
    // clients can interact with the node
    let (addr, server) =
        match service::build_web_services(ctx.clone(), index.clone()) {
            Ok(bound) => bound,
            Err(e) => {
                tracing::error!("Failed to bind the listening socket: {e}");
                std::process::exit(EXIT_BIND);
            }
        };
    tracing::info!("Starting the server on {}", addr);
    // start the server.
    let server_handle = tokio::spawn(server);
    // start all background services.
    // this does not block, will fire the services on background tasks.
    if let Err(e) = service::ignite(&ctx, index).await {
        tracing::error!("Failed to start background services: {e}");
        std::process::exit(EXIT_STORAGE);
    }
    tracing::event!(
        target: triggr_utils::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %triggr_utils::probe::Kind::Lifecycle,
        started = true
    );

    // watch for signals
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let mut quit_signal = unix::signal(unix::SignalKind::quit())?;
    tokio::select! {
        _ = ctrlc_signal.recv() => {
            tracing::warn!("Interrupted (Ctrl+C) ...");
        },
        _ = termination_signal.recv() => {
            tracing::warn!("Got Terminate signal ...");
        },
        _ = quit_signal.recv() => {
            tracing::warn!("Quitting ...");
        },
    }
    tracing::event!(
        target: triggr_utils::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %triggr_utils::probe::Kind::Lifecycle,
        shutdown = true
    );
    tracing::warn!("Shutting down...");
    // send shutdown signal to all of the application: background tasks
    // stop, and the server drains in-flight requests before returning.
    ctx.shutdown();
    if let Err(e) = server_handle.await {
        tracing::error!("Server task failed during drain: {e}");
    }
    tracing::info!("Clean Exit ..");
    Ok(())
}
