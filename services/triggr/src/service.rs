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

//! # Triggr Service Module 🕸️
//!
//! A module for starting the long-running tasks of the node.
//!
//! ## Overview
//!
//! Services are tasks the node constantly runs throughout its lifetime:
//! the chain watchers, the trigger router, the change pump feeding the
//! pub/sub bus, and the HTTP/WebSocket server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use tokio::sync::mpsc;
use tokio::time;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use triggr_chain::SubstrateChainWatcher;
use triggr_context::TriggrContext;
use triggr_handlers::Gateway;
use triggr_router::{TriggerIndex, TriggerRouter};

/// Sets up the HTTP/WebSocket server: routing, CORS, request tracing and
/// the per-request deadline. Binding happens here so the caller can map
/// a taken port to its exit code before anything else starts.
pub fn build_web_services(
    ctx: TriggrContext,
    index: Arc<TriggerIndex>,
) -> triggr_utils::Result<(
    SocketAddr,
    impl Future<Output = triggr_utils::Result<()>>,
)> {
    let socket_addr = SocketAddr::new([0, 0, 0, 0].into(), ctx.config.port);
    let deadline = Duration::from_secs(ctx.config.runtime.request_deadline_secs);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any);

    let app = triggr_handlers::router(Gateway {
        ctx: ctx.clone(),
        index,
    })
    .layer(cors)
    .layer(TraceLayer::new_for_http())
    .layer(TimeoutLayer::new(deadline));

    let server = axum::Server::try_bind(&socket_addr)?
        .serve(app.into_make_service());
    let addr = server.local_addr();
    let mut shutdown = ctx.shutdown_signal();
    let server = server.with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
    });
    Ok((addr, async move { server.await.map_err(Into::into) }))
}

/// Starts all background services. This does not block; the services are
/// fired on background tasks that race the shutdown broadcast.
pub async fn ignite(
    ctx: &TriggrContext,
    index: Arc<TriggerIndex>,
) -> triggr_utils::Result<()> {
    // the trigger index is rebuilt before anything can fire
    triggr_router::rebuild_all(ctx, &index)?;

    // ingester → router intake channel; bounded so a slow router
    // backpressures the watchers
    let (intake_tx, intake_rx) =
        mpsc::channel(ctx.config.runtime.intake_queue_capacity);

    let router = TriggerRouter::new(ctx.clone(), index);
    let mut shutdown = ctx.shutdown_signal();
    tokio::task::spawn(async move {
        tokio::select! {
            _ = router.run(intake_rx) => {},
            _ = shutdown.recv() => {},
        }
    });

    start_change_pump(ctx);
    start_store_size_gauge(ctx);

    for (chain_name, chain_config) in &ctx.config.chains {
        if !chain_config.enabled {
            tracing::warn!("Chain watcher is disabled for {chain_name}");
            continue;
        }
        let watcher = SubstrateChainWatcher::new(
            chain_name.clone(),
            chain_config.ws_endpoint.clone(),
        );
        tracing::debug!(
            "event watcher for {} ({}) Started.",
            chain_name,
            chain_config.ws_endpoint,
        );
        let lookup: Arc<dyn triggr_chain::ContractLookup> =
            Arc::new(ctx.clone());
        let intake = intake_tx.clone();
        let metrics = ctx.metrics.clone();
        let mut shutdown = ctx.shutdown_signal();
        let task = async move {
            tokio::select! {
                result = watcher.run(lookup, intake, metrics) => {
                    if let Err(e) = result {
                        tracing::error!("Chain watcher stopped: {e}");
                    }
                },
                _ = shutdown.recv() => {},
            }
        };
        // kick off the watcher.
        tokio::task::spawn(task);
    }
    Ok(())
}

/// Pumps committed change records from the document store into the
/// pub/sub bus.
fn start_change_pump(ctx: &TriggrContext) {
    let mut changes = ctx.docs.subscribe_changes();
    let bus = ctx.bus.clone();
    let mut shutdown = ctx.shutdown_signal();
    tokio::task::spawn(async move {
        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(change) => bus.publish(&change),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Change pump lagged, skipped {n} records");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.recv() => break,
            }
        }
    });
}

/// Samples the on-disk store size into its gauge every hour.
fn start_store_size_gauge(ctx: &TriggrContext) {
    let ctx = ctx.clone();
    let mut shutdown = ctx.shutdown_signal();
    tokio::task::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(3600));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    ctx.metrics
                        .total_amount_of_data_stored
                        .set(ctx.store_size() as f64);
                },
                _ = shutdown.recv() => break,
            }
        }
    });
}
