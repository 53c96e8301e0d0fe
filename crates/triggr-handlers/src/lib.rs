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

#![warn(missing_docs)]
//! # Triggr Handlers 🕸️
//!
//! Node handlers for HTTP/Socket calls: the document-store API, the
//! console project API, the trigger API and the pub/sub WebSocket.

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;

use triggr_context::TriggrContext;
use triggr_router::TriggerIndex;

/// Auth extractors (API key and console bearer token).
pub mod auth;
/// The JSON response envelope and error mapping.
pub mod envelope;
/// Route handlers.
pub mod routes;
/// The pub/sub WebSocket session.
pub mod ws;

/// Shared state behind every route.
#[derive(Clone)]
pub struct Gateway {
    /// The node context.
    pub ctx: TriggrContext,
    /// The trigger index, rebuilt on trigger CRUD.
    pub index: Arc<TriggerIndex>,
}

/// Builds the node's full route table over the gateway state.
pub fn router(gateway: Gateway) -> Router {
    Router::new()
        // document store
        .route(
            "/api/db/collections",
            get(routes::db::list_collections).post(routes::db::create_collection),
        )
        .route(
            "/api/db/collections/:name/docs",
            get(routes::db::list_documents).post(routes::db::insert_document),
        )
        .route(
            "/api/db/collections/:name/docs/:id",
            get(routes::db::get_document)
                .put(routes::db::put_document)
                .patch(routes::db::patch_document)
                .delete(routes::db::delete_document),
        )
        // console
        .route(
            "/api/console/project",
            post(routes::console::create_project),
        )
        .route("/api/console/projects", get(routes::console::list_projects))
        .route(
            "/api/console/project/:api_key",
            get(routes::console::get_project)
                .delete(routes::console::delete_project),
        )
        // triggers
        .route("/api/trigger", post(routes::trigger::save_trigger))
        .route(
            "/api/trigger/:contract",
            get(routes::trigger::list_triggers),
        )
        .route(
            "/api/trigger/:contract/:id",
            get(routes::trigger::get_trigger)
                .delete(routes::trigger::delete_trigger),
        )
        .route(
            "/api/trigger/:contract/:id/state",
            put(routes::trigger::update_trigger_state),
        )
        // node plumbing
        .route("/health", get(routes::node::health))
        .route("/metrics", get(routes::node::metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(gateway)
}
