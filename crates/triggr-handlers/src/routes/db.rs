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

//! HTTP route handlers for internal document-store operations. All of
//! them are scoped to the project resolved from the caller's API key.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use triggr_utils::Error;

use crate::auth::ApiProject;
use crate::envelope::{ok, HandlerResult};
use crate::Gateway;

/// Body of a document insert: optional explicit id plus the payload.
#[derive(Debug, Deserialize)]
pub struct InsertDocBody {
    /// Explicit document id; a v4 UUID is generated when absent.
    pub id: Option<String>,
    /// The document payload.
    pub data: Value,
}

/// Body of a put/patch: the payload only.
#[derive(Debug, Deserialize)]
pub struct DocBody {
    /// The document payload.
    pub data: Value,
}

/// Body of a collection create.
#[derive(Debug, Deserialize)]
pub struct CreateCollectionBody {
    /// Collection name, `[a-z0-9_]+`.
    pub name: String,
}

/// List all collections for the authenticated project.
pub async fn list_collections(
    State(gateway): State<Gateway>,
    ApiProject(project): ApiProject,
) -> HandlerResult {
    let cols = gateway.ctx.docs.list_collections(&project.id)?;
    Ok(ok(StatusCode::OK, cols))
}

/// Create a collection. Idempotent.
pub async fn create_collection(
    State(gateway): State<Gateway>,
    ApiProject(project): ApiProject,
    axum::Json(body): axum::Json<CreateCollectionBody>,
) -> HandlerResult {
    let meta = gateway
        .ctx
        .docs
        .create_collection(&project.id, &body.name)
        .await?;
    Ok(ok(StatusCode::CREATED, meta))
}

/// Insert a new document.
pub async fn insert_document(
    State(gateway): State<Gateway>,
    ApiProject(project): ApiProject,
    Path(name): Path<String>,
    axum::Json(body): axum::Json<InsertDocBody>,
) -> HandlerResult {
    let doc = gateway
        .ctx
        .docs
        .insert_doc(&project.id, &name, body.id, body.data)
        .await?;
    Ok(ok(StatusCode::CREATED, doc))
}

/// List all documents in a collection.
pub async fn list_documents(
    State(gateway): State<Gateway>,
    ApiProject(project): ApiProject,
    Path(name): Path<String>,
) -> HandlerResult {
    let docs = gateway.ctx.docs.list_docs(&project.id, &name)?;
    Ok(ok(StatusCode::OK, docs))
}

/// Get a document by id.
pub async fn get_document(
    State(gateway): State<Gateway>,
    ApiProject(project): ApiProject,
    Path((name, id)): Path<(String, String)>,
) -> HandlerResult {
    let doc = gateway
        .ctx
        .docs
        .get_doc(&project.id, &name, &id)?
        .ok_or_else(|| Error::NotFound(format!("document {id}")))?;
    Ok(ok(StatusCode::OK, doc))
}

/// Upsert a document.
pub async fn put_document(
    State(gateway): State<Gateway>,
    ApiProject(project): ApiProject,
    Path((name, id)): Path<(String, String)>,
    axum::Json(body): axum::Json<DocBody>,
) -> HandlerResult {
    let (doc, _) = gateway
        .ctx
        .docs
        .put_doc(&project.id, &name, &id, body.data)
        .await?;
    Ok(ok(StatusCode::OK, doc))
}

/// Shallow-merge fields into a document.
pub async fn patch_document(
    State(gateway): State<Gateway>,
    ApiProject(project): ApiProject,
    Path((name, id)): Path<(String, String)>,
    axum::Json(body): axum::Json<DocBody>,
) -> HandlerResult {
    let doc = gateway
        .ctx
        .docs
        .patch_doc(&project.id, &name, &id, body.data)
        .await?;
    Ok(ok(StatusCode::OK, doc))
}

/// Delete a document.
pub async fn delete_document(
    State(gateway): State<Gateway>,
    ApiProject(project): ApiProject,
    Path((name, id)): Path<(String, String)>,
) -> HandlerResult {
    gateway.ctx.docs.delete_doc(&project.id, &name, &id).await?;
    Ok(ok(StatusCode::OK, serde_json::json!({ "deleted": id })))
}
