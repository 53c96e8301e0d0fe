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

//! Console project handlers: create/list/get/delete, with the contract
//! descriptor parsed once at upload time.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::json;

use triggr_chain::parse_descriptor;
use triggr_store::NewProject;
use triggr_types::{EventSchema, Project};
use triggr_utils::Error;

use crate::auth::ConsoleUser;
use crate::envelope::{ok, ok_with_message, HandlerResult};
use crate::Gateway;

/// The project shape returned to console clients. The API-key digest
/// stays internal.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectView {
    /// Internal project id.
    pub id: String,
    /// Human-readable name.
    pub project_name: String,
    /// Free-form description.
    pub description: String,
    /// On-chain contract address.
    pub contract_address: String,
    /// Code hash from the descriptor.
    pub contract_hash: String,
    /// Contract name from the descriptor.
    pub contract_name: String,
    /// Owner id.
    pub owner_id: String,
    /// Creation time (ms).
    pub created_at: u64,
    /// Events the contract declares.
    pub event_schema: EventSchema,
}

impl From<Project> for ProjectView {
    fn from(p: Project) -> Self {
        Self {
            id: p.id,
            project_name: p.project_name,
            description: p.description,
            contract_address: p.contract_address,
            contract_hash: p.contract_hash,
            contract_name: p.contract_name,
            owner_id: p.owner_id,
            created_at: p.created_at,
            event_schema: p.event_schema,
        }
    }
}

/// Create a new project from the multipart console upload.
///
/// Fields: `project_name`, `contract_addr`, `description` and the
/// `contracts_json` descriptor file. Returns the project plus the newly
/// minted API key, shown exactly once.
pub async fn create_project(
    State(gateway): State<Gateway>,
    user: ConsoleUser,
    mut multipart: Multipart,
) -> HandlerResult {
    let mut project_name: Option<String> = None;
    let mut contract_addr: Option<String> = None;
    let mut description = String::new();
    let mut descriptor_json: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(format!("bad multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        let text = field
            .text()
            .await
            .map_err(|e| Error::validation(format!("bad field {name}: {e}")))?;
        match name.as_str() {
            "project_name" => project_name = Some(text),
            "contract_addr" => contract_addr = Some(text),
            "description" => description = text,
            "contracts_json" => descriptor_json = Some(text),
            _ => {}
        }
    }

    let project_name = project_name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::validation("missing field project_name"))?;
    let contract_addr = contract_addr
        .filter(|addr| !addr.is_empty())
        .ok_or_else(|| Error::validation("missing field contract_addr"))?;
    let descriptor_json = descriptor_json
        .ok_or_else(|| Error::validation("missing file contracts_json"))?;

    let descriptor = parse_descriptor(&descriptor_json)?;
    let (project, secret) = gateway.ctx.projects.create(NewProject {
        project_name,
        description,
        contract_address: contract_addr,
        contract_hash: descriptor.contract_hash,
        contract_name: descriptor.contract_name,
        owner_id: user.owner_id,
        event_schema: descriptor.schema,
    })?;
    gateway.ctx.cache_project(project.clone());

    tracing::info!(
        project = %project.id,
        contract = %project.contract_address,
        "Project created"
    );
    Ok(ok_with_message(
        StatusCode::CREATED,
        json!({
            "project": ProjectView::from(project),
            "secret": secret,
        }),
        "Store the secret now; it is not shown again",
    ))
}

/// List the authenticated user's projects.
pub async fn list_projects(
    State(gateway): State<Gateway>,
    user: ConsoleUser,
) -> HandlerResult {
    let projects: Vec<ProjectView> = gateway
        .ctx
        .projects
        .list_by_owner(&user.owner_id)?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(ok(StatusCode::OK, projects))
}

/// Get one project by its API key handle.
pub async fn get_project(
    State(gateway): State<Gateway>,
    user: ConsoleUser,
    Path(api_key): Path<String>,
) -> HandlerResult {
    let project = resolve_owned(&gateway, &user, &api_key)?;
    Ok(ok(StatusCode::OK, ProjectView::from(project)))
}

/// Delete a project, cascading to its triggers, documents, trigger index
/// entries and live subscriptions.
pub async fn delete_project(
    State(gateway): State<Gateway>,
    user: ConsoleUser,
    Path(api_key): Path<String>,
) -> HandlerResult {
    let project = resolve_owned(&gateway, &user, &api_key)?;
    gateway.ctx.projects.delete(&project.id, &user.owner_id)?;
    gateway.ctx.evict_project(&project.id);
    gateway.index.remove_project(&project.id);
    gateway.ctx.bus.drop_project(&project.id);

    tracing::info!(project = %project.id, "Project deleted");
    Ok(ok(StatusCode::OK, json!({ "deleted": project.id })))
}

fn resolve_owned(
    gateway: &Gateway,
    user: &ConsoleUser,
    api_key: &str,
) -> Result<Project, Error> {
    let project = gateway
        .ctx
        .project_by_api_key(api_key)
        .ok_or_else(|| Error::NotFound("project".into()))?;
    if project.owner_id != user.owner_id {
        return Err(Error::Forbidden);
    }
    Ok(project)
}
