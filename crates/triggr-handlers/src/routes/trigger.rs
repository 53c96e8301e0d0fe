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

//! Trigger CRUD handlers. Every mutation rebuilds the owning project's
//! slice of the in-memory trigger index.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;

use triggr_types::{now_millis, Project, SlimTrigger, Trigger};
use triggr_utils::Error;

use crate::auth::ApiProject;
use crate::envelope::{ok, HandlerError, HandlerResult};
use crate::Gateway;

/// Body of a trigger create request.
#[derive(Debug, Deserialize)]
pub struct SaveTriggerBody {
    /// Trigger id, unique within the project.
    pub id: String,
    /// The contract the trigger belongs to.
    pub contract_addr: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// The DSL source.
    pub trigger: String,
}

/// Body of a trigger state flip.
#[derive(Debug, Deserialize)]
pub struct TriggerStateBody {
    /// The new active flag.
    pub active: bool,
}

/// The authenticated project must own the contract named in the path.
fn check_contract(project: &Project, contract: &str) -> Result<(), Error> {
    if project.contract_address.eq_ignore_ascii_case(contract) {
        Ok(())
    } else {
        Err(Error::NotFound(format!("contract {contract}")))
    }
}

/// Create a trigger. The source is compiled against the project's
/// contract schema before anything is stored; compile errors come back
/// as a validation error with the offending line.
pub async fn save_trigger(
    State(gateway): State<Gateway>,
    ApiProject(project): ApiProject,
    axum::Json(body): axum::Json<SaveTriggerBody>,
) -> HandlerResult {
    check_contract(&project, &body.contract_addr)?;
    if body.id.is_empty() {
        return Err(Error::validation("trigger id must not be empty").into());
    }

    let (stripped, tree) =
        triggr_dsl::compile(&body.trigger, &project.event_schema).map_err(
            |e| {
                HandlerError::from(Error::validation(e.to_string()))
                    .with_details(json!({ "line": e.line }))
            },
        )?;

    let trigger = gateway.ctx.triggers.create(Trigger {
        id: body.id,
        project_id: project.id.clone(),
        description: body.description,
        source: stripped,
        active: true,
        created_at: now_millis(),
        last_run_at: 0,
    })?;
    triggr_router::rebuild_project(&gateway.ctx, &gateway.index, &project.id)?;

    tracing::info!(
        project = %project.id,
        trigger_id = %trigger.id,
        event = %tree.bound_event,
        "Trigger deployed"
    );
    Ok(ok(StatusCode::CREATED, SlimTrigger::from(trigger)))
}

/// List a contract's triggers.
pub async fn list_triggers(
    State(gateway): State<Gateway>,
    ApiProject(project): ApiProject,
    Path(contract): Path<String>,
) -> HandlerResult {
    check_contract(&project, &contract)?;
    let triggers: Vec<SlimTrigger> = gateway
        .ctx
        .triggers
        .list(&project.id)?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(ok(StatusCode::OK, triggers))
}

/// Get one trigger.
pub async fn get_trigger(
    State(gateway): State<Gateway>,
    ApiProject(project): ApiProject,
    Path((contract, id)): Path<(String, String)>,
) -> HandlerResult {
    check_contract(&project, &contract)?;
    let trigger = gateway.ctx.triggers.get(&project.id, &id)?;
    Ok(ok(StatusCode::OK, SlimTrigger::from(trigger)))
}

/// Flip a trigger's active flag.
pub async fn update_trigger_state(
    State(gateway): State<Gateway>,
    ApiProject(project): ApiProject,
    Path((contract, id)): Path<(String, String)>,
    axum::Json(body): axum::Json<TriggerStateBody>,
) -> HandlerResult {
    check_contract(&project, &contract)?;
    let trigger = gateway
        .ctx
        .triggers
        .set_state(&project.id, &id, body.active)?;
    triggr_router::rebuild_project(&gateway.ctx, &gateway.index, &project.id)?;
    Ok(ok(StatusCode::OK, SlimTrigger::from(trigger)))
}

/// Delete a trigger.
pub async fn delete_trigger(
    State(gateway): State<Gateway>,
    ApiProject(project): ApiProject,
    Path((contract, id)): Path<(String, String)>,
) -> HandlerResult {
    check_contract(&project, &contract)?;
    gateway.ctx.triggers.delete(&project.id, &id)?;
    triggr_router::rebuild_project(&gateway.ctx, &gateway.index, &project.id)?;
    Ok(ok(StatusCode::OK, json!({ "deleted": id })))
}
