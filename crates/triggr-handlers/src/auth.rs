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

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use triggr_types::Project;
use triggr_utils::Error;

use crate::envelope::HandlerError;
use crate::Gateway;

/// The API key header runtime/SDK requests authenticate with.
pub const API_KEY_HEADER: &str = "x-api-key";

/// The project an authenticated runtime request acts on.
///
/// Resolved from the `x-api-key` header (or, for browser WebSocket
/// clients that cannot set headers, the `api_key` query parameter)
/// through the registry cache.
#[derive(Clone)]
pub struct ApiProject(pub Project);

#[async_trait]
impl FromRequestParts<Gateway> for ApiProject {
    type Rejection = HandlerError;

    async fn from_request_parts(
        parts: &mut Parts,
        gateway: &Gateway,
    ) -> Result<Self, Self::Rejection> {
        let header_key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let query_key = parts.uri.query().and_then(|query| {
            query.split('&').find_map(|pair| {
                pair.strip_prefix("api_key=").map(str::to_string)
            })
        });

        let api_key = header_key
            .or(query_key)
            .ok_or_else(|| HandlerError::from(Error::Unauthorized))?;
        gateway
            .ctx
            .project_by_api_key(&api_key)
            .map(ApiProject)
            .ok_or_else(|| HandlerError::from(Error::Unauthorized))
    }
}

/// The console user behind a bearer token.
///
/// Tokens are opaque; an external identity provider vouches for them in
/// a full deployment. The node resolves them against the configured
/// token table.
#[derive(Debug, Clone)]
pub struct ConsoleUser {
    /// The owner id the token acts as.
    pub owner_id: String,
}

#[async_trait]
impl FromRequestParts<Gateway> for ConsoleUser {
    type Rejection = HandlerError;

    async fn from_request_parts(
        parts: &mut Parts,
        gateway: &Gateway,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| HandlerError::from(Error::Unauthorized))?;
        gateway
            .ctx
            .config
            .console
            .tokens
            .get(token)
            .map(|owner_id| ConsoleUser {
                owner_id: owner_id.clone(),
            })
            .ok_or_else(|| HandlerError::from(Error::Unauthorized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use std::sync::Arc;
    use triggr_config::TriggrConfig;
    use triggr_context::TriggrContext;
    use triggr_router::TriggerIndex;
    use triggr_store::{NewProject, SledStore};
    use triggr_types::EventSchema;

    fn gateway() -> Gateway {
        let mut config = TriggrConfig::default();
        config
            .console
            .tokens
            .insert("sekrit".into(), "alice".into());
        Gateway {
            ctx: TriggrContext::new(config, SledStore::temporary().unwrap())
                .unwrap(),
            index: Arc::new(TriggerIndex::new()),
        }
    }

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn api_key_header_and_query_param_both_authenticate() {
        let gateway = gateway();
        let (project, secret) = gateway
            .ctx
            .projects
            .create(NewProject {
                project_name: "p".into(),
                description: String::new(),
                contract_address: "0xab".into(),
                contract_hash: "0x1".into(),
                contract_name: "p".into(),
                owner_id: "alice".into(),
                event_schema: EventSchema::default(),
            })
            .unwrap();
        gateway.ctx.cache_project(project.clone());

        let mut with_header = parts(
            Request::builder()
                .uri("/api/db/collections")
                .header(API_KEY_HEADER, &secret),
        );
        let got = ApiProject::from_request_parts(&mut with_header, &gateway)
            .await
            .unwrap();
        assert_eq!(got.0.id, project.id);

        let mut with_query = parts(
            Request::builder().uri(format!("/ws?api_key={secret}")),
        );
        assert!(ApiProject::from_request_parts(&mut with_query, &gateway)
            .await
            .is_ok());

        let mut wrong = parts(
            Request::builder()
                .uri("/api/db/collections")
                .header(API_KEY_HEADER, "nope"),
        );
        assert!(ApiProject::from_request_parts(&mut wrong, &gateway)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn bearer_tokens_resolve_against_the_table() {
        let gateway = gateway();
        let mut good = parts(
            Request::builder()
                .uri("/api/console/projects")
                .header("authorization", "Bearer sekrit"),
        );
        let user = ConsoleUser::from_request_parts(&mut good, &gateway)
            .await
            .unwrap();
        assert_eq!(user.owner_id, "alice");

        let mut bad = parts(
            Request::builder()
                .uri("/api/console/projects")
                .header("authorization", "Bearer wrong"),
        );
        assert!(ConsoleUser::from_request_parts(&mut bad, &gateway)
            .await
            .is_err());

        let mut missing = parts(Request::builder().uri("/api/console/projects"));
        assert!(ConsoleUser::from_request_parts(&mut missing, &gateway)
            .await
            .is_err());
    }
}
