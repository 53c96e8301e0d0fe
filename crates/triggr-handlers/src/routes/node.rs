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

use axum::http::StatusCode;
use axum::response::IntoResponse;

use triggr_utils::metric::Metrics;

use crate::envelope::{HandlerError, HandlerResult};

/// Liveness probe.
pub async fn health() -> &'static str {
    "OK"
}

/// Handles node metrics requests in the prometheus text exposition
/// format.
pub async fn metrics() -> HandlerResult {
    let text = Metrics::gather().map_err(HandlerError::from)?;
    Ok((StatusCode::OK, text).into_response())
}
