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
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use triggr_utils::Error;

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Wraps a payload in the success envelope
/// `{data, status, message?, timestamp}`.
pub fn ok<T: Serialize>(status: StatusCode, data: T) -> Response {
    respond(status, data, None)
}

/// Success envelope with a human-readable message.
pub fn ok_with_message<T: Serialize>(
    status: StatusCode,
    data: T,
    message: &str,
) -> Response {
    respond(status, data, Some(message))
}

fn respond<T: Serialize>(
    status: StatusCode,
    data: T,
    message: Option<&str>,
) -> Response {
    let mut body = json!({
        "data": data,
        "status": status.as_u16(),
        "timestamp": timestamp(),
    });
    if let Some(message) = message {
        body["message"] = Value::String(message.to_string());
    }
    (status, Json(body)).into_response()
}

/// Error type for HTTP handlers: a status code plus the error envelope
/// `{code, message, details?, timestamp}`.
#[derive(Debug)]
pub struct HandlerError {
    /// HTTP status code for response.
    pub status: StatusCode,
    /// Stable machine-readable code.
    pub code: &'static str,
    /// Response message.
    pub message: String,
    /// Optional structured detail, e.g. `{line}` for DSL errors.
    pub details: Option<Value>,
}

impl HandlerError {
    /// Attaches structured details to the error body.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<Error> for HandlerError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::Chain(_) | Error::ChainNotFound { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
            details: None,
        }
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "code": self.code,
            "message": self.message,
            "timestamp": timestamp(),
        });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        (self.status, Json(body)).into_response()
    }
}

/// Shorthand result for handlers.
pub type HandlerResult = std::result::Result<Response, HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping_covers_the_catalogue() {
        let cases = [
            (Error::validation("x"), StatusCode::BAD_REQUEST),
            (Error::Unauthorized, StatusCode::UNAUTHORIZED),
            (Error::Forbidden, StatusCode::FORBIDDEN),
            (Error::NotFound("d".into()), StatusCode::NOT_FOUND),
            (Error::Conflict("d".into()), StatusCode::CONFLICT),
            (Error::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (Error::Chain("rpc".into()), StatusCode::BAD_GATEWAY),
            (Error::Storage("tag".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            let handler_err: HandlerError = err.into();
            assert_eq!(handler_err.status, status);
        }
    }
}
