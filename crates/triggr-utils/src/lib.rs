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
//! # Triggr Utils 🕸️
//!
//! The shared error type of the node, retry policies, probe log targets
//! and prometheus metrics.

/// Metrics functionality.
pub mod metric;
/// A module used for debugging node lifecycle, ingestion and routing state.
pub mod probe;
/// Retry functionality.
pub mod retry;

/// An enum of all possible errors that could be encountered during the
/// execution of the Triggr node.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error in the underlying Http/Ws server.
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Basic error for the substrate runtime.
    #[error(transparent)]
    Subxt(#[from] subxt::error::Error),
    /// Prometheus registry error.
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),

    /// A request carried a bad descriptor, bad DSL or a malformed body.
    #[error("Validation error: {reason}")]
    Validation {
        /// What failed to validate.
        reason: String,
    },
    /// Missing or unrecognized credentials.
    #[error("Unauthorized")]
    Unauthorized,
    /// Recognized credentials that do not own the addressed resource.
    #[error("Forbidden")]
    Forbidden,
    /// A missing project, collection, document or trigger.
    #[error("Not found: {0}")]
    NotFound(String),
    /// A uniqueness violation, e.g. inserting over an existing document id.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A per-key budget was exhausted.
    #[error("Rate limited")]
    RateLimited,
    /// A storage record could not be interpreted.
    #[error("Storage error: {0}")]
    Storage(String),
    /// Upstream chain RPC failure, reported in diagnostics only.
    #[error("Chain error: {0}")]
    Chain(String),
    /// Chain endpoint not found in the configuration.
    #[error("Chain Not Found: {}", chain_name)]
    ChainNotFound {
        /// The name of the chain.
        chain_name: String,
    },
    /// A background task failed and stopped abnormally.
    #[error("Task Stopped Abnormally")]
    TaskStoppedAbnormally,
    /// A background task failed and force restarted.
    #[error("Task Force Restarted from an error")]
    ForceRestart,
}

impl Error {
    /// The stable machine-readable code for this error, used by the HTTP
    /// error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "ValidationError",
            Error::Unauthorized => "Unauthorized",
            Error::Forbidden => "Forbidden",
            Error::NotFound(_) => "NotFound",
            Error::Conflict(_) => "Conflict",
            Error::RateLimited => "RateLimited",
            Error::Chain(_) | Error::ChainNotFound { .. } => "ChainError",
            _ => "StorageError",
        }
    }

    /// Shorthand for a [`Error::Validation`] with a formatted reason.
    pub fn validation(reason: impl Into<String>) -> Self {
        Error::Validation {
            reason: reason.into(),
        }
    }
}

/// A type alias for the result for the triggr node, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_kinds() {
        assert_eq!(Error::validation("x").code(), "ValidationError");
        assert_eq!(Error::Unauthorized.code(), "Unauthorized");
        assert_eq!(Error::NotFound("doc".into()).code(), "NotFound");
        assert_eq!(Error::Conflict("id".into()).code(), "Conflict");
        assert_eq!(Error::Chain("rpc".into()).code(), "ChainError");
        assert_eq!(Error::Storage("bad tag".into()).code(), "StorageError");
    }
}
