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

//! # Triggr Configuration Module 🕸️
//!
//! A module for configuring the node.
//!
//! ## Overview
//!
//! Configuration is merged from every `*.toml` / `*.json` file under the
//! config directory plus the environment (prefix `TRIGGR`). Possible
//! configuration includes:
//! * `port`: The port the node will listen on. Defaults to 5190.
//! * `chains`: Substrate chain endpoints to ingest contract events from.
//! * `console`: bearer tokens accepted on console endpoints.
//! * `runtime`: queue capacities, deadlines and WebSocket policy.

/// CLI configuration
pub mod cli;
/// Utils for processing configuration
pub mod utils;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The default port the node will listen on.
const fn default_port() -> u16 {
    5190
}
/// Chain ingestion is enabled by default.
const fn enable_chain_default() -> bool {
    true
}
/// The intake channel holds at most 256 decoded events by default.
const fn intake_queue_capacity_default() -> usize {
    256
}
/// Subscriber queues hold at most 256 frames by default.
const fn subscriber_queue_capacity_default() -> usize {
    256
}
/// HTTP requests get a 30 s deadline by default.
const fn request_deadline_secs_default() -> u64 {
    30
}
/// Trigger evaluation gets a 2 s wall-clock budget by default.
const fn trigger_eval_budget_millis_default() -> u64 {
    2_000
}
/// WebSocket writes time out after 5 s by default.
const fn ws_write_timeout_secs_default() -> u64 {
    5
}
/// WebSocket pings go out every 30 s by default.
const fn ws_ping_interval_secs_default() -> u64 {
    30
}
/// A connection missing pongs for 60 s is closed by default.
const fn ws_pong_grace_secs_default() -> u64 {
    60
}

/// TriggrConfig is the configuration for the triggr node.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct TriggrConfig {
    /// HTTP/WebSocket Server Port number
    ///
    /// default to 5190
    #[serde(default = "default_port")]
    pub port: u16,
    /// Substrate based networks and their configuration.
    ///
    /// a map between chain name and its configuration.
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
    /// Console authentication.
    #[serde(default)]
    pub console: ConsoleConfig,
    /// Queue capacities, deadlines and WebSocket policy.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// One Substrate chain endpoint to ingest contract events from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    /// WebSocket RPC url, `ws://` or `wss://`.
    pub ws_endpoint: String,
    /// Whether this node should ingest from this chain.
    #[serde(default = "enable_chain_default")]
    pub enabled: bool,
}

/// Console authentication configuration.
///
/// Bearer tokens are opaque and validated by an external identity
/// provider in a full deployment; the node resolves them against this
/// table (token → owner id).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ConsoleConfig {
    /// Accepted bearer tokens, mapped to the owner id they act as.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

/// Queue capacities, deadlines and WebSocket policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Capacity of the ingester → router intake channel. The ingester
    /// blocks on a full queue.
    #[serde(default = "intake_queue_capacity_default")]
    pub intake_queue_capacity: usize,
    /// Capacity of each subscriber's outbound queue. Overflow drops the
    /// oldest frame and marks the subscriber degraded.
    #[serde(default = "subscriber_queue_capacity_default")]
    pub subscriber_queue_capacity: usize,
    /// Per-request deadline in seconds.
    #[serde(default = "request_deadline_secs_default")]
    pub request_deadline_secs: u64,
    /// Per-invocation trigger evaluation budget in milliseconds.
    #[serde(default = "trigger_eval_budget_millis_default")]
    pub trigger_eval_budget_millis: u64,
    /// WebSocket write timeout in seconds.
    #[serde(default = "ws_write_timeout_secs_default")]
    pub ws_write_timeout_secs: u64,
    /// WebSocket ping interval in seconds.
    #[serde(default = "ws_ping_interval_secs_default")]
    pub ws_ping_interval_secs: u64,
    /// Seconds without a pong before the connection is closed.
    #[serde(default = "ws_pong_grace_secs_default")]
    pub ws_pong_grace_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            intake_queue_capacity: intake_queue_capacity_default(),
            subscriber_queue_capacity: subscriber_queue_capacity_default(),
            request_deadline_secs: request_deadline_secs_default(),
            trigger_eval_budget_millis: trigger_eval_budget_millis_default(),
            ws_write_timeout_secs: ws_write_timeout_secs_default(),
            ws_ping_interval_secs: ws_ping_interval_secs_default(),
            ws_pong_grace_secs: ws_pong_grace_secs_default(),
        }
    }
}

impl TriggrConfig {
    /// Makes sure that the config is valid, by going
    /// through the whole config and doing some basic checks.
    pub fn verify(&self) -> triggr_utils::Result<()> {
        for (name, chain) in &self.chains {
            let ok = chain.ws_endpoint.starts_with("ws://")
                || chain.ws_endpoint.starts_with("wss://");
            if !ok {
                return Err(triggr_utils::Error::validation(format!(
                    "chain {name}: ws-endpoint must be a ws:// or wss:// url"
                )));
            }
        }
        if self.runtime.intake_queue_capacity == 0 {
            return Err(triggr_utils::Error::validation(
                "runtime.intake-queue-capacity must be non-zero",
            ));
        }
        if self.runtime.subscriber_queue_capacity == 0 {
            return Err(triggr_utils::Error::validation(
                "runtime.subscriber-queue-capacity must be non-zero",
            ));
        }
        if self.chains.values().all(|c| !c.enabled) {
            tracing::warn!(
                "No enabled chains configured; the node will serve the API only"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config: TriggrConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 5190);
        assert_eq!(config.runtime.intake_queue_capacity, 256);
        assert_eq!(config.runtime.subscriber_queue_capacity, 256);
        assert_eq!(config.runtime.request_deadline_secs, 30);
        assert_eq!(config.runtime.trigger_eval_budget_millis, 2_000);
        assert_eq!(config.runtime.ws_write_timeout_secs, 5);
        config.verify().unwrap();
    }

    #[test]
    fn rejects_non_ws_endpoints() {
        let config: TriggrConfig = serde_json::from_str(
            r#"{"chains": {"paseo": {"ws-endpoint": "http://example.com"}}}"#,
        )
        .unwrap();
        assert!(config.verify().is_err());
    }

    #[test]
    fn chain_enabled_by_default() {
        let config: TriggrConfig = serde_json::from_str(
            r#"{"chains": {"paseo": {"ws-endpoint": "wss://rpc.example.com"}}}"#,
        )
        .unwrap();
        assert!(config.chains["paseo"].enabled);
        config.verify().unwrap();
    }
}
