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

use std::sync::OnceLock;

use prometheus::core::{AtomicF64, GenericCounter, GenericGauge};
use prometheus::{register_counter, register_gauge, Encoder, TextEncoder};

/// A struct definition for collecting metrics in the node.
#[derive(Debug, Clone)]
pub struct Metrics {
    /// Depth of the ingester → router intake queue.
    pub intake_queue_depth: GenericGauge<AtomicF64>,
    /// Total contract events decoded from finalized blocks.
    pub decoded_events: GenericCounter<AtomicF64>,
    /// Total events whose payload failed to decode and were skipped.
    pub decode_failures: GenericCounter<AtomicF64>,
    /// Chain watcher back off metric.
    pub chain_watcher_back_off: GenericCounter<AtomicF64>,
    /// Total trigger invocations.
    pub triggers_executed: GenericCounter<AtomicF64>,
    /// Trigger invocations that aborted on an error or the time budget.
    pub trigger_failures: GenericCounter<AtomicF64>,
    /// Currently connected WebSocket sessions.
    pub active_ws_connections: GenericGauge<AtomicF64>,
    /// Messages dropped from subscriber queues on overflow.
    pub subscriber_overflow_drops: GenericCounter<AtomicF64>,
    /// Total amount of data stored metric.
    pub total_amount_of_data_stored: GenericGauge<AtomicF64>,
}

impl Metrics {
    /// Instantiates the various metrics and their counters, also registers
    /// the counters against the default registry.
    fn new() -> crate::Result<Self> {
        let intake_queue_depth = register_gauge!(
            "intake_queue_depth",
            "The number of decoded events waiting for the trigger router"
        )?;

        let decoded_events = register_counter!(
            "decoded_events",
            "The total number of contract events decoded"
        )?;

        let decode_failures = register_counter!(
            "decode_failures",
            "The total number of contract events that failed to decode"
        )?;

        let chain_watcher_back_off = register_counter!(
            "chain_watcher_back_off",
            "specifies how many times the chain watcher backed off"
        )?;

        let triggers_executed = register_counter!(
            "triggers_executed",
            "The total number of trigger invocations"
        )?;

        let trigger_failures = register_counter!(
            "trigger_failures",
            "The total number of aborted trigger invocations"
        )?;

        let active_ws_connections = register_gauge!(
            "active_ws_connections",
            "The number of connected WebSocket sessions"
        )?;

        let subscriber_overflow_drops = register_counter!(
            "subscriber_overflow_drops",
            "The total number of messages dropped from subscriber queues"
        )?;

        let total_amount_of_data_stored = register_gauge!(
            "total_amount_of_data_stored",
            "The total amount of data stored on disk in bytes"
        )?;

        Ok(Self {
            intake_queue_depth,
            decoded_events,
            decode_failures,
            chain_watcher_back_off,
            triggers_executed,
            trigger_failures,
            active_ws_connections,
            subscriber_overflow_drops,
            total_amount_of_data_stored,
        })
    }

    /// Returns the process-wide metrics handle, registering the collectors
    /// on first use. The default registry rejects duplicate registration,
    /// so construction happens exactly once.
    pub fn shared() -> crate::Result<Self> {
        static SHARED: OnceLock<Metrics> = OnceLock::new();
        static INIT: std::sync::Mutex<()> = std::sync::Mutex::new(());
        if let Some(m) = SHARED.get() {
            return Ok(m.clone());
        }
        let _guard = INIT.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(m) = SHARED.get() {
            return Ok(m.clone());
        }
        let metrics = Self::new()?;
        Ok(SHARED.get_or_init(|| metrics).clone())
    }

    /// Gathers the default registry into the text exposition format.
    pub fn gather() -> crate::Result<String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_metrics_register_once() {
        let a = Metrics::shared().unwrap();
        let b = Metrics::shared().unwrap();
        a.decoded_events.inc();
        b.decoded_events.inc();
        assert_eq!(a.decoded_events.get(), b.decoded_events.get());

        let text = Metrics::gather().unwrap();
        assert!(text.contains("decoded_events"));
        assert!(text.contains("intake_queue_depth"));
    }
}
