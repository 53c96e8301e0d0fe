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

use std::sync::Arc;

use futures::StreamExt;
use parity_scale_codec::Decode;
use subxt::{OnlineClient, PolkadotConfig};
use tokio::sync::mpsc;

use triggr_types::DecodedEvent;
use triggr_utils::metric::Metrics;
use triggr_utils::{probe, retry, Error};

use crate::{scale, ContractLookup};

/// The pallets that surface contract events.
const CONTRACT_PALLETS: [&str; 2] = ["Contracts", "Revive"];
/// The event variant carrying an emitted contract event.
const EMITTED_VARIANT: &str = "ContractEmitted";

/// Watches one chain endpoint for contract events.
///
/// The watcher subscribes to finalized blocks, filters `ContractEmitted`
/// events down to registered contract addresses, decodes their payloads
/// against the owning project's schema and pushes the result onto the
/// router's intake channel. A full channel blocks the watcher; that is
/// the backpressure story, never dropping.
///
/// On disconnect it reconnects with exponential backoff (1 s initial,
/// 30 s cap, full jitter).
#[derive(Debug, Clone)]
pub struct SubstrateChainWatcher {
    /// The chain name from the configuration, for logs.
    pub chain_name: String,
    /// The `ws://` / `wss://` RPC url.
    pub endpoint: String,
}

impl SubstrateChainWatcher {
    /// Creates a watcher for one configured chain.
    pub fn new(chain_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            chain_name: chain_name.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Returns a task that should be running in the background that will
    /// watch finalized blocks and feed the intake channel.
    #[tracing::instrument(skip_all, fields(chain = %self.chain_name))]
    pub async fn run(
        &self,
        lookup: Arc<dyn ContractLookup>,
        intake: mpsc::Sender<DecodedEvent>,
        metrics: Metrics,
    ) -> triggr_utils::Result<()> {
        let backoff = retry::chain_reconnect_backoff();
        let task = || async {
            let client =
                OnlineClient::<PolkadotConfig>::from_url(&self.endpoint)
                    .await
                    .map_err(|e| {
                        tracing::warn!(
                            endpoint = %self.endpoint,
                            "Failed to connect to chain node: {e}"
                        );
                        metrics.chain_watcher_back_off.inc();
                        backoff::Error::transient(Error::from(e))
                    })?;
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::Chain,
                chain = %self.chain_name,
                connected = true,
            );

            let mut blocks = client
                .blocks()
                .subscribe_finalized()
                .await
                .map_err(Into::into)
                .map_err(backoff::Error::transient)?;

            while let Some(block) = blocks.next().await {
                let block = block
                    .map_err(Into::into)
                    .map_err(backoff::Error::transient)?;
                let block_number: u64 = block.number().into();
                let events = block
                    .events()
                    .await
                    .map_err(Into::into)
                    .map_err(backoff::Error::transient)?;

                for details in events.iter() {
                    let details = match details {
                        Ok(details) => details,
                        Err(e) => {
                            tracing::warn!(
                                %block_number,
                                "Undecodable runtime event, skipping: {e}"
                            );
                            metrics.decode_failures.inc();
                            continue;
                        }
                    };
                    if !CONTRACT_PALLETS.contains(&details.pallet_name())
                        || details.variant_name() != EMITTED_VARIANT
                    {
                        continue;
                    }
                    let extrinsic_index = match details.phase() {
                        subxt::events::Phase::ApplyExtrinsic(i) => Some(i),
                        _ => None,
                    };
                    self.handle_emitted(
                        details.pallet_name(),
                        details.field_bytes(),
                        block_number,
                        extrinsic_index,
                        &lookup,
                        &intake,
                        &metrics,
                    )
                    .await
                    .map_err(backoff::Error::permanent)?;
                }
            }

            // the subscription ended; reconnect
            tracing::warn!(chain = %self.chain_name, "Block subscription ended");
            metrics.chain_watcher_back_off.inc();
            Err::<(), backoff::Error<Error>>(backoff::Error::transient(
                Error::ForceRestart,
            ))
        };
        backoff::future::retry(backoff, task).await?;
        Ok(())
    }

    /// Decodes one `ContractEmitted` event and forwards it when the
    /// emitting contract belongs to a registered project. Payload decode
    /// failures are logged with the raw bytes and skipped; only a closed
    /// intake channel is fatal.
    #[allow(clippy::too_many_arguments)]
    async fn handle_emitted(
        &self,
        pallet: &str,
        field_bytes: &[u8],
        block_number: u64,
        extrinsic_index: Option<u32>,
        lookup: &Arc<dyn ContractLookup>,
        intake: &mpsc::Sender<DecodedEvent>,
        metrics: &Metrics,
    ) -> triggr_utils::Result<()> {
        let (address, payload) = match split_emitted(pallet, field_bytes) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(
                    chain = %self.chain_name,
                    %block_number,
                    raw = %hex::encode(field_bytes),
                    "Undecodable ContractEmitted fields, skipping: {e}"
                );
                metrics.decode_failures.inc();
                return Ok(());
            }
        };

        let Some((project_id, schema)) =
            lookup.project_for_contract(&address).await
        else {
            return Ok(());
        };

        match scale::decode_contract_event(&schema, &payload) {
            Ok((name, fields)) => {
                let decoded = DecodedEvent {
                    project_id,
                    name,
                    fields,
                    block_number,
                    extrinsic_index,
                };
                tracing::debug!(
                    chain = %self.chain_name,
                    contract = %address,
                    event = %decoded.name,
                    %block_number,
                    "Decoded contract event"
                );
                // a full queue blocks here: ingest throughput is capped
                // to downstream execution throughput
                intake
                    .send(decoded)
                    .await
                    .map_err(|_| Error::TaskStoppedAbnormally)?;
                metrics.decoded_events.inc();
                let depth =
                    intake.max_capacity().saturating_sub(intake.capacity());
                metrics.intake_queue_depth.set(depth as f64);
            }
            Err(e) => {
                tracing::warn!(
                    chain = %self.chain_name,
                    project = %project_id,
                    contract = %address,
                    %block_number,
                    raw = %hex::encode(&payload),
                    cause = %e,
                    "Failed to decode contract event payload, skipping"
                );
                metrics.decode_failures.inc();
            }
        }
        Ok(())
    }
}

/// Splits a `ContractEmitted` event's SCALE fields into the emitting
/// address (hex) and the raw event payload.
///
/// `Contracts` emits a 32-byte account id; `Revive` a 20-byte address.
/// Trailing fields (topics) are ignored.
fn split_emitted(
    pallet: &str,
    mut bytes: &[u8],
) -> triggr_utils::Result<(String, Vec<u8>)> {
    let codec = |e: parity_scale_codec::Error| Error::Chain(e.to_string());
    let address = match pallet {
        "Revive" => {
            let addr = <[u8; 20]>::decode(&mut bytes).map_err(codec)?;
            format!("0x{}", hex::encode(addr))
        }
        _ => {
            let addr = <[u8; 32]>::decode(&mut bytes).map_err(codec)?;
            format!("0x{}", hex::encode(addr))
        }
    };
    let payload = Vec::<u8>::decode(&mut bytes).map_err(codec)?;
    Ok((address, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_scale_codec::Encode;

    #[test]
    fn splits_contracts_pallet_events() {
        let mut bytes = Vec::new();
        [7u8; 32].encode_to(&mut bytes);
        vec![0u8, 1, 2].encode_to(&mut bytes);
        // a trailing topics vec must not confuse the split
        Vec::<[u8; 32]>::new().encode_to(&mut bytes);

        let (address, payload) = split_emitted("Contracts", &bytes).unwrap();
        assert_eq!(address, format!("0x{}", "07".repeat(32)));
        assert_eq!(payload, vec![0, 1, 2]);
    }

    #[test]
    fn splits_revive_pallet_events() {
        let mut bytes = Vec::new();
        [9u8; 20].encode_to(&mut bytes);
        vec![5u8].encode_to(&mut bytes);

        let (address, payload) = split_emitted("Revive", &bytes).unwrap();
        assert_eq!(address, format!("0x{}", "09".repeat(20)));
        assert_eq!(payload, vec![5]);
    }

    #[test]
    fn truncated_emitted_fields_error() {
        assert!(split_emitted("Contracts", &[1, 2, 3]).is_err());
    }
}
