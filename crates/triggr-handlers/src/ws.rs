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

//! The pub/sub WebSocket session.
//!
//! Clients authenticate with their API key (header, or `api_key` query
//! parameter from browsers), then send subscribe/unsubscribe commands as
//! `{"data": "subscribe:<topic>"}` frames. Committed changes matching a
//! subscription arrive as [`WsPayload`](triggr_types::WsPayload) frames.
//! A connection whose outbound queue overflowed gets a one-off
//! `{"op": "degraded"}` notice before the next delivered frame.

use std::time::{Duration, Instant};

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use triggr_pubsub::Subscriber;
use triggr_types::Project;
use triggr_utils::probe;

use crate::auth::ApiProject;
use crate::Gateway;

/// Schema of JSON command frames sent from the client.
#[derive(Debug, Deserialize)]
struct WsJson {
    data: String,
}

/// A parsed inbound command. Anything else is ignored.
#[derive(Debug, PartialEq, Eq)]
enum WsCommand {
    Subscribe(String),
    Unsubscribe(String),
}

fn parse_frame(text: &str) -> Option<WsCommand> {
    let frame: WsJson = serde_json::from_str(text).ok()?;
    if let Some(topic) = frame.data.strip_prefix("subscribe:") {
        return Some(WsCommand::Subscribe(topic.to_string()));
    }
    if let Some(topic) = frame.data.strip_prefix("unsubscribe:") {
        return Some(WsCommand::Unsubscribe(topic.to_string()));
    }
    None
}

/// Wait for websocket connection upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(gateway): State<Gateway>,
    ApiProject(project): ApiProject,
) -> Response {
    ws.on_upgrade(move |socket| session(socket, gateway, project))
}

/// Runs one subscriber session until the peer hangs up, the write path
/// stalls past its timeout, pongs stop arriving, or the node shuts down.
async fn session(socket: WebSocket, gateway: Gateway, project: Project) {
    let conn = gateway.ctx.next_connection_id();
    let runtime = gateway.ctx.config.runtime.clone();
    let subscriber = Subscriber::new(runtime.subscriber_queue_capacity);
    let write_timeout = Duration::from_secs(runtime.ws_write_timeout_secs);
    let pong_grace = Duration::from_secs(runtime.ws_pong_grace_secs);

    gateway.ctx.metrics.active_ws_connections.inc();
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::PubSub,
        conn,
        project = %project.id,
        connected = true,
    );

    let (mut sink, mut stream) = socket.split();
    let mut ping =
        tokio::time::interval(Duration::from_secs(runtime.ws_ping_interval_secs));
    let mut last_pong = Instant::now();
    let mut shutdown = gateway.ctx.shutdown_signal();

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_command(&gateway, &project, conn, &subscriber, &text);
                }
                Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                Some(Ok(Message::Close(_))) | None => break,
                // unknown inbound frames are ignored
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(conn, "Websocket error: {e}");
                    break;
                }
            },
            frame = subscriber.recv() => match frame {
                Some(frame) => {
                    // tell the client its queue overflowed since the last
                    // delivery; the SDK may choose to reconnect
                    if subscriber.is_degraded() {
                        let notice =
                            json!({ "op": "degraded" }).to_string();
                        let send = sink.send(Message::Text(notice));
                        match tokio::time::timeout(write_timeout, send).await {
                            Ok(Ok(())) => {}
                            Ok(Err(_)) => break,
                            Err(_) => {
                                tracing::warn!(conn, "Websocket write timed out");
                                break;
                            }
                        }
                    }
                    let send = sink.send(Message::Text(frame));
                    match tokio::time::timeout(write_timeout, send).await {
                        Ok(Ok(())) => subscriber.mark_delivered(),
                        Ok(Err(_)) => break,
                        Err(_) => {
                            tracing::warn!(conn, "Websocket write timed out");
                            break;
                        }
                    }
                }
                // the subscriber was closed underneath us (project deleted)
                None => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "project deleted".into(),
                        })))
                        .await;
                    break;
                }
            },
            _ = ping.tick() => {
                if last_pong.elapsed() > pong_grace {
                    tracing::warn!(conn, "No pong received, closing");
                    break;
                }
                let send = sink.send(Message::Ping(Vec::new()));
                if tokio::time::timeout(write_timeout, send).await.is_err() {
                    break;
                }
            }
            _ = shutdown.recv() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::RESTART,
                        reason: "node shutting down".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    gateway.ctx.bus.drop_connection(conn);
    gateway.ctx.metrics.active_ws_connections.dec();
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::PubSub,
        conn,
        project = %project.id,
        connected = false,
    );
}

/// Applies one inbound command frame to the routing table.
///
/// Acks are queued before the bus registration, so a subscriber always
/// sees its `subscribe` ack before the first change payload on that
/// topic.
fn handle_command(
    gateway: &Gateway,
    project: &Project,
    conn: u64,
    subscriber: &Subscriber,
    text: &str,
) {
    match parse_frame(text) {
        Some(WsCommand::Subscribe(topic)) => {
            subscriber.push(
                json!({ "op": "subscribe", "topic": topic }).to_string(),
            );
            gateway
                .ctx
                .bus
                .subscribe(&project.id, &topic, conn, subscriber.clone());
        }
        Some(WsCommand::Unsubscribe(topic)) => {
            gateway.ctx.bus.unsubscribe(&project.id, &topic, conn);
            subscriber.push(
                json!({ "op": "unsubscribe", "topic": topic }).to_string(),
            );
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use triggr_config::TriggrConfig;
    use triggr_context::TriggrContext;
    use triggr_router::TriggerIndex;
    use triggr_store::{NewProject, SledStore};
    use triggr_types::{
        ChangeOp, ChangeRecord, DocMetadata, Document, EventSchema, WsPayload,
    };

    #[test]
    fn parses_command_frames() {
        assert_eq!(
            parse_frame(r#"{"data": "subscribe:collection:users:change"}"#),
            Some(WsCommand::Subscribe("collection:users:change".into()))
        );
        assert_eq!(
            parse_frame(r#"{"data": "unsubscribe:document:users:u1:change"}"#),
            Some(WsCommand::Unsubscribe("document:users:u1:change".into()))
        );
        assert_eq!(parse_frame(r#"{"data": "noop"}"#), None);
        assert_eq!(parse_frame("not json"), None);
        assert_eq!(parse_frame(r#"{"other": 1}"#), None);
    }

    fn gateway() -> (Gateway, Project) {
        let ctx = TriggrContext::new(
            TriggrConfig::default(),
            SledStore::temporary().unwrap(),
        )
        .unwrap();
        let (project, _) = ctx
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
        ctx.cache_project(project.clone());
        (
            Gateway {
                ctx,
                index: Arc::new(TriggerIndex::new()),
            },
            project,
        )
    }

    #[tokio::test]
    async fn subscribe_ack_precedes_change_payloads() {
        let (gateway, project) = gateway();
        let subscriber = Subscriber::new(16);
        handle_command(
            &gateway,
            &project,
            1,
            &subscriber,
            r#"{"data": "subscribe:collection:users:change"}"#,
        );

        gateway.ctx.bus.publish(&ChangeRecord {
            project_id: project.id.clone(),
            op: ChangeOp::Insert,
            collection: "users".into(),
            doc_id: "u1".into(),
            doc: Document {
                id: "u1".into(),
                data: serde_json::json!({}),
                metadata: DocMetadata::new(1),
            },
        });

        let ack = subscriber.recv().await.unwrap();
        assert!(ack.contains(r#""op":"subscribe""#));
        let frame = subscriber.recv().await.unwrap();
        let payload: WsPayload = serde_json::from_str(&frame).unwrap();
        assert_eq!(payload.op, "insert");
        assert_eq!(payload.topic, "collection:users:change");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_acks() {
        let (gateway, project) = gateway();
        let subscriber = Subscriber::new(16);
        handle_command(
            &gateway,
            &project,
            1,
            &subscriber,
            r#"{"data": "subscribe:collection:users:change"}"#,
        );
        handle_command(
            &gateway,
            &project,
            1,
            &subscriber,
            r#"{"data": "unsubscribe:collection:users:change"}"#,
        );
        assert_eq!(gateway.ctx.bus.subscription_count(), 0);

        // drain both acks, then nothing more arrives
        assert!(subscriber.try_recv().unwrap().contains("subscribe"));
        assert!(subscriber.try_recv().unwrap().contains("unsubscribe"));
        assert!(subscriber.try_recv().is_none());
    }
}
