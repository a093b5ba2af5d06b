use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use lexchat_db::Database;
use lexchat_types::events::{ClientCommand, ServerEvent};
use lexchat_types::models::Participant;

use crate::registry::Registry;
use crate::router::{self, RouterError};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection: identify handshake, presence
/// replay, then the event loop until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    registry: Registry,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify with a valid JWT. The participant bound
    // here is the only sender identity this connection can ever use.
    let (participant, name) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(identity) => identity,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", name, participant);

    // Refresh the directory mirror so conversation lists can name us
    {
        let db = db.clone();
        let display_name = name.clone();
        if let Err(e) =
            tokio::task::spawn_blocking(move || db.upsert_participant(participant, &display_name))
                .await
                .unwrap_or_else(|e| Err(anyhow::anyhow!("join error: {}", e)))
        {
            warn!("Failed to refresh participant mirror for {}: {}", participant, e);
        }
    }

    // Step 2: Send Ready
    let ready = ServerEvent::Ready {
        participant,
        name: name.clone(),
    };
    if sender
        .send(WsMessage::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // Step 3: Replay who is already online so this client starts with a
    // full presence picture, then go online ourselves.
    for (peer, peer_name) in registry.online_participants().await {
        let event = ServerEvent::PresenceUpdate {
            participant: peer,
            name: peer_name,
            online: true,
        };
        if sender
            .send(WsMessage::Text(serde_json::to_string(&event).unwrap().into()))
            .await
            .is_err()
        {
            return;
        }
    }

    let (conn_id, mut targeted_rx) = registry.register(participant, name.clone()).await;
    let mut broadcast_rx = registry.subscribe();

    let registry_recv = registry.clone();
    let db_recv = db.clone();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward presence broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Presence receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = targeted_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let name_recv = name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&registry_recv, &db_recv, participant, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            name_recv,
                            participant,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.unregister(participant, conn_id).await;
    info!("{} ({}) disconnected from gateway", name, participant);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Participant, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use lexchat_types::api::Claims;

    let timeout = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let WsMessage::Text(text) = msg {
                if let Ok(ClientCommand::Identify { token }) =
                    serde_json::from_str::<ClientCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((
                        token_data.claims.participant(),
                        token_data.claims.name,
                    ));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

/// Handle one command from an identified connection. Each command is
/// isolated: a failed send reports to this sender only and never disturbs
/// the registry or other connections.
pub(crate) async fn handle_command(
    registry: &Registry,
    db: &Arc<Database>,
    participant: Participant,
    cmd: ClientCommand,
) {
    match cmd {
        ClientCommand::Identify { .. } => {} // Already handled

        ClientCommand::SendMessage {
            receiver_id,
            receiver_kind,
            content,
            sender_id,
            sender_kind,
        } => {
            // The connection-bound identity is authoritative. A claimed
            // sender in the payload is tolerated only when it agrees.
            let claimed_mismatch = sender_id.is_some_and(|id| id != participant.id)
                || sender_kind.is_some_and(|kind| kind != participant.kind);
            if claimed_mismatch {
                warn!(
                    "{} tried to send as {:?}/{:?}, rejecting",
                    participant, sender_id, sender_kind
                );
                registry
                    .send_to(
                        participant,
                        ServerEvent::MessageError {
                            reason: RouterError::UnauthorizedSender.to_string(),
                        },
                    )
                    .await;
                return;
            }

            let receiver = Participant::new(receiver_id, receiver_kind);
            match router::deliver_message(registry, db, participant, receiver, content).await {
                Ok((message, _outcome)) => {
                    // Always ack with the stored record so the sender can
                    // reconcile its optimistic echo
                    registry
                        .send_to(participant, ServerEvent::MessageSent(message))
                        .await;
                }
                Err(e) => {
                    warn!("send from {} to {} failed: {}", participant, receiver, e);
                    registry
                        .send_to(
                            participant,
                            ServerEvent::MessageError {
                                reason: e.to_string(),
                            },
                        )
                        .await;
                }
            }
        }

        ClientCommand::Typing {
            receiver_id,
            receiver_kind,
        } => {
            let receiver = Participant::new(receiver_id, receiver_kind);
            router::relay_typing(registry, participant, receiver, true).await;
        }

        ClientCommand::StopTyping {
            receiver_id,
            receiver_kind,
        } => {
            let receiver = Participant::new(receiver_id, receiver_kind);
            router::relay_typing(registry, participant, receiver, false).await;
        }
    }
}
