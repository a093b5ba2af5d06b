use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use lexchat_types::events::{ClientCommand, ServerEvent};

/// A live gateway connection: commands go in, events come out. Feed the
/// events into a [`crate::session::ChatSession`] to keep UI state.
pub struct Connection {
    pub commands: mpsc::UnboundedSender<ClientCommand>,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

/// Open the WebSocket, send the identify handshake, and pump frames in
/// both directions. The returned channels close when the socket does.
pub async fn connect(url: &str, token: &str) -> Result<Connection> {
    let (socket, _response) = connect_async(url).await.context("gateway connect failed")?;
    let (mut sink, mut stream) = socket.split();

    // Identify first; the server ignores everything else until then
    let identify = ClientCommand::Identify {
        token: token.to_string(),
    };
    sink.send(WsMessage::Text(serde_json::to_string(&identify)?.into()))
        .await
        .context("identify send failed")?;

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ClientCommand>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Outbound: serialize commands onto the wire
    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            let text = serde_json::to_string(&cmd).unwrap();
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Inbound: parse events off the wire. Pings are answered by the
    // protocol layer; unknown frames are skipped with a warning.
    tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                WsMessage::Text(text) => {
                    match serde_json::from_str::<ServerEvent>(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(
                                "bad gateway event: {} -- raw: {}",
                                e,
                                &text.as_str()[..text.len().min(200)]
                            );
                        }
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
        debug!("gateway stream ended");
    });

    Ok(Connection {
        commands: cmd_tx,
        events: event_rx,
    })
}
