use super::state::AppState;
use crate::relay::{parse_command, ClientMessage, ServerEvent, SessionRelay};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// GET /ws
/// Upgrade to the client channel and run a relay for it
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = format!("conn-{}", uuid::Uuid::new_v4());
    info!("Client connected: {}", connection_id);

    let buffer = state.settings.event_buffer;
    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(buffer);
    let (command_tx, command_rx) = mpsc::channel::<ClientMessage>(buffer);

    let relay = SessionRelay::new(
        connection_id.clone(),
        Arc::clone(&state.connector),
        state.settings.clone(),
        event_tx.clone(),
    );
    state.register(relay.shared()).await;
    let mut relay_task = tokio::spawn(relay.run(command_rx, state.shutdown_signal()));

    let (mut sink, mut stream) = socket.split();

    // Writer: relay events -> client
    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode {} event: {}", event.name(), e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                debug!("Client {} socket closed while sending", writer_id);
                return;
            }
        }
        let _ = sink.close().await;
    });

    // Reader: client frames -> relay commands
    let mut relay_finished = false;
    loop {
        tokio::select! {
            message = stream.next() => {
                let command = match message {
                    Some(Ok(Message::Binary(chunk))) => ClientMessage::Audio(chunk),
                    Some(Ok(Message::Text(text))) => match parse_command(&text) {
                        Ok(command) => command,
                        Err(reason) => {
                            warn!("Rejected client frame from {}: {}", connection_id, reason);
                            let _ = event_tx.send(ServerEvent::bad_request(reason)).await;
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("Client {} socket error: {}", connection_id, e);
                        break;
                    }
                };
                if command_tx.send(command).await.is_err() {
                    break;
                }
            }
            _ = &mut relay_task, if !relay_finished => {
                // Shutdown ended the relay
                relay_finished = true;
                break;
            }
        }
    }

    // Closing the command channel is the relay's disconnect signal
    drop(command_tx);
    if !relay_finished {
        if let Err(e) = relay_task.await {
            error!("Relay task for {} panicked: {}", connection_id, e);
        }
    }

    drop(event_tx);
    let _ = writer.await;

    state.unregister(&connection_id).await;
    info!("Client disconnected: {}", connection_id);
}
