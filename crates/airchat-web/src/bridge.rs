//! Event relay endpoint: one WebSocket per client instance.
//!
//! Text frames from the browser are `ClientCommand`s; every `ServerEvent`
//! from a connection opened through this socket goes back out on it. When
//! the socket closes its connections keep running until logout, but their
//! events have nowhere to go and are lost.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use airchat_server::irc::wire::{ClientCommand, ServerEvent};

use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(ws: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (relay_tx, mut relay_rx) = mpsc::unbounded_channel::<ServerEvent>();

    info!("relay client connected");

    // Connections → browser.
    let mut relay_to_ws = tokio::spawn(async move {
        while let Some(event) = relay_rx.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(kind = event.kind(), network = event.network(), "failed to encode event: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Browser → registry. Commands run one at a time, in arrival order.
    let registry = state.registry.clone();
    let mut ws_to_registry = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => match ClientCommand::from_json(&text) {
                    Ok(cmd) => {
                        debug!(session = %cmd.session_id().short(), network = cmd.network(), "relay command");
                        registry.dispatch(cmd, &relay_tx).await
                    }
                    Err(e) => debug!("ignoring malformed relay frame: {e}"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut relay_to_ws => ws_to_registry.abort(),
        _ = &mut ws_to_registry => relay_to_ws.abort(),
    }

    info!("relay client disconnected");
}
