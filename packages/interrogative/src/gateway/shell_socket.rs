//! `/ws/attach/shell`: raw terminal I/O for one multiplexed instance.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{sink::SinkExt, stream::StreamExt};
use pty_manager::PtyEvent;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::GatewayState;
use crate::terminal::InstanceId;

#[derive(Debug, Default, Deserialize)]
pub struct ShellQuery {
    #[serde(default)]
    pub instance: InstanceId,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

/// Text frames that are control messages rather than keystrokes.
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShellControl {
    Resize { cols: u16, rows: u16 },
}

pub fn parse_control(text: &str) -> Option<ShellControl> {
    if !text.starts_with('{') {
        return None;
    }
    serde_json::from_str(text).ok()
}

pub async fn shell_socket_handler(
    State(state): State<GatewayState>,
    Query(query): Query<ShellQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_shell_socket(socket, state, query))
}

async fn handle_shell_socket(socket: WebSocket, state: GatewayState, query: ShellQuery) {
    let connection = Uuid::new_v4();
    let instance = query.instance;
    let cols = query.cols.unwrap_or(state.default_cols);
    let rows = query.rows.unwrap_or(state.default_rows);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut attachment = match state.terminals.attach(instance, cols, rows, connection).await {
        Ok(attachment) => attachment,
        Err(e) => {
            warn!(instance, "Terminal attach failed: {}", e);
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };
    info!(instance, %connection, cols, rows, "Terminal attached");

    let output_task = async move {
        loop {
            match attachment.output.recv().await {
                Ok(PtyEvent::Output { data }) => {
                    if ws_sender.send(Message::Binary(data.into())).await.is_err() {
                        break;
                    }
                }
                Ok(PtyEvent::Exited) | Err(broadcast::error::RecvError::Closed) => {
                    debug!(instance, "Terminal process exited");
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(instance, %connection, "Terminal output lagged by {} chunks", n);
                }
            }
        }
    };

    let terminals = state.terminals.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            let result = match msg {
                Ok(Message::Binary(data)) => terminals.input(instance, &data).await,
                Ok(Message::Text(text)) => match parse_control(text.as_str()) {
                    Some(ShellControl::Resize { cols, rows }) => {
                        terminals.resize(instance, cols, rows).await
                    }
                    None => terminals.input(instance, text.as_bytes()).await,
                },
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => Ok(()),
            };
            if let Err(e) = result {
                debug!(instance, "Terminal input failed: {}", e);
            }
        }
    };

    tokio::select! {
        _ = output_task => debug!(%connection, "Output task ended"),
        _ = input_task => debug!(%connection, "Input task ended"),
    }

    state.terminals.detach(instance, connection).await;
    info!(instance, %connection, "Terminal detached");
}
