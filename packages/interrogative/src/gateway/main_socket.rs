//! `/ws/attach/main`: bridges one viewer to the event bus.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use event_bus::{Event, Filter};
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::{Value, json};
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use super::GatewayState;
use super::envelope::{PING, encode, parse_envelope};
use crate::events;
use crate::metrics::SessionMetrics;

pub async fn main_socket_handler(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_main_socket(socket, state))
}

fn register_greeting() -> Event {
    Event::new(events::REGISTER, json!({ "user": "Admin", "role": "admin" }))
}

pub async fn handle_main_socket(socket: WebSocket, state: GatewayState) {
    let connection = Uuid::new_v4();
    info!(%connection, "Viewer attached");
    state.metrics.connection_opened();

    // Subscribe before announcing so the resync is not missed
    let mut subscription = state.bus.subscribe(Filter::except_source(connection));
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let greeted = match encode(&register_greeting()) {
        Ok(frame) => ws_sender.send(Message::Text(frame.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to encode greeting: {}", e);
            false
        }
    };

    if greeted {
        state
            .bus
            .publish(Event::new(events::CONNECTED, Value::Null).from_source(connection));

        let metrics = state.metrics.clone();
        let sender_task = async move {
            while let Some(event) = subscription.recv().await {
                let frame = match encode(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!(kind = %event.kind, "Failed to encode event: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
                SessionMetrics::incr(&metrics.messages_sent);
            }
        };

        let bus = state.bus.clone();
        let metrics = state.metrics.clone();
        let input_task = async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if text.as_str() == PING {
                            continue;
                        }
                        match parse_envelope(text.as_str(), connection) {
                            Some(event) => {
                                SessionMetrics::incr(&metrics.messages_received);
                                trace!(%connection, kind = %event.kind, "Inbound event");
                                bus.publish(event);
                            }
                            None => {
                                SessionMetrics::incr(&metrics.messages_dropped);
                                trace!(%connection, "Dropping malformed frame");
                            }
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        SessionMetrics::incr(&metrics.messages_dropped);
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };

        tokio::select! {
            _ = sender_task => debug!(%connection, "Sender task ended"),
            _ = input_task => debug!(%connection, "Input task ended"),
        }
    }

    state.metrics.connection_closed();
    info!(%connection, "Viewer detached");
}
