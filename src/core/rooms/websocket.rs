//! WebSocket handler for the real-time room surface
//!
//! One connection per client; the connection subscribes to rooms by sending
//! `joinRoom` intents. The bearer token is validated once at upgrade time
//! and the decoded subject is bound to the connection for its lifetime;
//! every actor-sensitive intent is then checked against that identity by
//! the mutation pipeline. Every intent yields either a `roomUpdated`
//! snapshot (room-wide plus unicast to the actor) or an explicit `error`
//! event back to the initiating connection.
//!
//! WebSocket URL: ws(s)://{host}/ws?token={jwt}

use std::collections::HashMap;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::api::RoomsState;
use super::pipeline::{Mutation, PipelineError};
use super::protocol::{ClientEvent, ErrorCode, ServerEvent};
use super::state::{RoomId, UserId};
use super::store::Store;

/// Channel buffer size for outgoing messages
const OUTGOING_BUFFER_SIZE: usize = 64;

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Connect-time credentials, supplied in the upgrade request's query string.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub token: String,
}

/// WebSocket upgrade handler
///
/// Validates the bearer token before upgrading; connections without a valid
/// token are refused with 401 and no event is ever read from them.
pub async fn ws_handler<S: Store>(
    Query(params): Query<ConnectParams>,
    State(state): State<RoomsState<S>>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match state.jwt.validate_token(&params.token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, "refusing websocket connection");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, claims.sub, state))
        .into_response()
}

/// Handle a WebSocket connection
async fn handle_socket<S: Store>(socket: WebSocket, identity: UserId, state: RoomsState<S>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create channel for sending events to this client
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTGOING_BUFFER_SIZE);

    // Spawn task to forward events from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize event: {}", e);
                }
            }
        }
    });

    let mut session = ConnectionSession::new(identity, tx.clone());

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.identity,
        "websocket connected"
    );

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let text_str: &str = &text;
                match serde_json::from_str::<ClientEvent>(text_str) {
                    Ok(event) => session.handle_event(event, &state).await,
                    Err(e) => {
                        tracing::warn!("Invalid event format: {}", e);
                        let _ = tx
                            .send(ServerEvent::error(
                                ErrorCode::InvalidEvent,
                                format!("Invalid event format: {}", e),
                            ))
                            .await;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                tracing::info!(
                    connection_id = %session.connection_id,
                    user_id = %session.identity,
                    "Client closed connection"
                );
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("WebSocket error: {}", e);
                break;
            }
        }
    }

    // Cleanup: drop the room subscriptions and any channels left idle
    session.cleanup();
    state.broadcaster.prune_idle();

    // Abort send task
    send_task.abort();

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.identity,
        "websocket disconnected"
    );
}

// ============================================================================
// Connection Session
// ============================================================================

/// State for a single WebSocket connection
struct ConnectionSession {
    /// Connection id used in logs
    connection_id: Uuid,
    /// Identity bound at upgrade time; every actor claim is checked against it
    identity: UserId,
    /// Channel for sending events to this client
    tx: mpsc::Sender<ServerEvent>,
    /// Per-room forwarder tasks draining the broadcast channels
    subscriptions: HashMap<RoomId, JoinHandle<()>>,
}

impl ConnectionSession {
    fn new(identity: UserId, tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            identity,
            tx,
            subscriptions: HashMap::new(),
        }
    }

    /// Handle one inbound intent, acknowledging failures explicitly.
    async fn handle_event<S: Store>(&mut self, event: ClientEvent, state: &RoomsState<S>) {
        if let Err(err) = self.dispatch(event, state).await {
            tracing::warn!(
                connection_id = %self.connection_id,
                user_id = %self.identity,
                error = %err,
                "intent rejected"
            );
            let _ = self
                .tx
                .send(ServerEvent::error(err.code(), err.to_string()))
                .await;
        }
    }

    async fn dispatch<S: Store>(
        &mut self,
        event: ClientEvent,
        state: &RoomsState<S>,
    ) -> Result<(), PipelineError> {
        match event {
            ClientEvent::JoinRoom { room_id, user_id } => {
                let mutation = state.pipeline.join(&self.identity, room_id, &user_id).await?;
                // Subscribe before publishing so the join snapshot is not missed.
                self.subscribe(room_id, state);
                self.publish(state, mutation).await
            }

            ClientEvent::LeaveRoom { room_id, user_id } => {
                let mutation = state
                    .pipeline
                    .leave(&self.identity, room_id, &user_id)
                    .await?;
                self.publish(state, mutation).await?;
                self.unsubscribe(room_id);
                Ok(())
            }

            ClientEvent::SendMessage {
                room_id,
                user_id,
                text,
                reply,
            } => {
                let mutation = state
                    .pipeline
                    .send_message(&self.identity, room_id, &user_id, text, reply)
                    .await?;
                self.publish(state, mutation).await
            }

            ClientEvent::DeleteMessage {
                room_id,
                message_id,
            } => {
                let mutation = state.pipeline.delete_message(room_id, message_id).await?;
                self.publish(state, mutation).await
            }

            ClientEvent::YoutubeControl {
                room_id,
                action,
                current_time,
            } => {
                let mutation = state
                    .pipeline
                    .playback_control(room_id, action, current_time)
                    .await?;
                self.publish(state, mutation).await
            }

            ClientEvent::VideoIdUpdated {
                room_id,
                new_video_id,
            } => {
                let mutation = state.pipeline.change_video(room_id, new_video_id).await?;
                self.publish(state, mutation).await
            }

            ClientEvent::UserBlockedUpdated { room_id, user_id } => {
                let mutation = state
                    .pipeline
                    .toggle_block(&self.identity, room_id, &user_id)
                    .await?;
                self.publish(state, mutation).await
            }

            ClientEvent::AssignOwner { room_id, user_id } => {
                let mutation = state
                    .pipeline
                    .assign_owner(&self.identity, room_id, &user_id)
                    .await?;
                self.publish(state, mutation).await
            }

            ClientEvent::GiftPremium {
                sender_id,
                receiver_id,
                months,
                room_id,
                price,
            } => {
                let mutation = state
                    .pipeline
                    .gift_premium(
                        &self.identity,
                        &sender_id,
                        &receiver_id,
                        months,
                        room_id,
                        price,
                        false,
                    )
                    .await?;
                self.publish(state, mutation).await
            }

            ClientEvent::GiftPremiumAdmin {
                sender_id,
                receiver_id,
                months,
                room_id,
                price,
            } => {
                let mutation = state
                    .pipeline
                    .gift_premium(
                        &self.identity,
                        &sender_id,
                        &receiver_id,
                        months,
                        room_id,
                        price,
                        true,
                    )
                    .await?;
                self.publish(state, mutation).await
            }

            ClientEvent::SendGift {
                sender_id,
                receiver_id,
                gift,
                room_id,
            } => {
                let mutation = state
                    .pipeline
                    .send_gift(&self.identity, &sender_id, &receiver_id, gift, room_id, false)
                    .await?;
                self.publish(state, mutation).await
            }

            ClientEvent::SendGiftAdmin {
                sender_id,
                receiver_id,
                gift,
                room_id,
            } => {
                let mutation = state
                    .pipeline
                    .send_gift(&self.identity, &sender_id, &receiver_id, gift, room_id, true)
                    .await?;
                self.publish(state, mutation).await
            }

            ClientEvent::SendEmoji {
                emoji,
                room_id,
                sender,
            } => {
                let event = state.pipeline.relay_emoji(&self.identity, emoji, &sender)?;
                state.broadcaster.send(room_id, event);
                Ok(())
            }
        }
    }

    /// Seal and broadcast the snapshot, unicast it to this connection, and
    /// deliver the intent-specific acknowledgment when there is one.
    async fn publish<S: Store>(
        &self,
        state: &RoomsState<S>,
        mutation: Mutation,
    ) -> Result<(), PipelineError> {
        let event = state
            .broadcaster
            .room_updated(mutation.room_id, &mutation.view)?;
        let _ = self.tx.send(event).await;
        if let Some(ack) = mutation.ack {
            let _ = self.tx.send(ack).await;
        }
        Ok(())
    }

    /// Start forwarding a room's broadcast stream to this connection.
    fn subscribe<S: Store>(&mut self, room_id: RoomId, state: &RoomsState<S>) {
        if self.subscriptions.contains_key(&room_id) {
            return;
        }

        let mut rx = state.broadcaster.subscribe(room_id);
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(room_id, skipped, "connection lagging behind room events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.subscriptions.insert(room_id, handle);
    }

    fn unsubscribe(&mut self, room_id: RoomId) {
        if let Some(handle) = self.subscriptions.remove(&room_id) {
            handle.abort();
        }
    }

    fn cleanup(&mut self) {
        for (_, handle) in self.subscriptions.drain() {
            handle.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
