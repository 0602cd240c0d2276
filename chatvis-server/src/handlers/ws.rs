//! `GET /api/public/ws/chat`: the live chat socket.
//!
//! Protocol: the client's first text frame is `{"token": "<jwt>"}`; the server answers
//! `authentication_successful` or `authentication_failed` (then closes). After that both
//! directions carry [`ChatMessage`] JSON frames.

use std::{fmt::Display, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::counter;
use shared::{
    config::server::WebSocketConfig,
    models::{AUTH_FAILED, AUTH_SUCCEEDED, AuthFrame, ChatMessage, NewMessage},
};
use tokio::{
    sync::mpsc,
    time::{Instant, interval_at, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    app_state::AppState,
    auth::{AuthenticatedUser, TokenService},
    hub::Hub,
    http::error::AppResult,
    services::{GroupDirectory, MessageStore},
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/public/ws/chat", get(ws_chat))
}

async fn ws_chat(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> AppResult<Response> {
    let session = Session {
        hub: Arc::clone(&state.hub),
        tokens: Arc::clone(&state.tokens),
        directory: state.group_directory()?,
        store: state.messages.clone(),
        config: state.websocket.clone(),
    };
    Ok(ws
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            session.run(sink, stream).await;
        })
        .into_response())
}

/// Collaborators of one socket session.
#[derive(Clone)]
pub(crate) struct Session {
    pub(crate) hub: Arc<Hub>,
    pub(crate) tokens: Arc<TokenService>,
    pub(crate) directory: Arc<dyn GroupDirectory>,
    /// Without a store, id-less frames are broadcast unpersisted.
    pub(crate) store: Option<Arc<dyn MessageStore>>,
    pub(crate) config: WebSocketConfig,
}

impl Session {
    /// Drive one socket from handshake to close.
    pub(crate) async fn run<S, R, E>(self, mut sink: S, mut stream: R)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display + Send,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let Some(user) = self.authenticate(&mut sink, &mut stream).await else {
            counter!("ws_sessions_total", "outcome" => "rejected").increment(1);
            return;
        };
        let user_id = user.id;

        let groups = match self.directory.groups_for_user(user_id).await {
            Ok(groups) => groups,
            Err(err) => {
                warn!(user_id, error = %err, "cannot resolve groups; closing socket");
                let _ = sink.send(Message::Close(None)).await;
                counter!("ws_sessions_total", "outcome" => "no_groups").increment(1);
                return;
            }
        };
        self.hub.subscribe_to_groups(user_id, groups);
        let (connection_id, outbound) = self.hub.connect(user_id, self.config.outbound_buffer);
        counter!("ws_sessions_total", "outcome" => "accepted").increment(1);
        info!(user_id, connection_id, "chat socket connected");

        let ping_every = Duration::from_secs(self.config.ping_interval_seconds.max(1));
        let mut writer = tokio::spawn(write_loop(sink, outbound, ping_every));
        let mut writer_done = false;

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_inbound(user_id, text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(user_id, error = %err, "socket read failed");
                        break;
                    }
                },
                _ = &mut writer => {
                    writer_done = true;
                    break;
                }
            }
        }

        // Dropping the registry's sender ends the writer.
        self.hub.unregister_connection(user_id, connection_id);
        if !writer_done {
            let _ = writer.await;
        }
        info!(user_id, connection_id, "chat socket closed");
    }

    async fn authenticate<S, R, E>(&self, sink: &mut S, stream: &mut R) -> Option<AuthenticatedUser>
    where
        S: Sink<Message> + Unpin,
        R: Stream<Item = Result<Message, E>> + Unpin,
    {
        let wait = Duration::from_secs(self.config.auth_timeout_seconds.max(1));
        let frame = match timeout(wait, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => Some(text),
            Ok(Some(Ok(_))) => None,
            Ok(Some(Err(_)) | None) => return None,
            Err(_) => {
                debug!("no token frame before timeout");
                None
            }
        };

        let user = frame.and_then(|text| {
            serde_json::from_str::<AuthFrame>(text.as_str())
                .ok()
                .and_then(|frame| match self.tokens.validate(&frame.token) {
                    Ok(user) => Some(user),
                    Err(err) => {
                        debug!(error = %err, "socket token rejected");
                        None
                    }
                })
        });

        if let Some(user) = user {
            sink.send(Message::Text(AUTH_SUCCEEDED.into())).await.ok()?;
            Some(user)
        } else {
            let _ = sink.send(Message::Text(AUTH_FAILED.into())).await;
            let _ = sink.send(Message::Close(None)).await;
            None
        }
    }

    async fn handle_inbound(&self, user_id: i64, text: &str) {
        let mut message: ChatMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                debug!(user_id, error = %err, "ignoring malformed frame");
                return;
            }
        };
        if !self.hub.is_member(user_id, &message.group_id) {
            warn!(user_id, group = %message.group_id, "frame for a group the user is not in");
            return;
        }
        message.sender_id = user_id;

        if message.id.is_none() {
            match self.persist(&message).await {
                Ok(stored) => message = stored,
                Err(err) => warn!(user_id, error = %err, "persisting frame failed; broadcasting unpersisted"),
            }
        }
        self.hub.broadcast(&message);
    }

    async fn persist(&self, message: &ChatMessage) -> Result<ChatMessage, String> {
        let Some(store) = &self.store else {
            return Err("no message store configured".into());
        };
        let group_id = self
            .directory
            .resolve_group(&message.group_id)
            .await
            .map_err(|err| err.to_string())?;
        let stored = store
            .append(NewMessage {
                group_id,
                sender_id: message.sender_id,
                content: message.content.clone(),
                answer_id: message.answer_id,
            })
            .await
            .map_err(|err| err.to_string())?;
        Ok(stored.to_chat_message(&message.group_id))
    }
}

async fn write_loop<S>(mut sink: S, mut outbound: mpsc::Receiver<ChatMessage>, ping_every: Duration)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = interval_at(Instant::now() + ping_every, ping_every);
    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(message) = next else {
                    // Unregistered or taken over by a newer session.
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let frame = match serde_json::to_string(&message) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(error = %err, "failed to encode outbound message");
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(frame.into())).await {
                    debug!(error = %err, "socket write failed");
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(err) = sink.send(Message::Ping(Bytes::new())).await {
                    debug!(error = %err, "socket ping failed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
