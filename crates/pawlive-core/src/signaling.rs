//! Chat and reaction signaling over the backend's Socket.IO server, independent
//! of the media session.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::FutureExt;
use rust_socketio::asynchronous::{Client, ClientBuilder};
use rust_socketio::{Event, Payload, TransportType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::errors::LiveError;

pub const MESSAGE_EVENT: &str = "live:message";
pub const REACTION_EVENT: &str = "live:reaction";
pub const JOIN_EVENT: &str = "live:join";
pub const LEAVE_EVENT: &str = "live:leave";

pub type SignalHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// `live:message` payload. Sender fields are filled in by the server on relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

/// `live:reaction` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub emoji: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

/// Pub/sub channel for chat and reactions.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Join the signaling room for `room_name`, replacing any previous link.
    async fn connect(&self, room_name: &str) -> Result<(), LiveError>;

    async fn emit(&self, event: &str, payload: Value) -> Result<(), LiveError>;

    /// Register a handler for incoming `event`s. Handlers survive reconnects.
    fn on(&self, event: &str, handler: SignalHandler);

    fn is_connected(&self) -> bool;

    async fn disconnect(&self);
}

type HandlerTable = Arc<RwLock<HashMap<String, Vec<SignalHandler>>>>;

struct Link {
    room_name: String,
    client: Client,
    /// Cleared by the socket's close callback, so a dead link reads as disconnected.
    alive: Arc<AtomicBool>,
}

/// [`SignalingChannel`] speaking Socket.IO v4 on the backend's default namespace.
///
/// The bearer token travels in the handshake `auth` object (`{"token": ...}`).
pub struct SocketIoSignalingChannel {
    url: url::Url,
    auth_token: Option<String>,
    handlers: HandlerTable,
    link: Mutex<Option<Link>>,
    alive: RwLock<Option<Arc<AtomicBool>>>,
}

impl SocketIoSignalingChannel {
    pub fn new(url: &str, auth_token: Option<String>) -> Result<Self, LiveError> {
        let mut parsed = url::Url::parse(url)
            .map_err(|e| LiveError::Config(format!("invalid signaling url '{url}': {e}")))?;
        let scheme = match parsed.scheme() {
            "http" | "ws" => "http",
            "https" | "wss" => "https",
            other => {
                return Err(LiveError::Config(format!(
                    "unsupported signaling scheme '{other}' in '{url}'"
                )));
            }
        };
        parsed
            .set_scheme(scheme)
            .map_err(|()| LiveError::Config(format!("cannot use '{url}' for signaling")))?;
        Ok(Self {
            url: parsed,
            auth_token,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            link: Mutex::new(None),
            alive: RwLock::new(None),
        })
    }

    /// Server base URL, normalised to http(s).
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    fn dispatch(handlers: &HandlerTable, event: &str, payload: Payload) {
        let data = match payload {
            Payload::Text(mut values) if !values.is_empty() => values.swap_remove(0),
            Payload::Text(_) => Value::Null,
            other => {
                tracing::debug!("ignoring non-JSON payload for {event}: {other:?}");
                return;
            }
        };
        let targets = handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
            .unwrap_or_default();
        if targets.is_empty() {
            tracing::debug!("no handler for signaling event {event}");
        }
        for handler in targets {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(&data))).is_err() {
                tracing::error!("signaling handler for {event} panicked");
            }
        }
    }

    async fn open(&self, alive: Arc<AtomicBool>) -> Result<Client, LiveError> {
        let handlers = self.handlers.clone();
        let closed = alive.clone();
        let mut builder = ClientBuilder::new(self.url.as_str())
            .transport_type(TransportType::Websocket)
            .on_any(move |event: Event, payload: Payload, _client: Client| {
                if let Event::Custom(name) = &event {
                    Self::dispatch(&handlers, name, payload);
                }
                async {}.boxed()
            })
            .on(Event::Close, move |_payload: Payload, _client: Client| {
                closed.store(false, Ordering::SeqCst);
                tracing::debug!("signaling socket closed");
                async {}.boxed()
            });
        if let Some(token) = &self.auth_token {
            builder = builder.auth(serde_json::json!({ "token": token }));
        }
        builder
            .connect()
            .await
            .map_err(|e| LiveError::Signaling(format!("connect: {e}")))
    }

    async fn close_link(link: Link) {
        link.alive.store(false, Ordering::SeqCst);
        let leave = serde_json::json!({ "roomName": link.room_name });
        if let Err(e) = link.client.emit(LEAVE_EVENT, leave).await {
            tracing::debug!("leave not sent: {e}");
        }
        if let Err(e) = link.client.disconnect().await {
            tracing::debug!("signaling disconnect: {e}");
        }
        tracing::info!(room = %link.room_name, "signaling disconnected");
    }

    fn set_alive(&self, alive: Option<Arc<AtomicBool>>) {
        *self.alive.write().unwrap_or_else(PoisonError::into_inner) = alive;
    }
}

#[async_trait]
impl SignalingChannel for SocketIoSignalingChannel {
    async fn connect(&self, room_name: &str) -> Result<(), LiveError> {
        let mut link = self.link.lock().await;
        if let Some(previous) = link.take() {
            self.set_alive(None);
            Self::close_link(previous).await;
        }

        tracing::info!(room = %room_name, "connecting signaling channel to {}", self.url);
        let alive = Arc::new(AtomicBool::new(true));
        let client = self.open(alive.clone()).await?;

        let join = serde_json::json!({ "roomName": room_name });
        if let Err(e) = client.emit(JOIN_EVENT, join).await {
            let _ = client.disconnect().await;
            return Err(LiveError::Signaling(format!("join {room_name}: {e}")));
        }

        *link = Some(Link {
            room_name: room_name.to_string(),
            client,
            alive: alive.clone(),
        });
        self.set_alive(Some(alive));
        Ok(())
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), LiveError> {
        if !self.is_connected() {
            return Err(LiveError::Signaling("not connected".into()));
        }
        let link = self.link.lock().await;
        let link = link
            .as_ref()
            .ok_or_else(|| LiveError::Signaling("not connected".into()))?;
        link.client
            .emit(event, payload)
            .await
            .map_err(|e| LiveError::Signaling(format!("emit {event}: {e}")))
    }

    fn on(&self, event: &str, handler: SignalHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    fn is_connected(&self) -> bool {
        self.alive
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|alive| alive.load(Ordering::SeqCst))
    }

    async fn disconnect(&self) {
        let link = self.link.lock().await.take();
        self.set_alive(None);
        if let Some(link) = link {
            Self::close_link(link).await;
        }
    }
}
