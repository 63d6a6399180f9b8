use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use serde_json::Value;

use crate::controls::MediaControls;
use crate::errors::LiveError;
use crate::events::{DomainEvent, DomainEventKind, ListenerId, Participant, SessionRole};
use crate::participants::ParticipantManager;
use crate::session::{ConnectConfig, SessionManager};
use crate::signaling::{ChatPayload, MESSAGE_EVENT, REACTION_EVENT, ReactionPayload, SignalingChannel};
use crate::token::{StreamCredentials, StreamMetadata, TokenBroker};

/// Lifecycle of one streaming context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Requesting,
    Connected { role: SessionRole },
    Ended,
    /// Recoverable: a new start/watch re-enters `Requesting`.
    Errored { message: String },
}

/// Chat line or reaction received over the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveMessage {
    Chat {
        id: String,
        sender_id: Option<String>,
        sender_name: Option<String>,
        content: String,
        timestamp_ms: u64,
    },
    Reaction {
        id: String,
        sender_id: Option<String>,
        sender_name: Option<String>,
        emoji: String,
        timestamp_ms: u64,
    },
}

/// UI-facing snapshot. Only the controller mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamControllerState {
    pub is_connected: bool,
    pub is_publishing: bool,
    pub participants: Vec<Participant>,
    pub local_participant: Option<Participant>,
    pub viewer_count: u32,
    pub error: Option<String>,
    pub messages: Vec<LiveMessage>,
}

/// Receives a snapshot after every state change.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait StateListener: Send + Sync {
    fn on_state_changed(&self, phase: &StreamPhase, state: &StreamControllerState);
}

/// Oldest chat and reaction entries are dropped beyond this.
pub const MAX_MESSAGES: usize = 200;

const CONNECTION_LOST: &str = "media connection lost";

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

struct ControllerInner {
    phase: StreamPhase,
    state: StreamControllerState,
    participants: ParticipantManager,
    /// Set while the transport reports a reconnect in progress.
    reconnecting: bool,
    /// Broadcast the backend considers live until a stop request is sent.
    pending_stop: Option<String>,
    /// Bumped by every start/watch/end; async work checks it before committing.
    generation: u64,
}

impl ControllerInner {
    fn reset(&mut self) {
        self.state = StreamControllerState::default();
        self.participants.clear();
        self.reconnecting = false;
    }

    fn lose_connection(&mut self) {
        tracing::warn!("{CONNECTION_LOST}");
        self.reset();
        self.state.error = Some(CONNECTION_LOST.to_string());
        self.phase = StreamPhase::Errored {
            message: CONNECTION_LOST.to_string(),
        };
    }

    fn sync_participants(&mut self) {
        self.state.participants = self.participants.participants().to_vec();
        self.state.viewer_count = self.participants.participant_count() as u32;
    }

    fn accepts_session_events(&self) -> bool {
        matches!(self.phase, StreamPhase::Requesting | StreamPhase::Connected { .. })
    }
}

struct Shared {
    inner: Mutex<ControllerInner>,
    listeners: RwLock<Vec<Arc<dyn StateListener>>>,
}

impl Shared {
    /// Apply `f` under the lock, then notify listeners if it reported a change.
    fn update<R>(&self, f: impl FnOnce(&mut ControllerInner) -> (bool, R)) -> R {
        let (result, snapshot) = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let (changed, result) = f(&mut inner);
            let snapshot = changed.then(|| (inner.phase.clone(), inner.state.clone()));
            (result, snapshot)
        };
        if let Some((phase, state)) = snapshot {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for listener in listeners {
                listener.on_state_changed(&phase, &state);
            }
        }
        result
    }

    fn read<R>(&self, f: impl FnOnce(&ControllerInner) -> R) -> R {
        f(&self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.read(|inner| inner.generation == generation)
    }

    fn handle_session_event(&self, event: &DomainEvent, signaling: &Arc<dyn SignalingChannel>) {
        let dropped = self.update(|inner| {
            if !inner.accepts_session_events() {
                return (false, false);
            }
            match event {
                DomainEvent::ParticipantConnected(p) => {
                    inner.participants.upsert(p.clone());
                    inner.sync_participants();
                }
                DomainEvent::ParticipantDisconnected(p) => {
                    inner.participants.remove(&p.sid);
                    inner.sync_participants();
                }
                DomainEvent::TrackPublished { publication, participant } => {
                    inner.participants.track_published(participant, publication.clone());
                    inner.sync_participants();
                }
                DomainEvent::TrackUnpublished { publication, participant } => {
                    inner.participants.track_unpublished(&participant.sid, &publication.sid);
                    inner.sync_participants();
                }
                DomainEvent::LocalTrackPublished(publication) => match &mut inner.state.local_participant {
                    Some(local) => local.upsert_track(publication.clone()),
                    None => return (false, false),
                },
                DomainEvent::LocalTrackUnpublished(publication) => match &mut inner.state.local_participant {
                    Some(local) => local.remove_track(&publication.sid),
                    None => return (false, false),
                },
                // While Requesting only the flags change; the pending commit reads them.
                DomainEvent::Reconnecting => {
                    inner.reconnecting = true;
                    if inner.phase == StreamPhase::Requesting {
                        return (false, false);
                    }
                    inner.state.is_connected = false;
                }
                DomainEvent::Reconnected => {
                    inner.reconnecting = false;
                    if inner.phase == StreamPhase::Requesting {
                        return (false, false);
                    }
                    inner.state.is_connected = true;
                }
                DomainEvent::Disconnected => {
                    if matches!(inner.phase, StreamPhase::Connected { .. }) {
                        inner.generation += 1;
                    }
                    inner.lose_connection();
                    return (true, true);
                }
                DomainEvent::ConnectionStateChanged(state) => {
                    tracing::debug!("media connection state: {state:?}");
                    return (false, false);
                }
                _ => return (false, false),
            }
            (true, false)
        });

        if dropped {
            let signaling = signaling.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { signaling.disconnect().await });
            }
        }
    }

    fn handle_signal(&self, message: LiveMessage) {
        self.update(|inner| {
            if !matches!(inner.phase, StreamPhase::Connected { .. }) {
                return (false, ());
            }
            let messages = &mut inner.state.messages;
            messages.push(message);
            if messages.len() > MAX_MESSAGES {
                let excess = messages.len() - MAX_MESSAGES;
                messages.drain(..excess);
            }
            (true, ())
        });
    }
}

/// Per-UI-session state machine over [`SessionManager`], a [`TokenBroker`] and a
/// [`SignalingChannel`].
///
/// The owning UI context calls [`StreamController::end_stream`] once when it goes
/// away. Dropping the controller unsubscribes it from the session manager.
pub struct StreamController {
    sessions: Arc<SessionManager>,
    controls: MediaControls,
    broker: Arc<dyn TokenBroker>,
    signaling: Arc<dyn SignalingChannel>,
    shared: Arc<Shared>,
    subscriptions: Vec<(DomainEventKind, ListenerId)>,
    publish_camera: bool,
    publish_microphone: bool,
}

impl StreamController {
    pub fn new(
        sessions: Arc<SessionManager>,
        broker: Arc<dyn TokenBroker>,
        signaling: Arc<dyn SignalingChannel>,
    ) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(ControllerInner {
                phase: StreamPhase::Idle,
                state: StreamControllerState::default(),
                participants: ParticipantManager::new(),
                reconnecting: false,
                pending_stop: None,
                generation: 0,
            }),
            listeners: RwLock::new(Vec::new()),
        });

        let subscriptions = DomainEventKind::ALL
            .iter()
            .map(|&kind| {
                let weak: Weak<Shared> = Arc::downgrade(&shared);
                let signaling = signaling.clone();
                let id = sessions.on(kind, move |event| {
                    if let Some(shared) = weak.upgrade() {
                        shared.handle_session_event(event, &signaling);
                    }
                });
                (kind, id)
            })
            .collect();

        let weak = Arc::downgrade(&shared);
        signaling.on(
            MESSAGE_EVENT,
            Arc::new(move |data: &Value| {
                let Some(shared) = weak.upgrade() else { return };
                match serde_json::from_value::<ChatPayload>(data.clone()) {
                    Ok(chat) => shared.handle_signal(LiveMessage::Chat {
                        id: uuid::Uuid::new_v4().to_string(),
                        sender_id: chat.user_id,
                        sender_name: chat.user_name,
                        content: chat.content,
                        timestamp_ms: now_ms(),
                    }),
                    Err(e) => tracing::warn!("ignoring malformed {MESSAGE_EVENT}: {e}"),
                }
            }),
        );
        let weak = Arc::downgrade(&shared);
        signaling.on(
            REACTION_EVENT,
            Arc::new(move |data: &Value| {
                let Some(shared) = weak.upgrade() else { return };
                match serde_json::from_value::<ReactionPayload>(data.clone()) {
                    Ok(reaction) => shared.handle_signal(LiveMessage::Reaction {
                        id: uuid::Uuid::new_v4().to_string(),
                        sender_id: reaction.user_id,
                        sender_name: reaction.user_name,
                        emoji: reaction.emoji,
                        timestamp_ms: now_ms(),
                    }),
                    Err(e) => tracing::warn!("ignoring malformed {REACTION_EVENT}: {e}"),
                }
            }),
        );

        Self {
            controls: sessions.controls(),
            sessions,
            broker,
            signaling,
            shared,
            subscriptions,
            publish_camera: true,
            publish_microphone: true,
        }
    }

    /// Choose which local tracks a broadcast publishes on start.
    pub fn with_publish_defaults(mut self, camera: bool, microphone: bool) -> Self {
        self.publish_camera = camera;
        self.publish_microphone = microphone;
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn StateListener>) {
        self.shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn state(&self) -> StreamControllerState {
        self.shared.read(|inner| inner.state.clone())
    }

    pub fn phase(&self) -> StreamPhase {
        self.shared.read(|inner| inner.phase.clone())
    }

    /// Start broadcasting `stream_id`, titled after the id.
    pub async fn start_stream(&self, stream_id: &str) -> Result<(), LiveError> {
        self.start_stream_with(StreamMetadata::new(stream_id)).await
    }

    pub async fn start_stream_with(&self, metadata: StreamMetadata) -> Result<(), LiveError> {
        let generation = self.begin(&metadata.stream_id, SessionRole::Publisher).await?;
        let credentials = self.broker.request_publish_token(&metadata).await;
        if credentials.is_ok() {
            let orphaned = self.shared.update(|inner| {
                if inner.generation == generation {
                    inner.pending_stop = Some(metadata.stream_id.clone());
                    (false, false)
                } else {
                    (false, true)
                }
            });
            // Ended before the backend answered: it now has a live stream nobody owns.
            if orphaned {
                self.send_stop(&metadata.stream_id).await;
            }
        }
        self.join(generation, SessionRole::Publisher, credentials).await
    }

    /// Join `stream_id` as a viewer.
    pub async fn watch_stream(&self, stream_id: &str) -> Result<(), LiveError> {
        let generation = self.begin(stream_id, SessionRole::Viewer).await?;
        let credentials = self.broker.request_view_token(stream_id).await;
        self.join(generation, SessionRole::Viewer, credentials).await
    }

    /// Tear everything down and reset the state. Safe to call more than once.
    ///
    /// A broadcast whose credentials were issued gets a stop request, whether it
    /// ended here, by a transport drop or by a failed media connect.
    pub async fn end_stream(&self) {
        let stop = self.shared.update(|inner| {
            inner.generation += 1;
            inner.reset();
            inner.phase = StreamPhase::Ended;
            (true, inner.pending_stop.take())
        });

        self.sessions.disconnect().await;
        if let Some(stream_id) = stop {
            self.send_stop(&stream_id).await;
        }
        self.signaling.disconnect().await;
        tracing::info!("stream ended");
    }

    async fn send_stop(&self, stream_id: &str) {
        if let Err(e) = self.broker.request_stream_stop(stream_id).await {
            tracing::warn!(stream = %stream_id, "stop request failed: {e}");
        }
    }

    pub async fn toggle_camera(&self) {
        let result = self.controls.toggle_camera().await.map(|_| ());
        self.absorb("toggle_camera", result);
    }

    pub async fn toggle_microphone(&self) {
        let result = self.controls.toggle_microphone().await.map(|_| ());
        self.absorb("toggle_microphone", result);
    }

    pub async fn switch_camera(&self) {
        let result = self.controls.switch_camera().await.map(|_| ());
        self.absorb("switch_camera", result);
    }

    pub async fn send_chat_message(&self, text: &str) {
        let content = text.trim();
        if content.is_empty() {
            return;
        }
        let payload = ChatPayload {
            content: content.to_string(),
            user_id: None,
            user_name: None,
        };
        self.send_signal(MESSAGE_EVENT, serde_json::to_value(payload)).await;
    }

    pub async fn send_reaction(&self, emoji: &str) {
        let payload = ReactionPayload {
            emoji: emoji.to_string(),
            user_id: None,
            user_name: None,
        };
        self.send_signal(REACTION_EVENT, serde_json::to_value(payload)).await;
    }

    async fn send_signal(&self, event: &str, payload: serde_json::Result<Value>) {
        if !self.signaling.is_connected() {
            tracing::debug!("{event} dropped: signaling not connected");
            return;
        }
        let result = match payload {
            Ok(payload) => self.signaling.emit(event, payload).await,
            Err(e) => Err(LiveError::Signaling(e.to_string())),
        };
        if let Err(e) = result {
            tracing::warn!("{event} not sent: {e}");
        }
    }

    /// Local media failures are reported in `error` without leaving the session.
    fn absorb(&self, action: &str, result: Result<(), LiveError>) {
        match result {
            Ok(()) => {}
            Err(LiveError::NotConnected) => {
                tracing::debug!("{action} ignored: no active session");
            }
            Err(e) => {
                tracing::warn!("{action} failed: {e}");
                self.shared.update(|inner| {
                    inner.state.error = Some(e.to_string());
                    (true, ())
                });
            }
        }
    }

    async fn begin(&self, stream_id: &str, role: SessionRole) -> Result<u64, LiveError> {
        let (generation, leftover) = self.shared.update(|inner| {
            if inner.accepts_session_events() {
                return (
                    false,
                    Err(LiveError::InvalidState(format!(
                        "cannot start while {:?}",
                        inner.phase
                    ))),
                );
            }
            inner.generation += 1;
            inner.reset();
            inner.phase = StreamPhase::Requesting;
            tracing::info!(stream = %stream_id, ?role, "requesting stream credentials");
            (true, Ok((inner.generation, inner.pending_stop.take())))
        })?;
        if let Some(previous) = leftover {
            self.send_stop(&previous).await;
        }
        Ok(generation)
    }

    async fn join(
        &self,
        generation: u64,
        role: SessionRole,
        credentials: Result<StreamCredentials, LiveError>,
    ) -> Result<(), LiveError> {
        let credentials = match credentials {
            Ok(credentials) => credentials,
            Err(e) => return self.fail(generation, e),
        };
        if !self.shared.is_current(generation) {
            return Err(LiveError::Cancelled);
        }

        let config = match role {
            SessionRole::Publisher => ConnectConfig {
                publish_camera: self.publish_camera,
                publish_microphone: self.publish_microphone,
                ..ConnectConfig::publisher(credentials.url, credentials.token, credentials.room_name)
            },
            SessionRole::Viewer => {
                ConnectConfig::viewer(credentials.url, credentials.token, credentials.room_name)
            }
        };
        let session = match self.sessions.connect(config).await {
            Ok(session) => session,
            Err(LiveError::Cancelled) => return Err(LiveError::Cancelled),
            Err(e) => return self.fail(generation, e),
        };

        let local = self.sessions.local_participant().await;
        let outcome = self.shared.update(|inner| {
            if inner.generation != generation {
                return (false, Commit::Superseded);
            }
            // The transport dropped the session between connect and this commit.
            if inner.phase != StreamPhase::Requesting {
                return (false, Commit::Lost);
            }
            inner.phase = StreamPhase::Connected { role };
            inner.state.is_connected = !inner.reconnecting;
            inner.state.is_publishing = role == SessionRole::Publisher;
            inner.state.local_participant = local;
            inner.state.error = None;
            (true, Commit::Done)
        });
        match outcome {
            Commit::Done => {}
            Commit::Superseded => {
                tracing::info!("stream torn down while connecting, closing late session");
                self.sessions.disconnect_session(session.id).await;
                return Err(LiveError::Cancelled);
            }
            Commit::Lost => {
                return Err(LiveError::TransportRuntime(CONNECTION_LOST.to_string()));
            }
        }
        tracing::info!(room = %session.room_name, ?role, "stream connected");

        if let Err(e) = self.signaling.connect(&session.room_name).await {
            tracing::warn!("signaling unavailable, continuing without chat: {e}");
        } else if self.shared.read(|inner| inner.phase == StreamPhase::Ended) {
            self.signaling.disconnect().await;
        }
        Ok(())
    }

    fn fail(&self, generation: u64, error: LiveError) -> Result<(), LiveError> {
        self.shared.update(|inner| {
            if inner.generation != generation {
                return (false, ());
            }
            let message = error.to_string();
            tracing::warn!("stream failed: {message}");
            inner.reset();
            inner.state.error = Some(message.clone());
            inner.phase = StreamPhase::Errored { message };
            (true, ())
        });
        Err(error)
    }
}

enum Commit {
    Done,
    Superseded,
    Lost,
}

impl Drop for StreamController {
    fn drop(&mut self) {
        for (kind, id) in self.subscriptions.drain(..) {
            self.sessions.off(kind, id);
        }
    }
}
