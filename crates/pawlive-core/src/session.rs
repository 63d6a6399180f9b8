use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::controls::{LocalMediaState, MediaControls};
use crate::errors::LiveError;
use crate::events::{
    ConnectionState, DomainEvent, DomainEventKind, EventRegistry, ListenerId, Participant,
    SessionRole, TrackPublication, TrackSource,
};
use crate::transport::{
    CameraFacing, MediaTransport, TransportConnection, TransportEvent, TransportEvents,
};

/// Parameters for [`SessionManager::connect`].
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub url: String,
    pub token: String,
    pub room_name: String,
    pub role: SessionRole,
    /// Publish a camera track on connect (publisher sessions only).
    pub publish_camera: bool,
    /// Publish a microphone track on connect (publisher sessions only).
    pub publish_microphone: bool,
}

impl ConnectConfig {
    pub fn viewer(url: impl Into<String>, token: impl Into<String>, room_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            room_name: room_name.into(),
            role: SessionRole::Viewer,
            publish_camera: false,
            publish_microphone: false,
        }
    }

    pub fn publisher(url: impl Into<String>, token: impl Into<String>, room_name: impl Into<String>) -> Self {
        Self {
            role: SessionRole::Publisher,
            publish_camera: true,
            publish_microphone: true,
            ..Self::viewer(url, token, room_name)
        }
    }
}

/// Snapshot of the active session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// Distinguishes successive sessions of one manager.
    pub id: u64,
    pub role: SessionRole,
    pub room_name: String,
    pub connection_state: ConnectionState,
    pub local_media: LocalMediaState,
}

pub(crate) struct ActiveSession {
    pub(crate) id: u64,
    pub(crate) role: SessionRole,
    pub(crate) room_name: String,
    pub(crate) connection: Arc<dyn TransportConnection>,
    pub(crate) local_participant: Participant,
    pub(crate) local_tracks: Vec<TrackPublication>,
    pub(crate) camera_facing: CameraFacing,
    pump: Option<JoinHandle<()>>,
}

impl ActiveSession {
    pub(crate) fn local_media(&self) -> LocalMediaState {
        LocalMediaState::from_tracks(&self.local_tracks, self.camera_facing)
    }
}

pub(crate) type SessionSlot = Arc<Mutex<Option<ActiveSession>>>;

/// Sole owner of the media transport connection.
///
/// Holds at most one session. `connect` tears down any existing session first,
/// `disconnect` is idempotent. Low-level transport events are normalized into
/// [`DomainEvent`]s and delivered in transport order to subscribers registered with
/// [`SessionManager::on`].
///
/// Construct one per application (or per logical streaming context) and inject it
/// into the `StreamController`; call `disconnect` before dropping it.
pub struct SessionManager {
    transport: Arc<dyn MediaTransport>,
    events: EventRegistry,
    slot: SessionSlot,
    connection_state: Arc<Mutex<ConnectionState>>,
    /// Bumped on every teardown. A connect that resolves under a stale epoch is
    /// closed instead of installed.
    epoch: Arc<AtomicU64>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn MediaTransport>) -> Self {
        Self {
            transport,
            events: EventRegistry::new(),
            slot: Arc::new(Mutex::new(None)),
            connection_state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn on<F>(&self, kind: DomainEventKind, callback: F) -> ListenerId
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, callback)
    }

    pub fn off(&self, kind: DomainEventKind, id: ListenerId) -> bool {
        self.events.off(kind, id)
    }

    pub fn listener_count(&self, kind: DomainEventKind) -> usize {
        self.events.listener_count(kind)
    }

    /// Create local media controls bound to this manager's session.
    pub fn controls(&self) -> MediaControls {
        MediaControls::new(self.slot.clone(), self.events.clone())
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.connection_state.lock().await.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    pub async fn session(&self) -> Option<SessionInfo> {
        let slot = self.slot.lock().await;
        let session = slot.as_ref()?;
        Some(SessionInfo {
            id: session.id,
            role: session.role,
            room_name: session.room_name.clone(),
            connection_state: self.connection_state.lock().await.clone(),
            local_media: session.local_media(),
        })
    }

    /// Local participant with its currently published tracks.
    pub async fn local_participant(&self) -> Option<Participant> {
        let slot = self.slot.lock().await;
        let session = slot.as_ref()?;
        let mut participant = session.local_participant.clone();
        participant.tracks = session.local_tracks.clone();
        Some(participant)
    }

    /// Open a session. Any active session is disconnected first, and any connect
    /// still in flight is cancelled.
    pub async fn connect(&self, config: ConnectConfig) -> Result<SessionInfo, LiveError> {
        if self.is_active().await {
            tracing::warn!("connect called with an active session, tearing it down first");
        }
        self.disconnect().await;
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.set_connection_state(ConnectionState::Connecting).await;

        tracing::info!(room = %config.room_name, role = ?config.role, "connecting media session");

        let (connection, events) = match self.transport.connect(&config.url, &config.token).await {
            Ok(connected) => connected,
            Err(e) => {
                tracing::warn!("transport connect failed: {e}");
                self.abandon(epoch).await;
                return Err(match e {
                    LiveError::TransportConnect(_) => e,
                    other => LiveError::TransportConnect(other.to_string()),
                });
            }
        };

        let mut local_tracks = Vec::new();
        if config.role == SessionRole::Publisher {
            let wanted = [
                (config.publish_camera, TrackSource::Camera),
                (config.publish_microphone, TrackSource::Microphone),
            ];
            for (enabled, source) in wanted {
                if !enabled {
                    continue;
                }
                match connection.publish_track(source).await {
                    Ok(publication) => local_tracks.push(publication),
                    Err(e) => {
                        tracing::warn!("publishing {source:?} failed: {e}");
                        connection.close().await;
                        self.abandon(epoch).await;
                        return Err(LiveError::TransportConnect(format!("publish {source:?}: {e}")));
                    }
                }
            }
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let remote = connection.remote_participants();
        let published = local_tracks.clone();
        let info = {
            let mut slot = self.slot.lock().await;
            if self.epoch.load(Ordering::SeqCst) != epoch {
                drop(slot);
                tracing::info!("session torn down while connecting, closing late connection");
                connection.close().await;
                return Err(LiveError::Cancelled);
            }

            let pump = tokio::spawn(Self::event_loop(
                events,
                ready_rx,
                epoch,
                self.events.clone(),
                self.slot.clone(),
                self.connection_state.clone(),
                self.epoch.clone(),
            ));
            let session = ActiveSession {
                id: epoch,
                role: config.role,
                room_name: config.room_name.clone(),
                local_participant: connection.local_participant(),
                connection,
                local_tracks,
                camera_facing: CameraFacing::default(),
                pump: Some(pump),
            };
            let info = SessionInfo {
                id: session.id,
                role: session.role,
                room_name: session.room_name.clone(),
                connection_state: ConnectionState::Connected,
                local_media: session.local_media(),
            };
            *slot = Some(session);
            *self.connection_state.lock().await = ConnectionState::Connected;
            info
        };

        tracing::info!(room = %info.room_name, "media session connected");
        self.emit_if_current(epoch, DomainEvent::ConnectionStateChanged(ConnectionState::Connected));
        for participant in remote {
            self.emit_if_current(epoch, DomainEvent::ParticipantConnected(participant));
        }
        for publication in published {
            self.emit_if_current(epoch, DomainEvent::LocalTrackPublished(publication));
        }
        // Live transport events start flowing only after the seeded ones.
        let _ = ready_tx.send(());

        Ok(info)
    }

    /// Tear down the active session, if any. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let taken = {
            let mut slot = self.slot.lock().await;
            self.epoch.fetch_add(1, Ordering::SeqCst);
            slot.take()
        };
        self.teardown(taken).await;
    }

    /// Tear down the session identified by `id`, leaving any newer session alone.
    pub async fn disconnect_session(&self, id: u64) {
        let taken = {
            let mut slot = self.slot.lock().await;
            if slot.as_ref().is_none_or(|s| s.id != id) {
                tracing::debug!("session {id} already gone");
                return;
            }
            self.epoch.fetch_add(1, Ordering::SeqCst);
            slot.take()
        };
        self.teardown(taken).await;
    }

    async fn teardown(&self, taken: Option<ActiveSession>) {
        match taken {
            Some(mut session) => {
                if let Some(pump) = session.pump.take() {
                    pump.abort();
                }
                session.connection.close().await;
                self.set_connection_state(ConnectionState::Disconnected).await;
                tracing::info!(room = %session.room_name, "media session disconnected");
            }
            None => {
                let mut state = self.connection_state.lock().await;
                if *state != ConnectionState::Disconnected {
                    *state = ConnectionState::Disconnected;
                    drop(state);
                    self.events.emit(DomainEvent::ConnectionStateChanged(ConnectionState::Disconnected));
                }
                tracing::debug!("disconnect with no active session");
            }
        }
    }

    /// Reset state after a failed connect, unless a teardown already superseded it.
    async fn abandon(&self, epoch: u64) {
        let slot = self.slot.lock().await;
        if self.epoch.load(Ordering::SeqCst) == epoch && slot.is_none() {
            drop(slot);
            self.set_connection_state(ConnectionState::Disconnected).await;
        }
    }

    fn emit_if_current(&self, epoch: u64, event: DomainEvent) {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            self.events.emit(event);
        }
    }

    async fn set_connection_state(&self, state: ConnectionState) {
        *self.connection_state.lock().await = state.clone();
        self.events.emit(DomainEvent::ConnectionStateChanged(state));
    }

    async fn event_loop(
        mut events: TransportEvents,
        ready: oneshot::Receiver<()>,
        epoch: u64,
        registry: EventRegistry,
        slot: SessionSlot,
        connection_state: Arc<Mutex<ConnectionState>>,
        epoch_counter: Arc<AtomicU64>,
    ) {
        if ready.await.is_err() {
            return;
        }
        let mut reconnect_attempt: u32 = 0;

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::ParticipantConnected(participant) => {
                    registry.emit(DomainEvent::ParticipantConnected(participant));
                }

                TransportEvent::ParticipantDisconnected(participant) => {
                    registry.emit(DomainEvent::ParticipantDisconnected(participant));
                }

                TransportEvent::TrackPublished { publication, participant } => {
                    registry.emit(DomainEvent::TrackPublished { publication, participant });
                }

                TransportEvent::TrackUnpublished { publication, participant } => {
                    registry.emit(DomainEvent::TrackUnpublished { publication, participant });
                }

                TransportEvent::Reconnecting => {
                    reconnect_attempt += 1;
                    let state = ConnectionState::Reconnecting { attempt: reconnect_attempt };
                    tracing::info!("media session reconnecting (attempt {reconnect_attempt})");
                    *connection_state.lock().await = state.clone();
                    registry.emit(DomainEvent::Reconnecting);
                    registry.emit(DomainEvent::ConnectionStateChanged(state));
                }

                TransportEvent::Reconnected => {
                    reconnect_attempt = 0;
                    tracing::info!("media session reconnected");
                    *connection_state.lock().await = ConnectionState::Connected;
                    registry.emit(DomainEvent::Reconnected);
                    registry.emit(DomainEvent::ConnectionStateChanged(ConnectionState::Connected));
                }

                TransportEvent::Disconnected { reason } => {
                    tracing::info!("media session dropped by transport: {reason}");
                    let taken = {
                        let mut slot = slot.lock().await;
                        if epoch_counter.load(Ordering::SeqCst) == epoch {
                            epoch_counter.fetch_add(1, Ordering::SeqCst);
                            slot.take()
                        } else {
                            None
                        }
                    };
                    if let Some(session) = taken {
                        *connection_state.lock().await = ConnectionState::Disconnected;
                        registry.emit(DomainEvent::Disconnected);
                        registry.emit(DomainEvent::ConnectionStateChanged(ConnectionState::Disconnected));
                        session.connection.close().await;
                    }
                    break;
                }
            }
        }

        tracing::debug!("session event loop ended");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.try_lock() {
            if let Some(mut session) = slot.take() {
                tracing::warn!(room = %session.room_name, "session manager dropped with an active session");
                if let Some(pump) = session.pump.take() {
                    pump.abort();
                }
            }
        }
    }
}
