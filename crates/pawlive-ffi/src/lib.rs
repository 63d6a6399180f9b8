//! UniFFI bindings for pawlive-core.
//!
//! Provides a LiveClient object that wraps SessionManager, StreamController
//! and SettingsStore into a single FFI-safe interface.

use std::sync::Arc;

use pawlive_core::{
    self, CameraFacing as CoreCameraFacing, ConnectionState as CoreConnectionState,
    LiveMessage as CoreLiveMessage, LocalMediaState as CoreLocalMediaState,
    Participant as CoreParticipant, SessionRole as CoreSessionRole,
    StreamControllerState as CoreStreamState, StreamPhase as CoreStreamPhase,
    TrackKind as CoreTrackKind, TrackPublication as CoreTrackPublication,
    TrackSource as CoreTrackSource,
};

uniffi::include_scaffolding!("pawlive");

// ── Namespace functions ──────────────────────────────────────────────

/// Initialize tracing/logging. Call once from the host before creating a LiveClient.
fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pawlive_core=debug,pawlive_ffi=debug"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .init();
    });
}

// ── FFI-safe type conversions ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum SessionRole {
    Publisher,
    Viewer,
}

impl From<CoreSessionRole> for SessionRole {
    fn from(r: CoreSessionRole) -> Self {
        match r {
            CoreSessionRole::Publisher => Self::Publisher,
            CoreSessionRole::Viewer => Self::Viewer,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TrackKind {
    Audio,
    Video,
}

impl From<CoreTrackKind> for TrackKind {
    fn from(k: CoreTrackKind) -> Self {
        match k {
            CoreTrackKind::Audio => Self::Audio,
            CoreTrackKind::Video => Self::Video,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TrackSource {
    Camera,
    Microphone,
    ScreenShare,
    Unknown,
}

impl From<CoreTrackSource> for TrackSource {
    fn from(s: CoreTrackSource) -> Self {
        match s {
            CoreTrackSource::Camera => Self::Camera,
            CoreTrackSource::Microphone => Self::Microphone,
            CoreTrackSource::ScreenShare => Self::ScreenShare,
            CoreTrackSource::Unknown => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CameraFacing {
    Front,
    Back,
}

impl From<CoreCameraFacing> for CameraFacing {
    fn from(f: CoreCameraFacing) -> Self {
        match f {
            CoreCameraFacing::Front => Self::Front,
            CoreCameraFacing::Back => Self::Back,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl From<CoreConnectionState> for ConnectionState {
    fn from(s: CoreConnectionState) -> Self {
        match s {
            CoreConnectionState::Disconnected => Self::Disconnected,
            CoreConnectionState::Connecting => Self::Connecting,
            CoreConnectionState::Connected => Self::Connected,
            CoreConnectionState::Reconnecting { attempt } => Self::Reconnecting { attempt },
        }
    }
}

#[derive(Debug, Clone)]
pub enum StreamPhase {
    Idle,
    Requesting,
    Connected { role: SessionRole },
    Ended,
    Errored { message: String },
}

impl From<CoreStreamPhase> for StreamPhase {
    fn from(p: CoreStreamPhase) -> Self {
        match p {
            CoreStreamPhase::Idle => Self::Idle,
            CoreStreamPhase::Requesting => Self::Requesting,
            CoreStreamPhase::Connected { role } => Self::Connected { role: role.into() },
            CoreStreamPhase::Ended => Self::Ended,
            CoreStreamPhase::Errored { message } => Self::Errored { message },
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackPublication {
    pub sid: String,
    pub kind: TrackKind,
    pub source: TrackSource,
    pub muted: bool,
}

impl From<CoreTrackPublication> for TrackPublication {
    fn from(t: CoreTrackPublication) -> Self {
        Self {
            sid: t.sid,
            kind: t.kind.into(),
            source: t.source.into(),
            muted: t.muted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub sid: String,
    pub identity: String,
    pub name: Option<String>,
    pub tracks: Vec<TrackPublication>,
}

impl From<CoreParticipant> for Participant {
    fn from(p: CoreParticipant) -> Self {
        Self {
            sid: p.sid,
            identity: p.identity,
            name: p.name,
            tracks: p.tracks.into_iter().map(TrackPublication::from).collect(),
        }
    }
}

#[derive(Debug, Clone)]
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

impl From<CoreLiveMessage> for LiveMessage {
    fn from(m: CoreLiveMessage) -> Self {
        match m {
            CoreLiveMessage::Chat { id, sender_id, sender_name, content, timestamp_ms } => {
                Self::Chat { id, sender_id, sender_name, content, timestamp_ms }
            }
            CoreLiveMessage::Reaction { id, sender_id, sender_name, emoji, timestamp_ms } => {
                Self::Reaction { id, sender_id, sender_name, emoji, timestamp_ms }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamState {
    pub is_connected: bool,
    pub is_publishing: bool,
    pub participants: Vec<Participant>,
    pub local_participant: Option<Participant>,
    pub viewer_count: u32,
    pub error: Option<String>,
    pub messages: Vec<LiveMessage>,
}

impl From<CoreStreamState> for StreamState {
    fn from(s: CoreStreamState) -> Self {
        Self {
            is_connected: s.is_connected,
            is_publishing: s.is_publishing,
            participants: s.participants.into_iter().map(Participant::from).collect(),
            local_participant: s.local_participant.map(Participant::from),
            viewer_count: s.viewer_count,
            error: s.error,
            messages: s.messages.into_iter().map(LiveMessage::from).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalMediaState {
    pub camera_enabled: bool,
    pub mic_enabled: bool,
    pub camera_facing: CameraFacing,
}

impl From<CoreLocalMediaState> for LocalMediaState {
    fn from(m: CoreLocalMediaState) -> Self {
        Self {
            camera_enabled: m.camera_enabled,
            mic_enabled: m.mic_enabled,
            camera_facing: m.camera_facing.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_base_url: String,
    pub signaling_url: String,
    pub camera_enabled_on_start: bool,
    pub mic_enabled_on_start: bool,
    pub request_timeout_secs: u64,
}

impl From<pawlive_core::LiveSettings> for Settings {
    fn from(s: pawlive_core::LiveSettings) -> Self {
        Self {
            api_base_url: s.api_base_url,
            signaling_url: s.signaling_url,
            camera_enabled_on_start: s.camera_enabled_on_start,
            mic_enabled_on_start: s.mic_enabled_on_start,
            request_timeout_secs: s.request_timeout_secs,
        }
    }
}

// ── Error conversion ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("Token request failed: {msg}")]
    TokenRequest { msg: String },
    #[error("Transport connect failed: {msg}")]
    TransportConnect { msg: String },
    #[error("Transport error: {msg}")]
    TransportRuntime { msg: String },
    #[error("Signaling error: {msg}")]
    Signaling { msg: String },
    #[error("Not connected")]
    NotConnected,
    #[error("Cancelled")]
    Cancelled,
    #[error("Invalid state: {msg}")]
    InvalidState { msg: String },
    #[error("Configuration error: {msg}")]
    Config { msg: String },
    /// A bug inside the library surfaced as a panic.
    #[error("Internal error: {msg}")]
    Internal { msg: String },
}

impl From<pawlive_core::LiveError> for LiveError {
    fn from(e: pawlive_core::LiveError) -> Self {
        tracing::error!("LiveError: {e}");
        match e {
            pawlive_core::LiveError::TokenRequest(msg) => Self::TokenRequest { msg },
            pawlive_core::LiveError::TransportConnect(msg) => Self::TransportConnect { msg },
            pawlive_core::LiveError::TransportRuntime(msg) => Self::TransportRuntime { msg },
            pawlive_core::LiveError::Signaling(msg) => Self::Signaling { msg },
            pawlive_core::LiveError::NotConnected => Self::NotConnected,
            pawlive_core::LiveError::Cancelled => Self::Cancelled,
            pawlive_core::LiveError::InvalidState(msg) => Self::InvalidState { msg },
            pawlive_core::LiveError::Config(msg) => Self::Config { msg },
        }
    }
}

// ── Callback interface ────────────────────────────────────────────────

pub trait LiveStateListener: Send + Sync {
    fn on_state_changed(&self, phase: StreamPhase, state: StreamState);
}

// ── Bridge listener: FFI callback → core listener ─────────────────────

struct BridgeListener {
    ffi_listener: Arc<dyn LiveStateListener>,
}

impl pawlive_core::StateListener for BridgeListener {
    fn on_state_changed(&self, phase: &CoreStreamPhase, state: &CoreStreamState) {
        self.ffi_listener
            .on_state_changed(phase.clone().into(), state.clone().into());
    }
}

// ── LiveClient: main FFI object ───────────────────────────────────────

pub struct LiveClient {
    sessions: Arc<pawlive_core::SessionManager>,
    controller: pawlive_core::StreamController,
    settings: pawlive_core::SettingsStore,
    rt: tokio::runtime::Runtime,
}

impl LiveClient {
    /// URL and media settings are read once here; changes apply to the next client.
    pub fn new(data_dir: String, auth_token: Option<String>) -> Result<Self, LiveError> {
        let rt = tokio::runtime::Runtime::new().map_err(|e| LiveError::Config {
            msg: format!("tokio runtime: {e}"),
        })?;
        let settings = pawlive_core::SettingsStore::new(&data_dir);
        let current = settings.get();

        let broker = pawlive_core::HttpTokenBroker::new(
            &current.api_base_url,
            auth_token.clone(),
            current.request_timeout(),
        )?;
        let signaling = pawlive_core::SocketIoSignalingChannel::new(&current.signaling_url, auth_token)?;
        let sessions = Arc::new(pawlive_core::SessionManager::new(Arc::new(
            pawlive_core::LiveKitTransport::new(),
        )));
        let controller = pawlive_core::StreamController::new(
            sessions.clone(),
            Arc::new(broker),
            Arc::new(signaling),
        )
        .with_publish_defaults(current.camera_enabled_on_start, current.mic_enabled_on_start);

        tracing::info!("LiveClient created (api {})", current.api_base_url);
        Ok(Self {
            sessions,
            controller,
            settings,
            rt,
        })
    }

    pub fn start_stream(
        &self,
        stream_id: String,
        title: Option<String>,
        tags: Vec<String>,
    ) -> Result<(), LiveError> {
        let mut metadata = pawlive_core::StreamMetadata::new(stream_id);
        if let Some(title) = title {
            metadata.title = title;
        }
        metadata.tags = tags;
        guarded("start_stream", || {
            self.rt
                .block_on(self.controller.start_stream_with(metadata))
                .map_err(LiveError::from)
        })
    }

    pub fn watch_stream(&self, stream_id: String) -> Result<(), LiveError> {
        guarded("watch_stream", || {
            self.rt
                .block_on(self.controller.watch_stream(&stream_id))
                .map_err(LiveError::from)
        })
    }

    pub fn end_stream(&self) {
        self.rt.block_on(self.controller.end_stream());
    }

    pub fn toggle_camera(&self) {
        self.rt.block_on(self.controller.toggle_camera());
    }

    pub fn toggle_microphone(&self) {
        self.rt.block_on(self.controller.toggle_microphone());
    }

    pub fn switch_camera(&self) {
        self.rt.block_on(self.controller.switch_camera());
    }

    pub fn local_media(&self) -> Option<LocalMediaState> {
        self.rt
            .block_on(self.sessions.session())
            .map(|s| s.local_media.into())
    }

    pub fn send_chat_message(&self, text: String) {
        self.rt.block_on(self.controller.send_chat_message(&text));
    }

    pub fn send_reaction(&self, emoji: String) {
        self.rt.block_on(self.controller.send_reaction(&emoji));
    }

    pub fn state(&self) -> StreamState {
        self.controller.state().into()
    }

    pub fn phase(&self) -> StreamPhase {
        self.controller.phase().into()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.rt.block_on(self.sessions.connection_state()).into()
    }

    pub fn add_listener(&self, listener: Box<dyn LiveStateListener>) {
        let bridge = Arc::new(BridgeListener {
            ffi_listener: Arc::from(listener),
        });
        self.controller.add_listener(bridge);
    }

    pub fn get_settings(&self) -> Settings {
        self.settings.get().into()
    }

    pub fn set_api_base_url(&self, url: String) {
        self.settings.set_api_base_url(url);
    }

    pub fn set_signaling_url(&self, url: String) {
        self.settings.set_signaling_url(url);
    }

    pub fn set_camera_enabled_on_start(&self, enabled: bool) {
        self.settings.set_camera_enabled_on_start(enabled);
    }

    pub fn set_mic_enabled_on_start(&self, enabled: bool) {
        self.settings.set_mic_enabled_on_start(enabled);
    }
}

/// Keep panics from crossing the FFI boundary.
fn guarded<T>(
    operation: &str,
    f: impl FnOnce() -> Result<T, LiveError>,
) -> Result<T, LiveError> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic_info) => {
            let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            tracing::error!("panic in {operation}: {msg}");
            Err(LiveError::Internal {
                msg: format!("panic in {operation}: {msg}"),
            })
        }
    }
}
