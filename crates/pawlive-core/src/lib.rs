//! PawLive streaming core.
//!
//! Pure Rust session logic for live pet streams: media session ownership, typed
//! event fan-out, token exchange, chat/reaction signaling and the per-screen
//! stream state machine. Consumed by native UI shells via UniFFI bindings.

pub mod controller;
pub mod controls;
pub mod errors;
pub mod events;
#[cfg(feature = "livekit")]
pub mod livekit_transport;
pub mod participants;
pub mod session;
pub mod settings;
pub mod signaling;
pub mod token;
pub mod transport;

#[cfg(test)]
mod testing;

pub use controller::{LiveMessage, StateListener, StreamController, StreamControllerState, StreamPhase};
pub use controls::{LocalMediaState, MediaControls};
pub use errors::LiveError;
pub use events::{
    ConnectionState, DomainEvent, DomainEventKind, ListenerId, Participant, SessionRole,
    TrackKind, TrackPublication, TrackSource,
};
#[cfg(feature = "livekit")]
pub use livekit_transport::LiveKitTransport;
pub use session::{ConnectConfig, SessionInfo, SessionManager};
pub use settings::{LiveSettings, SettingsStore};
pub use signaling::{SignalingChannel, SocketIoSignalingChannel};
pub use token::{HttpTokenBroker, StreamCredentials, StreamMetadata, TokenBroker};
pub use transport::{CameraFacing, MediaTransport, TransportConnection, TransportEvent};
