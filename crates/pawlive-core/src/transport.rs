//! Seam between the session core and the real-time media library.
//!
//! A [`MediaTransport`] opens a [`TransportConnection`] to a media server and hands
//! back the low-level events of that connection, in the order the library produced
//! them, on an unbounded channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::errors::LiveError;
use crate::events::{Participant, TrackPublication, TrackSource};

/// Low-level events surfaced by a transport connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ParticipantConnected(Participant),
    ParticipantDisconnected(Participant),
    TrackPublished {
        publication: TrackPublication,
        participant: Participant,
    },
    TrackUnpublished {
        publication: TrackPublication,
        participant: Participant,
    },
    Reconnecting,
    Reconnected,
    Disconnected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraFacing {
    #[default]
    Front,
    Back,
}

impl CameraFacing {
    pub fn flipped(self) -> Self {
        match self {
            CameraFacing::Front => CameraFacing::Back,
            CameraFacing::Back => CameraFacing::Front,
        }
    }
}

pub type TransportEvents = UnboundedReceiver<TransportEvent>;

#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Establish a connection to the media server at `url` with `token`.
    async fn connect(
        &self,
        url: &str,
        token: &str,
    ) -> Result<(Arc<dyn TransportConnection>, TransportEvents), LiveError>;
}

#[async_trait]
pub trait TransportConnection: Send + Sync {
    fn local_participant(&self) -> Participant;

    /// Remote participants already present when the connection was established.
    fn remote_participants(&self) -> Vec<Participant>;

    async fn publish_track(&self, source: TrackSource) -> Result<TrackPublication, LiveError>;

    async fn unpublish_track(&self, track_sid: &str) -> Result<(), LiveError>;

    async fn set_camera_facing(&self, facing: CameraFacing) -> Result<(), LiveError>;

    /// Close the connection and stop producing events.
    async fn close(&self);
}
