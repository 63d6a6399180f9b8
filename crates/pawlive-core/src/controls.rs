use crate::errors::LiveError;
use crate::events::{DomainEvent, EventRegistry, TrackPublication, TrackSource};
use crate::session::SessionSlot;
use crate::transport::CameraFacing;

/// Local camera/microphone state of the active session.
///
/// A source counts as enabled while it has a published local track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalMediaState {
    pub camera_enabled: bool,
    pub mic_enabled: bool,
    pub camera_facing: CameraFacing,
}

impl LocalMediaState {
    pub(crate) fn from_tracks(tracks: &[TrackPublication], camera_facing: CameraFacing) -> Self {
        Self {
            camera_enabled: tracks.iter().any(|t| t.source == TrackSource::Camera),
            mic_enabled: tracks.iter().any(|t| t.source == TrackSource::Microphone),
            camera_facing,
        }
    }
}

/// Controls for local media (camera, microphone).
///
/// Enabling a source publishes a local track and emits `LocalTrackPublished`;
/// disabling unpublishes it and emits `LocalTrackUnpublished`.
/// Every operation fails with [`LiveError::NotConnected`] when no session is active.
#[derive(Clone)]
pub struct MediaControls {
    slot: SessionSlot,
    events: EventRegistry,
}

impl MediaControls {
    pub(crate) fn new(slot: SessionSlot, events: EventRegistry) -> Self {
        Self { slot, events }
    }

    /// Toggle the camera. Returns whether it is enabled afterwards.
    pub async fn toggle_camera(&self) -> Result<bool, LiveError> {
        self.toggle(TrackSource::Camera).await
    }

    /// Toggle the microphone. Returns whether it is enabled afterwards.
    pub async fn toggle_microphone(&self) -> Result<bool, LiveError> {
        self.toggle(TrackSource::Microphone).await
    }

    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<(), LiveError> {
        self.set_enabled(TrackSource::Camera, enabled).await
    }

    pub async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), LiveError> {
        self.set_enabled(TrackSource::Microphone, enabled).await
    }

    /// Flip between front and back camera. Returns the new facing.
    pub async fn switch_camera(&self) -> Result<CameraFacing, LiveError> {
        let mut slot = self.slot.lock().await;
        let session = slot.as_mut().ok_or(LiveError::NotConnected)?;

        let facing = session.camera_facing.flipped();
        session.connection.set_camera_facing(facing).await?;
        session.camera_facing = facing;

        tracing::info!("camera switched to {facing:?}");
        Ok(facing)
    }

    pub async fn state(&self) -> Option<LocalMediaState> {
        self.slot.lock().await.as_ref().map(|s| s.local_media())
    }

    async fn toggle(&self, source: TrackSource) -> Result<bool, LiveError> {
        let enabled = {
            let slot = self.slot.lock().await;
            let session = slot.as_ref().ok_or(LiveError::NotConnected)?;
            session.local_tracks.iter().any(|t| t.source == source)
        };
        self.set_enabled(source, !enabled).await?;
        Ok(!enabled)
    }

    async fn set_enabled(&self, source: TrackSource, enabled: bool) -> Result<(), LiveError> {
        let mut slot = self.slot.lock().await;
        let session = slot.as_mut().ok_or(LiveError::NotConnected)?;
        let existing = session.local_tracks.iter().position(|t| t.source == source);

        let event = match (existing, enabled) {
            (Some(_), true) | (None, false) => return Ok(()),
            (Some(index), false) => {
                let sid = session.local_tracks[index].sid.clone();
                session.connection.unpublish_track(&sid).await?;
                DomainEvent::LocalTrackUnpublished(session.local_tracks.remove(index))
            }
            (None, true) => {
                let publication = session.connection.publish_track(source).await?;
                session.local_tracks.push(publication.clone());
                DomainEvent::LocalTrackPublished(publication)
            }
        };
        drop(slot);

        tracing::info!("{source:?} enabled: {enabled}");
        self.events.emit(event);
        Ok(())
    }
}
