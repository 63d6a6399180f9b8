//! [`MediaTransport`] backed by the LiveKit SDK.
//!
//! Native shells feed captured frames into the sources returned by
//! [`LiveKitConnection::video_source`] and [`LiveKitConnection::audio_source`].

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use livekit::options::TrackPublishOptions;
use livekit::prelude::*;
use livekit::track::{TrackKind as LkTrackKind, TrackSource as LkTrackSource};
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::prelude::*;
use livekit::webrtc::video_source::native::NativeVideoSource;
use tokio::sync::mpsc;

use crate::errors::LiveError;
use crate::events::{Participant, TrackKind, TrackPublication, TrackSource};
use crate::transport::{
    CameraFacing, MediaTransport, TransportConnection, TransportEvent, TransportEvents,
};

const AUDIO_SAMPLE_RATE: u32 = 48_000;
const AUDIO_CHANNELS: u32 = 1;
const AUDIO_QUEUE_SIZE_MS: u32 = 100;

const VIDEO_WIDTH: u32 = 1280;
const VIDEO_HEIGHT: u32 = 720;

#[derive(Default)]
pub struct LiveKitTransport;

impl LiveKitTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaTransport for LiveKitTransport {
    async fn connect(
        &self,
        url: &str,
        token: &str,
    ) -> Result<(Arc<dyn TransportConnection>, TransportEvents), LiveError> {
        let mut options = RoomOptions::default();
        options.auto_subscribe = true;

        let (room, mut room_events) = Room::connect(url, token, options)
            .await
            .map_err(|e| LiveError::TransportConnect(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = room_events.recv().await {
                let Some(mapped) = map_room_event(event) else {
                    continue;
                };
                let last = matches!(mapped, TransportEvent::Disconnected { .. });
                if tx.send(mapped).is_err() || last {
                    break;
                }
            }
            tracing::debug!("livekit event forwarder ended");
        });

        let connection = LiveKitConnection {
            room: Arc::new(room),
            video_source: Mutex::new(None),
            audio_source: Mutex::new(None),
            facing: Mutex::new(CameraFacing::default()),
        };
        Ok((Arc::new(connection), rx))
    }
}

pub struct LiveKitConnection {
    room: Arc<Room>,
    video_source: Mutex<Option<NativeVideoSource>>,
    audio_source: Mutex<Option<NativeAudioSource>>,
    facing: Mutex<CameraFacing>,
}

impl LiveKitConnection {
    pub fn video_source(&self) -> Option<NativeVideoSource> {
        self.video_source.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn audio_source(&self) -> Option<NativeAudioSource> {
        self.audio_source.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn camera_facing(&self) -> CameraFacing {
        *self.facing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn local_track(&self, source: TrackSource) -> Result<(LocalTrack, LkTrackSource), LiveError> {
        match source {
            TrackSource::Camera => {
                let native = NativeVideoSource::new(
                    VideoResolution {
                        width: VIDEO_WIDTH,
                        height: VIDEO_HEIGHT,
                    },
                    false,
                );
                let track =
                    LocalVideoTrack::create_video_track("camera", RtcVideoSource::Native(native.clone()));
                *self.video_source.lock().unwrap_or_else(PoisonError::into_inner) = Some(native);
                Ok((LocalTrack::Video(track), LkTrackSource::Camera))
            }
            TrackSource::Microphone => {
                let native = NativeAudioSource::new(
                    AudioSourceOptions {
                        echo_cancellation: true,
                        noise_suppression: true,
                        auto_gain_control: true,
                    },
                    AUDIO_SAMPLE_RATE,
                    AUDIO_CHANNELS,
                    AUDIO_QUEUE_SIZE_MS,
                );
                let track = LocalAudioTrack::create_audio_track(
                    "microphone",
                    RtcAudioSource::Native(native.clone()),
                );
                *self.audio_source.lock().unwrap_or_else(PoisonError::into_inner) = Some(native);
                Ok((LocalTrack::Audio(track), LkTrackSource::Microphone))
            }
            other => Err(LiveError::TransportRuntime(format!(
                "publishing {other:?} is not supported"
            ))),
        }
    }
}

#[async_trait]
impl TransportConnection for LiveKitConnection {
    fn local_participant(&self) -> Participant {
        let local = self.room.local_participant();
        Participant {
            name: non_empty(local.name().to_string()),
            ..Participant::new(local.sid().to_string(), local.identity().to_string())
        }
    }

    fn remote_participants(&self) -> Vec<Participant> {
        self.room
            .remote_participants()
            .values()
            .map(remote_participant)
            .collect()
    }

    async fn publish_track(&self, source: TrackSource) -> Result<TrackPublication, LiveError> {
        let (track, lk_source) = self.local_track(source)?;
        let publication = self
            .room
            .local_participant()
            .publish_track(
                track,
                TrackPublishOptions {
                    source: lk_source,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| LiveError::TransportRuntime(format!("publish {source:?}: {e}")))?;

        tracing::info!("{source:?} track published");
        Ok(TrackPublication {
            sid: publication.sid().to_string(),
            kind: source.kind(),
            source,
            muted: publication.is_muted(),
        })
    }

    async fn unpublish_track(&self, track_sid: &str) -> Result<(), LiveError> {
        let local = self.room.local_participant();
        let key = local
            .track_publications()
            .into_keys()
            .find(|sid| sid.to_string() == track_sid)
            .ok_or_else(|| LiveError::TransportRuntime(format!("unknown local track {track_sid}")))?;

        local
            .unpublish_track(&key)
            .await
            .map_err(|e| LiveError::TransportRuntime(format!("unpublish {track_sid}: {e}")))?;
        tracing::info!("track {track_sid} unpublished");
        Ok(())
    }

    async fn set_camera_facing(&self, facing: CameraFacing) -> Result<(), LiveError> {
        // Capture devices belong to the native shell; it reads the facing back.
        *self.facing.lock().unwrap_or_else(PoisonError::into_inner) = facing;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.room.close().await {
            tracing::warn!("error closing room: {e}");
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn map_source(source: LkTrackSource) -> TrackSource {
    match source {
        LkTrackSource::Microphone => TrackSource::Microphone,
        LkTrackSource::Camera => TrackSource::Camera,
        LkTrackSource::Screenshare => TrackSource::ScreenShare,
        _ => TrackSource::Unknown,
    }
}

fn map_publication(publication: &RemoteTrackPublication) -> TrackPublication {
    TrackPublication {
        sid: publication.sid().to_string(),
        kind: match publication.kind() {
            LkTrackKind::Audio => TrackKind::Audio,
            LkTrackKind::Video => TrackKind::Video,
        },
        source: map_source(publication.source()),
        muted: publication.is_muted(),
    }
}

fn remote_participant(p: &RemoteParticipant) -> Participant {
    Participant {
        name: non_empty(p.name().to_string()),
        tracks: p.track_publications().values().map(map_publication).collect(),
        ..Participant::new(p.sid().to_string(), p.identity().to_string())
    }
}

fn map_room_event(event: RoomEvent) -> Option<TransportEvent> {
    let mapped = match event {
        RoomEvent::ParticipantConnected(participant) => {
            TransportEvent::ParticipantConnected(remote_participant(&participant))
        }
        RoomEvent::ParticipantDisconnected(participant) => {
            TransportEvent::ParticipantDisconnected(remote_participant(&participant))
        }
        RoomEvent::TrackPublished { publication, participant } => TransportEvent::TrackPublished {
            publication: map_publication(&publication),
            participant: remote_participant(&participant),
        },
        RoomEvent::TrackUnpublished { publication, participant } => {
            TransportEvent::TrackUnpublished {
                publication: map_publication(&publication),
                participant: remote_participant(&participant),
            }
        }
        RoomEvent::Reconnecting => TransportEvent::Reconnecting,
        RoomEvent::Reconnected => TransportEvent::Reconnected,
        RoomEvent::Disconnected { reason } => TransportEvent::Disconnected {
            reason: format!("{reason:?}"),
        },
        _ => return None,
    };
    Some(mapped)
}
