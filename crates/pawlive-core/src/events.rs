use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Connection state of the media session owned by `SessionManager`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Publisher,
    Viewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Camera,
    Microphone,
    ScreenShare,
    Unknown,
}

impl TrackSource {
    pub fn kind(self) -> TrackKind {
        match self {
            TrackSource::Microphone => TrackKind::Audio,
            _ => TrackKind::Video,
        }
    }
}

/// A single published media stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackPublication {
    pub sid: String,
    pub kind: TrackKind,
    pub source: TrackSource,
    pub muted: bool,
}

/// A remote (or the local) identity in a room.
///
/// Identity is the `sid`; two values with the same sid describe the same participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub sid: String,
    pub identity: String,
    pub name: Option<String>,
    pub tracks: Vec<TrackPublication>,
}

impl Participant {
    pub fn new(sid: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            identity: identity.into(),
            name: None,
            tracks: Vec::new(),
        }
    }

    /// Insert or replace a publication, keyed by track sid.
    pub fn upsert_track(&mut self, publication: TrackPublication) {
        match self.tracks.iter_mut().find(|t| t.sid == publication.sid) {
            Some(existing) => *existing = publication,
            None => self.tracks.push(publication),
        }
    }

    pub fn remove_track(&mut self, track_sid: &str) {
        self.tracks.retain(|t| t.sid != track_sid);
    }
}

/// Typed events fanned out by `SessionManager`.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    TrackPublished {
        publication: TrackPublication,
        participant: Participant,
    },
    TrackUnpublished {
        publication: TrackPublication,
        participant: Participant,
    },
    ParticipantConnected(Participant),
    ParticipantDisconnected(Participant),
    Disconnected,
    Reconnecting,
    Reconnected,
    ConnectionStateChanged(ConnectionState),
    LocalTrackPublished(TrackPublication),
    LocalTrackUnpublished(TrackPublication),
}

/// Discriminant of [`DomainEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainEventKind {
    TrackPublished,
    TrackUnpublished,
    ParticipantConnected,
    ParticipantDisconnected,
    Disconnected,
    Reconnecting,
    Reconnected,
    ConnectionStateChanged,
    LocalTrackPublished,
    LocalTrackUnpublished,
}

impl DomainEventKind {
    pub const ALL: [DomainEventKind; 10] = [
        DomainEventKind::TrackPublished,
        DomainEventKind::TrackUnpublished,
        DomainEventKind::ParticipantConnected,
        DomainEventKind::ParticipantDisconnected,
        DomainEventKind::Disconnected,
        DomainEventKind::Reconnecting,
        DomainEventKind::Reconnected,
        DomainEventKind::ConnectionStateChanged,
        DomainEventKind::LocalTrackPublished,
        DomainEventKind::LocalTrackUnpublished,
    ];
}

impl DomainEvent {
    pub fn kind(&self) -> DomainEventKind {
        match self {
            DomainEvent::TrackPublished { .. } => DomainEventKind::TrackPublished,
            DomainEvent::TrackUnpublished { .. } => DomainEventKind::TrackUnpublished,
            DomainEvent::ParticipantConnected(_) => DomainEventKind::ParticipantConnected,
            DomainEvent::ParticipantDisconnected(_) => DomainEventKind::ParticipantDisconnected,
            DomainEvent::Disconnected => DomainEventKind::Disconnected,
            DomainEvent::Reconnecting => DomainEventKind::Reconnecting,
            DomainEvent::Reconnected => DomainEventKind::Reconnected,
            DomainEvent::ConnectionStateChanged(_) => DomainEventKind::ConnectionStateChanged,
            DomainEvent::LocalTrackPublished(_) => DomainEventKind::LocalTrackPublished,
            DomainEvent::LocalTrackUnpublished(_) => DomainEventKind::LocalTrackUnpublished,
        }
    }
}

pub type EventCallback = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

/// Handle returned by [`EventRegistry::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Publish/subscribe table keyed by event kind.
///
/// Each kind maps to an insertion-ordered list of callbacks. Emission runs every
/// callback for the event's kind in subscription order; a panicking callback is
/// logged and skipped so the rest still run.
#[derive(Clone, Default)]
pub struct EventRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<DomainEventKind, Vec<(ListenerId, EventCallback)>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: DomainEventKind, callback: F) -> ListenerId
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns `false` if it was not registered for `kind`.
    pub fn off(&self, kind: DomainEventKind, id: ListenerId) -> bool {
        let mut listeners = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|(existing, _)| *existing != id);
        before != slot.len()
    }

    pub fn listener_count(&self, kind: DomainEventKind) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    pub fn emit(&self, event: DomainEvent) {
        let kind = event.kind();
        // Snapshot so callbacks may subscribe/unsubscribe without deadlocking.
        let callbacks: Vec<EventCallback> = {
            let listeners = self
                .inner
                .listeners
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match listeners.get(&kind) {
                Some(slot) => slot.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return,
            }
        };

        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                tracing::error!("listener for {kind:?} panicked, continuing with remaining listeners");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn registry_dispatches_to_listener() {
        let registry = EventRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        registry.on(DomainEventKind::Reconnecting, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.emit(DomainEvent::Reconnecting);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn two_listeners_run_once_in_registration_order() {
        let registry = EventRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        registry.on(DomainEventKind::Reconnected, move |_| o1.lock().unwrap().push("first"));
        registry.on(DomainEventKind::Reconnected, move |_| o2.lock().unwrap().push("second"));

        registry.emit(DomainEvent::Reconnected);

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn listeners_only_see_their_kind() {
        let registry = EventRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        registry.on(DomainEventKind::Disconnected, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.emit(DomainEvent::Reconnecting);
        registry.emit(DomainEvent::ConnectionStateChanged(ConnectionState::Connected));

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn off_stops_delivery() {
        let registry = EventRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = registry.on(DomainEventKind::Reconnecting, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.emit(DomainEvent::Reconnecting);
        assert!(registry.off(DomainEventKind::Reconnecting, id));
        registry.emit(DomainEvent::Reconnecting);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.listener_count(DomainEventKind::Reconnecting), 0);
        assert!(!registry.off(DomainEventKind::Reconnecting, id));
    }

    #[test]
    fn off_with_wrong_kind_keeps_listener() {
        let registry = EventRegistry::new();
        let id = registry.on(DomainEventKind::Reconnecting, |_| {});
        assert!(!registry.off(DomainEventKind::Reconnected, id));
        assert_eq!(registry.listener_count(DomainEventKind::Reconnecting), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let registry = EventRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry.on(DomainEventKind::Disconnected, |_| panic!("listener failure"));
        let c = count.clone();
        registry.on(DomainEventKind::Disconnected, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.emit(DomainEvent::Disconnected);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emitter_delivers_correct_events() {
        let registry = EventRegistry::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        registry.on(DomainEventKind::ParticipantDisconnected, move |ev| {
            e.lock().unwrap().push(ev.clone());
        });

        registry.emit(DomainEvent::ParticipantDisconnected(Participant::new("p1", "alice")));

        let captured = events.lock().unwrap();
        assert_eq!(captured.len(), 1);
        match &captured[0] {
            DomainEvent::ParticipantDisconnected(p) => assert_eq!(p.sid, "p1"),
            other => panic!("expected ParticipantDisconnected, got {other:?}"),
        }
    }

    #[test]
    fn every_variant_maps_to_its_kind() {
        let publication = TrackPublication {
            sid: "t1".into(),
            kind: TrackKind::Video,
            source: TrackSource::Camera,
            muted: false,
        };
        let participant = Participant::new("p1", "alice");
        let events = [
            DomainEvent::TrackPublished {
                publication: publication.clone(),
                participant: participant.clone(),
            },
            DomainEvent::TrackUnpublished {
                publication: publication.clone(),
                participant: participant.clone(),
            },
            DomainEvent::ParticipantConnected(participant.clone()),
            DomainEvent::ParticipantDisconnected(participant),
            DomainEvent::Disconnected,
            DomainEvent::Reconnecting,
            DomainEvent::Reconnected,
            DomainEvent::ConnectionStateChanged(ConnectionState::Connecting),
            DomainEvent::LocalTrackPublished(publication.clone()),
            DomainEvent::LocalTrackUnpublished(publication),
        ];
        let kinds: Vec<_> = events.iter().map(DomainEvent::kind).collect();
        assert_eq!(kinds, DomainEventKind::ALL.to_vec());
    }

    #[test]
    fn upsert_track_replaces_by_sid() {
        let mut p = Participant::new("p1", "alice");
        let mut publication = TrackPublication {
            sid: "t1".into(),
            kind: TrackKind::Audio,
            source: TrackSource::Microphone,
            muted: false,
        };
        p.upsert_track(publication.clone());
        publication.muted = true;
        p.upsert_track(publication);
        assert_eq!(p.tracks.len(), 1);
        assert!(p.tracks[0].muted);
        p.remove_track("t1");
        assert!(p.tracks.is_empty());
    }
}
