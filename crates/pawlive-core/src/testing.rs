//! In-process fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;

use crate::errors::LiveError;
use crate::events::{DomainEvent, DomainEventKind, Participant, TrackPublication, TrackSource};
use crate::session::SessionManager;
use crate::signaling::{SignalHandler, SignalingChannel};
use crate::token::{StreamCredentials, StreamMetadata, TokenBroker};
use crate::transport::{CameraFacing, MediaTransport, TransportConnection, TransportEvent, TransportEvents};

/// Poll `cond` until it holds, failing the test after a second.
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

/// Subscribe to `kind` and collect every emitted event.
pub(crate) fn record_events(
    sessions: &SessionManager,
    kind: DomainEventKind,
) -> Arc<Mutex<Vec<DomainEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    sessions.on(kind, move |event| sink.lock().unwrap().push(event.clone()));
    seen
}

pub(crate) fn remote(sid: &str) -> Participant {
    Participant::new(sid, format!("identity-{sid}"))
}

// ── Media transport ──────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakeTransport {
    fail_next: Mutex<Option<String>>,
    hold: Mutex<Option<oneshot::Receiver<()>>>,
    fail_publish: Arc<AtomicBool>,
    remote: Mutex<Vec<Participant>>,
    on_connect: Mutex<Vec<TransportEvent>>,
    started: AtomicUsize,
    connects: Mutex<Vec<(String, String)>>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    senders: Mutex<Vec<UnboundedSender<TransportEvent>>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_next_connect(&self, reason: &str) {
        *self.fail_next.lock().unwrap() = Some(reason.to_string());
    }

    /// Make the next connect wait until the returned sender fires.
    pub(crate) fn hold_next_connect(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.hold.lock().unwrap() = Some(rx);
        tx
    }

    pub(crate) fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_remote(&self, participants: Vec<Participant>) {
        *self.remote.lock().unwrap() = participants;
    }

    /// Queue events on every new connection before connect returns.
    pub(crate) fn set_connect_events(&self, events: Vec<TransportEvent>) {
        *self.on_connect.lock().unwrap() = events;
    }

    pub(crate) fn connect_started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn last_connect(&self) -> Option<(String, String)> {
        self.connects.lock().unwrap().last().cloned()
    }

    pub(crate) fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.connections.lock().unwrap()[index].clone()
    }

    /// Push a low-level event on the most recent connection.
    pub(crate) fn send(&self, event: TransportEvent) {
        if let Some(tx) = self.senders.lock().unwrap().last() {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn connect(
        &self,
        url: &str,
        token: &str,
    ) -> Result<(Arc<dyn TransportConnection>, TransportEvents), LiveError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.connects.lock().unwrap().push((url.to_string(), token.to_string()));

        let hold = self.hold.lock().unwrap().take();
        if let Some(gate) = hold {
            let _ = gate.await;
        }
        if let Some(reason) = self.fail_next.lock().unwrap().take() {
            return Err(LiveError::TransportConnect(reason));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for event in self.on_connect.lock().unwrap().iter() {
            let _ = tx.send(event.clone());
        }
        let connection = Arc::new(FakeConnection {
            remote: self.remote.lock().unwrap().clone(),
            fail_publish: self.fail_publish.clone(),
            ..FakeConnection::default()
        });
        self.connections.lock().unwrap().push(connection.clone());
        self.senders.lock().unwrap().push(tx);
        Ok((connection, rx))
    }
}

#[derive(Default)]
pub(crate) struct FakeConnection {
    remote: Vec<Participant>,
    fail_publish: Arc<AtomicBool>,
    next_track: AtomicUsize,
    closed: AtomicUsize,
    published: Mutex<Vec<TrackPublication>>,
    unpublished: Mutex<Vec<String>>,
    facing: Mutex<CameraFacing>,
}

impl FakeConnection {
    pub(crate) fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn published(&self) -> Vec<TrackPublication> {
        self.published.lock().unwrap().clone()
    }

    pub(crate) fn unpublished(&self) -> Vec<String> {
        self.unpublished.lock().unwrap().clone()
    }

    pub(crate) fn facing(&self) -> CameraFacing {
        *self.facing.lock().unwrap()
    }
}

#[async_trait]
impl TransportConnection for FakeConnection {
    fn local_participant(&self) -> Participant {
        Participant::new("local", "identity-local")
    }

    fn remote_participants(&self) -> Vec<Participant> {
        self.remote.clone()
    }

    async fn publish_track(&self, source: TrackSource) -> Result<TrackPublication, LiveError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(LiveError::TransportRuntime("device unavailable".into()));
        }
        let n = self.next_track.fetch_add(1, Ordering::SeqCst);
        let publication = TrackPublication {
            sid: format!("TR_local_{n}"),
            kind: source.kind(),
            source,
            muted: false,
        };
        self.published.lock().unwrap().push(publication.clone());
        Ok(publication)
    }

    async fn unpublish_track(&self, track_sid: &str) -> Result<(), LiveError> {
        self.unpublished.lock().unwrap().push(track_sid.to_string());
        Ok(())
    }

    async fn set_camera_facing(&self, facing: CameraFacing) -> Result<(), LiveError> {
        *self.facing.lock().unwrap() = facing;
        Ok(())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Token broker ─────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakeBroker {
    fail: AtomicBool,
    fail_stop: AtomicBool,
    pub(crate) publish_requests: Mutex<Vec<StreamMetadata>>,
    pub(crate) view_requests: Mutex<Vec<String>>,
    pub(crate) stop_requests: Mutex<Vec<String>>,
}

impl FakeBroker {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_requests(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    fn credentials(&self) -> Result<StreamCredentials, LiveError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LiveError::TokenRequest("backend returned status 401".into()));
        }
        Ok(StreamCredentials {
            token: "t".into(),
            url: "u".into(),
            room_name: "r".into(),
        })
    }
}

#[async_trait]
impl TokenBroker for FakeBroker {
    async fn request_publish_token(
        &self,
        metadata: &StreamMetadata,
    ) -> Result<StreamCredentials, LiveError> {
        self.publish_requests.lock().unwrap().push(metadata.clone());
        self.credentials()
    }

    async fn request_view_token(&self, stream_id: &str) -> Result<StreamCredentials, LiveError> {
        self.view_requests.lock().unwrap().push(stream_id.to_string());
        self.credentials()
    }

    async fn request_stream_stop(&self, stream_id: &str) -> Result<(), LiveError> {
        self.stop_requests.lock().unwrap().push(stream_id.to_string());
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(LiveError::TokenRequest("stop failed".into()));
        }
        Ok(())
    }
}

// ── Signaling ────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakeSignaling {
    connected: AtomicBool,
    fail_connect: AtomicBool,
    pub(crate) rooms: Mutex<Vec<String>>,
    pub(crate) sent: Mutex<Vec<(String, Value)>>,
    disconnects: AtomicUsize,
    handlers: Mutex<HashMap<String, Vec<SignalHandler>>>,
}

impl FakeSignaling {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Simulate an incoming frame from the server.
    pub(crate) fn deliver(&self, event: &str, payload: Value) {
        let handlers = self.handlers.lock().unwrap().get(event).cloned().unwrap_or_default();
        for handler in handlers {
            handler(&payload);
        }
    }
}

#[async_trait]
impl SignalingChannel for FakeSignaling {
    async fn connect(&self, room_name: &str) -> Result<(), LiveError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(LiveError::Signaling("socket refused".into()));
        }
        self.rooms.lock().unwrap().push(room_name.to_string());
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), LiveError> {
        if !self.is_connected() {
            return Err(LiveError::Signaling("not connected".into()));
        }
        self.sent.lock().unwrap().push((event.to_string(), payload));
        Ok(())
    }

    fn on(&self, event: &str, handler: SignalHandler) {
        self.handlers
            .lock()
            .unwrap()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }
}
