#![allow(dead_code)]

use async_trait::async_trait;
use peercall::calls::CallPhase;
use peercall::media::{
    LocalStream, MediaConnection, MediaEngine, MediaError, MediaEvent, MediaEventSink, MediaTrack,
    TrackKind,
};
use peercall::transport::{Transport, TransportEvent, TransportFactory, TransportState};
use peercall::types::call::{CallId, CallIdGenerator, IceCandidate, SessionDescription};
use peercall::types::events::CallEndReason;
use peercall::{ClientConfig, ClientError, ReconnectPolicy, SignalingClient};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub const CALL_ID: &str = "1700000000";

pub fn offer() -> Value {
    json!({"type": "offer", "sdp": "O"})
}

pub fn answer() -> Value {
    json!({"type": "answer", "sdp": "A"})
}

pub fn candidate(tag: &str) -> Value {
    json!({"candidate": tag, "sdpMid": "0", "sdpMLineIndex": 0})
}

/// Polls `condition` until it holds, failing the test after a few seconds.
pub async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Always hands out the same call id.
pub struct FixedCallIds(pub &'static str);

impl CallIdGenerator for FixedCallIds {
    fn next_call_id(&self) -> CallId {
        CallId::from(self.0)
    }
}

// ---------------------------------------------------------------------------
// Rendezvous server stand-in
// ---------------------------------------------------------------------------

pub struct MockTransport {
    sent: Arc<Mutex<Vec<String>>>,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("socket closed"));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Transport factory whose every connection is a pair of in-memory channels.
/// Frames the client sends are collected across all connections.
#[derive(Default)]
pub struct MockServer {
    links: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
    sent: Arc<Mutex<Vec<String>>>,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn links(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    fn latest(&self) -> mpsc::Sender<TransportEvent> {
        self.links
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("client never connected")
    }

    pub async fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string()).await;
    }

    pub async fn push_raw(&self, text: &str) {
        self.latest()
            .send(TransportEvent::TextReceived(text.to_string()))
            .await
            .expect("client stopped reading");
    }

    /// Simulates the server dropping the current connection.
    pub async fn drop_link(&self) {
        let _ = self.latest().send(TransportEvent::Disconnected).await;
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|frame| serde_json::from_str(frame).expect("client sent invalid json"))
            .collect()
    }
}

#[async_trait]
impl TransportFactory for MockServer {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow::anyhow!("connection refused"));
        }

        let (tx, rx) = mpsc::channel(100);
        self.links.lock().unwrap().push(tx);
        let transport = Arc::new(MockTransport {
            sent: self.sent.clone(),
            closed: AtomicBool::new(false),
        });
        Ok((transport, rx))
    }
}

// ---------------------------------------------------------------------------
// Media engine stand-in
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum MediaCall {
    AcquireLocal,
    CreateConnection,
    AddLocalStream,
    CreateOffer,
    CreateAnswer,
    SetRemote(Value),
    AddCandidate(Value),
    Close,
    StopTrack(String),
}

#[derive(Default)]
struct EngineState {
    calls: Mutex<Vec<MediaCall>>,
    sink: Mutex<Option<MediaEventSink>>,
    fail_acquire: AtomicBool,
    fail_remote_description: AtomicBool,
    candidate_during_offer: AtomicBool,
    acquire_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl EngineState {
    fn record(&self, call: MediaCall) {
        self.calls.lock().unwrap().push(call);
    }
}

struct MockTrack {
    id: String,
    kind: TrackKind,
    state: Arc<EngineState>,
}

impl MediaTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) -> Result<(), MediaError> {
        self.state.record(MediaCall::StopTrack(self.id.clone()));
        Ok(())
    }
}

struct MockConnection {
    state: Arc<EngineState>,
}

#[async_trait]
impl MediaConnection for MockConnection {
    async fn add_local_stream(&self, _stream: &LocalStream) -> Result<(), MediaError> {
        self.state.record(MediaCall::AddLocalStream);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        self.state.record(MediaCall::CreateOffer);
        if self.state.candidate_during_offer.load(Ordering::SeqCst) {
            if let Some(sink) = self.state.sink.lock().unwrap().as_ref() {
                sink.emit(MediaEvent::LocalCandidate(IceCandidate::new(candidate(
                    "early",
                ))));
            }
        }
        Ok(SessionDescription::new(offer()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        self.state.record(MediaCall::CreateAnswer);
        Ok(SessionDescription::new(answer()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.state
            .record(MediaCall::SetRemote(description.as_value().clone()));
        if self.state.fail_remote_description.load(Ordering::SeqCst) {
            return Err(MediaError::Description("malformed sdp".into()));
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.state
            .record(MediaCall::AddCandidate(candidate.as_value().clone()));
        Ok(())
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.state.record(MediaCall::Close);
        Ok(())
    }
}

/// Records every call the signaling core makes into the media engine and
/// lets tests inject media events for the most recent connection.
#[derive(Default)]
pub struct MockMediaEngine {
    state: Arc<EngineState>,
}

impl MockMediaEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<MediaCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &MediaCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn candidates_applied(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MediaCall::AddCandidate(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    pub fn fail_acquire(&self) {
        self.state.fail_acquire.store(true, Ordering::SeqCst);
    }

    pub fn fail_remote_description(&self) {
        self.state
            .fail_remote_description
            .store(true, Ordering::SeqCst);
    }

    pub fn emit_candidate_during_offer(&self) {
        self.state
            .candidate_during_offer
            .store(true, Ordering::SeqCst);
    }

    /// Blocks the next local media acquisition until the returned sender
    /// fires or is dropped.
    pub fn hold_next_acquire(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.state.acquire_gate.lock().unwrap() = Some(rx);
        tx
    }

    /// Emits `event` as the media engine would for the latest connection.
    pub fn emit(&self, event: MediaEvent) {
        let sink = self.state.sink.lock().unwrap().clone();
        let sink = sink.expect("no media connection was created");
        assert!(sink.emit(event), "client dropped its media channel");
    }

    pub fn remote_track(&self, id: &str) -> Arc<dyn MediaTrack> {
        Arc::new(MockTrack {
            id: id.to_string(),
            kind: TrackKind::Video,
            state: self.state.clone(),
        })
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn acquire_local_media(&self) -> Result<LocalStream, MediaError> {
        self.state.record(MediaCall::AcquireLocal);
        let gate = self.state.acquire_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.state.fail_acquire.load(Ordering::SeqCst) {
            return Err(MediaError::Acquire("permission denied".into()));
        }

        let track = |id: &str, kind| -> Arc<dyn MediaTrack> {
            Arc::new(MockTrack {
                id: id.to_string(),
                kind,
                state: self.state.clone(),
            })
        };
        Ok(LocalStream::new(vec![
            track("mic", TrackKind::Audio),
            track("camera", TrackKind::Video),
        ]))
    }

    async fn create_connection(
        &self,
        events: MediaEventSink,
    ) -> Result<Arc<dyn MediaConnection>, MediaError> {
        self.state.record(MediaCall::CreateConnection);
        *self.state.sink.lock().unwrap() = Some(events);
        Ok(Arc::new(MockConnection {
            state: self.state.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Connection(TransportState, Option<String>),
    IncomingCalls(Vec<String>),
    LocalStream(Option<usize>),
    RemoteStream(Option<usize>),
    Connected(String),
    Ended(String, CallEndReason),
}

#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Observed>>>,
}

impl Recorder {
    pub fn attach(client: &SignalingClient) -> Self {
        let recorder = Self::default();
        let events = client.events();

        let seen = recorder.seen.clone();
        events.connection_state_changed.on(move |e| {
            seen.lock()
                .unwrap()
                .push(Observed::Connection(e.state, e.endpoint_id.clone()));
        });
        let seen = recorder.seen.clone();
        events.incoming_call_received.on(move |e| {
            let ids = e.calls.iter().map(|c| c.call_id.to_string()).collect();
            seen.lock().unwrap().push(Observed::IncomingCalls(ids));
        });
        let seen = recorder.seen.clone();
        events.local_stream_updated.on(move |e| {
            let tracks = e.stream.as_ref().map(|s| s.tracks().len());
            seen.lock().unwrap().push(Observed::LocalStream(tracks));
        });
        let seen = recorder.seen.clone();
        events.remote_stream_updated.on(move |e| {
            let tracks = e.stream.as_ref().map(|s| s.tracks().len());
            seen.lock().unwrap().push(Observed::RemoteStream(tracks));
        });
        let seen = recorder.seen.clone();
        events.call_connected.on(move |e| {
            seen.lock()
                .unwrap()
                .push(Observed::Connected(e.call_id.to_string()));
        });
        let seen = recorder.seen.clone();
        events.call_ended.on(move |e| {
            seen.lock()
                .unwrap()
                .push(Observed::Ended(e.call_id.to_string(), e.reason));
        });

        recorder
    }

    pub fn all(&self) -> Vec<Observed> {
        self.seen.lock().unwrap().clone()
    }

    /// Everything except transport state changes.
    pub fn call_events(&self) -> Vec<Observed> {
        self.all()
            .into_iter()
            .filter(|o| !matches!(o, Observed::Connection(..)))
            .collect()
    }

    pub fn connection_states(&self) -> Vec<TransportState> {
        self.all()
            .into_iter()
            .filter_map(|o| match o {
                Observed::Connection(state, _) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn ended(&self) -> Vec<(String, CallEndReason)> {
        self.all()
            .into_iter()
            .filter_map(|o| match o {
                Observed::Ended(id, reason) => Some((id, reason)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap().clear();
    }
}

// ---------------------------------------------------------------------------
// Running client
// ---------------------------------------------------------------------------

pub struct Harness {
    pub client: Arc<SignalingClient>,
    pub server: Arc<MockServer>,
    pub media: Arc<MockMediaEngine>,
    pub recorder: Recorder,
    pub run: JoinHandle<Result<(), ClientError>>,
}

impl Harness {
    /// A running client with the default policy, already connected.
    pub async fn connected() -> Self {
        Self::connected_with(ReconnectPolicy::Fixed(Duration::from_millis(50))).await
    }

    pub async fn connected_with(policy: ReconnectPolicy) -> Self {
        let harness = Self::start(MockServer::new(), policy);
        harness.wait_open().await;
        harness
    }

    pub fn start(server: Arc<MockServer>, policy: ReconnectPolicy) -> Self {
        let media = MockMediaEngine::new();
        let client = SignalingClient::builder(
            ClientConfig::new("ws://rendezvous.test").with_reconnect(policy),
        )
        .with_transport_factory(server.clone())
        .with_media_engine(media.clone())
        .with_call_id_generator(Arc::new(FixedCallIds(CALL_ID)))
        .build();
        let recorder = Recorder::attach(&client);

        let runner = client.clone();
        let run = tokio::spawn(async move { runner.run().await });

        Self {
            client,
            server,
            media,
            recorder,
            run,
        }
    }

    pub async fn wait_open(&self) {
        let client = self.client.clone();
        eventually("signaling link to open", || {
            let client = client.clone();
            async move { client.transport_state().await == TransportState::Open }
        })
        .await;
    }

    pub async fn wait_phase(&self, phase: CallPhase) {
        let client = self.client.clone();
        eventually(&format!("phase {phase:?}"), || {
            let client = client.clone();
            async move { client.phase().await == phase }
        })
        .await;
    }

    /// Waits until the client has sent `count` frames in total.
    pub async fn wait_sent(&self, count: usize) {
        let server = self.server.clone();
        eventually(&format!("{count} sent frames"), || {
            let server = server.clone();
            async move { server.sent().len() >= count }
        })
        .await;
    }

    /// Starts a call and drives it until media is connected.
    pub async fn establish_outgoing(&self) {
        self.client.start_call().await.expect("start_call failed");
        self.server
            .push(json!({"type": "call_answered", "call_id": CALL_ID, "answer": answer()}))
            .await;
        self.wait_phase(CallPhase::Negotiating).await;
        self.media.emit(MediaEvent::ConnectionStateChanged(
            peercall::media::PeerConnectionState::Connected,
        ));
        self.wait_phase(CallPhase::Active).await;
    }

    pub async fn shutdown(self) {
        self.client.disconnect().await;
        self.run
            .await
            .expect("run task panicked")
            .expect("run returned an error");
    }
}
