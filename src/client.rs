use crate::calls::{CallError, CallManager, CallPhase, CallSnapshot};
use crate::config::ClientConfig;
use crate::media::{MediaEngine, MediaSignal, UnavailableMediaEngine};
use crate::transport::{
    TokioWebSocketTransportFactory, TransportConnection, TransportEvent, TransportFactory,
    TransportState,
};
use crate::types::call::{
    CallId, CallIdGenerator, CallInvitation, ClockCallIdGenerator, SessionDescription,
};
use crate::types::events::{ConnectionStateChanged, EventBus};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is already running")]
    AlreadyRunning,
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

/// A call-signaling endpoint connected to one rendezvous server.
///
/// Create one with [`SignalingClient::builder`], subscribe to [`events`],
/// then drive it with [`run`] on a task of its own. Call commands may be
/// issued from any task while `run` is active.
///
/// [`events`]: SignalingClient::events
/// [`run`]: SignalingClient::run
pub struct SignalingClient {
    pub(crate) config: ClientConfig,
    pub(crate) events: Arc<EventBus>,
    pub(crate) connection: Arc<TransportConnection>,
    pub(crate) calls: Arc<CallManager>,
    pub(crate) transport_factory: Arc<dyn TransportFactory>,

    pub(crate) is_running: AtomicBool,
    media_events: Mutex<Option<mpsc::UnboundedReceiver<MediaSignal>>>,
    shutdown: watch::Sender<bool>,
}

impl SignalingClient {
    pub fn builder(config: ClientConfig) -> SignalingClientBuilder {
        SignalingClientBuilder::new(config)
    }

    pub fn new(
        config: ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        media: Arc<dyn MediaEngine>,
        call_ids: Arc<dyn CallIdGenerator>,
    ) -> Arc<Self> {
        let events = Arc::new(EventBus::new());
        let connection = Arc::new(TransportConnection::new());
        let (calls, media_events) =
            CallManager::new(media, call_ids, events.clone(), connection.clone());
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            config,
            events,
            connection,
            calls,
            transport_factory,
            is_running: AtomicBool::new(false),
            media_events: Mutex::new(Some(media_events)),
            shutdown,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn calls(&self) -> &Arc<CallManager> {
        &self.calls
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub async fn transport_state(&self) -> TransportState {
        self.connection.state().await
    }

    pub async fn endpoint_id(&self) -> Option<String> {
        self.connection.endpoint_id().await
    }

    pub async fn start_call(&self) -> Result<CallId, CallError> {
        self.calls.start_call().await
    }

    pub async fn answer_call(
        &self,
        call_id: CallId,
        offer: SessionDescription,
    ) -> Result<(), CallError> {
        self.calls.answer_call(call_id, offer).await
    }

    pub async fn answer_invitation(&self, call_id: &CallId) -> Result<(), CallError> {
        self.calls.answer_invitation(call_id).await
    }

    pub async fn end_call(&self) {
        self.calls.end_call().await
    }

    pub fn incoming_calls(&self) -> Vec<CallInvitation> {
        self.calls.incoming_calls()
    }

    pub async fn phase(&self) -> CallPhase {
        self.calls.phase().await
    }

    pub async fn current_call(&self) -> Option<CallSnapshot> {
        self.calls.current_call().await
    }

    pub async fn current_call_id(&self) -> Option<CallId> {
        self.calls.current_call_id().await
    }

    /// Connects and processes signaling traffic until [`disconnect`] is
    /// called, reconnecting after every lost or failed connection.
    ///
    /// A `disconnect` issued before `run` gets going still applies: `run`
    /// then returns without connecting.
    ///
    /// [`disconnect`]: SignalingClient::disconnect
    pub async fn run(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(target: "Client", "Client `run` method called while already running.");
            return Err(ClientError::AlreadyRunning);
        }
        // A stop request stays pending until this run has seen it, even if
        // `disconnect` came before the first poll.
        let _running = scopeguard::guard((), |_| {
            self.shutdown.send_replace(false);
            self.is_running.store(false, Ordering::Relaxed);
        });

        let Some(mut media_events) = self.media_events.lock().await.take() else {
            return Err(ClientError::AlreadyRunning);
        };
        let mut shutdown = self.shutdown.subscribe();

        self.run_loop(&mut media_events, &mut shutdown).await;

        *self.media_events.lock().await = Some(media_events);
        info!(target: "Client", "Client run loop has shut down.");
        Ok(())
    }

    async fn run_loop(
        &self,
        media_events: &mut mpsc::UnboundedReceiver<MediaSignal>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let mut failures: u32 = 0;
        loop {
            let connected = tokio::select! {
                biased;
                _ = stop_requested(shutdown) => break,
                result = self.connect() => result,
            };

            match connected {
                Ok(transport_events) => {
                    failures = 0;
                    let reconnect = self
                        .read_events_loop(transport_events, media_events, shutdown)
                        .await;
                    self.cleanup_connection_state().await;
                    if !reconnect {
                        break;
                    }
                }
                Err(e) => {
                    error!(
                        target: "Client",
                        "Failed to connect to {}: {e}", self.config.server_url
                    );
                    self.cleanup_connection_state().await;
                }
            }

            failures = failures.saturating_add(1);
            let delay = self.config.reconnect.delay_for(failures);
            info!(
                target: "Client/Reconnect",
                "Will attempt to reconnect in {delay:?} (attempt {failures})"
            );
            if !self.wait_for_reconnect(delay, media_events, shutdown).await {
                break;
            }
        }
        self.cleanup_connection_state().await;
    }

    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>, ClientError> {
        self.connection.set_connecting().await;
        self.publish_state(TransportState::Connecting, None);
        info!(target: "Client", "Connecting to {}", self.config.server_url);

        let (transport, transport_events) = self.transport_factory.create_transport().await?;

        self.connection.set_open(transport).await;
        self.publish_state(TransportState::Open, None);
        info!(target: "Client", "Connected to signaling server");
        Ok(transport_events)
    }

    /// Returns true if the link dropped and a reconnect should follow,
    /// false on shutdown.
    async fn read_events_loop(
        &self,
        mut transport_events: mpsc::Receiver<TransportEvent>,
        media_events: &mut mpsc::UnboundedReceiver<MediaSignal>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        info!(target: "Client", "Starting message processing loop...");
        loop {
            tokio::select! {
                biased;
                _ = stop_requested(shutdown) => {
                    info!(target: "Client", "Shutdown signaled in message loop. Exiting message loop.");
                    return false;
                }
                event = transport_events.recv() => match event {
                    Some(TransportEvent::TextReceived(text)) => self.handle_frame(&text).await,
                    Some(TransportEvent::Connected) => {
                        debug!(target: "Client", "Transport connected event received");
                    }
                    Some(TransportEvent::Disconnected) | None => {
                        info!(target: "Client", "Transport disconnected unexpectedly.");
                        return true;
                    }
                },
                Some(signal) = media_events.recv() => {
                    self.calls.handle_media_signal(signal).await;
                }
            }
        }
    }

    async fn cleanup_connection_state(&self) {
        let previous = self.connection.state().await;
        if let Some(transport) = self.connection.set_closed().await {
            transport.disconnect().await;
        }
        if previous != TransportState::Closed {
            self.publish_state(TransportState::Closed, None);
        }
    }

    fn publish_state(&self, state: TransportState, endpoint_id: Option<String>) {
        self.events
            .connection_state_changed
            .emit(&ConnectionStateChanged { state, endpoint_id });
    }

    /// Ends any call, stops [`run`](SignalingClient::run) and closes the
    /// link. Pending invitations are dropped.
    pub async fn disconnect(&self) {
        info!(target: "Client", "Disconnecting client intentionally.");
        self.calls.shutdown().await;
        self.shutdown.send_replace(true);
        if !self.is_running() {
            self.cleanup_connection_state().await;
        }
    }
}

/// Resolves once `disconnect` has asked the run loop to stop.
pub(crate) async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Assembles a [`SignalingClient`]; anything not supplied gets a default:
/// a WebSocket transport to `config.server_url`, a media engine that
/// reports media as unavailable, and clock-based call ids.
pub struct SignalingClientBuilder {
    config: ClientConfig,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    media: Option<Arc<dyn MediaEngine>>,
    call_ids: Option<Arc<dyn CallIdGenerator>>,
}

impl SignalingClientBuilder {
    fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport_factory: None,
            media: None,
            call_ids: None,
        }
    }

    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    pub fn with_media_engine(mut self, media: Arc<dyn MediaEngine>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_call_id_generator(mut self, call_ids: Arc<dyn CallIdGenerator>) -> Self {
        self.call_ids = Some(call_ids);
        self
    }

    pub fn build(self) -> Arc<SignalingClient> {
        let transport_factory = self.transport_factory.unwrap_or_else(|| {
            Arc::new(TokioWebSocketTransportFactory::new(
                self.config.server_url.clone(),
            )) as Arc<dyn TransportFactory>
        });
        let media = self
            .media
            .unwrap_or_else(|| Arc::new(UnavailableMediaEngine) as Arc<dyn MediaEngine>);
        let call_ids = self
            .call_ids
            .unwrap_or_else(|| Arc::new(ClockCallIdGenerator) as Arc<dyn CallIdGenerator>);
        SignalingClient::new(self.config, transport_factory, media, call_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_run_can_be_spawned() {
        let client = SignalingClient::builder(ClientConfig::default()).build();
        let run = client.run();
        assert_send(&run);
    }
}
