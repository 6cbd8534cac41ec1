use crate::envelope::Envelope;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

pub use peercall_tokio_transport::{
    TokioWebSocketTransportFactory, Transport, TransportEvent, TransportFactory,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    Connecting,
    Open,
    #[default]
    Closed,
}

#[derive(Default)]
struct LinkState {
    state: TransportState,
    endpoint_id: Option<String>,
    transport: Option<Arc<dyn Transport>>,
}

/// The client's view of its link to the rendezvous server.
///
/// The underlying socket is swapped on every reconnect; everything that
/// sends envelopes goes through here so a send on a closed link is a logged
/// no-op instead of an error path.
#[derive(Default)]
pub struct TransportConnection {
    inner: Mutex<LinkState>,
}

impl TransportConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state(&self) -> TransportState {
        self.inner.lock().await.state
    }

    pub async fn endpoint_id(&self) -> Option<String> {
        self.inner.lock().await.endpoint_id.clone()
    }

    pub(crate) async fn set_connecting(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = TransportState::Connecting;
        inner.transport = None;
    }

    pub(crate) async fn set_open(&self, transport: Arc<dyn Transport>) {
        let mut inner = self.inner.lock().await;
        inner.state = TransportState::Open;
        inner.transport = Some(transport);
    }

    /// Marks the link closed and returns the transport that was in use.
    /// The endpoint id does not survive a reconnect.
    pub(crate) async fn set_closed(&self) -> Option<Arc<dyn Transport>> {
        let mut inner = self.inner.lock().await;
        inner.state = TransportState::Closed;
        inner.endpoint_id = None;
        inner.transport.take()
    }

    pub(crate) async fn set_endpoint_id(&self, endpoint_id: String) {
        self.inner.lock().await.endpoint_id = Some(endpoint_id);
    }

    /// Sends `envelope` if the link is open. Failures are logged, never
    /// retried; returns whether the frame was handed to the socket.
    pub async fn send(&self, envelope: &Envelope) -> bool {
        let transport = {
            let inner = self.inner.lock().await;
            match (&inner.state, &inner.transport) {
                (TransportState::Open, Some(transport)) => transport.clone(),
                _ => {
                    warn!(
                        target: "Client/Transport",
                        "Dropping {} envelope: signaling link is not open",
                        envelope.kind()
                    );
                    return false;
                }
            }
        };

        debug!(target: "Client/Transport", "--> {}", envelope.kind());
        match transport.send_text(&envelope.encode()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    target: "Client/Transport",
                    "Failed to send {} envelope: {e}",
                    envelope.kind()
                );
                false
            }
        }
    }
}
