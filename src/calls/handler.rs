//! Routing of inbound signaling envelopes.

use crate::client::SignalingClient;
use crate::envelope::Envelope;
use crate::transport::TransportState;
use crate::types::events::ConnectionStateChanged;
use log::{debug, info, warn};

impl SignalingClient {
    /// Decodes one text frame and dispatches it. Frames that do not decode
    /// are logged and dropped; they never affect the connection.
    pub(crate) async fn handle_frame(&self, text: &str) {
        match Envelope::decode(text) {
            Ok(envelope) => self.dispatch_envelope(envelope).await,
            Err(e) => warn!(target: "Client/Calls", "Dropping undecodable frame: {e}"),
        }
    }

    pub(crate) async fn dispatch_envelope(&self, envelope: Envelope) {
        debug!(target: "Client/Calls", "<-- {}", envelope.kind());
        match envelope {
            Envelope::EndpointAssigned { endpoint_id } => {
                info!(target: "Client", "Assigned endpoint id {endpoint_id}");
                self.connection.set_endpoint_id(endpoint_id.clone()).await;
                self.events
                    .connection_state_changed
                    .emit(&ConnectionStateChanged {
                        state: TransportState::Open,
                        endpoint_id: Some(endpoint_id),
                    });
            }
            Envelope::IncomingOffer { call_id, offer } => {
                self.calls.handle_incoming_offer(call_id, offer).await;
            }
            Envelope::Answered { call_id, answer } => {
                self.calls.handle_answered(&call_id, answer).await;
            }
            Envelope::RemoteCandidate { call_id, candidate } => {
                self.calls.handle_remote_candidate(&call_id, candidate).await;
            }
            Envelope::Ended { call_id } => {
                self.calls.handle_remote_ended(&call_id).await;
            }
            Envelope::Claimed { call_id } => {
                self.calls.handle_claimed(&call_id).await;
            }
            outbound @ (Envelope::OutgoingOffer { .. }
            | Envelope::OutgoingAnswer { .. }
            | Envelope::LocalCandidate { .. }
            | Envelope::EndCall { .. }) => {
                warn!(
                    target: "Client/Calls",
                    "Ignoring client-bound {} envelope from server",
                    outbound.kind()
                );
            }
        }
    }
}
