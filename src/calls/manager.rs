//! Call manager for orchestrating call lifecycle.

use super::error::CallError;
use super::registry::CallRegistry;
use super::state::{CallPhase, CallSession, CallSnapshot, CallTransition};
use crate::envelope::Envelope;
use crate::media::{
    MediaConnection, MediaEngine, MediaError, MediaEvent, MediaEventSink, MediaSignal,
    PeerConnectionState,
};
use crate::transport::TransportConnection;
use crate::types::call::{
    CallId, CallIdGenerator, CallInvitation, IceCandidate, SessionDescription,
};
use crate::types::events::{
    CallConnected, CallEndReason, CallEnded, EventBus, LocalStreamUpdated, RemoteStreamUpdated,
};
use log::{debug, info, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};

/// Owns the single call slot and sequences every change to it.
///
/// Commands (`start_call`, `answer_call`, `end_call`) may come from any task.
/// Inbound envelopes and media events are fed in by the client's run loop.
/// The slot lock is held while descriptions and candidates are applied or
/// sent, so they reach the media engine and the wire in order; it is released
/// while media is acquired and descriptions are created.
pub struct CallManager {
    media: Arc<dyn MediaEngine>,
    call_ids: Arc<dyn CallIdGenerator>,
    events: Arc<EventBus>,
    connection: Arc<TransportConnection>,
    registry: CallRegistry,
    session: Mutex<Option<CallSession>>,
    next_generation: AtomicU64,
    media_tx: mpsc::UnboundedSender<MediaSignal>,
}

impl CallManager {
    /// Returns the manager and the receiving end of its media event channel.
    pub fn new(
        media: Arc<dyn MediaEngine>,
        call_ids: Arc<dyn CallIdGenerator>,
        events: Arc<EventBus>,
        connection: Arc<TransportConnection>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MediaSignal>) {
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            media,
            call_ids,
            registry: CallRegistry::new(events.clone()),
            events,
            connection,
            session: Mutex::new(None),
            next_generation: AtomicU64::new(1),
            media_tx,
        });
        (manager, media_rx)
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.registry
    }

    pub fn incoming_calls(&self) -> Vec<CallInvitation> {
        self.registry.snapshot()
    }

    pub async fn phase(&self) -> CallPhase {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or(CallPhase::Idle)
    }

    pub async fn current_call(&self) -> Option<CallSnapshot> {
        self.session.lock().await.as_ref().map(CallSession::snapshot)
    }

    pub async fn current_call_id(&self) -> Option<CallId> {
        self.session.lock().await.as_ref().map(|s| s.call_id.clone())
    }

    /// Places an outgoing call and returns its id once the offer is out.
    pub async fn start_call(&self) -> Result<CallId, CallError> {
        let (generation, call_id) = {
            let mut slot = self.session.lock().await;
            if let Some(existing) = slot.as_ref() {
                return Err(CallError::CallInProgress(existing.call_id.clone()));
            }
            let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
            let call_id = self.call_ids.next_call_id();
            *slot = Some(CallSession::new_outgoing(generation, call_id.clone()));
            (generation, call_id)
        };
        info!(target: "Client/Calls", "Starting call {call_id}");

        match self.negotiate_outgoing(generation, &call_id).await {
            Ok(()) => Ok(call_id),
            Err(e) => {
                warn!(target: "Client/Calls", "Failed to start call {call_id}: {e}");
                self.abort(generation).await;
                Err(e)
            }
        }
    }

    async fn negotiate_outgoing(&self, generation: u64, call_id: &CallId) -> Result<(), CallError> {
        let connection = self.prepare_media(generation).await?;
        let offer = connection.create_offer().await?;

        let mut slot = self.session.lock().await;
        let session = session_for(&mut slot, generation).ok_or(CallError::Superseded)?;
        session.set_local_description(offer.clone())?;
        self.connection
            .send(&Envelope::OutgoingOffer {
                call_id: call_id.clone(),
                offer,
            })
            .await;
        session.apply_transition(CallTransition::OfferSent)?;
        self.flush_local_candidates(session).await;
        Ok(())
    }

    /// Accepts a pending invitation by id.
    pub async fn answer_invitation(&self, call_id: &CallId) -> Result<(), CallError> {
        let invitation = self
            .registry
            .get(call_id)
            .ok_or_else(|| CallError::NotFound(call_id.clone()))?;
        self.answer_call(invitation.call_id, invitation.offer).await
    }

    /// Answers `offer` for `call_id`, whether or not it is still listed as
    /// pending.
    pub async fn answer_call(
        &self,
        call_id: CallId,
        offer: SessionDescription,
    ) -> Result<(), CallError> {
        let generation = {
            let mut slot = self.session.lock().await;
            if let Some(existing) = slot.as_ref() {
                return Err(CallError::CallInProgress(existing.call_id.clone()));
            }
            let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
            *slot = Some(CallSession::new_incoming(generation, call_id.clone()));
            generation
        };
        info!(target: "Client/Calls", "Answering call {call_id}");
        self.registry.remove(&call_id);

        match self.negotiate_incoming(generation, &call_id, offer).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(target: "Client/Calls", "Failed to answer call {call_id}: {e}");
                self.abort(generation).await;
                Err(e)
            }
        }
    }

    async fn negotiate_incoming(
        &self,
        generation: u64,
        call_id: &CallId,
        offer: SessionDescription,
    ) -> Result<(), CallError> {
        let connection = self.prepare_media(generation).await?;
        {
            let mut slot = self.session.lock().await;
            let session = session_for(&mut slot, generation).ok_or(CallError::Superseded)?;
            apply_remote_description(session, offer).await?;
        }

        let answer = connection.create_answer().await?;

        let mut slot = self.session.lock().await;
        let session = session_for(&mut slot, generation).ok_or(CallError::Superseded)?;
        session.set_local_description(answer.clone())?;
        self.connection
            .send(&Envelope::OutgoingAnswer {
                call_id: call_id.clone(),
                answer,
            })
            .await;
        session.apply_transition(CallTransition::AnswerSent)?;
        self.flush_local_candidates(session).await;
        Ok(())
    }

    /// Acquires local media and a connection carrying it for the session
    /// tagged `generation`. Anything acquired after that session was torn
    /// down is released here.
    async fn prepare_media(&self, generation: u64) -> Result<Arc<dyn MediaConnection>, CallError> {
        let stream = self.media.acquire_local_media().await?;
        {
            let mut slot = self.session.lock().await;
            let Some(session) = session_for(&mut slot, generation) else {
                stream.stop_all();
                return Err(CallError::Superseded);
            };
            session.local_stream = Some(stream.clone());
            self.events.local_stream_updated.emit(&LocalStreamUpdated {
                stream: Some(stream.clone()),
            });
        }

        let sink = MediaEventSink::new(generation, self.media_tx.clone());
        let connection = self.media.create_connection(sink).await?;
        {
            let mut slot = self.session.lock().await;
            let Some(session) = session_for(&mut slot, generation) else {
                drop(slot);
                close_connection(connection.as_ref()).await;
                return Err(CallError::Superseded);
            };
            session.connection = Some(connection.clone());
        }

        connection.add_local_stream(&stream).await?;
        Ok(connection)
    }

    async fn flush_local_candidates(&self, session: &mut CallSession) {
        for candidate in session.local_candidates.drain_if_ready(true) {
            self.send_local_candidate(&session.call_id, candidate).await;
        }
    }

    async fn send_local_candidate(&self, call_id: &CallId, candidate: IceCandidate) {
        self.connection
            .send(&Envelope::LocalCandidate {
                call_id: call_id.clone(),
                candidate,
            })
            .await;
    }

    /// Hangs up the current call, if any.
    pub async fn end_call(&self) {
        self.end_with(CallEndReason::LocalHangup).await;
    }

    /// Hangs up and forgets every pending invitation.
    pub async fn shutdown(&self) {
        self.end_with(CallEndReason::Shutdown).await;
        self.registry.clear();
    }

    async fn end_with(&self, reason: CallEndReason) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.take() else {
            debug!(target: "Client/Calls", "No call to end");
            return;
        };
        info!(target: "Client/Calls", "Ending call {} ({reason:?})", session.call_id);
        self.connection
            .send(&Envelope::EndCall {
                call_id: session.call_id.clone(),
            })
            .await;
        self.release(session, Some(reason)).await;
    }

    pub async fn handle_incoming_offer(&self, call_id: CallId, offer: SessionDescription) {
        info!(target: "Client/Calls", "Incoming call {call_id}");
        self.registry.upsert(CallInvitation::new(call_id, offer));
    }

    pub async fn handle_answered(&self, call_id: &CallId, answer: SessionDescription) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut().filter(|s| &s.call_id == call_id) else {
            debug!(target: "Client/Calls", "Ignoring answer for unknown call {call_id}");
            return;
        };
        if session.phase != CallPhase::AwaitingAnswer {
            warn!(
                target: "Client/Calls",
                "Ignoring answer for call {call_id} in phase {:?}", session.phase
            );
            return;
        }

        let result = match apply_remote_description(session, answer).await {
            Ok(()) => session
                .apply_transition(CallTransition::AnswerReceived)
                .map_err(CallError::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => info!(target: "Client/Calls", "Call {call_id} answered, negotiating"),
            Err(e) => {
                warn!(target: "Client/Calls", "Failed to apply answer for call {call_id}: {e}");
                if let Some(session) = slot.take() {
                    self.release(session, Some(CallEndReason::NegotiationFailed))
                        .await;
                }
            }
        }
    }

    pub async fn handle_remote_candidate(&self, call_id: &CallId, candidate: IceCandidate) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot
            .as_mut()
            .filter(|s| &s.call_id == call_id && s.phase.accepts_remote_candidates())
        else {
            debug!(target: "Client/Calls", "Ignoring candidate for unknown call {call_id}");
            return;
        };

        match (session.has_remote_description(), session.connection.clone()) {
            (true, Some(connection)) => apply_candidate(connection.as_ref(), candidate).await,
            _ => {
                trace!(target: "Client/Calls", "Queueing remote candidate for call {call_id}");
                session.remote_candidates.enqueue(candidate);
            }
        }
    }

    pub async fn handle_remote_ended(&self, call_id: &CallId) {
        let mut slot = self.session.lock().await;
        if slot.as_ref().is_none_or(|s| &s.call_id != call_id) {
            debug!(target: "Client/Calls", "Ignoring end of unknown call {call_id}");
            return;
        }
        if let Some(session) = slot.take() {
            info!(target: "Client/Calls", "Call {call_id} ended by remote");
            self.release(session, Some(CallEndReason::RemoteHangup)).await;
        }
    }

    pub async fn handle_claimed(&self, call_id: &CallId) {
        if self.registry.remove(call_id).is_some() {
            info!(target: "Client/Calls", "Call {call_id} was taken by another endpoint");
        }
    }

    pub async fn handle_media_signal(&self, signal: MediaSignal) {
        let mut slot = self.session.lock().await;
        let Some(session) = session_for(&mut slot, signal.generation) else {
            trace!(
                target: "Client/Calls",
                "Dropping media event from torn down session {}: {:?}",
                signal.generation,
                signal.event
            );
            return;
        };

        match signal.event {
            MediaEvent::LocalCandidate(candidate) => {
                if session.local_description().is_some() {
                    let call_id = session.call_id.clone();
                    self.send_local_candidate(&call_id, candidate).await;
                } else {
                    session.local_candidates.enqueue(candidate);
                }
            }
            MediaEvent::TrackAdded(track) => {
                let stream = session.remote_stream.get_or_insert_with(Default::default);
                stream.add_track(track);
                let stream = stream.clone();
                self.events
                    .remote_stream_updated
                    .emit(&RemoteStreamUpdated {
                        stream: Some(stream),
                    });
            }
            MediaEvent::ConnectionStateChanged(PeerConnectionState::Connected) => {
                if session.phase != CallPhase::Negotiating {
                    debug!(
                        target: "Client/Calls",
                        "Media connected in phase {:?}, ignoring", session.phase
                    );
                    return;
                }
                if let Err(e) = session.apply_transition(CallTransition::MediaConnected) {
                    warn!(target: "Client/Calls", "{e}");
                    return;
                }
                info!(target: "Client/Calls", "Call {} connected", session.call_id);
                self.events.call_connected.emit(&CallConnected {
                    call_id: session.call_id.clone(),
                });
            }
            MediaEvent::ConnectionStateChanged(state) if state.is_terminal() => {
                let reason = match state {
                    PeerConnectionState::Failed => CallEndReason::MediaFailed,
                    PeerConnectionState::Closed => CallEndReason::MediaClosed,
                    _ => CallEndReason::MediaDisconnected,
                };
                if let Some(session) = slot.take() {
                    info!(
                        target: "Client/Calls",
                        "Media connection for call {} is {state:?}", session.call_id
                    );
                    self.release(session, Some(reason)).await;
                }
            }
            MediaEvent::ConnectionStateChanged(state) => {
                debug!(target: "Client/Calls", "Media connection state: {state:?}");
            }
        }
    }

    /// Tears down the session tagged `generation` without telling observers
    /// the call ended. Used when a command fails part way through.
    async fn abort(&self, generation: u64) {
        let mut slot = self.session.lock().await;
        if !slot.as_ref().is_some_and(|s| s.generation == generation) {
            return;
        }
        if let Some(session) = slot.take() {
            self.release(session, None).await;
        }
    }

    /// Releases everything `session` owns. Callers take the session out of
    /// the slot first, so this runs at most once per call.
    async fn release(&self, mut session: CallSession, reason: Option<CallEndReason>) {
        if let Err(e) = session.apply_transition(CallTransition::Terminated) {
            debug!(target: "Client/Calls", "{e}");
        }

        if let Some(stream) = session.local_stream.take() {
            stream.stop_all();
        }
        session.remote_stream = None;
        if let Some(connection) = session.connection.take() {
            close_connection(connection.as_ref()).await;
        }
        session.remote_candidates.clear();
        session.local_candidates.clear();

        if let Some(reason) = reason {
            self.events.call_ended.emit(&CallEnded {
                call_id: session.call_id.clone(),
                reason,
            });
        }
        self.events
            .local_stream_updated
            .emit(&LocalStreamUpdated { stream: None });
        self.events
            .remote_stream_updated
            .emit(&RemoteStreamUpdated { stream: None });
        debug!(target: "Client/Calls", "Released call {}", session.call_id);
    }
}

fn session_for(slot: &mut Option<CallSession>, generation: u64) -> Option<&mut CallSession> {
    slot.as_mut().filter(|s| s.generation == generation)
}

/// Installs the remote description, then applies any candidates that
/// arrived ahead of it in arrival order.
async fn apply_remote_description(
    session: &mut CallSession,
    description: SessionDescription,
) -> Result<(), CallError> {
    let connection = session
        .connection
        .clone()
        .ok_or_else(|| MediaError::Connection("no media connection".into()))?;
    session.set_remote_description(description.clone())?;
    connection.set_remote_description(description).await?;

    let pending = session.remote_candidates.drain_if_ready(true);
    if !pending.is_empty() {
        debug!(
            target: "Client/Calls",
            "Applying {} queued candidates for call {}",
            pending.len(),
            session.call_id
        );
    }
    for candidate in pending {
        apply_candidate(connection.as_ref(), candidate).await;
    }
    Ok(())
}

async fn apply_candidate(connection: &dyn MediaConnection, candidate: IceCandidate) {
    if let Err(e) = connection.add_candidate(candidate).await {
        warn!(target: "Client/Calls", "Error adding remote candidate: {e}");
    }
}

async fn close_connection(connection: &dyn MediaConnection) {
    if let Err(e) = connection.close().await {
        warn!(target: "Client/Calls", "Error closing media connection: {e}");
    }
}
