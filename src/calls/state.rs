//! Call session state machine.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::candidates::CandidateQueue;
use super::error::CallError;
use crate::media::{LocalStream, MediaConnection, RemoteStream};
use crate::types::call::{CallId, IceCandidate, SessionDescription};

/// Lifecycle phase of the single call a client can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallPhase {
    /// No call.
    #[default]
    Idle,
    /// Outgoing call: acquiring media and building the offer.
    Offering,
    /// Outgoing call: offer sent, waiting for the remote answer.
    AwaitingAnswer,
    /// Incoming call: acquiring media and building the answer.
    Answering,
    /// Both descriptions exchanged, connectivity being established.
    Negotiating,
    /// Media flowing.
    Active,
    /// Torn down. Never observed from outside; the slot returns to `Idle`.
    Ended,
}

impl CallPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle | Self::Ended)
    }

    /// Remote candidates are only relevant between the offer and teardown.
    pub fn accepts_remote_candidates(&self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

/// State transitions for calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTransition {
    OfferSent,
    AnswerReceived,
    AnswerSent,
    MediaConnected,
    Terminated,
}

/// Read-only view of the current call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub call_id: CallId,
    pub role: CallRole,
    pub phase: CallPhase,
    pub created_at: DateTime<Utc>,
    pub has_local_description: bool,
    pub has_remote_description: bool,
    pub pending_remote_candidates: usize,
}

/// The active or pending call, with everything it owns.
pub struct CallSession {
    pub generation: u64,
    pub call_id: CallId,
    pub role: CallRole,
    pub phase: CallPhase,
    pub created_at: DateTime<Utc>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    /// Received before the remote description could take them.
    pub(crate) remote_candidates: CandidateQueue<IceCandidate>,
    /// Discovered before our description went out.
    pub(crate) local_candidates: CandidateQueue<IceCandidate>,
    pub(crate) connection: Option<Arc<dyn MediaConnection>>,
    pub(crate) local_stream: Option<LocalStream>,
    pub(crate) remote_stream: Option<RemoteStream>,
}

impl CallSession {
    pub fn new_outgoing(generation: u64, call_id: CallId) -> Self {
        Self::new(generation, call_id, CallRole::Caller, CallPhase::Offering)
    }

    pub fn new_incoming(generation: u64, call_id: CallId) -> Self {
        Self::new(generation, call_id, CallRole::Callee, CallPhase::Answering)
    }

    fn new(generation: u64, call_id: CallId, role: CallRole, phase: CallPhase) -> Self {
        Self {
            generation,
            call_id,
            role,
            phase,
            created_at: Utc::now(),
            local_description: None,
            remote_description: None,
            remote_candidates: CandidateQueue::new(),
            local_candidates: CandidateQueue::new(),
            connection: None,
            local_stream: None,
            remote_stream: None,
        }
    }

    pub fn is_caller(&self) -> bool {
        self.role == CallRole::Caller
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description.is_some()
    }

    pub fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), CallError> {
        if self.local_description.is_some() {
            return Err(CallError::DescriptionAlreadySet("local"));
        }
        self.local_description = Some(description);
        Ok(())
    }

    pub fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), CallError> {
        if self.remote_description.is_some() {
            return Err(CallError::DescriptionAlreadySet("remote"));
        }
        self.remote_description = Some(description);
        Ok(())
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            call_id: self.call_id.clone(),
            role: self.role,
            phase: self.phase,
            created_at: self.created_at,
            has_local_description: self.local_description.is_some(),
            has_remote_description: self.remote_description.is_some(),
            pending_remote_candidates: self.remote_candidates.len(),
        }
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let new_phase = match (self.phase, transition) {
            (CallPhase::Offering, CallTransition::OfferSent) => CallPhase::AwaitingAnswer,
            (CallPhase::AwaitingAnswer, CallTransition::AnswerReceived) => CallPhase::Negotiating,
            (CallPhase::Answering, CallTransition::AnswerSent) => CallPhase::Negotiating,
            (CallPhase::Negotiating, CallTransition::MediaConnected) => CallPhase::Active,
            (phase, CallTransition::Terminated) if !phase.is_terminal() => CallPhase::Ended,
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        self.phase = new_phase;
        Ok(())
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("generation", &self.generation)
            .field("call_id", &self.call_id)
            .field("role", &self.role)
            .field("phase", &self.phase)
            .field("has_connection", &self.connection.is_some())
            .field("pending_remote_candidates", &self.remote_candidates.len())
            .field("pending_local_candidates", &self.local_candidates.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
