//! Call signaling.
//!
//! A client holds at most one call at a time. Outgoing calls go through
//! `Offering → AwaitingAnswer → Negotiating → Active`, incoming ones through
//! `Answering → Negotiating → Active`; any of them can end. Offers for other
//! calls are kept in the [`CallRegistry`] until they are answered or claimed
//! elsewhere.
//!
//! - [`CallManager`]: owns the call slot, runs commands and inbound events
//! - [`CallSession`] & [`CallPhase`]: per-call state machine
//! - [`CandidateQueue`]: holds candidates until their consumer is ready
//! - [`CallRegistry`]: pending invitations

mod candidates;
mod error;
mod handler;
mod manager;
mod registry;
mod state;

pub use candidates::CandidateQueue;
pub use error::CallError;
pub use manager::CallManager;
pub use registry::CallRegistry;
pub use state::{
    CallPhase, CallRole, CallSession, CallSnapshot, CallTransition, InvalidTransition,
};
