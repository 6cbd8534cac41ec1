//! Call-related error types.

use crate::media::MediaError;
use crate::types::call::CallId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("call already in progress: {0}")]
    CallInProgress(CallId),

    #[error("no pending invitation for call {0}")]
    NotFound(CallId),

    #[error("media engine error: {0}")]
    Media(#[from] MediaError),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("{0} description already set")]
    DescriptionAlreadySet(&'static str),

    #[error("call was torn down while the command was in flight")]
    Superseded,
}

impl CallError {
    /// True for errors that were rejected before any state changed.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::CallInProgress(_) | Self::NotFound(_))
    }
}
