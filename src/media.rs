//! Boundary to the external media engine.
//!
//! Capture, encoding, codec negotiation and the connectivity handshake all
//! live behind these traits. The signaling core only sequences calls into
//! them and reacts to the [`MediaEvent`]s they report.

use crate::types::call::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("media unavailable: {0}")]
    Unavailable(String),

    #[error("failed to acquire local media: {0}")]
    Acquire(String),

    #[error("failed to create media connection: {0}")]
    Connection(String),

    #[error("session description error: {0}")]
    Description(String),

    #[error("candidate rejected: {0}")]
    Candidate(String),

    #[error("track error: {0}")]
    Track(String),

    #[error("close failed: {0}")]
    Close(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A single audio or video track owned by the media engine.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Stops the track and releases the underlying device.
    fn stop(&self) -> Result<(), MediaError>;
}

/// The local camera/microphone capture handed out by the media engine.
#[derive(Clone, Default)]
pub struct LocalStream {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl LocalStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// Stops every track. A failing track is logged and does not keep the
    /// others alive.
    pub(crate) fn stop_all(&self) {
        for track in &self.tracks {
            if let Err(e) = track.stop() {
                log::warn!(target: "Client/Media", "Error stopping track {}: {e}", track.id());
            }
        }
    }
}

impl fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStream")
            .field("tracks", &track_ids(&self.tracks))
            .finish()
    }
}

/// Tracks received from the remote endpoint, accumulated as they arrive.
#[derive(Clone, Default)]
pub struct RemoteStream {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl RemoteStream {
    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub(crate) fn add_track(&mut self, track: Arc<dyn MediaTrack>) {
        if !self.tracks.iter().any(|t| t.id() == track.id()) {
            self.tracks.push(track);
        }
    }
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("tracks", &track_ids(&self.tracks))
            .finish()
    }
}

fn track_ids(tracks: &[Arc<dyn MediaTrack>]) -> Vec<&str> {
    tracks.iter().map(|t| t.id()).collect()
}

/// Connectivity state as reported by the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// Something the media engine observed on a connection.
#[derive(Clone)]
pub enum MediaEvent {
    /// A local connectivity candidate that must reach the remote endpoint.
    LocalCandidate(IceCandidate),
    ConnectionStateChanged(PeerConnectionState),
    /// An inbound track from the remote endpoint.
    TrackAdded(Arc<dyn MediaTrack>),
}

impl fmt::Debug for MediaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            Self::ConnectionStateChanged(s) => {
                f.debug_tuple("ConnectionStateChanged").field(s).finish()
            }
            Self::TrackAdded(t) => f.debug_tuple("TrackAdded").field(&t.id()).finish(),
        }
    }
}

/// A media event tagged with the session generation it belongs to.
#[derive(Debug, Clone)]
pub struct MediaSignal {
    pub generation: u64,
    pub event: MediaEvent,
}

/// Handed to the media engine when a connection is created; events emitted
/// through it are routed back to the session that owns the connection.
#[derive(Debug, Clone)]
pub struct MediaEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<MediaSignal>,
}

impl MediaEventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<MediaSignal>) -> Self {
        Self { generation, tx }
    }

    /// Returns false once the owning client is gone.
    pub fn emit(&self, event: MediaEvent) -> bool {
        self.tx
            .send(MediaSignal {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// One peer connection inside the media engine.
#[async_trait]
pub trait MediaConnection: Send + Sync {
    async fn add_local_stream(&self, stream: &LocalStream) -> Result<(), MediaError>;

    /// Creates an offer and installs it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    /// Creates an answer and installs it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;

    /// Must only be called after a remote description has been applied.
    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;

    async fn close(&self) -> Result<(), MediaError>;
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn acquire_local_media(&self) -> Result<LocalStream, MediaError>;

    async fn create_connection(
        &self,
        events: MediaEventSink,
    ) -> Result<Arc<dyn MediaConnection>, MediaError>;
}

/// A media engine for processes that only watch signaling traffic.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableMediaEngine;

#[async_trait]
impl MediaEngine for UnavailableMediaEngine {
    async fn acquire_local_media(&self) -> Result<LocalStream, MediaError> {
        Err(MediaError::Unavailable("no media engine configured".into()))
    }

    async fn create_connection(
        &self,
        _events: MediaEventSink,
    ) -> Result<Arc<dyn MediaConnection>, MediaError> {
        Err(MediaError::Unavailable("no media engine configured".into()))
    }
}
