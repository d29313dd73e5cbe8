//! Seam between call channels and the messaging engine's media layer.
//!
//! The engine runs on the same cooperative loop as the channels, so any of
//! the [`MediaEngine`] calls below may deliver [`EngineEvent`]s back into the
//! [`CallManager`](super::CallManager) before returning.

use imcall_core::stream::{Candidate, Codec, StreamState};
use imcall_core::types::{Handle, MediaCaps, MediaType, MediaTypes, SessionId, StreamName};
use std::fmt;

/// Engine refusal to start or extend a media session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineFailure {
    pub reason: Option<String>,
}

impl EngineFailure {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => f.write_str(reason),
            None => f.write_str("engine refused to initiate media"),
        }
    }
}

/// Client of the engine's media API. Every method is fire-and-forget apart
/// from the synchronous refusal of [`initiate_session`](Self::initiate_session).
pub trait MediaEngine: Send + Sync {
    /// Start a session with `peer`, or add streams to the running one.
    fn initiate_session(
        &self,
        account: &str,
        peer: &Handle,
        media: MediaTypes,
    ) -> Result<(), EngineFailure>;

    fn accept(&self, session: &SessionId, stream: Option<&StreamName>, local: bool);

    fn hangup(&self, session: &SessionId);

    fn reject(&self, session: &SessionId);

    fn hold(&self, session: &SessionId, hold: bool);

    fn end_stream(&self, session: &SessionId, stream: &StreamName);

    fn peer_media_caps(&self, account: &str, peer: &Handle) -> MediaCaps;
}

/// Session-wide state transitions reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    Connected,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamInfoType {
    Accept,
    Reject,
    Hangup,
    Hold,
    Unhold,
    Ringing,
    Mute,
    Unmute,
}

/// Asynchronous notifications from the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A session was created, either by our own initiate or by a peer.
    /// Fired once per session.
    InitMedia {
        session: SessionId,
        account: String,
        peer: Handle,
        media: MediaTypes,
    },
    StreamCreated {
        session: SessionId,
        stream: StreamName,
        participant: Handle,
        media_type: MediaType,
        /// Whether this side proposed the stream.
        initiator: bool,
    },
    StateChanged {
        session: SessionId,
        state: MediaState,
        stream: Option<StreamName>,
        participant: Option<Handle>,
    },
    StreamInfo {
        session: SessionId,
        info: StreamInfoType,
        stream: Option<StreamName>,
        participant: Option<Handle>,
        local: bool,
    },
    StreamState {
        session: SessionId,
        stream: StreamName,
        state: StreamState,
    },
    Candidates {
        session: SessionId,
        stream: StreamName,
        local: bool,
        candidates: Vec<Candidate>,
    },
    /// Codecs both sides agreed on.
    CodecsChanged {
        session: SessionId,
        stream: StreamName,
        codecs: Vec<Codec>,
    },
    Error {
        session: SessionId,
        message: String,
    },
}

impl EngineEvent {
    pub fn session(&self) -> &SessionId {
        match self {
            Self::InitMedia { session, .. }
            | Self::StreamCreated { session, .. }
            | Self::StateChanged { session, .. }
            | Self::StreamInfo { session, .. }
            | Self::StreamState { session, .. }
            | Self::Candidates { session, .. }
            | Self::CodecsChanged { session, .. }
            | Self::Error { session, .. } => session,
        }
    }
}
