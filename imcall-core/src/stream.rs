//! A single negotiated audio or video flow inside a call.

use crate::types::{Handle, MediaType, StreamId, StreamName};
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection progress of a stream.
///
/// Moves forward only: `New → Connecting → Connected`, and any state may
/// drop to `Disconnected`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
}

impl StreamState {
    fn rank(self) -> u8 {
        match self {
            Self::New => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Disconnected => 3,
        }
    }

    /// Whether moving from `self` to `next` is a forward step.
    pub fn can_advance_to(self, next: StreamState) -> bool {
        match (self, next) {
            (Self::Disconnected, _) => false,
            (_, Self::Disconnected) => true,
            _ => next.rank() > self.rank(),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct StreamDirection: u8 {
        const SEND = 0b01;
        const RECEIVE = 0b10;
        const BIDIRECTIONAL = Self::SEND.bits() | Self::RECEIVE.bits();
    }
}

bitflags! {
    /// Which side still has to agree before it starts sending.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PendingSend: u8 {
        const LOCAL_SEND = 0b01;
        const REMOTE_SEND = 0b10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CombinedDirection {
    pub direction: StreamDirection,
    pub pending_send: PendingSend,
}

impl CombinedDirection {
    /// Streams we asked for: we are ready both ways, the peer has not agreed yet.
    pub fn outgoing() -> Self {
        Self {
            direction: StreamDirection::BIDIRECTIONAL,
            pending_send: PendingSend::REMOTE_SEND,
        }
    }

    /// Streams the peer proposed: we receive until the local user agrees.
    pub fn incoming() -> Self {
        Self {
            direction: StreamDirection::RECEIVE,
            pending_send: PendingSend::LOCAL_SEND,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProtocol {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateType {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
}

/// A transport candidate, passed through verbatim from the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub foundation: String,
    pub component: u32,
    pub address: String,
    pub port: u16,
    pub protocol: TransportProtocol,
    pub priority: u32,
    pub candidate_type: CandidateType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codec {
    pub id: u32,
    pub name: String,
    pub clock_rate: u32,
    pub channels: u32,
    pub parameters: Vec<(String, String)>,
}

/// Control-plane view of a stream: `(id, peer, type, state, direction, pending)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub id: StreamId,
    pub peer: Handle,
    pub media_type: MediaType,
    pub state: StreamState,
    pub direction: StreamDirection,
    pub pending_send: PendingSend,
}

#[derive(Debug, Clone)]
pub struct Stream {
    id: StreamId,
    engine_name: StreamName,
    media_type: MediaType,
    connection_state: StreamState,
    combined_direction: CombinedDirection,
    codecs_negotiated: bool,
    local_candidates: Vec<Candidate>,
    remote_candidates: Vec<Candidate>,
    remote_codecs: Vec<Codec>,
    created_locally: bool,
    created_at: DateTime<Utc>,
}

impl Stream {
    pub fn new(
        id: StreamId,
        engine_name: StreamName,
        media_type: MediaType,
        created_locally: bool,
    ) -> Self {
        Self {
            id,
            engine_name,
            media_type,
            connection_state: StreamState::New,
            combined_direction: if created_locally {
                CombinedDirection::outgoing()
            } else {
                CombinedDirection::incoming()
            },
            codecs_negotiated: false,
            local_candidates: Vec::new(),
            remote_candidates: Vec::new(),
            remote_codecs: Vec::new(),
            created_locally,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn engine_name(&self) -> &StreamName {
        &self.engine_name
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn connection_state(&self) -> StreamState {
        self.connection_state
    }

    pub fn combined_direction(&self) -> CombinedDirection {
        self.combined_direction
    }

    pub fn codecs_negotiated(&self) -> bool {
        self.codecs_negotiated
    }

    pub fn local_candidates(&self) -> &[Candidate] {
        &self.local_candidates
    }

    pub fn remote_candidates(&self) -> &[Candidate] {
        &self.remote_candidates
    }

    pub fn remote_codecs(&self) -> &[Codec] {
        &self.remote_codecs
    }

    pub fn created_locally(&self) -> bool {
        self.created_locally
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Move the connection state forward. Returns `false` when `state` equals
    /// the current one.
    ///
    /// # Panics
    /// Panics on a backward move or on leaving `Disconnected`. Callers must
    /// check [`StreamState::can_advance_to`] for input they do not control.
    pub fn set_connection_state(&mut self, state: StreamState) -> bool {
        if state == self.connection_state {
            return false;
        }
        assert!(
            self.connection_state.can_advance_to(state),
            "stream {} cannot move from {:?} to {:?}",
            self.id,
            self.connection_state,
            state
        );
        self.connection_state = state;
        true
    }

    pub fn add_local_candidates(&mut self, candidates: impl IntoIterator<Item = Candidate>) {
        self.local_candidates.extend(candidates);
    }

    pub fn add_remote_candidates(&mut self, candidates: impl IntoIterator<Item = Candidate>) {
        self.remote_candidates.extend(candidates);
    }

    /// Record the codec intersection reported by the engine. Returns `true`
    /// the first time the stream becomes codec-ready.
    pub fn set_remote_codecs(&mut self, codecs: Vec<Codec>) -> bool {
        let became_ready = !self.codecs_negotiated && !codecs.is_empty();
        if !codecs.is_empty() {
            self.codecs_negotiated = true;
        }
        self.remote_codecs = codecs;
        became_ready
    }

    /// Apply an accept from either side. Returns `true` if the combined
    /// direction changed.
    pub fn accept(&mut self, local: bool) -> bool {
        let before = self.combined_direction;
        if local {
            if !self.created_locally {
                self.combined_direction.pending_send.remove(PendingSend::LOCAL_SEND);
                self.combined_direction.direction.insert(StreamDirection::SEND);
            }
        } else {
            self.combined_direction = CombinedDirection {
                direction: StreamDirection::BIDIRECTIONAL,
                pending_send: PendingSend::empty(),
            };
        }
        before != self.combined_direction
    }

    pub fn info(&self, peer: &Handle) -> StreamInfo {
        StreamInfo {
            id: self.id,
            peer: peer.clone(),
            media_type: self.media_type,
            state: self.connection_state,
            direction: self.combined_direction.direction,
            pending_send: self.combined_direction.pending_send,
        }
    }
}
