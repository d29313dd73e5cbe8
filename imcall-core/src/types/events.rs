use crate::membership::{GroupChangeReason, GroupFlags, MembershipChange};
use crate::stream::{PendingSend, StreamDirection, StreamState};
use crate::types::call::{CallStateFlags, HoldReason, HoldState};
use crate::types::{ChannelId, Handle, MediaType, StreamId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

#[derive(Default, Clone)]
pub struct CoreEventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl CoreEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push(handler);
    }

    /// Returns true if there are any event handlers registered.
    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .is_empty()
    }

    /// Deliver `event` to every handler, in registration order.
    ///
    /// The handler list is snapshotted first so a handler may register
    /// further handlers or trigger nested dispatches.
    pub fn dispatch(&self, event: &Event) {
        let handlers = self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .clone();
        for handler in handlers {
            handler.handle_event(event);
        }
    }
}

/// Control-plane signals emitted by call channels.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    NewChannel(NewChannel),
    MembersChanged(MembersChanged),
    GroupFlagsChanged(GroupFlagsChanged),
    StreamAdded(StreamAdded),
    StreamRemoved(StreamRemoved),
    StreamDirectionChanged(StreamDirectionChanged),
    StreamStateChanged(StreamStateChanged),
    HoldStateChanged(HoldStateChanged),
    CallStateChanged(CallStateChanged),
    ChannelClosed(ChannelClosed),
}

impl Event {
    pub fn channel(&self) -> ChannelId {
        match self {
            Self::NewChannel(e) => e.channel,
            Self::MembersChanged(e) => e.channel,
            Self::GroupFlagsChanged(e) => e.channel,
            Self::StreamAdded(e) => e.channel,
            Self::StreamRemoved(e) => e.channel,
            Self::StreamDirectionChanged(e) => e.channel,
            Self::StreamStateChanged(e) => e.channel,
            Self::HoldStateChanged(e) => e.channel,
            Self::CallStateChanged(e) => e.channel,
            Self::ChannelClosed(e) => e.channel,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewChannel {
    pub channel: ChannelId,
    pub peer: Option<Handle>,
    pub creator: Handle,
    pub incoming: bool,
    pub initial_audio: bool,
    pub initial_video: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MembersChanged {
    pub channel: ChannelId,
    pub change: MembershipChange,
    pub actor: Handle,
    pub reason: GroupChangeReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupFlagsChanged {
    pub channel: ChannelId,
    pub added: GroupFlags,
    pub removed: GroupFlags,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamAdded {
    pub channel: ChannelId,
    pub stream: StreamId,
    pub peer: Handle,
    pub media_type: MediaType,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamRemoved {
    pub channel: ChannelId,
    pub stream: StreamId,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamDirectionChanged {
    pub channel: ChannelId,
    pub stream: StreamId,
    pub direction: StreamDirection,
    pub pending_send: PendingSend,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStateChanged {
    pub channel: ChannelId,
    pub stream: StreamId,
    pub state: StreamState,
}

#[derive(Debug, Clone, Serialize)]
pub struct HoldStateChanged {
    pub channel: ChannelId,
    pub state: HoldState,
    pub reason: HoldReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallStateChanged {
    pub channel: ChannelId,
    pub contact: Handle,
    pub flags: CallStateFlags,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelClosed {
    pub channel: ChannelId,
    pub closed_at: DateTime<Utc>,
}
