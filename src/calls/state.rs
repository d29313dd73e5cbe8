//! Lifecycle phase of a call channel.

use imcall_core::membership::MembershipSet;
use imcall_core::types::Handle;
use serde::Serialize;

/// Where a call stands, derived from its peer, membership and `closed` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallPhase {
    /// Outgoing slot with no peer committed yet.
    Unestablished,
    /// Peer known, but the two sides are not both members.
    Pending,
    /// Local user and peer are both members.
    Active,
    /// Closed; terminal.
    Ended,
}

impl CallPhase {
    pub fn derive(
        closed: bool,
        self_handle: &Handle,
        peer: Option<&Handle>,
        members: &MembershipSet,
    ) -> Self {
        if closed {
            return Self::Ended;
        }
        match peer {
            None => Self::Unestablished,
            Some(peer) if members.is_member(self_handle) && members.is_member(peer) => {
                Self::Active
            }
            Some(_) => Self::Pending,
        }
    }
}
