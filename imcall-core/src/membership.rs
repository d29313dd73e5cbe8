//! Group-style membership of a call: every contact is a member, pending
//! local approval, pending remote approval, or absent.
//!
//! A single tagged entry per handle keeps the three sets disjoint by
//! construction.

use crate::types::Handle;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Membership {
    Member,
    /// Waiting for the local user to act (an incoming call ringing here).
    LocalPending,
    /// Invited; waiting for the remote side to act.
    RemotePending,
}

/// Reason attached to a membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GroupChangeReason {
    #[default]
    None,
    Offline,
    Kicked,
    Busy,
    Invited,
    Banned,
    Error,
    InvalidContact,
    NoAnswer,
    Renamed,
    PermissionDenied,
    Separated,
}

impl GroupChangeReason {
    /// Reasons the engine can express as a plain hangup.
    pub fn is_plain_hangup(self) -> bool {
        matches!(
            self,
            Self::None | Self::Offline | Self::Busy | Self::Error | Self::NoAnswer
        )
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct GroupFlags: u8 {
        /// Contacts may be invited.
        const CAN_ADD = 0b001;
        /// Members may be removed.
        const CAN_REMOVE = 0b010;
    }
}

/// Delta produced by a membership mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipChange {
    pub added: Vec<Handle>,
    pub removed: Vec<Handle>,
    pub local_pending: Vec<Handle>,
    pub remote_pending: Vec<Handle>,
}

impl MembershipChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.local_pending.is_empty()
            && self.remote_pending.is_empty()
    }

    fn absorb(&mut self, other: MembershipChange) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.local_pending.extend(other.local_pending);
        self.remote_pending.extend(other.remote_pending);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MembershipSet {
    entries: HashMap<Handle, Membership>,
}

impl MembershipSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, handle: &Handle) -> Option<Membership> {
        self.entries.get(handle).copied()
    }

    pub fn is_member(&self, handle: &Handle) -> bool {
        self.get(handle) == Some(Membership::Member)
    }

    /// Put `handle` into `state`, moving it out of whatever set it was in.
    pub fn set(&mut self, handle: &Handle, state: Membership) -> MembershipChange {
        let mut change = MembershipChange::default();
        if self.entries.insert(handle.clone(), state) == Some(state) {
            return change;
        }
        let bucket = match state {
            Membership::Member => &mut change.added,
            Membership::LocalPending => &mut change.local_pending,
            Membership::RemotePending => &mut change.remote_pending,
        };
        bucket.push(handle.clone());
        change
    }

    pub fn remove(&mut self, handle: &Handle) -> MembershipChange {
        let mut change = MembershipChange::default();
        if self.entries.remove(handle).is_some() {
            change.removed.push(handle.clone());
        }
        change
    }

    pub fn remove_all<'a>(&mut self, handles: impl IntoIterator<Item = &'a Handle>) -> MembershipChange {
        let mut change = MembershipChange::default();
        for handle in handles {
            change.absorb(self.remove(handle));
        }
        change
    }

    pub fn members(&self) -> Vec<Handle> {
        self.collect(Membership::Member)
    }

    pub fn local_pending(&self) -> Vec<Handle> {
        self.collect(Membership::LocalPending)
    }

    pub fn remote_pending(&self) -> Vec<Handle> {
        self.collect(Membership::RemotePending)
    }

    fn collect(&self, state: Membership) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self
            .entries
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(h, _)| h.clone())
            .collect();
        handles.sort();
        handles
    }
}
