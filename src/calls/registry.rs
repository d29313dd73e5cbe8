//! Routing of engine events to the call channel that owns the session.

use super::channel::CallChannel;
use super::engine::EngineEvent;
use super::error::CallError;
use imcall_core::types::{ChannelId, Handle, MediaTypes, SessionId};
use log::{debug, warn};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};

/// Outcome of routing one engine event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Delivered to a channel (or consumed by binding it).
    Routed,
    /// A new session nobody was waiting for: an incoming call.
    Unclaimed {
        session: SessionId,
        peer: Handle,
        media: MediaTypes,
    },
    /// A session was claimed by a channel that closed before it could bind.
    Orphaned(SessionId),
    /// Not for us, or for a session that is already gone.
    Dropped,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, Arc<CallChannel>>,
    /// Outgoing channels waiting for the engine to announce their session.
    awaiting: HashMap<Handle, Arc<CallChannel>>,
}

/// Connection-level session table. Each engine session maps to exactly one
/// channel; entries are added when the session binds and removed when the
/// channel closes.
pub struct SessionRegistry {
    account: String,
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("Mutex should not be poisoned")
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Bind the next session the engine creates for `peer` to `channel`.
    pub fn expect_session(&self, peer: &Handle, channel: &Arc<CallChannel>) -> Result<(), CallError> {
        let mut inner = self.lock();
        match inner.awaiting.entry(peer.clone()) {
            Entry::Occupied(existing) if existing.get().id() != channel.id() => {
                Err(CallError::NotAvailable(format!(
                    "a call to {peer} is already being set up"
                )))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                debug!("{}: waiting for a session with {}", channel.id(), peer);
                slot.insert(channel.clone());
                Ok(())
            }
        }
    }

    pub fn cancel_expectation(&self, peer: &Handle, channel: ChannelId) {
        let mut inner = self.lock();
        if inner.awaiting.get(peer).is_some_and(|c| c.id() == channel) {
            inner.awaiting.remove(peer);
        }
    }

    /// Register an already-existing session, as for incoming calls.
    pub fn register(&self, session: &SessionId, channel: &Arc<CallChannel>) -> Result<(), CallError> {
        let mut inner = self.lock();
        match inner.sessions.entry(session.clone()) {
            Entry::Occupied(existing) => Err(CallError::NotAvailable(format!(
                "session {session} already belongs to {}",
                existing.get().id()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(channel.clone());
                Ok(())
            }
        }
    }

    pub fn lookup(&self, session: &SessionId) -> Option<Arc<CallChannel>> {
        self.lock().sessions.get(session).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_awaiting(&self, peer: &Handle) -> bool {
        self.lock().awaiting.contains_key(peer)
    }

    /// Drop every entry that points at `channel`.
    pub fn forget(&self, channel: ChannelId, session: Option<&SessionId>, peer: Option<&Handle>) {
        let mut inner = self.lock();
        if let Some(session) = session
            && inner.sessions.get(session).is_some_and(|c| c.id() == channel)
        {
            inner.sessions.remove(session);
        }
        if let Some(peer) = peer
            && inner.awaiting.get(peer).is_some_and(|c| c.id() == channel)
        {
            inner.awaiting.remove(peer);
        }
    }

    /// Route one engine event. The owning channel is invoked with the
    /// registry unlocked, since it may call straight back in here.
    pub fn dispatch(&self, event: EngineEvent) -> Dispatch {
        if let EngineEvent::InitMedia {
            session,
            account,
            peer,
            media,
        } = &event
        {
            return self.on_init_media(session, account, peer, *media);
        }

        let target = self.lookup(event.session());
        match target {
            Some(channel) => {
                channel.handle_engine_event(event);
                Dispatch::Routed
            }
            None => {
                debug!("dropping event for unknown session {}", event.session());
                Dispatch::Dropped
            }
        }
    }

    fn on_init_media(
        &self,
        session: &SessionId,
        account: &str,
        peer: &Handle,
        media: MediaTypes,
    ) -> Dispatch {
        if account != self.account {
            debug!("ignoring session {session} for account {account}");
            return Dispatch::Dropped;
        }

        let claimed = {
            let mut inner = self.lock();
            if inner.sessions.contains_key(session) {
                warn!("session {session} announced twice");
                return Dispatch::Dropped;
            }
            let claimed = inner.awaiting.remove(peer);
            if let Some(channel) = &claimed {
                inner.sessions.insert(session.clone(), channel.clone());
            }
            claimed
        };

        let Some(channel) = claimed else {
            return Dispatch::Unclaimed {
                session: session.clone(),
                peer: peer.clone(),
                media,
            };
        };

        if channel.bind_session(session) {
            Dispatch::Routed
        } else {
            warn!("{} could not take session {}", channel.id(), session);
            self.forget(channel.id(), Some(session), None);
            Dispatch::Orphaned(session.clone())
        }
    }
}
