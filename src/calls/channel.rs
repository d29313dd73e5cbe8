//! One audio/video call with a single remote peer.
//!
//! A [`CallChannel`] takes requests from the control plane and events from
//! the media engine. The engine may answer a request re-entrantly, before the
//! engine call returns. So every method records its bookkeeping first, then
//! releases the state lock and only then calls the engine or emits signals.

use super::coordinator::{PendingStreams, RequestId, StreamSetCoordinator};
use super::engine::{EngineEvent, MediaEngine, MediaState, StreamInfoType};
use super::error::CallError;
use super::registry::SessionRegistry;
use super::state::CallPhase;
use chrono::{DateTime, Utc};
use imcall_core::membership::{
    GroupChangeReason, GroupFlags, Membership, MembershipChange, MembershipSet,
};
use imcall_core::stream::{Stream, StreamDirection, StreamInfo, StreamState};
use imcall_core::types::call::{CallStateFlags, HoldReason, HoldState};
use imcall_core::types::events::{
    CallStateChanged, ChannelClosed, CoreEventBus, Event, GroupFlagsChanged, HoldStateChanged,
    MembersChanged,
};
use imcall_core::types::{
    ChannelId, Handle, MediaCaps, MediaType, MediaTypes, SessionId, StreamId, StreamName,
};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Connection-wide pieces every channel shares.
#[derive(Clone)]
pub(crate) struct ChannelContext {
    pub account: String,
    pub self_handle: Handle,
    pub engine: Arc<dyn MediaEngine>,
    pub events: CoreEventBus,
    pub registry: Weak<SessionRegistry>,
}

pub struct CallChannel {
    id: ChannelId,
    account: String,
    self_handle: Handle,
    creator: Handle,
    initial_audio: bool,
    initial_video: bool,
    created_at: DateTime<Utc>,
    engine: Arc<dyn MediaEngine>,
    events: CoreEventBus,
    registry: Weak<SessionRegistry>,
    inner: Mutex<ChannelInner>,
}

struct ChannelInner {
    /// Fixed once set.
    peer: Option<Handle>,
    session: Option<SessionId>,
    members: MembershipSet,
    group_flags: GroupFlags,
    hold_state: HoldState,
    hold_reason: HoldReason,
    call_states: HashMap<Handle, CallStateFlags>,
    closed: bool,
    /// The engine session has been told to end, or ended on its own.
    media_ended: bool,
    streams: StreamSetCoordinator,
}

impl ChannelInner {
    fn announce(
        &self,
        channel: ChannelId,
        change: MembershipChange,
        actor: &Handle,
        reason: GroupChangeReason,
        out: &mut Vec<Event>,
    ) {
        if change.is_empty() {
            return;
        }
        out.push(Event::MembersChanged(MembersChanged {
            channel,
            change,
            actor: actor.clone(),
            reason,
        }));
    }

    fn change_group_flags(
        &mut self,
        channel: ChannelId,
        add: GroupFlags,
        remove: GroupFlags,
        out: &mut Vec<Event>,
    ) {
        let before = self.group_flags;
        self.group_flags.insert(add);
        self.group_flags.remove(remove);
        if before != self.group_flags {
            out.push(Event::GroupFlagsChanged(GroupFlagsChanged {
                channel,
                added: self.group_flags - before,
                removed: before - self.group_flags,
            }));
        }
    }

    fn change_call_state(
        &mut self,
        channel: ChannelId,
        contact: &Handle,
        add: CallStateFlags,
        remove: CallStateFlags,
        out: &mut Vec<Event>,
    ) {
        let flags = self.call_states.entry(contact.clone()).or_default();
        let before = *flags;
        flags.insert(add);
        flags.remove(remove);
        if before != *flags {
            out.push(Event::CallStateChanged(CallStateChanged {
                channel,
                contact: contact.clone(),
                flags: *flags,
            }));
        }
    }

    fn set_hold_state(
        &mut self,
        channel: ChannelId,
        state: HoldState,
        reason: HoldReason,
        out: &mut Vec<Event>,
    ) {
        if self.hold_state == state {
            return;
        }
        self.hold_state = state;
        self.hold_reason = reason;
        out.push(Event::HoldStateChanged(HoldStateChanged {
            channel,
            state,
            reason,
        }));
    }
}

/// What the closing path still has to do once the lock is released.
struct Teardown {
    hangup: Option<SessionId>,
    session: Option<SessionId>,
    peer: Option<Handle>,
}

impl CallChannel {
    /// An outgoing call placed by the local user, possibly not yet addressed.
    pub(crate) fn new_outgoing(
        id: ChannelId,
        ctx: ChannelContext,
        peer: Option<Handle>,
        initial_audio: bool,
        initial_video: bool,
    ) -> Arc<Self> {
        let mut members = MembershipSet::new();
        members.set(&ctx.self_handle, Membership::Member);
        Self::build(
            id,
            ctx.self_handle.clone(),
            ctx,
            initial_audio,
            initial_video,
            ChannelInner {
                peer,
                session: None,
                members,
                group_flags: GroupFlags::CAN_ADD | GroupFlags::CAN_REMOVE,
                hold_state: HoldState::Unheld,
                hold_reason: HoldReason::None,
                call_states: HashMap::new(),
                closed: false,
                media_ended: false,
                streams: StreamSetCoordinator::new(id),
            },
        )
    }

    /// A call the peer placed; it rings until the local user adds itself.
    pub(crate) fn new_incoming(
        id: ChannelId,
        ctx: ChannelContext,
        session: SessionId,
        peer: Handle,
        media: MediaTypes,
    ) -> Arc<Self> {
        let mut members = MembershipSet::new();
        members.set(&peer, Membership::Member);
        members.set(&ctx.self_handle, Membership::LocalPending);
        Self::build(
            id,
            peer.clone(),
            ctx,
            media.contains(MediaTypes::AUDIO),
            media.contains(MediaTypes::VIDEO),
            ChannelInner {
                peer: Some(peer),
                session: Some(session),
                members,
                group_flags: GroupFlags::CAN_REMOVE,
                hold_state: HoldState::Unheld,
                hold_reason: HoldReason::None,
                call_states: HashMap::new(),
                closed: false,
                media_ended: false,
                streams: StreamSetCoordinator::new(id),
            },
        )
    }

    fn build(
        id: ChannelId,
        creator: Handle,
        ctx: ChannelContext,
        initial_audio: bool,
        initial_video: bool,
        inner: ChannelInner,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            account: ctx.account,
            self_handle: ctx.self_handle,
            creator,
            initial_audio,
            initial_video,
            created_at: Utc::now(),
            engine: ctx.engine,
            events: ctx.events,
            registry: ctx.registry,
            inner: Mutex::new(inner),
        })
    }

    /// Mutate state under the lock, then emit the collected signals with the
    /// lock released so handlers may call back into the channel.
    fn update<R>(&self, f: impl FnOnce(&mut ChannelInner, &mut Vec<Event>) -> R) -> R {
        let mut out = Vec::new();
        let result = {
            let mut inner = self.inner.lock().expect("Mutex should not be poisoned");
            f(&mut inner, &mut out)
        };
        for event in &out {
            self.events.dispatch(event);
        }
        result
    }

    fn read<R>(&self, f: impl FnOnce(&ChannelInner) -> R) -> R {
        let inner = self.inner.lock().expect("Mutex should not be poisoned");
        f(&inner)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn creator(&self) -> &Handle {
        &self.creator
    }

    pub fn self_handle(&self) -> &Handle {
        &self.self_handle
    }

    pub fn is_incoming(&self) -> bool {
        self.creator != self.self_handle
    }

    pub fn initial_audio(&self) -> bool {
        self.initial_audio
    }

    pub fn initial_video(&self) -> bool {
        self.initial_video
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn peer(&self) -> Option<Handle> {
        self.read(|inner| inner.peer.clone())
    }

    pub fn session(&self) -> Option<SessionId> {
        self.read(|inner| inner.session.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.read(|inner| inner.closed)
    }

    pub fn media_ended(&self) -> bool {
        self.read(|inner| inner.media_ended)
    }

    pub fn members(&self) -> Vec<Handle> {
        self.read(|inner| inner.members.members())
    }

    pub fn local_pending(&self) -> Vec<Handle> {
        self.read(|inner| inner.members.local_pending())
    }

    pub fn remote_pending(&self) -> Vec<Handle> {
        self.read(|inner| inner.members.remote_pending())
    }

    pub fn membership(&self, handle: &Handle) -> Option<Membership> {
        self.read(|inner| inner.members.get(handle))
    }

    pub fn group_flags(&self) -> GroupFlags {
        self.read(|inner| inner.group_flags)
    }

    pub fn hold_state(&self) -> (HoldState, HoldReason) {
        self.read(|inner| (inner.hold_state, inner.hold_reason))
    }

    pub fn call_states(&self) -> HashMap<Handle, CallStateFlags> {
        self.read(|inner| {
            inner
                .call_states
                .iter()
                .filter(|(_, flags)| !flags.is_empty())
                .map(|(h, f)| (h.clone(), *f))
                .collect()
        })
    }

    pub fn phase(&self) -> CallPhase {
        self.read(|inner| {
            CallPhase::derive(
                inner.closed,
                &self.self_handle,
                inner.peer.as_ref(),
                &inner.members,
            )
        })
    }

    pub fn pending_requests(&self) -> usize {
        self.read(|inner| inner.streams.pending_count())
    }

    /// Snapshot of one stream, including candidates and codecs.
    pub fn stream(&self, id: StreamId) -> Option<Stream> {
        self.read(|inner| inner.streams.stream(id).cloned())
    }

    pub fn list_streams(&self) -> Vec<StreamInfo> {
        self.read(|inner| match &inner.peer {
            Some(peer) => inner.streams.list(peer),
            None => Vec::new(),
        })
    }

    /// Ask for new streams with `peer`.
    ///
    /// Validation failures come back as `Err` right away. Otherwise the
    /// returned handle resolves once the engine has created a stream for every
    /// requested type (in request order), or fails if the channel closes
    /// first.
    pub fn request_streams(
        self: &Arc<Self>,
        peer: &Handle,
        types: &[MediaType],
    ) -> Result<PendingStreams, CallError> {
        if types.is_empty() {
            return Ok(PendingStreams::ready(Ok(Vec::new())));
        }

        let (has_session, has_streams) = self.read(|inner| {
            if inner.closed {
                return Err(CallError::NotAvailable("channel is closed".into()));
            }
            if let Some(current) = &inner.peer
                && current != peer
            {
                return Err(CallError::NotAvailable(format!(
                    "call is with {current}, not {peer}"
                )));
            }
            Ok((inner.session.is_some(), !inner.streams.is_empty()))
        })?;

        if has_streams {
            let caps = self.engine.peer_media_caps(&self.account, peer);
            if !caps.contains(MediaCaps::MODIFY_SESSION) {
                return Err(CallError::NotAvailable(format!(
                    "{peer} cannot add streams to a running call"
                )));
            }
            if let Some(missing) = types.iter().find(|t| !caps.supports(**t)) {
                return Err(CallError::NotAvailable(format!(
                    "{peer} does not support {missing}"
                )));
            }
        }

        let (request, pending, committed, invited) = self.update(|inner, out| {
            let committed = inner.peer.is_none();
            if committed {
                inner.peer = Some(peer.clone());
            }
            let invited = inner.members.get(peer).is_none();
            if invited {
                let change = inner.members.set(peer, Membership::RemotePending);
                inner.announce(self.id, change, &self.self_handle, GroupChangeReason::Invited, out);
            }
            let (request, pending) = inner.streams.register_request(types.to_vec());
            (request, pending, committed, invited)
        });

        if !has_session && let Err(err) = self.expect_session(peer) {
            self.abandon_request(request, peer, committed, invited);
            return Err(err);
        }

        let audio = types.iter().filter(|t| **t == MediaType::Audio).count();
        let video = types.len() - audio;
        for index in 0..audio.max(video) {
            let mut media = MediaTypes::empty();
            if index < audio {
                media |= MediaTypes::AUDIO;
            }
            if index < video {
                media |= MediaTypes::VIDEO;
            }
            debug!("{}: initiating {:?} with {}", self.id, media, peer);
            if let Err(failure) = self.engine.initiate_session(&self.account, peer, media) {
                warn!("{}: engine refused media with {}: {}", self.id, peer, failure);
                self.abandon_request(request, peer, committed, invited);
                if !has_session
                    && self.session().is_none()
                    && let Some(registry) = self.registry.upgrade()
                {
                    registry.cancel_expectation(peer, self.id);
                }
                return Err(CallError::NotAvailable(failure.to_string()));
            }
        }

        Ok(pending)
    }

    /// Roll back a `request_streams` that failed before the engine took it:
    /// forget the request, withdraw the invitation it made and release the
    /// peer it committed.
    fn abandon_request(&self, request: RequestId, peer: &Handle, committed: bool, invited: bool) {
        self.update(|inner, out| {
            inner.streams.unregister_request(request);
            if invited && inner.members.get(peer) == Some(Membership::RemotePending) {
                let change = inner.members.remove(peer);
                inner.announce(self.id, change, &self.self_handle, GroupChangeReason::Error, out);
            }
            if committed && inner.session.is_none() {
                inner.peer = None;
            }
        });
    }

    /// Stop the streams with the given ids.
    pub fn remove_streams(&self, ids: &[StreamId]) -> Result<(), CallError> {
        if let Some(peer) = self.peer() {
            let caps = self.engine.peer_media_caps(&self.account, &peer);
            if !caps.contains(MediaCaps::MODIFY_SESSION) {
                return Err(CallError::NotImplemented(format!(
                    "{peer} cannot remove streams from a running call"
                )));
            }
        }

        let (session, names) = self.read(|inner| -> Result<_, CallError> {
            let mut names: Vec<StreamName> = Vec::with_capacity(ids.len());
            for id in ids {
                let name = inner
                    .streams
                    .engine_name(*id)
                    .ok_or_else(|| CallError::InvalidArgument(format!("unknown stream id {id}")))?;
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            Ok((inner.session.clone(), names))
        })?;

        if let Some(session) = session {
            for name in &names {
                self.engine.end_stream(&session, name);
            }
        }
        Ok(())
    }

    pub fn request_stream_direction(
        &self,
        id: StreamId,
        _direction: StreamDirection,
    ) -> Result<(), CallError> {
        self.read(|inner| {
            if inner.streams.stream(id).is_none() {
                return Err(CallError::InvalidArgument(format!("unknown stream id {id}")));
            }
            Err(CallError::NotImplemented(
                "stream direction cannot be changed".into(),
            ))
        })
    }

    /// The media side gave up on a stream; end it in the engine.
    pub fn report_stream_error(&self, id: StreamId, message: &str) -> Result<(), CallError> {
        let (session, name) = self.read(|inner| -> Result<_, CallError> {
            let session = inner
                .session
                .clone()
                .ok_or_else(|| CallError::NotAvailable("no media session".into()))?;
            let name = inner
                .streams
                .engine_name(id)
                .cloned()
                .ok_or_else(|| CallError::InvalidArgument(format!("unknown stream id {id}")))?;
            Ok((session, name))
        })?;
        warn!("{}: stream {} failed: {}", self.id, id, message);
        self.engine.end_stream(&session, &name);
        Ok(())
    }

    /// Invite the peer (outgoing calls) or answer (the local user, on an
    /// incoming call).
    pub fn add_member(&self, handle: &Handle) -> Result<(), CallError> {
        let accept = self.update(|inner, out| -> Result<_, CallError> {
            if inner.closed {
                return Err(CallError::NotAvailable("channel is closed".into()));
            }

            if *handle == self.self_handle {
                if inner.members.get(handle) != Some(Membership::LocalPending) {
                    return Err(CallError::NotAvailable("there is no call to answer".into()));
                }
                if inner.hold_state != HoldState::Unheld {
                    return Err(CallError::NotAvailable("cannot answer a held call".into()));
                }
                let session = inner
                    .session
                    .clone()
                    .ok_or_else(|| CallError::NotAvailable("no media session".into()))?;
                let change = inner.members.set(handle, Membership::Member);
                inner.announce(self.id, change, &self.self_handle, GroupChangeReason::None, out);
                return Ok(Some(session));
            }

            if self.creator != self.self_handle {
                return Err(CallError::NotAvailable(format!(
                    "cannot add {handle} to an incoming call"
                )));
            }
            if let Some(current) = &inner.peer
                && current != handle
            {
                return Err(CallError::NotAvailable(format!(
                    "call is already with {current}"
                )));
            }
            inner.peer = Some(handle.clone());
            if inner.members.get(handle).is_none() {
                let change = inner.members.set(handle, Membership::RemotePending);
                inner.announce(self.id, change, &self.self_handle, GroupChangeReason::Invited, out);
            }
            Ok(None)
        })?;

        if let Some(session) = accept {
            info!("{}: answering call from {}", self.id, self.creator);
            self.engine.accept(&session, None, true);
        }
        Ok(())
    }

    /// Leave the call. Only the local user can be removed.
    pub fn remove_member(&self, handle: &Handle, reason: GroupChangeReason) -> Result<(), CallError> {
        if *handle != self.self_handle {
            return Err(CallError::NotAvailable(
                "only the local user can leave a call".into(),
            ));
        }

        enum Leave {
            Close,
            Hangup(SessionId),
            Nothing,
        }

        let leave = self.update(|inner, out| {
            if inner.closed {
                return Ok(Leave::Nothing);
            }
            let Some(session) = inner.session.clone() else {
                return Ok(Leave::Close);
            };
            if !reason.is_plain_hangup() {
                return Err(CallError::NotAvailable(format!(
                    "cannot end a call with reason {reason:?}"
                )));
            }
            inner.change_group_flags(self.id, GroupFlags::empty(), GroupFlags::CAN_ADD, out);
            if inner.media_ended {
                return Ok(Leave::Nothing);
            }
            inner.media_ended = true;
            Ok(Leave::Hangup(session))
        })?;

        match leave {
            Leave::Close => self.close(),
            Leave::Hangup(session) => {
                info!("{}: hanging up ({:?})", self.id, reason);
                self.engine.hangup(&session);
            }
            Leave::Nothing => {}
        }
        Ok(())
    }

    /// Put the call on hold or take it off hold.
    pub fn request_hold(&self, hold: bool) -> Result<(), CallError> {
        let session = self.update(|inner, out| -> Result<_, CallError> {
            if inner.closed {
                return Err(CallError::NotAvailable("channel is closed".into()));
            }
            let session = inner
                .session
                .clone()
                .ok_or_else(|| CallError::NotAvailable("no media session".into()))?;
            if inner.hold_state.is_holding() == hold {
                return Ok(None);
            }
            let target = if hold {
                HoldState::PendingHold
            } else {
                HoldState::PendingUnhold
            };
            inner.set_hold_state(self.id, target, HoldReason::Requested, out);
            Ok(Some(session))
        })?;

        if let Some(session) = session {
            self.engine.hold(&session, hold);
        }
        Ok(())
    }

    /// Attach the engine session created for our initiate. Fails if the
    /// channel is closed or already bound.
    pub(crate) fn bind_session(&self, session: &SessionId) -> bool {
        self.update(|inner, _| {
            if inner.closed || inner.session.is_some() {
                return false;
            }
            info!("{}: bound to session {}", self.id, session);
            inner.session = Some(session.clone());
            true
        })
    }

    fn expect_session(self: &Arc<Self>, peer: &Handle) -> Result<(), CallError> {
        match self.registry.upgrade() {
            Some(registry) => registry.expect_session(peer, self),
            None => Err(CallError::NotAvailable("connection is gone".into())),
        }
    }

    /// Entry point for engine events routed here by the registry.
    pub(crate) fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::InitMedia { .. } => {}
            EngineEvent::StreamCreated {
                stream,
                participant,
                media_type,
                initiator,
                ..
            } => self.on_new_stream(stream, &participant, media_type, initiator),
            EngineEvent::StateChanged {
                state: MediaState::Connected,
                stream: Some(stream),
                ..
            } => self.on_stream_state(&stream, StreamState::Connected),
            EngineEvent::StateChanged {
                state: MediaState::Connected,
                stream: None,
                ..
            } => debug!("{}: media session connected", self.id),
            EngineEvent::StateChanged {
                state: MediaState::End,
                stream: Some(stream),
                ..
            } => self.on_stream_ended(&stream),
            EngineEvent::StateChanged {
                state: MediaState::End,
                stream: None,
                ..
            } => self.on_session_ended(),
            EngineEvent::StreamInfo {
                info, stream, local, ..
            } => self.on_stream_info(info, stream.as_ref(), local),
            EngineEvent::StreamState { stream, state, .. } => self.on_stream_state(&stream, state),
            EngineEvent::Candidates {
                stream,
                local,
                candidates,
                ..
            } => {
                let known = self.update(|inner, _| inner.streams.add_candidates(&stream, local, candidates));
                if !known {
                    debug!("{}: candidates for unknown stream {}", self.id, stream);
                }
            }
            EngineEvent::CodecsChanged { stream, codecs, .. } => {
                let known = self.update(|inner, _| inner.streams.set_codecs(&stream, codecs));
                if !known {
                    debug!("{}: codecs for unknown stream {}", self.id, stream);
                }
            }
            EngineEvent::Error { message, .. } => {
                warn!("{}: media engine error: {}", self.id, message);
            }
        }
    }

    fn on_new_stream(
        &self,
        name: StreamName,
        participant: &Handle,
        media_type: MediaType,
        created_locally: bool,
    ) {
        self.update(|inner, out| {
            if inner.closed {
                return;
            }
            let peer = inner.peer.get_or_insert_with(|| participant.clone()).clone();
            if peer != *participant {
                warn!(
                    "{}: ignoring stream {} from {} (call is with {})",
                    self.id, name, participant, peer
                );
                return;
            }
            inner
                .streams
                .on_new_stream(name, media_type, created_locally, &peer, out);
        });
    }

    fn on_stream_state(&self, name: &StreamName, state: StreamState) {
        self.update(|inner, out| inner.streams.on_stream_state(name, state, out));
    }

    fn on_stream_ended(&self, name: &StreamName) {
        self.update(|inner, out| {
            inner.streams.on_stream_ended(name, out);
        });
    }

    fn on_stream_info(&self, info: StreamInfoType, stream: Option<&StreamName>, local: bool) {
        self.update(|inner, out| {
            if inner.closed {
                return;
            }
            match info {
                StreamInfoType::Accept => {
                    inner.streams.on_accept(stream, local, out);
                    if local {
                        return;
                    }
                    let Some(peer) = inner.peer.clone() else {
                        return;
                    };
                    if inner.members.get(&peer) == Some(Membership::RemotePending) {
                        let change = inner.members.set(&peer, Membership::Member);
                        inner.announce(self.id, change, &peer, GroupChangeReason::None, out);
                        info!("{}: {} answered", self.id, peer);
                    }
                    inner.change_call_state(
                        self.id,
                        &peer,
                        CallStateFlags::empty(),
                        CallStateFlags::RINGING,
                        out,
                    );
                }
                StreamInfoType::Reject | StreamInfoType::Hangup => {
                    if local || stream.is_some() {
                        return;
                    }
                    let Some(peer) = inner.peer.clone() else {
                        return;
                    };
                    let reason = if info == StreamInfoType::Reject {
                        GroupChangeReason::Busy
                    } else {
                        GroupChangeReason::None
                    };
                    let change = inner.members.remove(&peer);
                    inner.announce(self.id, change, &peer, reason, out);
                }
                StreamInfoType::Hold | StreamInfoType::Unhold => {
                    let hold = info == StreamInfoType::Hold;
                    if local {
                        let requested = matches!(
                            inner.hold_state,
                            HoldState::PendingHold | HoldState::PendingUnhold
                        );
                        let reason = if requested {
                            HoldReason::Requested
                        } else {
                            HoldReason::ResourceNotAvailable
                        };
                        let state = if hold { HoldState::Held } else { HoldState::Unheld };
                        inner.set_hold_state(self.id, state, reason, out);
                    } else if let Some(peer) = inner.peer.clone() {
                        let (add, remove) = if hold {
                            (CallStateFlags::HELD, CallStateFlags::empty())
                        } else {
                            (CallStateFlags::empty(), CallStateFlags::HELD)
                        };
                        inner.change_call_state(self.id, &peer, add, remove, out);
                    }
                }
                StreamInfoType::Ringing => {
                    if local {
                        return;
                    }
                    if let Some(peer) = inner.peer.clone() {
                        inner.change_call_state(
                            self.id,
                            &peer,
                            CallStateFlags::RINGING,
                            CallStateFlags::empty(),
                            out,
                        );
                    }
                }
                StreamInfoType::Mute | StreamInfoType::Unmute => {
                    debug!("{}: {:?} (local: {})", self.id, info, local);
                }
            }
        });
    }

    /// The whole engine session is gone.
    fn on_session_ended(&self) {
        let was_open = self.update(|inner, out| {
            if inner.closed {
                return false;
            }
            inner.media_ended = true;
            let mut parties = vec![self.self_handle.clone()];
            parties.extend(inner.peer.clone());
            let change = inner.members.remove_all(&parties);
            inner.announce(self.id, change, &self.self_handle, GroupChangeReason::None, out);
            let cancelled = inner.streams.fail_pending(CallError::Cancelled);
            if cancelled > 0 {
                debug!("{}: cancelled {} stream requests", self.id, cancelled);
            }
            true
        });
        if was_open {
            info!("{}: media session ended", self.id);
            self.close();
        }
    }

    /// Close the channel. Safe to call any number of times, from any state.
    pub fn close(&self) {
        let teardown = self.update(|inner, out| {
            if inner.closed {
                return None;
            }
            inner.closed = true;
            let hangup = match &inner.session {
                Some(session) if !inner.media_ended => {
                    inner.media_ended = true;
                    Some(session.clone())
                }
                _ => None,
            };
            let mut parties = vec![self.self_handle.clone()];
            parties.extend(inner.peer.clone());
            let change = inner.members.remove_all(&parties);
            inner.announce(self.id, change, &self.self_handle, GroupChangeReason::None, out);
            inner.streams.teardown();
            Some(Teardown {
                hangup,
                session: inner.session.clone(),
                peer: inner.peer.clone(),
            })
        });
        let Some(teardown) = teardown else {
            return;
        };

        if let Some(session) = &teardown.hangup {
            self.engine.hangup(session);
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.forget(self.id, teardown.session.as_ref(), teardown.peer.as_ref());
        }
        info!("{}: closed", self.id);
        self.events.dispatch(&Event::ChannelClosed(ChannelClosed {
            channel: self.id,
            closed_at: Utc::now(),
        }));
    }
}

impl std::fmt::Debug for CallChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallChannel")
            .field("id", &self.id)
            .field("creator", &self.creator)
            .field("peer", &self.peer())
            .field("phase", &self.phase())
            .finish()
    }
}
