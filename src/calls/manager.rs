//! Connection-level orchestration of call channels.

use super::channel::{CallChannel, ChannelContext};
use super::engine::{EngineEvent, MediaEngine};
use super::error::CallError;
use super::registry::{Dispatch, SessionRegistry};
use crate::config::CallConfig;
use dashmap::DashMap;
use imcall_core::types::events::{CoreEventBus, Event, EventHandler, NewChannel};
use imcall_core::types::{ChannelId, Handle, MediaType, MediaTypes, SessionId};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Parameters for a locally placed call.
#[derive(Debug, Clone, Default)]
pub struct ChannelRequest {
    /// Who to call. May be left empty and supplied later through
    /// `add_member` or `request_streams`.
    pub peer: Option<Handle>,
    pub initial_audio: bool,
    pub initial_video: bool,
}

impl ChannelRequest {
    pub fn audio(peer: Handle) -> Self {
        Self {
            peer: Some(peer),
            initial_audio: true,
            initial_video: false,
        }
    }

    pub fn video(peer: Handle) -> Self {
        Self {
            peer: Some(peer),
            initial_audio: true,
            initial_video: true,
        }
    }

    fn initial_types(&self) -> Vec<MediaType> {
        let mut types = Vec::new();
        if self.initial_audio {
            types.push(MediaType::Audio);
        }
        if self.initial_video {
            types.push(MediaType::Video);
        }
        types
    }
}

/// Owns every call channel of one account and feeds them engine events.
pub struct CallManager {
    config: CallConfig,
    engine: Arc<dyn MediaEngine>,
    events: CoreEventBus,
    registry: Arc<SessionRegistry>,
    channels: DashMap<ChannelId, Arc<CallChannel>>,
    next_id: AtomicU32,
}

impl CallManager {
    pub fn new(config: CallConfig, engine: Arc<dyn MediaEngine>) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new(config.account.clone()));
        Arc::new(Self {
            config,
            engine,
            events: CoreEventBus::new(),
            registry,
            channels: DashMap::new(),
            next_id: AtomicU32::new(1),
        })
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.events.add_handler(handler);
    }

    pub fn events(&self) -> &CoreEventBus {
        &self.events
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn context(&self) -> ChannelContext {
        ChannelContext {
            account: self.config.account.clone(),
            self_handle: self.config.self_handle.clone(),
            engine: self.engine.clone(),
            events: self.events.clone(),
            registry: Arc::downgrade(&self.registry),
        }
    }

    fn allocate_id(&self) -> ChannelId {
        ChannelId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn has_capacity(&self) -> bool {
        self.cleanup_closed_channels();
        self.channels.len() < self.config.max_channels
    }

    fn announce(&self, channel: &CallChannel) {
        self.events.dispatch(&Event::NewChannel(NewChannel {
            channel: channel.id(),
            peer: channel.peer(),
            creator: channel.creator().clone(),
            incoming: channel.is_incoming(),
            initial_audio: channel.initial_audio(),
            initial_video: channel.initial_video(),
        }));
    }

    /// Place a call. With a peer and initial media the first streams are
    /// requested right away; their outcome is only logged.
    pub fn create_channel(&self, request: ChannelRequest) -> Result<Arc<CallChannel>, CallError> {
        if !self.has_capacity() {
            return Err(CallError::NotAvailable(format!(
                "already in {} call(s)",
                self.config.max_channels
            )));
        }

        let id = self.allocate_id();
        let channel = CallChannel::new_outgoing(
            id,
            self.context(),
            None,
            request.initial_audio,
            request.initial_video,
        );
        self.channels.insert(id, channel.clone());
        info!("{}: new outgoing call", id);
        self.announce(&channel);

        let Some(peer) = &request.peer else {
            return Ok(channel);
        };

        let types = request.initial_types();
        let seeded = if types.is_empty() {
            channel.add_member(peer)
        } else {
            channel
                .request_streams(peer, &types)
                .map(|pending| Self::watch_initial_streams(id, pending))
        };

        if let Err(err) = seeded {
            warn!("{}: could not call {}: {}", id, peer, err);
            channel.close();
            self.channels.remove(&id);
            return Err(err);
        }
        Ok(channel)
    }

    fn watch_initial_streams(id: ChannelId, mut pending: super::PendingStreams) {
        if let Some(result) = pending.try_result() {
            Self::log_initial_streams(id, result);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    Self::log_initial_streams(id, pending.await);
                });
            }
            Err(_) => debug!("{}: initial streams pending, no runtime to watch them", id),
        }
    }

    fn log_initial_streams(id: ChannelId, result: super::StreamRequestResult) {
        match result {
            Ok(streams) => info!("{}: {} initial stream(s) ready", id, streams.len()),
            Err(err) => warn!("{}: initial streams failed: {}", id, err),
        }
    }

    /// Feed one engine event in. Safe to call re-entrantly from inside an
    /// engine call.
    pub fn handle_engine_event(&self, event: EngineEvent) {
        match self.registry.dispatch(event) {
            Dispatch::Routed | Dispatch::Dropped => {}
            Dispatch::Unclaimed {
                session,
                peer,
                media,
            } => self.on_incoming(session, peer, media),
            Dispatch::Orphaned(session) => {
                debug!("hanging up orphaned session {}", session);
                self.engine.hangup(&session);
            }
        }
    }

    fn on_incoming(&self, session: SessionId, peer: Handle, media: MediaTypes) {
        if !self.has_capacity() {
            warn!("rejecting call from {} on {}: busy", peer, session);
            self.engine.reject(&session);
            return;
        }

        let id = self.allocate_id();
        let channel = CallChannel::new_incoming(id, self.context(), session.clone(), peer.clone(), media);
        if let Err(err) = self.registry.register(&session, &channel) {
            warn!("{}: {}", id, err);
            return;
        }
        self.channels.insert(id, channel.clone());
        info!("{}: incoming call from {} ({:?})", id, peer, media);
        self.announce(&channel);
    }

    pub fn channel(&self, id: ChannelId) -> Option<Arc<CallChannel>> {
        self.channels.get(&id).map(|entry| entry.value().clone())
    }

    /// Live channels, oldest first.
    pub fn channels(&self) -> Vec<Arc<CallChannel>> {
        let mut channels: Vec<_> = self
            .channels
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| entry.value().clone())
            .collect();
        channels.sort_by_key(|c| c.id());
        channels
    }

    /// Drop closed channels. Returns how many were removed.
    pub fn cleanup_closed_channels(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, channel| !channel.is_closed());
        before.saturating_sub(self.channels.len())
    }

    /// Close every channel, as on disconnect.
    pub fn close_all(&self) {
        let channels: Vec<_> = self.channels.iter().map(|e| e.value().clone()).collect();
        for channel in channels {
            channel.close();
        }
        self.channels.clear();
    }
}
