//! Stream bookkeeping for one call: the live [`Stream`]s and the stream
//! requests still waiting for the engine to create matching streams.

use super::error::CallError;
use imcall_core::stream::{Candidate, Codec, Stream, StreamInfo, StreamState};
use imcall_core::types::events::{
    Event, StreamAdded, StreamDirectionChanged, StreamRemoved, StreamStateChanged,
};
use imcall_core::types::{ChannelId, Handle, MediaType, StreamId, StreamName};
use log::{debug, warn};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

pub type StreamRequestResult = Result<Vec<StreamInfo>, CallError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RequestId(u64);

/// An outstanding ask for new streams.
///
/// `context` is the only way to answer the caller and is taken on first use,
/// so a request is answered at most once. Dropping an unanswered request
/// answers it with [`CallError::Cancelled`].
struct PendingStreamRequest {
    id: RequestId,
    wanted: Vec<MediaType>,
    resolved: Vec<Option<StreamInfo>>,
    context: Option<oneshot::Sender<StreamRequestResult>>,
}

impl PendingStreamRequest {
    fn new(
        id: RequestId,
        wanted: Vec<MediaType>,
        context: oneshot::Sender<StreamRequestResult>,
    ) -> Self {
        let resolved = vec![None; wanted.len()];
        Self {
            id,
            wanted,
            resolved,
            context: Some(context),
        }
    }

    fn free_slot(&self, media_type: MediaType) -> Option<usize> {
        if self.context.is_none() {
            return None;
        }
        self.wanted
            .iter()
            .zip(&self.resolved)
            .position(|(wanted, slot)| *wanted == media_type && slot.is_none())
    }

    fn is_complete(&self) -> bool {
        self.resolved.iter().all(Option::is_some)
    }

    /// Answer with the streams in the order they were asked for.
    fn succeed(&mut self) {
        if let Some(context) = self.context.take() {
            let streams = self.resolved.iter_mut().filter_map(Option::take).collect();
            let _ = context.send(Ok(streams));
        }
    }

    fn fail(&mut self, err: CallError) {
        if let Some(context) = self.context.take() {
            let _ = context.send(Err(err));
        }
    }

    /// Drop the answer slot without answering; the caller got its error
    /// synchronously instead.
    fn detach(&mut self) {
        self.context = None;
    }
}

impl Drop for PendingStreamRequest {
    fn drop(&mut self) {
        self.fail(CallError::Cancelled);
    }
}

/// Completion handle returned by `request_streams`.
///
/// Await it for the created streams, or poll it without blocking through
/// [`try_result`](Self::try_result).
#[derive(Debug)]
pub struct PendingStreams {
    rx: oneshot::Receiver<StreamRequestResult>,
}

impl PendingStreams {
    pub(crate) fn ready(result: StreamRequestResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// The result if the request has already been answered. Once this
    /// returns `Some`, the handle is spent.
    pub fn try_result(&mut self) -> Option<StreamRequestResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(CallError::Cancelled)),
        }
    }
}

impl Future for PendingStreams {
    type Output = StreamRequestResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(CallError::Cancelled)))
    }
}

pub struct StreamSetCoordinator {
    channel: ChannelId,
    streams: HashMap<StreamName, Stream>,
    /// Oldest first; new streams go to the oldest request that wants them.
    pending: Vec<PendingStreamRequest>,
    next_stream_id: u32,
    next_request_id: u64,
}

impl StreamSetCoordinator {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            streams: HashMap::new(),
            pending: Vec::new(),
            next_stream_id: 1,
            next_request_id: 1,
        }
    }

    pub(crate) fn register_request(&mut self, wanted: Vec<MediaType>) -> (RequestId, PendingStreams) {
        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;
        let (tx, rx) = oneshot::channel();
        self.pending.push(PendingStreamRequest::new(id, wanted, tx));
        (id, PendingStreams { rx })
    }

    /// Forget a request without answering it. Returns `false` if it was
    /// already resolved.
    pub(crate) fn unregister_request(&mut self, id: RequestId) -> bool {
        match self.pending.iter().position(|r| r.id == id) {
            Some(index) => {
                self.pending.remove(index).detach();
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Track a stream the engine just created and hand it to the oldest
    /// request still waiting for that media type.
    pub fn on_new_stream(
        &mut self,
        name: StreamName,
        media_type: MediaType,
        created_locally: bool,
        peer: &Handle,
        out: &mut Vec<Event>,
    ) -> Option<StreamId> {
        if self.streams.contains_key(&name) {
            warn!("{}: ignoring duplicate stream {}", self.channel, name);
            return None;
        }

        let id = StreamId(self.next_stream_id);
        self.next_stream_id += 1;
        let stream = Stream::new(id, name.clone(), media_type, created_locally);
        let info = stream.info(peer);
        self.streams.insert(name, stream);
        debug!("{}: new {} stream {}", self.channel, media_type, id);

        out.push(Event::StreamAdded(StreamAdded {
            channel: self.channel,
            stream: id,
            peer: peer.clone(),
            media_type,
        }));

        let slot = self
            .pending
            .iter()
            .enumerate()
            .find_map(|(index, request)| request.free_slot(media_type).map(|slot| (index, slot)));
        if let Some((index, slot)) = slot {
            self.pending[index].resolved[slot] = Some(info);
            if self.pending[index].is_complete() {
                let mut request = self.pending.remove(index);
                debug!("{}: stream request {:?} satisfied", self.channel, request.id);
                request.succeed();
            }
        }
        Some(id)
    }

    pub fn on_stream_state(&mut self, name: &StreamName, state: StreamState, out: &mut Vec<Event>) {
        let Some(stream) = self.streams.get_mut(name) else {
            debug!("{}: state for unknown stream {}", self.channel, name);
            return;
        };
        let current = stream.connection_state();
        if current != state && !current.can_advance_to(state) {
            debug!(
                "{}: ignoring stale state {:?} for stream {} (now {:?})",
                self.channel,
                state,
                stream.id(),
                current
            );
            return;
        }
        if stream.set_connection_state(state) {
            out.push(Event::StreamStateChanged(StreamStateChanged {
                channel: self.channel,
                stream: stream.id(),
                state,
            }));
        }
    }

    pub fn on_stream_ended(&mut self, name: &StreamName, out: &mut Vec<Event>) -> Option<StreamId> {
        let stream = self.streams.remove(name)?;
        debug!("{}: stream {} ended", self.channel, stream.id());
        out.push(Event::StreamRemoved(StreamRemoved {
            channel: self.channel,
            stream: stream.id(),
        }));
        Some(stream.id())
    }

    /// Apply an accept to one named stream, or to every stream.
    pub fn on_accept(&mut self, name: Option<&StreamName>, local: bool, out: &mut Vec<Event>) {
        let mut targets: Vec<&mut Stream> = self
            .streams
            .values_mut()
            .filter(|s| name.is_none_or(|n| s.engine_name() == n))
            .collect();
        targets.sort_by_key(|s| s.id());
        for stream in targets {
            if stream.accept(local) {
                let combined = stream.combined_direction();
                out.push(Event::StreamDirectionChanged(StreamDirectionChanged {
                    channel: self.channel,
                    stream: stream.id(),
                    direction: combined.direction,
                    pending_send: combined.pending_send,
                }));
            }
        }
    }

    pub fn add_candidates(&mut self, name: &StreamName, local: bool, candidates: Vec<Candidate>) -> bool {
        let Some(stream) = self.streams.get_mut(name) else {
            return false;
        };
        if local {
            stream.add_local_candidates(candidates);
        } else {
            stream.add_remote_candidates(candidates);
        }
        true
    }

    pub fn set_codecs(&mut self, name: &StreamName, codecs: Vec<Codec>) -> bool {
        match self.streams.get_mut(name) {
            Some(stream) => {
                if stream.set_remote_codecs(codecs) {
                    debug!("{}: stream {} has codecs", self.channel, stream.id());
                }
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding request. Returns how many were failed.
    pub fn fail_pending(&mut self, err: CallError) -> usize {
        let count = self.pending.len();
        for mut request in self.pending.drain(..) {
            request.fail(err.clone());
        }
        count
    }

    /// Cancel outstanding requests and drop every stream without per-stream
    /// notifications.
    pub fn teardown(&mut self) {
        let cancelled = self.fail_pending(CallError::Cancelled);
        if cancelled > 0 {
            debug!("{}: cancelled {} stream requests", self.channel, cancelled);
        }
        self.streams.clear();
    }

    /// Stream infos in id order.
    pub fn list(&self, peer: &Handle) -> Vec<StreamInfo> {
        let mut infos: Vec<StreamInfo> = self.streams.values().map(|s| s.info(peer)).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.streams.values().find(|s| s.id() == id)
    }

    pub fn engine_name(&self, id: StreamId) -> Option<&StreamName> {
        self.stream(id).map(Stream::engine_name)
    }
}
