//! Behavioural tests for call channels driven through the manager, with a
//! recording engine that can answer re-entrantly.

use crate::calls::channel::CallChannel;
use crate::calls::engine::mock::{EngineCall, MockEngine};
use crate::calls::engine::{EngineEvent, EngineFailure, MediaState, StreamInfoType};
use crate::calls::error::CallError;
use crate::calls::manager::{CallManager, ChannelRequest};
use crate::calls::state::CallPhase;
use crate::config::CallConfig;
use imcall_core::membership::{GroupChangeReason, GroupFlags, Membership};
use imcall_core::stream::{Codec, PendingSend, StreamDirection, StreamState};
use imcall_core::types::call::{CallStateFlags, HoldReason, HoldState};
use imcall_core::types::events::{Event, EventHandler};
use imcall_core::types::{
    ChannelId, Handle, MediaCaps, MediaType, MediaTypes, SessionId, StreamId, StreamName,
};
use std::sync::{Arc, Mutex};

const ACCOUNT: &str = "acct";

fn me() -> Handle {
    Handle::new("me@example.com")
}

fn bob() -> Handle {
    Handle::new("bob@example.com")
}

fn carol() -> Handle {
    Handle::new("carol@example.com")
}

fn s1() -> SessionId {
    SessionId::new("s1")
}

fn config(max_channels: usize) -> CallConfig {
    CallConfig {
        account: ACCOUNT.into(),
        self_handle: me(),
        max_channels,
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|&e| pred(e)).count()
    }

    fn closed(&self) -> usize {
        self.count(|e| matches!(e, Event::ChannelClosed(_)))
    }
}

impl EventHandler for Recorder {
    fn handle_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn setup(max_channels: usize) -> (Arc<MockEngine>, Arc<CallManager>, Arc<Recorder>) {
    let engine = MockEngine::new();
    let manager = CallManager::new(config(max_channels), engine.clone());
    engine.attach(&manager);
    let recorder = Arc::new(Recorder::default());
    manager.add_event_handler(recorder.clone());
    (engine, manager, recorder)
}

/// Answers the first initiate with a new session "s1", every initiate with
/// one stream per media type, echoes local accept/hold, and ends the session
/// on hangup.
fn answer_synchronously(engine: &MockEngine) {
    let mut bound = false;
    let mut next = 0;
    engine.on_call(move |call| match call {
        EngineCall::Initiate { peer, media } => {
            let mut events = Vec::new();
            if !bound {
                bound = true;
                events.push(EngineEvent::InitMedia {
                    session: s1(),
                    account: ACCOUNT.into(),
                    peer: peer.clone(),
                    media: *media,
                });
            }
            for media_type in [MediaType::Audio, MediaType::Video] {
                if media.contains_type(media_type) {
                    next += 1;
                    events.push(EngineEvent::StreamCreated {
                        session: s1(),
                        stream: StreamName::new(format!("stream-{next}")),
                        participant: peer.clone(),
                        media_type,
                        initiator: true,
                    });
                }
            }
            events
        }
        EngineCall::Accept {
            session,
            stream,
            local,
        } => vec![EngineEvent::StreamInfo {
            session: session.clone(),
            info: StreamInfoType::Accept,
            stream: stream.clone(),
            participant: None,
            local: *local,
        }],
        EngineCall::Hold { session, hold } => vec![EngineEvent::StreamInfo {
            session: session.clone(),
            info: if *hold {
                StreamInfoType::Hold
            } else {
                StreamInfoType::Unhold
            },
            stream: None,
            participant: None,
            local: true,
        }],
        EngineCall::Hangup(session) => vec![session_ended(session)],
        _ => Vec::new(),
    });
}

fn session_ended(session: &SessionId) -> EngineEvent {
    EngineEvent::StateChanged {
        session: session.clone(),
        state: MediaState::End,
        stream: None,
        participant: None,
    }
}

fn init_media(session: SessionId, peer: Handle, media: MediaTypes) -> EngineEvent {
    EngineEvent::InitMedia {
        session,
        account: ACCOUNT.into(),
        peer,
        media,
    }
}

fn stream_created(name: &str, media_type: MediaType, initiator: bool) -> EngineEvent {
    EngineEvent::StreamCreated {
        session: s1(),
        stream: StreamName::new(name),
        participant: bob(),
        media_type,
        initiator,
    }
}

fn remote_info(info: StreamInfoType) -> EngineEvent {
    EngineEvent::StreamInfo {
        session: s1(),
        info,
        stream: None,
        participant: Some(bob()),
        local: false,
    }
}

fn stream_state(name: &str, state: StreamState) -> EngineEvent {
    EngineEvent::StreamState {
        session: s1(),
        stream: StreamName::new(name),
        state,
    }
}

/// An outgoing audio call to bob that bob has answered.
fn active_call(engine: &MockEngine, manager: &CallManager) -> Arc<CallChannel> {
    answer_synchronously(engine);
    let channel = manager.create_channel(ChannelRequest::audio(bob())).unwrap();
    manager.handle_engine_event(remote_info(StreamInfoType::Accept));
    assert_eq!(channel.phase(), CallPhase::Active);
    channel
}

/// An incoming call from bob on session s1, still ringing locally.
fn incoming_call(manager: &CallManager) -> Arc<CallChannel> {
    manager.handle_engine_event(init_media(s1(), bob(), MediaTypes::AUDIO));
    manager.channels().pop().unwrap()
}

/// The engine creates the stream inside the initiate call.
#[test]
fn test_synchronous_stream_creation_resolves_before_return() {
    let (engine, manager, recorder) = setup(1);
    answer_synchronously(&engine);
    let channel = manager.create_channel(ChannelRequest::default()).unwrap();

    let mut pending = channel.request_streams(&bob(), &[MediaType::Audio]).unwrap();
    let streams = pending.try_result().unwrap().unwrap();

    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].media_type, MediaType::Audio);
    assert_eq!(streams[0].peer, bob());
    assert_eq!(channel.session(), Some(s1()));
    assert_eq!(channel.pending_requests(), 0);
    assert_eq!(recorder.count(|e| matches!(e, Event::StreamAdded(_))), 1);
    assert!(!manager.registry().is_awaiting(&bob()));
}

/// Nothing requested, nothing asked of the engine.
#[test]
fn test_empty_request_succeeds_without_engine_call() {
    let (engine, manager, _) = setup(1);
    let channel = manager.create_channel(ChannelRequest::default()).unwrap();

    let mut pending = channel.request_streams(&bob(), &[]).unwrap();
    assert_eq!(pending.try_result(), Some(Ok(Vec::new())));
    assert!(engine.calls().is_empty());
    assert_eq!(channel.peer(), None);
}

/// Results come back in request order, not arrival order.
#[tokio::test]
async fn test_results_follow_request_order() {
    let (engine, manager, _) = setup(1);
    let channel = manager.create_channel(ChannelRequest::default()).unwrap();

    let pending = channel
        .request_streams(&bob(), &[MediaType::Audio, MediaType::Video])
        .unwrap();
    assert_eq!(
        engine.calls(),
        vec![EngineCall::Initiate {
            peer: bob(),
            media: MediaTypes::AUDIO | MediaTypes::VIDEO,
        }]
    );

    manager.handle_engine_event(init_media(s1(), bob(), MediaTypes::all()));
    manager.handle_engine_event(stream_created("v", MediaType::Video, true));
    assert_eq!(channel.pending_requests(), 1);
    manager.handle_engine_event(stream_created("a", MediaType::Audio, true));

    let streams = pending.await.unwrap();
    let types: Vec<_> = streams.iter().map(|s| s.media_type).collect();
    assert_eq!(types, vec![MediaType::Audio, MediaType::Video]);
    assert_eq!(streams[0].id, StreamId(2));
    assert_eq!(streams[1].id, StreamId(1));
}

/// Repeated types need one initiate per group.
#[test]
fn test_duplicate_types_are_grouped() {
    let (engine, manager, _) = setup(1);
    let channel = manager.create_channel(ChannelRequest::default()).unwrap();

    channel
        .request_streams(&bob(), &[MediaType::Audio, MediaType::Video, MediaType::Audio])
        .unwrap();

    assert_eq!(
        engine.calls(),
        vec![
            EngineCall::Initiate {
                peer: bob(),
                media: MediaTypes::AUDIO | MediaTypes::VIDEO,
            },
            EngineCall::Initiate {
                peer: bob(),
                media: MediaTypes::AUDIO,
            },
        ]
    );
}

/// An unanswered request is cancelled exactly once on close.
#[tokio::test]
async fn test_close_cancels_outstanding_requests() {
    let (_engine, manager, recorder) = setup(1);
    let channel = manager.create_channel(ChannelRequest::default()).unwrap();

    let pending = channel.request_streams(&bob(), &[MediaType::Video]).unwrap();
    assert_eq!(channel.pending_requests(), 1);

    channel.close();
    channel.close();

    assert_eq!(pending.await, Err(CallError::Cancelled));
    assert_eq!(channel.pending_requests(), 0);
    assert_eq!(recorder.closed(), 1);
    assert!(!manager.registry().is_awaiting(&bob()));
}

/// A satisfied request keeps its success when the call closes later.
#[tokio::test]
async fn test_resolved_request_is_not_touched_by_close() {
    let (engine, manager, _) = setup(1);
    let channel = active_call(&engine, &manager);
    engine.on_call(|_| Vec::new());

    let first = channel.request_streams(&bob(), &[MediaType::Video]).unwrap();
    manager.handle_engine_event(stream_created("late-video", MediaType::Video, true));
    channel.close();

    let streams = first.await.unwrap();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].media_type, MediaType::Video);
}

/// Closing twice hangs up once.
#[test]
fn test_close_is_idempotent() {
    let (engine, manager, recorder) = setup(1);
    let channel = active_call(&engine, &manager);
    engine.on_call(|_| Vec::new());

    channel.close();
    let members = channel.members();
    channel.close();

    assert_eq!(engine.hangups(), 1);
    assert_eq!(recorder.closed(), 1);
    assert_eq!(channel.members(), members);
    assert!(members.is_empty());
    assert!(channel.media_ended());
    assert_eq!(channel.phase(), CallPhase::Ended);
    assert!(manager.registry().lookup(&s1()).is_none());
}

/// A second stream with the same engine name is ignored.
#[test]
fn test_duplicate_stream_name_is_ignored() {
    let (_engine, manager, recorder) = setup(1);
    let channel = incoming_call(&manager);

    manager.handle_engine_event(stream_created("a", MediaType::Audio, false));
    manager.handle_engine_event(stream_created("a", MediaType::Video, false));

    let streams = channel.list_streams();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].media_type, MediaType::Audio);
    assert_eq!(recorder.count(|e| matches!(e, Event::StreamAdded(_))), 1);
}

/// Stale engine reports never move a stream backwards.
#[test]
fn test_connection_state_never_regresses() {
    let (_engine, manager, recorder) = setup(1);
    let channel = incoming_call(&manager);
    manager.handle_engine_event(stream_created("a", MediaType::Audio, false));
    let id = channel.list_streams()[0].id;

    manager.handle_engine_event(stream_state("a", StreamState::Connecting));
    manager.handle_engine_event(EngineEvent::StateChanged {
        session: s1(),
        state: MediaState::Connected,
        stream: Some(StreamName::new("a")),
        participant: None,
    });
    manager.handle_engine_event(stream_state("a", StreamState::Connecting));
    assert_eq!(
        channel.stream(id).unwrap().connection_state(),
        StreamState::Connected
    );

    manager.handle_engine_event(stream_state("a", StreamState::Disconnected));
    manager.handle_engine_event(stream_state("a", StreamState::Connected));
    assert_eq!(
        channel.stream(id).unwrap().connection_state(),
        StreamState::Disconnected
    );
    assert_eq!(
        recorder.count(|e| matches!(e, Event::StreamStateChanged(_))),
        3
    );
}

/// A held call cannot be answered.
#[test]
fn test_cannot_answer_while_held() {
    let (engine, manager, _) = setup(1);
    answer_synchronously(&engine);
    let channel = incoming_call(&manager);

    channel.request_hold(true).unwrap();
    assert_eq!(channel.hold_state(), (HoldState::Held, HoldReason::Requested));

    let err = channel.add_member(&me()).unwrap_err();
    assert!(matches!(err, CallError::NotAvailable(_)));
    assert_eq!(channel.local_pending(), vec![me()]);
    assert_eq!(channel.members(), vec![bob()]);
    assert_eq!(engine.count(|c| matches!(c, EngineCall::Accept { .. })), 0);
}

/// The engine ends the whole session.
#[tokio::test]
async fn test_session_end_tears_down_call() {
    let (engine, manager, recorder) = setup(1);
    let channel = active_call(&engine, &manager);
    engine.on_call(|_| Vec::new());

    let pending = channel.request_streams(&bob(), &[MediaType::Video]).unwrap();
    manager.handle_engine_event(session_ended(&s1()));

    assert_eq!(pending.await, Err(CallError::Cancelled));
    assert!(channel.members().is_empty());
    assert!(channel.is_closed());
    assert_eq!(recorder.closed(), 1);
    assert_eq!(engine.hangups(), 0);

    manager.handle_engine_event(session_ended(&s1()));
    assert_eq!(recorder.closed(), 1);
    assert_eq!(
        recorder.count(|e| matches!(
            e,
            Event::MembersChanged(m) if m.change.removed.len() == 2 && m.actor == me()
        )),
        1
    );
}

/// Unknown ids fail before anything reaches the engine.
#[test]
fn test_remove_unknown_stream_fails() {
    let (engine, manager, _) = setup(1);
    let channel = active_call(&engine, &manager);
    let calls = engine.calls().len();

    let err = channel.remove_streams(&[StreamId(99)]).unwrap_err();
    assert!(matches!(err, CallError::InvalidArgument(_)));
    assert_eq!(engine.calls().len(), calls);
}

#[test]
fn test_remove_streams_ends_each_stream_once() {
    let (engine, manager, _) = setup(1);
    let channel = active_call(&engine, &manager);
    let id = channel.list_streams()[0].id;

    channel.remove_streams(&[id, id]).unwrap();
    assert_eq!(
        engine.count(|c| matches!(c, EngineCall::EndStream { .. })),
        1
    );
}

#[test]
fn test_remove_streams_needs_session_modification() {
    let (engine, manager, _) = setup(1);
    let channel = active_call(&engine, &manager);
    engine.set_caps(MediaCaps::AUDIO | MediaCaps::VIDEO);
    let id = channel.list_streams()[0].id;

    let err = channel.remove_streams(&[id]).unwrap_err();
    assert!(matches!(err, CallError::NotImplemented(_)));
}

#[test]
fn test_adding_streams_checks_peer_caps() {
    let (engine, manager, _) = setup(1);
    let channel = active_call(&engine, &manager);

    engine.set_caps(MediaCaps::AUDIO | MediaCaps::VIDEO);
    let err = channel.request_streams(&bob(), &[MediaType::Video]).unwrap_err();
    assert!(matches!(err, CallError::NotAvailable(_)));

    engine.set_caps(MediaCaps::AUDIO | MediaCaps::MODIFY_SESSION);
    let err = channel.request_streams(&bob(), &[MediaType::Video]).unwrap_err();
    assert!(matches!(err, CallError::NotAvailable(_)));
    assert_eq!(channel.pending_requests(), 0);
}

#[test]
fn test_request_for_other_peer_fails() {
    let (engine, manager, _) = setup(1);
    let channel = active_call(&engine, &manager);

    let err = channel.request_streams(&carol(), &[MediaType::Audio]).unwrap_err();
    assert!(matches!(err, CallError::NotAvailable(_)));
}

#[test]
fn test_engine_refusal_unregisters_request() {
    let (engine, manager, recorder) = setup(1);
    let channel = manager.create_channel(ChannelRequest::default()).unwrap();
    engine.refuse_initiate(EngineFailure::with_reason("no route"));

    let err = channel.request_streams(&bob(), &[MediaType::Audio]).unwrap_err();
    assert_eq!(err, CallError::NotAvailable("no route".into()));
    assert_eq!(channel.pending_requests(), 0);
    assert!(!manager.registry().is_awaiting(&bob()));
    assert_eq!(engine.initiates(), 1);

    // The refused contact is released again.
    assert_eq!(channel.peer(), None);
    assert_eq!(channel.membership(&bob()), None);
    assert_eq!(channel.phase(), CallPhase::Unestablished);
    assert_eq!(
        recorder.count(|e| matches!(
            e,
            Event::MembersChanged(m) if m.change.removed == vec![bob()]
        )),
        1
    );

    channel.add_member(&carol()).unwrap();
    assert_eq!(channel.peer(), Some(carol()));
    assert_eq!(channel.remote_pending(), vec![carol()]);
}

/// A call already addressed keeps its peer when a request is refused.
#[test]
fn test_engine_refusal_keeps_committed_peer() {
    let (engine, manager, _) = setup(1);
    let channel = manager.create_channel(ChannelRequest::default()).unwrap();
    channel.add_member(&bob()).unwrap();
    engine.refuse_initiate(EngineFailure::default());

    assert!(channel.request_streams(&bob(), &[MediaType::Video]).is_err());
    assert_eq!(channel.peer(), Some(bob()));
    assert_eq!(channel.membership(&bob()), Some(Membership::RemotePending));
}

/// A seeded call that the engine refuses is closed and reported.
#[test]
fn test_create_channel_reports_refusal() {
    let (engine, manager, recorder) = setup(1);
    engine.refuse_initiate(EngineFailure::default());

    let err = manager.create_channel(ChannelRequest::audio(bob())).unwrap_err();
    assert!(matches!(err, CallError::NotAvailable(_)));
    assert!(manager.channels().is_empty());
    assert_eq!(recorder.closed(), 1);
}

#[test]
fn test_remote_accept_makes_call_active() {
    let (engine, manager, recorder) = setup(1);
    answer_synchronously(&engine);
    let channel = manager.create_channel(ChannelRequest::audio(bob())).unwrap();

    assert_eq!(channel.phase(), CallPhase::Pending);
    assert_eq!(channel.remote_pending(), vec![bob()]);
    let info = &channel.list_streams()[0];
    assert_eq!(info.pending_send, PendingSend::REMOTE_SEND);

    manager.handle_engine_event(remote_info(StreamInfoType::Ringing));
    assert_eq!(channel.call_states().get(&bob()), Some(&CallStateFlags::RINGING));

    manager.handle_engine_event(remote_info(StreamInfoType::Accept));
    assert_eq!(channel.phase(), CallPhase::Active);
    assert_eq!(channel.membership(&bob()), Some(Membership::Member));
    assert!(channel.call_states().is_empty());

    let info = &channel.list_streams()[0];
    assert_eq!(info.direction, StreamDirection::BIDIRECTIONAL);
    assert!(info.pending_send.is_empty());
    assert_eq!(
        recorder.count(|e| matches!(e, Event::StreamDirectionChanged(_))),
        1
    );
}

#[test]
fn test_answering_incoming_call() {
    let (engine, manager, recorder) = setup(1);
    answer_synchronously(&engine);
    let channel = incoming_call(&manager);
    assert!(channel.is_incoming());
    assert_eq!(channel.creator(), &bob());
    assert_eq!(channel.group_flags(), GroupFlags::CAN_REMOVE);
    assert_eq!(recorder.count(|e| matches!(e, Event::NewChannel(n) if n.incoming)), 1);

    manager.handle_engine_event(stream_created("a", MediaType::Audio, false));
    let id = channel.list_streams()[0].id;
    channel.add_member(&me()).unwrap();

    assert_eq!(channel.phase(), CallPhase::Active);
    assert!(engine.calls().contains(&EngineCall::Accept {
        session: s1(),
        stream: None,
        local: true,
    }));
    let stream = channel.stream(id).unwrap();
    assert!(stream.combined_direction().pending_send.is_empty());
    assert_eq!(
        stream.combined_direction().direction,
        StreamDirection::BIDIRECTIONAL
    );
}

#[test]
fn test_add_member_rules() {
    let (_engine, manager, _) = setup(1);
    let outgoing = manager.create_channel(ChannelRequest::default()).unwrap();

    assert!(outgoing.add_member(&me()).is_err());
    outgoing.add_member(&bob()).unwrap();
    assert_eq!(outgoing.remote_pending(), vec![bob()]);
    let err = outgoing.add_member(&carol()).unwrap_err();
    assert!(matches!(err, CallError::NotAvailable(_)));
}

#[test]
fn test_incoming_call_cannot_invite() {
    let (_engine, manager, _) = setup(1);
    let channel = incoming_call(&manager);
    assert!(matches!(
        channel.add_member(&carol()),
        Err(CallError::NotAvailable(_))
    ));
}

#[test]
fn test_hangup_with_plain_reason() {
    let (engine, manager, recorder) = setup(1);
    let channel = active_call(&engine, &manager);

    channel.remove_member(&me(), GroupChangeReason::Busy).unwrap();

    assert_eq!(engine.hangups(), 1);
    assert!(!channel.group_flags().contains(GroupFlags::CAN_ADD));
    assert!(channel.is_closed());
    assert_eq!(recorder.closed(), 1);
    assert_eq!(
        recorder.count(|e| matches!(
            e,
            Event::GroupFlagsChanged(g) if g.removed == GroupFlags::CAN_ADD
        )),
        1
    );
}

#[test]
fn test_remove_member_rejections() {
    let (engine, manager, _) = setup(1);
    let channel = active_call(&engine, &manager);

    assert!(matches!(
        channel.remove_member(&bob(), GroupChangeReason::None),
        Err(CallError::NotAvailable(_))
    ));
    assert!(matches!(
        channel.remove_member(&me(), GroupChangeReason::Kicked),
        Err(CallError::NotAvailable(_))
    ));
    assert_eq!(engine.hangups(), 0);
    assert_eq!(channel.phase(), CallPhase::Active);
}

/// Without a session, leaving is closing.
#[test]
fn test_leave_before_session_closes() {
    let (engine, manager, recorder) = setup(1);
    let channel = manager.create_channel(ChannelRequest::default()).unwrap();
    let pending_peer = bob();
    channel.add_member(&pending_peer).unwrap();

    channel.remove_member(&me(), GroupChangeReason::None).unwrap();
    assert!(channel.is_closed());
    assert_eq!(engine.hangups(), 0);
    assert_eq!(recorder.closed(), 1);
}

#[test]
fn test_remote_reject_removes_peer() {
    let (engine, manager, recorder) = setup(1);
    answer_synchronously(&engine);
    let channel = manager.create_channel(ChannelRequest::audio(bob())).unwrap();

    manager.handle_engine_event(remote_info(StreamInfoType::Reject));
    assert_eq!(channel.membership(&bob()), None);
    assert_eq!(
        recorder.count(|e| matches!(
            e,
            Event::MembersChanged(m) if m.reason == GroupChangeReason::Busy && m.actor == bob()
        )),
        1
    );

    manager.handle_engine_event(session_ended(&s1()));
    assert!(channel.is_closed());
}

#[test]
fn test_hold_round_trip() {
    let (engine, manager, recorder) = setup(1);
    let channel = active_call(&engine, &manager);

    channel.request_hold(true).unwrap();
    assert_eq!(channel.hold_state(), (HoldState::Held, HoldReason::Requested));
    channel.request_hold(true).unwrap();
    assert_eq!(engine.count(|c| matches!(c, EngineCall::Hold { .. })), 1);

    channel.request_hold(false).unwrap();
    assert_eq!(channel.hold_state(), (HoldState::Unheld, HoldReason::Requested));
    assert_eq!(
        recorder.count(|e| matches!(e, Event::HoldStateChanged(_))),
        4
    );
}

/// An engine-initiated hold is attributed to the engine.
#[test]
fn test_unsolicited_hold() {
    let (engine, manager, _) = setup(1);
    let channel = active_call(&engine, &manager);

    manager.handle_engine_event(EngineEvent::StreamInfo {
        session: s1(),
        info: StreamInfoType::Hold,
        stream: None,
        participant: None,
        local: true,
    });
    assert_eq!(
        channel.hold_state(),
        (HoldState::Held, HoldReason::ResourceNotAvailable)
    );

    manager.handle_engine_event(remote_info(StreamInfoType::Hold));
    assert_eq!(channel.call_states().get(&bob()), Some(&CallStateFlags::HELD));
    manager.handle_engine_event(remote_info(StreamInfoType::Unhold));
    assert!(channel.call_states().is_empty());
}

#[test]
fn test_hold_needs_session() {
    let (_engine, manager, _) = setup(1);
    let channel = manager.create_channel(ChannelRequest::default()).unwrap();
    assert!(matches!(
        channel.request_hold(true),
        Err(CallError::NotAvailable(_))
    ));
}

#[test]
fn test_stream_direction_cannot_change() {
    let (engine, manager, _) = setup(1);
    let channel = active_call(&engine, &manager);
    let id = channel.list_streams()[0].id;

    assert!(matches!(
        channel.request_stream_direction(id, StreamDirection::RECEIVE),
        Err(CallError::NotImplemented(_))
    ));
    assert!(matches!(
        channel.request_stream_direction(StreamId(42), StreamDirection::RECEIVE),
        Err(CallError::InvalidArgument(_))
    ));
}

#[test]
fn test_stream_error_ends_stream() {
    let (engine, manager, _) = setup(1);
    let outgoing = manager.create_channel(ChannelRequest::default()).unwrap();
    assert!(matches!(
        outgoing.report_stream_error(StreamId(1), "boom"),
        Err(CallError::NotAvailable(_))
    ));
    outgoing.close();

    let channel = active_call(&engine, &manager);
    let id = channel.list_streams()[0].id;
    assert!(matches!(
        channel.report_stream_error(StreamId(7), "boom"),
        Err(CallError::InvalidArgument(_))
    ));

    channel.report_stream_error(id, "codec failure").unwrap();
    assert!(engine.calls().contains(&EngineCall::EndStream {
        session: s1(),
        stream: StreamName::new("stream-1"),
    }));
}

#[test]
fn test_stream_end_removes_stream() {
    let (engine, manager, recorder) = setup(1);
    let channel = active_call(&engine, &manager);

    manager.handle_engine_event(EngineEvent::StateChanged {
        session: s1(),
        state: MediaState::End,
        stream: Some(StreamName::new("stream-1")),
        participant: None,
    });
    assert!(channel.list_streams().is_empty());
    assert!(!channel.is_closed());
    assert_eq!(recorder.count(|e| matches!(e, Event::StreamRemoved(_))), 1);

    // Already gone.
    manager.handle_engine_event(EngineEvent::StateChanged {
        session: s1(),
        state: MediaState::End,
        stream: Some(StreamName::new("stream-1")),
        participant: None,
    });
    assert_eq!(recorder.count(|e| matches!(e, Event::StreamRemoved(_))), 1);
}

#[test]
fn test_codecs_and_candidates_accumulate() {
    let (engine, manager, _) = setup(1);
    let channel = active_call(&engine, &manager);
    let id = channel.list_streams()[0].id;

    manager.handle_engine_event(EngineEvent::CodecsChanged {
        session: s1(),
        stream: StreamName::new("stream-1"),
        codecs: vec![Codec {
            id: 111,
            name: "opus".into(),
            clock_rate: 48_000,
            channels: 2,
            parameters: Default::default(),
        }],
    });
    manager.handle_engine_event(EngineEvent::Candidates {
        session: s1(),
        stream: StreamName::new("stream-1"),
        local: false,
        candidates: Vec::new(),
    });

    let stream = channel.stream(id).unwrap();
    assert!(stream.codecs_negotiated());
    assert_eq!(stream.remote_codecs()[0].name, "opus");
}

#[test]
fn test_busy_account_rejects_second_call() {
    let (engine, manager, _) = setup(1);
    let _active = active_call(&engine, &manager);

    let other = SessionId::new("s2");
    manager.handle_engine_event(init_media(other.clone(), carol(), MediaTypes::AUDIO));

    assert_eq!(manager.channels().len(), 1);
    assert!(engine.calls().contains(&EngineCall::Reject(other)));
}

#[test]
fn test_outgoing_limit() {
    let (engine, manager, _) = setup(1);
    let first = active_call(&engine, &manager);
    assert!(matches!(
        manager.create_channel(ChannelRequest::default()),
        Err(CallError::NotAvailable(_))
    ));

    first.close();
    assert!(manager.create_channel(ChannelRequest::default()).is_ok());
    assert_eq!(manager.channels().len(), 1);
}

#[test]
fn test_two_channels_cannot_wait_for_same_peer() {
    let (_engine, manager, _) = setup(2);
    let first = manager.create_channel(ChannelRequest::default()).unwrap();
    let second = manager.create_channel(ChannelRequest::default()).unwrap();

    first.request_streams(&bob(), &[MediaType::Audio]).unwrap();
    let err = second.request_streams(&bob(), &[MediaType::Audio]).unwrap_err();
    assert!(matches!(err, CallError::NotAvailable(_)));
    assert_eq!(second.pending_requests(), 0);
    assert_eq!(second.peer(), None);
    assert_eq!(first.peer(), Some(bob()));
}

#[test]
fn test_close_all() {
    let (engine, manager, recorder) = setup(2);
    let _outgoing = active_call(&engine, &manager);
    let _ringing = manager.create_channel(ChannelRequest::default()).unwrap();

    manager.close_all();
    assert!(manager.channels().is_empty());
    assert_eq!(recorder.closed(), 2);
    assert!(manager.registry().is_empty());
}

struct ReentrantLister {
    manager: std::sync::Weak<CallManager>,
    seen: Mutex<Vec<usize>>,
}

impl EventHandler for ReentrantLister {
    fn handle_event(&self, event: &Event) {
        if let Event::StreamAdded(added) = event
            && let Some(manager) = self.manager.upgrade()
            && let Some(channel) = manager.channel(added.channel)
        {
            self.seen.lock().unwrap().push(channel.list_streams().len());
        }
    }
}

/// Handlers run with the channel unlocked and may query it.
#[test]
fn test_handlers_may_call_back_into_channel() {
    let (engine, manager, _) = setup(1);
    let lister = Arc::new(ReentrantLister {
        manager: Arc::downgrade(&manager),
        seen: Mutex::new(Vec::new()),
    });
    manager.add_event_handler(lister.clone());

    active_call(&engine, &manager);
    assert_eq!(*lister.seen.lock().unwrap(), vec![1]);
    assert_eq!(manager.channel(ChannelId(1)).map(|c| c.id()), Some(ChannelId(1)));
}
