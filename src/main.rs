use chrono::Local;
use clap::Parser;
use imcall::calls::{EngineEvent, EngineFailure, MediaState, StreamInfoType};
use imcall::membership::GroupChangeReason;
use imcall::types::events::{Event, EventHandler};
use imcall::types::{Handle, MediaCaps, MediaType, MediaTypes, SessionId, StreamName};
use imcall::{CallConfig, CallManager, MediaEngine};
use log::{error, info};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

// Places one call against an in-process loopback engine and hangs up.
//
// Usage:
//   cargo run -- --peer bob@example.com --audio
//   cargo run -- --config call.json --peer bob@example.com --audio --video

#[derive(Parser, Debug)]
#[command(version, about = "Place a call against a loopback media engine")]
struct Args {
    /// JSON call configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Contact to call.
    #[arg(short, long, default_value = "echo@loopback")]
    peer: String,

    #[arg(long)]
    audio: bool,

    #[arg(long)]
    video: bool,
}

/// Answers everything at once: a session on the first initiate, one stream
/// per requested type, immediate acceptance by the far side.
struct LoopbackEngine {
    account: String,
    manager: Mutex<Weak<CallManager>>,
    session: Mutex<Option<SessionId>>,
    next_stream: AtomicU32,
}

impl LoopbackEngine {
    fn new(account: &str) -> Arc<Self> {
        Arc::new(Self {
            account: account.to_string(),
            manager: Mutex::new(Weak::new()),
            session: Mutex::new(None),
            next_stream: AtomicU32::new(1),
        })
    }

    fn attach(&self, manager: &Arc<CallManager>) {
        *self.manager.lock().expect("Mutex should not be poisoned") = Arc::downgrade(manager);
    }

    fn deliver(&self, events: Vec<EngineEvent>) {
        let manager = self
            .manager
            .lock()
            .expect("Mutex should not be poisoned")
            .upgrade();
        if let Some(manager) = manager {
            for event in events {
                manager.handle_engine_event(event);
            }
        }
    }
}

impl MediaEngine for LoopbackEngine {
    fn initiate_session(
        &self,
        account: &str,
        peer: &Handle,
        media: MediaTypes,
    ) -> Result<(), EngineFailure> {
        if account != self.account {
            return Err(EngineFailure::with_reason(format!("unknown account {account}")));
        }

        let mut events = Vec::new();
        let session = {
            let mut current = self.session.lock().expect("Mutex should not be poisoned");
            match current.as_ref() {
                Some(session) => session.clone(),
                None => {
                    let session = SessionId::new("loopback-1");
                    *current = Some(session.clone());
                    events.push(EngineEvent::InitMedia {
                        session: session.clone(),
                        account: account.to_string(),
                        peer: peer.clone(),
                        media,
                    });
                    session
                }
            }
        };

        for media_type in [MediaType::Audio, MediaType::Video] {
            if !media.contains_type(media_type) {
                continue;
            }
            let n = self.next_stream.fetch_add(1, Ordering::Relaxed);
            let stream = StreamName::new(format!("{media_type}-{n}"));
            events.push(EngineEvent::StreamCreated {
                session: session.clone(),
                stream: stream.clone(),
                participant: peer.clone(),
                media_type,
                initiator: true,
            });
            events.push(EngineEvent::StateChanged {
                session: session.clone(),
                state: MediaState::Connected,
                stream: Some(stream),
                participant: Some(peer.clone()),
            });
        }
        events.push(EngineEvent::StreamInfo {
            session,
            info: StreamInfoType::Accept,
            stream: None,
            participant: Some(peer.clone()),
            local: false,
        });

        self.deliver(events);
        Ok(())
    }

    fn accept(&self, _session: &SessionId, _stream: Option<&StreamName>, _local: bool) {}

    fn hangup(&self, session: &SessionId) {
        self.session
            .lock()
            .expect("Mutex should not be poisoned")
            .take();
        self.deliver(vec![EngineEvent::StateChanged {
            session: session.clone(),
            state: MediaState::End,
            stream: None,
            participant: None,
        }]);
    }

    fn reject(&self, session: &SessionId) {
        self.hangup(session);
    }

    fn hold(&self, _session: &SessionId, _hold: bool) {}

    fn end_stream(&self, session: &SessionId, stream: &StreamName) {
        self.deliver(vec![EngineEvent::StateChanged {
            session: session.clone(),
            state: MediaState::End,
            stream: Some(stream.clone()),
            participant: None,
        }]);
    }

    fn peer_media_caps(&self, _account: &str, _peer: &Handle) -> MediaCaps {
        MediaCaps::all()
    }
}

struct LogHandler;

impl EventHandler for LogHandler {
    fn handle_event(&self, event: &Event) {
        match serde_json::to_string(event) {
            Ok(json) => info!("event: {json}"),
            Err(e) => error!("failed to encode event: {e}"),
        }
    }
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let config = match &args.config {
        Some(path) => match CallConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{e:#}");
                return;
            }
        },
        None => CallConfig::default(),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async move {
        let engine = LoopbackEngine::new(&config.account);
        let manager = CallManager::new(config, engine.clone());
        engine.attach(&manager);
        manager.add_event_handler(Arc::new(LogHandler));

        let channel = match manager.create_channel(Default::default()) {
            Ok(channel) => channel,
            Err(e) => {
                error!("failed to create call: {e}");
                return;
            }
        };

        let mut types = Vec::new();
        if args.audio || !args.video {
            types.push(MediaType::Audio);
        }
        if args.video {
            types.push(MediaType::Video);
        }

        let peer = Handle::new(args.peer);
        let pending = match channel.request_streams(&peer, &types) {
            Ok(pending) => pending,
            Err(e) => {
                error!("failed to call {peer}: {e}");
                channel.close();
                return;
            }
        };

        match pending.await {
            Ok(streams) => {
                for stream in &streams {
                    println!(
                        "stream {}: {} with {} ({:?}, {:?})",
                        stream.id, stream.media_type, stream.peer, stream.state, stream.direction
                    );
                }
            }
            Err(e) => error!("streams failed: {e}"),
        }

        info!("call is {:?}", channel.phase());
        if let Err(e) = channel.remove_member(channel.self_handle(), GroupChangeReason::None) {
            error!("hangup failed: {e}");
        }
        manager.close_all();
    });
}
