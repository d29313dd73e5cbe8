//! Call session negotiation.
//!
//! # Architecture
//!
//! - [`CallManager`]: owns the channels of one account and feeds them engine
//!   events
//! - [`SessionRegistry`]: maps engine sessions to the channel that owns them
//! - [`CallChannel`]: one call with one peer; membership, hold, and the
//!   control-plane operations
//! - [`StreamSetCoordinator`]: the streams of a channel and the stream
//!   requests still waiting on the engine
//! - [`MediaEngine`]: the signalling/media engine, consumed as a black box
//!
//! Engine calls may deliver events back into the manager before they return.
//! Channels record everything a re-entrant event needs to see before calling
//! the engine, and never call out while holding their own state lock.

mod channel;
mod coordinator;
mod engine;
mod error;
mod manager;
mod registry;
mod state;

#[cfg(test)]
mod channel_tests;

pub use channel::CallChannel;
pub use coordinator::{PendingStreams, StreamRequestResult, StreamSetCoordinator};
pub use engine::{EngineEvent, EngineFailure, MediaEngine, MediaState, StreamInfoType};
pub use error::CallError;
pub use manager::{CallManager, ChannelRequest};
pub use registry::{Dispatch, SessionRegistry};
pub use state::CallPhase;
