// Re-export core modules for compatibility
pub use imcall_core::{UnknownMediaType, membership, stream};

pub mod types {
    pub use imcall_core::types::*;
}

pub mod calls;
pub mod config;

pub use calls::{CallChannel, CallError, CallManager, ChannelRequest, MediaEngine};
pub use config::CallConfig;
