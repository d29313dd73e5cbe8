pub mod call;
pub mod events;
pub mod handle;
pub mod media;

pub use handle::{ChannelId, Handle, SessionId, StreamId, StreamName};
pub use media::{MediaCaps, MediaType, MediaTypes};
