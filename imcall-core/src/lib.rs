//! Platform-independent building blocks for call sessions: identifiers,
//! media types, stream state, group membership and the control-plane event
//! bus. Nothing in here talks to a media engine directly.

pub mod error;
pub mod membership;
pub mod stream;
pub mod types;

pub use error::UnknownMediaType;
