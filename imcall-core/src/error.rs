use thiserror::Error;

/// A media type value on the wire that is neither audio nor video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown media type: {0}")]
pub struct UnknownMediaType(pub u32);
