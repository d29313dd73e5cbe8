use crate::error::UnknownMediaType;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a single media flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum MediaType {
    Audio = 0,
    Video = 1,
}

impl MediaType {
    pub fn as_flag(self) -> MediaTypes {
        match self {
            Self::Audio => MediaTypes::AUDIO,
            Self::Video => MediaTypes::VIDEO,
        }
    }
}

impl TryFrom<u32> for MediaType {
    type Error = UnknownMediaType;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Audio),
            1 => Ok(Self::Video),
            other => Err(UnknownMediaType(other)),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

bitflags! {
    /// Set of media types handed to the engine when initiating media.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MediaTypes: u8 {
        const AUDIO = 0b01;
        const VIDEO = 0b10;
    }
}

impl MediaTypes {
    pub fn contains_type(self, media_type: MediaType) -> bool {
        self.contains(media_type.as_flag())
    }
}

impl FromIterator<MediaType> for MediaTypes {
    fn from_iter<I: IntoIterator<Item = MediaType>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::empty(), |acc, t| acc | t.as_flag())
    }
}

bitflags! {
    /// What a peer's client can do, as reported by the engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MediaCaps: u8 {
        const AUDIO = 0b001;
        const VIDEO = 0b010;
        /// Streams may be added to or removed from a running session.
        const MODIFY_SESSION = 0b100;
    }
}

impl MediaCaps {
    pub fn supports(self, media_type: MediaType) -> bool {
        match media_type {
            MediaType::Audio => self.contains(Self::AUDIO),
            MediaType::Video => self.contains(Self::VIDEO),
        }
    }
}
