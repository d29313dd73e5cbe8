use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Local hold state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HoldState {
    #[default]
    Unheld,
    Held,
    /// Hold was requested; waiting for the engine to confirm.
    PendingHold,
    /// Resume was requested; waiting for the engine to confirm.
    PendingUnhold,
}

impl HoldState {
    /// Whether the call is held or on its way to being held.
    pub fn is_holding(self) -> bool {
        matches!(self, Self::Held | Self::PendingHold)
    }
}

/// Why the hold state last changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HoldReason {
    #[default]
    None,
    /// The local user asked for it.
    Requested,
    /// The engine changed it on its own.
    ResourceNotAvailable,
}

bitflags! {
    /// Per-contact call progress flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CallStateFlags: u8 {
        /// The contact's client is alerting its user.
        const RINGING = 0b01;
        /// The contact has put us on hold.
        const HELD = 0b10;
    }
}
