use anyhow::Context;
use imcall_core::types::Handle;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for one account's call handling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Account name passed to the engine; sessions for other accounts are
    /// ignored.
    pub account: String,
    /// The local user.
    pub self_handle: Handle,
    /// Concurrent open channels. Further outgoing calls fail and further
    /// incoming calls are rejected.
    pub max_channels: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            account: "default".into(),
            self_handle: Handle::new("me"),
            max_channels: 1,
        }
    }
}

impl CallConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid call configuration")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json_str(&json)
    }
}
