//! Identity types shared by the broker and the agent runtime.

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identity of an agent.
///
/// Combines a human-readable name (for logs) with a UUID v4 instance
/// identity, so two agents created with the same name are still distinct
/// keys in every broker table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId {
    name: Arc<str>,
    instance: Uuid,
}

impl AgentId {
    /// Creates a new identity with a random instance id.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            instance: Uuid::new_v4(),
        }
    }

    /// Creates a deterministic identity from a seed (for tests and replays).
    pub fn from_seed(name: impl AsRef<str>, seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self {
            name: Arc::from(name.as_ref()),
            instance: Uuid::from_bytes(bytes),
        }
    }

    /// Returns the agent's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the instance UUID.
    pub fn instance(&self) -> Uuid {
        self.instance
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short instance suffix keeps log lines readable
        write!(f, "{}#{}", self.name, &self.instance.simple().to_string()[..8])
    }
}

/// Broker-assigned identity of one published request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Wraps a raw id. Ids handed out by a broker start at 1.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}
