//! Error types for the fusionbus broker and agent runtime.

use crate::types::AgentId;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by broker operations that address a mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The agent has no mailbox: never registered, or already unregistered.
    #[error("Agent not registered: {0}")]
    NotRegistered(AgentId),
}

impl BusError {
    /// Creates a not-registered error for `agent`.
    pub fn not_registered(agent: &AgentId) -> Self {
        Self::NotRegistered(agent.clone())
    }
}

/// Errors observed while waiting on a [`ReplyFuture`](crate::ReplyFuture).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReplyError {
    /// The reply did not arrive before the deadline.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The request was dropped before anyone resolved it.
    #[error("Request cancelled before a reply was produced")]
    Cancelled,
}

/// Errors that end an agent's run loop.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A broker call failed (typically `consume` after unregistration).
    #[error(transparent)]
    Bus(#[from] BusError),

    /// A message handler returned an error.
    #[error("Handler for {kind} in agent {agent} failed: {source}")]
    Handler {
        agent: AgentId,
        kind: String,
        #[source]
        source: anyhow::Error,
    },

    /// The agent thread panicked.
    #[error("Agent thread panicked: {0}")]
    Panicked(String),

    /// The OS refused to start the agent thread.
    #[error("Failed to spawn agent thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl AgentError {
    /// Wraps a handler failure with the agent and message kind it came from.
    pub fn handler(agent: &AgentId, kind: impl std::fmt::Debug, source: anyhow::Error) -> Self {
        Self::Handler {
            agent: agent.clone(),
            kind: format!("{kind:?}"),
            source,
        }
    }
}
