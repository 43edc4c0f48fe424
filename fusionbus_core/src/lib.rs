//! fusionbus Core - In-process publish/subscribe and request/reply broker
//!
//! This crate coordinates many concurrently running agents, each owning an
//! inbound mailbox:
//! 1. **Notifications** fan out to every subscriber of their kind
//! 2. **Requests** go to exactly one subscriber, chosen by fair rotation, and
//!    hand the sender a [`ReplyFuture`] for the eventual reply
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   publish_*    ┌──────────────────────────────┐
//! │ Agent A  │ ─────────────► │            Broker            │
//! │ (thread) │                │  routes · rotation · pending │
//! └──────────┘                └──────────────┬───────────────┘
//!      ▲ consume                             │ enqueue
//!      │                      ┌──────────────▼───────────────┐
//!      └──────────────────────│   mailbox A   mailbox B  ... │
//!                             └──────────────────────────────┘
//! ```
//!
//! The broker has no thread of its own; each agent runs [`AgentRunner::run`]
//! on a dedicated OS thread (see [`spawn`]) and every broker operation
//! executes on the calling agent's thread.

mod broker;
mod error;
mod future;
mod message;
mod runtime;
mod types;

#[cfg(test)]
mod testing;

pub use broker::{Broker, Ticket};
pub use error::{AgentError, BusError, ReplyError};
pub use future::ReplyFuture;
pub use message::{Delivery, Message, Request};
pub use runtime::{spawn, Agent, AgentContext, AgentHandle, AgentRunner, AgentState, Setup};
pub use types::{AgentId, RequestId};
