//! The message broker: mailboxes, subscription tables, request rotation and
//! the pending-reply table.
//!
//! # Routing
//!
//! ```text
//!  publish_notification(m)            publish_request(r)
//!          │                                  │
//!          ▼                                  ▼
//!  notification_routes[kind]         request_routes[kind]
//!   {A, B, C}  ── fan-out ──┐          [B, C, A] ── head ──┐
//!                           ▼                              ▼
//!                 mailbox A, B, C                 mailbox B  +  pending[id] = future
//! ```
//!
//! All tables are sharded maps: operations lock only the shard holding the
//! key they touch, so agents working on unrelated kinds or mailboxes never
//! contend on a single broker-wide lock.
//!
//! # Invariants
//!
//! - A mailbox exists iff its agent is registered.
//! - The head of every rotation is a currently subscribed agent; selection and
//!   rotation of the head happen under the rotation's shard lock.
//! - A pending entry is removed exactly once: by `resolve`, or by the
//!   cancellation performed when its assignee unregisters.

use crate::error::BusError;
use crate::future::ReplyFuture;
use crate::message::{Delivery, Message, Request};
use crate::types::{AgentId, RequestId};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Per-agent inbound queue. Unbounded, FIFO, many producers.
struct Mailbox<M> {
    tx: Sender<Delivery<M>>,
    rx: Receiver<Delivery<M>>,
}

impl<M> Mailbox<M> {
    fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }
}

/// Round-robin order of the subscribers of one request kind.
///
/// The front of the queue is the next assignee; advancing moves it to the back.
#[derive(Debug, Default)]
struct Rotation {
    order: VecDeque<AgentId>,
}

impl Rotation {
    fn join(&mut self, agent: &AgentId) -> bool {
        if self.order.contains(agent) {
            return false;
        }
        self.order.push_back(agent.clone());
        true
    }

    fn leave(&mut self, agent: &AgentId) -> bool {
        match self.order.iter().position(|a| a == agent) {
            Some(index) => {
                self.order.remove(index);
                true
            }
            None => false,
        }
    }

    fn advance(&mut self) -> Option<AgentId> {
        let next = self.order.pop_front()?;
        self.order.push_back(next.clone());
        Some(next)
    }
}

struct PendingReply<R> {
    assignee: AgentId,
    reply: ReplyFuture<R>,
}

/// Receipt for a routed request.
#[derive(Debug, Clone)]
pub struct Ticket<R> {
    /// Broker-assigned request id.
    pub id: RequestId,

    /// The agent the request was enqueued for.
    pub assignee: AgentId,

    /// Settles when the assignee resolves the request (or unregisters).
    pub reply: ReplyFuture<R>,
}

/// In-process publish/subscribe and request/reply broker.
///
/// Shared between agents as `Arc<Broker<M>>`; every operation takes `&self`
/// and may be called concurrently from any thread.
pub struct Broker<M: Message> {
    /// Registered agents and their mailboxes
    mailboxes: DashMap<AgentId, Mailbox<M>>,

    /// Request kind -> rotation of subscribers
    request_routes: DashMap<M::Kind, Rotation>,

    /// Notification kind -> subscribers, in subscription order
    notification_routes: DashMap<M::Kind, Vec<AgentId>>,

    /// Requests awaiting a reply
    pending: DashMap<RequestId, PendingReply<M::Reply>>,

    /// Source of request ids
    next_request: AtomicU64,
}

impl<M: Message> Broker<M> {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self {
            mailboxes: DashMap::new(),
            request_routes: DashMap::new(),
            notification_routes: DashMap::new(),
            pending: DashMap::new(),
            next_request: AtomicU64::new(1),
        }
    }

    /// Creates an `Arc`-wrapped broker for sharing across agent threads.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Creates a mailbox for `agent`. Registering twice is a no-op.
    pub fn register(&self, agent: &AgentId) {
        self.mailboxes
            .entry(agent.clone())
            .or_insert_with(Mailbox::new);
        debug!(agent = %agent, "Agent registered");
    }

    /// Destroys `agent`'s mailbox and removes it from every routing table.
    ///
    /// Requests already routed to `agent` and still unresolved are cancelled:
    /// their futures settle with [`ReplyError::Cancelled`](crate::ReplyError).
    /// Unregistering an unknown agent is a no-op.
    pub fn unregister(&self, agent: &AgentId) {
        // Mailbox goes first: a publisher that observes the mailbox after this
        // point knows the cancellation sweep below has not run yet.
        let had_mailbox = self.mailboxes.remove(agent).is_some();

        for mut rotation in self.request_routes.iter_mut() {
            rotation.value_mut().leave(agent);
        }
        for mut subscribers in self.notification_routes.iter_mut() {
            subscribers.value_mut().retain(|a| a != agent);
        }

        let mut cancelled = 0usize;
        self.pending.retain(|_, pending| {
            if &pending.assignee == agent {
                pending.reply.cancel();
                cancelled += 1;
                false
            } else {
                true
            }
        });

        debug!(agent = %agent, had_mailbox, cancelled, "Agent unregistered");
    }

    /// Returns true if `agent` currently owns a mailbox.
    pub fn is_registered(&self, agent: &AgentId) -> bool {
        self.mailboxes.contains_key(agent)
    }

    fn ensure_registered(&self, agent: &AgentId) -> Result<(), BusError> {
        if self.is_registered(agent) {
            Ok(())
        } else {
            Err(BusError::not_registered(agent))
        }
    }

    fn sender(&self, agent: &AgentId) -> Option<Sender<Delivery<M>>> {
        self.mailboxes.get(agent).map(|mailbox| mailbox.tx.clone())
    }

    // =========================================================================
    // SUBSCRIPTION
    // =========================================================================

    /// Adds `agent` to the tail of the rotation for request kind `kind`.
    ///
    /// # Preconditions
    /// `agent` must be registered; otherwise `BusError::NotRegistered` is
    /// returned and no subscription is recorded. Subscribing twice is a no-op.
    pub fn subscribe_request(&self, kind: M::Kind, agent: &AgentId) -> Result<(), BusError> {
        self.ensure_registered(agent)?;
        let joined = self.request_routes.entry(kind).or_default().join(agent);

        // Lost a race with unregister: undo so no dangling subscriber remains
        if !self.is_registered(agent) {
            if let Some(mut rotation) = self.request_routes.get_mut(&kind) {
                rotation.leave(agent);
            }
            return Err(BusError::not_registered(agent));
        }

        trace!(agent = %agent, kind = ?kind, joined, "Subscribed to request");
        Ok(())
    }

    /// Adds `agent` to the fan-out set of notification kind `kind`.
    ///
    /// Same preconditions as [`Broker::subscribe_request`].
    pub fn subscribe_notification(&self, kind: M::Kind, agent: &AgentId) -> Result<(), BusError> {
        self.ensure_registered(agent)?;
        {
            let mut subscribers = self.notification_routes.entry(kind).or_default();
            if !subscribers.contains(agent) {
                subscribers.push(agent.clone());
            }
        }

        if !self.is_registered(agent) {
            if let Some(mut subscribers) = self.notification_routes.get_mut(&kind) {
                subscribers.retain(|a| a != agent);
            }
            return Err(BusError::not_registered(agent));
        }

        trace!(agent = %agent, kind = ?kind, "Subscribed to notification");
        Ok(())
    }

    // =========================================================================
    // PUBLISHING
    // =========================================================================

    /// Routes `message` to exactly one subscriber of its kind.
    ///
    /// Returns `None` when the kind has no subscribers; nothing else happens
    /// in that case. Otherwise the head of the rotation is selected and moved
    /// to the tail, a pending reply is recorded and the request is enqueued.
    pub fn publish_request(&self, message: M) -> Option<Ticket<M::Reply>> {
        let kind = message.kind();
        let message = Arc::new(message);

        loop {
            let assignee = self.next_assignee(kind)?;

            let Some(tx) = self.sender(&assignee) else {
                // Unregistered between selection and lookup
                self.evict(kind, &assignee);
                continue;
            };

            let id = RequestId::from_raw(self.next_request.fetch_add(1, Ordering::Relaxed));
            let reply = ReplyFuture::new();
            self.pending.insert(
                id,
                PendingReply {
                    assignee: assignee.clone(),
                    reply: reply.clone(),
                },
            );

            let request = Request::new(id, Arc::clone(&message));
            if tx.send(Delivery::Request(request)).is_err() {
                self.cancel_pending(id);
                self.evict(kind, &assignee);
                continue;
            }

            // The assignee's cancellation sweep may have run before our insert
            if !self.is_registered(&assignee) {
                self.cancel_pending(id);
            }

            trace!(request = %id, kind = ?kind, assignee = %assignee, "Request routed");
            return Some(Ticket { id, assignee, reply });
        }
    }

    /// Selects the head of `kind`'s rotation and moves it to the tail.
    fn next_assignee(&self, kind: M::Kind) -> Option<AgentId> {
        self.request_routes.get_mut(&kind)?.advance()
    }

    fn evict(&self, kind: M::Kind, agent: &AgentId) {
        if let Some(mut rotation) = self.request_routes.get_mut(&kind) {
            rotation.leave(agent);
        }
    }

    fn cancel_pending(&self, id: RequestId) {
        if let Some((_, pending)) = self.pending.remove(&id) {
            pending.reply.cancel();
        }
    }

    /// Enqueues `message` into the mailbox of every subscriber of its kind.
    ///
    /// Returns the number of mailboxes that received it. Agents unregistering
    /// concurrently may or may not be reached.
    pub fn publish_notification(&self, message: M) -> usize {
        let kind = message.kind();
        let Some(subscribers) = self
            .notification_routes
            .get(&kind)
            .map(|subscribers| subscribers.value().clone())
        else {
            return 0;
        };

        let message = Arc::new(message);
        let mut delivered = 0;
        for agent in &subscribers {
            if let Some(tx) = self.sender(agent) {
                if tx.send(Delivery::Notification(Arc::clone(&message))).is_ok() {
                    delivered += 1;
                }
            }
        }

        trace!(kind = ?kind, delivered, "Notification published");
        delivered
    }

    // =========================================================================
    // REPLIES
    // =========================================================================

    /// Resolves the future of request `request` with `value`.
    ///
    /// Returns `false` and does nothing if no reply is pending for it
    /// (already resolved, cancelled, or never routed).
    pub fn resolve(&self, request: RequestId, value: M::Reply) -> bool {
        match self.pending.remove(&request) {
            Some((_, pending)) => {
                let resolved = pending.reply.resolve(value);
                trace!(request = %request, assignee = %pending.assignee, "Request resolved");
                resolved
            }
            None => false,
        }
    }

    /// Returns the number of requests awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    // =========================================================================
    // CONSUMING
    // =========================================================================

    /// Blocks until `agent`'s mailbox yields its oldest message.
    ///
    /// # Errors
    /// `BusError::NotRegistered` if `agent` has no mailbox, or if the mailbox
    /// is torn down (drained) while this call waits.
    pub fn consume(&self, agent: &AgentId) -> Result<Delivery<M>, BusError> {
        let rx = self.receiver(agent)?;
        rx.recv().map_err(|_| BusError::not_registered(agent))
    }

    /// Like [`Broker::consume`] but gives up after `timeout`, returning `Ok(None)`.
    pub fn consume_timeout(
        &self,
        agent: &AgentId,
        timeout: Duration,
    ) -> Result<Option<Delivery<M>>, BusError> {
        let rx = self.receiver(agent)?;
        match rx.recv_timeout(timeout) {
            Ok(delivery) => Ok(Some(delivery)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusError::not_registered(agent)),
        }
    }

    fn receiver(&self, agent: &AgentId) -> Result<Receiver<Delivery<M>>, BusError> {
        // Clone out of the map so no shard lock is held while blocking
        self.mailboxes
            .get(agent)
            .map(|mailbox| mailbox.rx.clone())
            .ok_or_else(|| BusError::not_registered(agent))
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    /// Returns the rotation for request kind `kind`, next assignee first.
    pub fn request_subscribers(&self, kind: M::Kind) -> Vec<AgentId> {
        self.request_routes
            .get(&kind)
            .map(|rotation| rotation.order.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the subscribers of notification kind `kind`.
    pub fn notification_subscribers(&self, kind: M::Kind) -> Vec<AgentId> {
        self.notification_routes
            .get(&kind)
            .map(|subscribers| subscribers.value().clone())
            .unwrap_or_default()
    }

    /// Returns the number of registered agents.
    pub fn registered_agents(&self) -> usize {
        self.mailboxes.len()
    }
}

impl<M: Message> Default for Broker<M> {
    fn default() -> Self {
        Self::new()
    }
}
