//! Message abstraction routed by the broker.

use crate::types::RequestId;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;

/// A payload the broker can route.
///
/// The broker never inspects payload content: routing is purely by the
/// discriminant returned from [`Message::kind`]. The usual shape is a sum type
/// over all messages of an application plus a fieldless `Kind` enum mirroring
/// its variants.
pub trait Message: Send + Sync + 'static {
    /// Nominal tag used as the key of every subscription table.
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// Value carried back to the sender of a request.
    type Reply: Clone + Send + 'static;

    /// Returns the routing tag of this message.
    fn kind(&self) -> Self::Kind;
}

/// A request as seen by the agent it was routed to.
///
/// Carries the broker-assigned id needed to resolve the sender's future.
#[derive(Debug)]
pub struct Request<M> {
    id: RequestId,
    message: Arc<M>,
}

impl<M> Request<M> {
    pub(crate) fn new(id: RequestId, message: Arc<M>) -> Self {
        Self { id, message }
    }

    /// Returns the id to pass to `resolve`.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns the request payload.
    pub fn message(&self) -> &M {
        &self.message
    }
}

impl<M> Clone for Request<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            message: Arc::clone(&self.message),
        }
    }
}

impl<M> Deref for Request<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.message
    }
}

/// One entry of an agent's mailbox.
#[derive(Debug)]
pub enum Delivery<M> {
    /// Routed to this agent alone; expects a reply.
    Request(Request<M>),
    /// A shared copy of a fanned-out notification.
    Notification(Arc<M>),
}

impl<M: Message> Delivery<M> {
    /// Returns the routing tag of the carried message.
    pub fn kind(&self) -> M::Kind {
        self.message().kind()
    }

    /// Returns the carried message.
    pub fn message(&self) -> &M {
        match self {
            Delivery::Request(request) => request.message(),
            Delivery::Notification(message) => message,
        }
    }

    /// Returns the request, if this delivery is one.
    pub fn into_request(self) -> Option<Request<M>> {
        match self {
            Delivery::Request(request) => Some(request),
            Delivery::Notification(_) => None,
        }
    }

    /// Returns true for notification deliveries.
    pub fn is_notification(&self) -> bool {
        matches!(self, Delivery::Notification(_))
    }
}
