//! Agent Runtime - the execution loop every agent runs on its own thread.
//!
//! # Lifecycle
//!
//! ```text
//!  Created ──register──► Registered ──initialize──► Running
//!                                                      │ terminate()
//!                                                      ▼
//!                          Unregistered ◄──unregister── Terminating
//! ```
//!
//! During `initialize` an agent installs one handler per message kind it
//! cares about; installing a handler also subscribes the agent with the
//! broker. While running, the loop blocks on the agent's mailbox and
//! dispatches each delivery to the handler registered for its kind. Handlers
//! of one agent never run concurrently; handlers of different agents run in
//! parallel on their own threads.
//!
//! # Usage
//!
//! ```ignore
//! use fusionbus_core::{spawn, Agent, Broker, Setup, BusError};
//!
//! impl Agent<MyMsg> for Worker {
//!     fn name(&self) -> &str { "worker" }
//!
//!     fn initialize(&mut self, setup: &mut Setup<Self, MyMsg>) -> Result<(), BusError> {
//!         setup.on_request(MyKind::Job, |worker, ctx, request| {
//!             ctx.resolve(&request, worker.process(&request));
//!             Ok(())
//!         })?;
//!         setup.on_notification(MyKind::Shutdown, |_, ctx, _| {
//!             ctx.terminate();
//!             Ok(())
//!         })
//!     }
//! }
//!
//! let broker = Broker::shared();
//! let handle = spawn(&broker, Worker::default())?;
//! ```

use crate::broker::{Broker, Ticket};
use crate::error::{AgentError, BusError};
use crate::message::{Delivery, Message, Request};
use crate::types::AgentId;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Position of an agent in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Created,
    Registered,
    Running,
    Terminating,
    Unregistered,
}

/// A worker unit driven by the runtime loop.
pub trait Agent<M: Message>: Send + Sized + 'static {
    /// Logical name, used for the agent's identity and thread name.
    fn name(&self) -> &str;

    /// Installs handlers. Called once, after registration, before the loop.
    fn initialize(&mut self, setup: &mut Setup<Self, M>) -> Result<(), BusError>;
}

type RequestHandler<A, M> =
    Box<dyn FnMut(&mut A, &mut AgentContext<M>, Request<M>) -> anyhow::Result<()> + Send>;

type NotificationHandler<A, M> =
    Box<dyn FnMut(&mut A, &mut AgentContext<M>, &M) -> anyhow::Result<()> + Send>;

/// What a handler can do besides touching its agent's own state.
pub struct AgentContext<M: Message> {
    id: AgentId,
    broker: Arc<Broker<M>>,
    state: AgentState,
}

impl<M: Message> AgentContext<M> {
    /// Returns this agent's identity.
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Returns the broker this agent is attached to.
    pub fn broker(&self) -> &Arc<Broker<M>> {
        &self.broker
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Routes a request to one subscriber. `None` if nobody subscribes.
    pub fn publish_request(&self, message: M) -> Option<Ticket<M::Reply>> {
        self.broker.publish_request(message)
    }

    /// Fans a notification out to every subscriber.
    pub fn publish_notification(&self, message: M) -> usize {
        self.broker.publish_notification(message)
    }

    /// Resolves the sender's future for `request`.
    pub fn resolve(&self, request: &Request<M>, reply: M::Reply) -> bool {
        self.broker.resolve(request.id(), reply)
    }

    /// Asks the loop to stop before its next `consume`.
    ///
    /// Does not interrupt the running handler, and does not wake peers:
    /// publish a shutdown notification for that.
    pub fn terminate(&mut self) {
        if self.state != AgentState::Terminating {
            debug!(agent = %self.id, "Agent terminating");
        }
        self.state = AgentState::Terminating;
    }

    /// Returns true once `terminate` has been called.
    pub fn is_terminating(&self) -> bool {
        self.state == AgentState::Terminating
    }
}

/// Handler registry under construction, handed to [`Agent::initialize`].
pub struct Setup<A, M: Message> {
    ctx: AgentContext<M>,
    requests: HashMap<M::Kind, RequestHandler<A, M>>,
    notifications: HashMap<M::Kind, NotificationHandler<A, M>>,
}

impl<A: Agent<M>, M: Message> Setup<A, M> {
    /// Returns the identity the agent was registered under.
    pub fn id(&self) -> &AgentId {
        &self.ctx.id
    }

    /// Returns the broker, e.g. for helper threads the agent starts.
    pub fn broker(&self) -> &Arc<Broker<M>> {
        &self.ctx.broker
    }

    /// Subscribes to request kind `kind` and installs its handler.
    ///
    /// Installing a second handler for the same kind replaces the first.
    pub fn on_request<F>(&mut self, kind: M::Kind, handler: F) -> Result<(), BusError>
    where
        F: FnMut(&mut A, &mut AgentContext<M>, Request<M>) -> anyhow::Result<()> + Send + 'static,
    {
        self.ctx.broker.subscribe_request(kind, &self.ctx.id)?;
        self.requests.insert(kind, Box::new(handler));
        Ok(())
    }

    /// Subscribes to notification kind `kind` and installs its handler.
    pub fn on_notification<F>(&mut self, kind: M::Kind, handler: F) -> Result<(), BusError>
    where
        F: FnMut(&mut A, &mut AgentContext<M>, &M) -> anyhow::Result<()> + Send + 'static,
    {
        self.ctx.broker.subscribe_notification(kind, &self.ctx.id)?;
        self.notifications.insert(kind, Box::new(handler));
        Ok(())
    }
}

/// Unregisters the agent however the loop ends, unwinding included.
struct Registration<M: Message> {
    id: AgentId,
    broker: Arc<Broker<M>>,
}

impl<M: Message> Drop for Registration<M> {
    fn drop(&mut self) {
        self.broker.unregister(&self.id);
    }
}

/// Drives one agent through its lifecycle.
pub struct AgentRunner<A: Agent<M>, M: Message> {
    agent: A,
    setup: Setup<A, M>,
}

impl<A: Agent<M>, M: Message> AgentRunner<A, M> {
    /// Creates a runner with a fresh identity derived from the agent's name.
    pub fn new(broker: Arc<Broker<M>>, agent: A) -> Self {
        let id = AgentId::new(agent.name());
        Self::with_id(broker, id, agent)
    }

    /// Creates a runner with a caller-chosen identity.
    pub fn with_id(broker: Arc<Broker<M>>, id: AgentId, agent: A) -> Self {
        Self {
            agent,
            setup: Setup {
                ctx: AgentContext {
                    id,
                    broker,
                    state: AgentState::Created,
                },
                requests: HashMap::new(),
                notifications: HashMap::new(),
            },
        }
    }

    /// Returns the agent's identity.
    pub fn id(&self) -> &AgentId {
        &self.setup.ctx.id
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> AgentState {
        self.setup.ctx.state
    }

    /// Registers the agent and runs its `initialize`.
    ///
    /// On failure the agent is unregistered again.
    pub fn setup(mut self) -> Result<Self, AgentError> {
        let ctx = &mut self.setup.ctx;
        ctx.broker.register(&ctx.id);
        ctx.state = AgentState::Registered;

        if let Err(e) = self.agent.initialize(&mut self.setup) {
            self.setup.ctx.broker.unregister(&self.setup.ctx.id);
            self.setup.ctx.state = AgentState::Unregistered;
            return Err(e.into());
        }

        debug!(
            agent = %self.setup.ctx.id,
            requests = self.setup.requests.len(),
            notifications = self.setup.notifications.len(),
            "Agent initialized"
        );
        Ok(self)
    }

    /// Runs the loop on the calling thread until the agent terminates or a
    /// handler fails, then unregisters. Returns the agent's final state.
    pub fn run(self) -> Result<A, AgentError> {
        let mut runner = match self.state() {
            AgentState::Created => self.setup()?,
            _ => self,
        };

        let _registration = Registration {
            id: runner.setup.ctx.id.clone(),
            broker: Arc::clone(&runner.setup.ctx.broker),
        };

        if !runner.setup.ctx.is_terminating() {
            runner.setup.ctx.state = AgentState::Running;
        }
        debug!(agent = %runner.setup.ctx.id, "Agent running");

        let outcome = runner.event_loop();
        runner.setup.ctx.state = AgentState::Unregistered;

        match &outcome {
            Ok(()) => debug!(agent = %runner.setup.ctx.id, "Agent finished"),
            // Lost registration is reported to the caller only
            Err(AgentError::Bus(_)) => {}
            Err(e) => warn!(agent = %runner.setup.ctx.id, error = %e, "Agent stopped on error"),
        }
        outcome.map(|()| runner.agent)
    }

    fn event_loop(&mut self) -> Result<(), AgentError> {
        while !self.setup.ctx.is_terminating() {
            let delivery = self.setup.ctx.broker.consume(&self.setup.ctx.id)?;
            self.dispatch(delivery)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, delivery: Delivery<M>) -> Result<(), AgentError> {
        let kind = delivery.kind();
        let Setup {
            ctx,
            requests,
            notifications,
        } = &mut self.setup;

        let result = match delivery {
            Delivery::Request(request) => match requests.get_mut(&kind) {
                Some(handler) => handler(&mut self.agent, ctx, request),
                None => {
                    warn!(agent = %ctx.id, kind = ?kind, "No handler for request");
                    return Ok(());
                }
            },
            Delivery::Notification(message) => match notifications.get_mut(&kind) {
                Some(handler) => handler(&mut self.agent, ctx, &message),
                None => {
                    warn!(agent = %ctx.id, kind = ?kind, "No handler for notification");
                    return Ok(());
                }
            },
        };

        result.map_err(|source| AgentError::handler(&ctx.id, kind, source))
    }
}

/// Handle to an agent running on its own thread.
pub struct AgentHandle<A> {
    id: AgentId,
    thread: JoinHandle<Result<A, AgentError>>,
}

impl<A> AgentHandle<A> {
    /// Returns the running agent's identity.
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Returns true once the agent thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the agent to finish and returns its final state.
    pub fn join(self) -> Result<A, AgentError> {
        self.thread
            .join()
            .map_err(|payload| AgentError::Panicked(panic_message(payload.as_ref())))?
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Registers and initializes `agent` on the calling thread, then runs its
/// loop on a new named thread.
///
/// Subscriptions are in place when this returns, so messages published
/// afterwards reach the agent.
pub fn spawn<A, M>(broker: &Arc<Broker<M>>, agent: A) -> Result<AgentHandle<A>, AgentError>
where
    A: Agent<M>,
    M: Message,
{
    let runner = AgentRunner::new(Arc::clone(broker), agent).setup()?;
    let id = runner.id().clone();

    let thread = thread::Builder::new()
        .name(id.name().to_string())
        .spawn(move || runner.run())
        .map_err(|e| {
            broker.unregister(&id);
            AgentError::Spawn(e)
        })?;

    Ok(AgentHandle { id, thread })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReplyError;
    use crate::testing::{TestKind, TestMsg};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Worker {
        name: String,
        handled: Vec<u32>,
        states: Vec<AgentState>,
    }

    impl Worker {
        fn named(name: &str) -> Self {
            Self {
                name: name.to_string(),
                ..Self::default()
            }
        }
    }

    impl Agent<TestMsg> for Worker {
        fn name(&self) -> &str {
            &self.name
        }

        fn initialize(&mut self, setup: &mut Setup<Self, TestMsg>) -> Result<(), BusError> {
            setup.on_request(TestKind::Job, |worker, ctx, request| {
                if let TestMsg::Job(n) = request.message() {
                    worker.handled.push(*n);
                    worker.states.push(ctx.state());
                    ctx.resolve(&request, format!("job-{n}"));
                }
                Ok(())
            })?;
            setup.on_notification(TestKind::Shutdown, |worker, ctx, _| {
                ctx.terminate();
                worker.states.push(ctx.state());
                Ok(())
            })?;
            setup.on_notification(TestKind::Fail, |_, _, _| {
                Err(anyhow::anyhow!("malformed payload"))
            })
        }
    }

    /// Forwards each job as an `Other` request and acknowledges it.
    struct Relay;

    impl Agent<TestMsg> for Relay {
        fn name(&self) -> &str {
            "relay"
        }

        fn initialize(&mut self, setup: &mut Setup<Self, TestMsg>) -> Result<(), BusError> {
            setup.on_request(TestKind::Job, |_, ctx, request| {
                if let TestMsg::Job(n) = request.message() {
                    let forwarded = ctx.publish_request(TestMsg::Other(*n)).is_some();
                    ctx.resolve(&request, format!("forwarded={forwarded}"));
                }
                Ok(())
            })?;
            setup.on_notification(TestKind::Shutdown, |_, ctx, _| {
                ctx.terminate();
                Ok(())
            })
        }
    }

    #[test]
    fn test_runner_lifecycle() {
        let broker = Broker::<TestMsg>::shared();
        let runner = AgentRunner::new(Arc::clone(&broker), Worker::named("solo"));
        assert_eq!(runner.state(), AgentState::Created);
        assert!(!broker.is_registered(runner.id()));

        let runner = runner.setup().unwrap();
        let id = runner.id().clone();
        assert_eq!(runner.state(), AgentState::Registered);
        assert!(broker.is_registered(&id));
        assert_eq!(broker.request_subscribers(TestKind::Job), vec![id.clone()]);

        let job = broker.publish_request(TestMsg::Job(3)).unwrap();
        broker.publish_notification(TestMsg::Shutdown);

        let worker = runner.run().unwrap();
        assert_eq!(worker.handled, vec![3]);
        assert_eq!(worker.states, vec![AgentState::Running, AgentState::Terminating]);
        assert_eq!(job.reply.get_timeout(WAIT), Ok("job-3".to_string()));
        assert!(!broker.is_registered(&id));
        assert!(broker.request_subscribers(TestKind::Job).is_empty());
    }

    #[test]
    fn test_spawned_agents_share_requests() {
        let broker = Broker::<TestMsg>::shared();
        let first = spawn(&broker, Worker::named("first")).unwrap();
        let second = spawn(&broker, Worker::named("second")).unwrap();

        let tickets: Vec<_> = (0..10)
            .map(|n| broker.publish_request(TestMsg::Job(n)).unwrap())
            .collect();
        for (n, ticket) in tickets.iter().enumerate() {
            assert_eq!(ticket.reply.get_timeout(WAIT), Ok(format!("job-{n}")));
        }

        assert_eq!(broker.publish_notification(TestMsg::Shutdown), 2);
        let first = first.join().unwrap();
        let second = second.join().unwrap();
        assert_eq!(first.handled, vec![0, 2, 4, 6, 8]);
        assert_eq!(second.handled, vec![1, 3, 5, 7, 9]);
        assert_eq!(broker.registered_agents(), 0);
    }

    #[test]
    fn test_handler_can_publish() {
        let broker = Broker::<TestMsg>::shared();
        let sink = AgentId::from_seed("sink", 1);
        broker.register(&sink);
        broker.subscribe_request(TestKind::Other, &sink).unwrap();

        let relay = spawn(&broker, Relay).unwrap();
        let ticket = broker.publish_request(TestMsg::Job(7)).unwrap();
        assert_eq!(ticket.reply.get_timeout(WAIT), Ok("forwarded=true".to_string()));

        let forwarded = broker.consume_timeout(&sink, WAIT).unwrap().unwrap();
        assert_eq!(forwarded.message(), &TestMsg::Other(7));

        broker.publish_notification(TestMsg::Shutdown);
        relay.join().unwrap();
    }

    #[test]
    fn test_handler_error_stops_agent() {
        let broker = Broker::<TestMsg>::shared();
        let runner = AgentRunner::new(Arc::clone(&broker), Worker::named("fragile"))
            .setup()
            .unwrap();
        let id = runner.id().clone();

        broker.publish_notification(TestMsg::Fail);
        // Queued behind the failing notification, never handled
        let orphan = broker.publish_request(TestMsg::Job(1)).unwrap();

        match runner.run() {
            Err(AgentError::Handler { agent, kind, source }) => {
                assert_eq!(agent, id);
                assert_eq!(kind, "Fail");
                assert_eq!(source.to_string(), "malformed payload");
            }
            other => panic!("expected handler error, got {:?}", other.map(|w| w.handled)),
        }

        assert!(!broker.is_registered(&id));
        assert_eq!(orphan.reply.get_timeout(WAIT), Err(ReplyError::Cancelled));
    }

    #[test]
    fn test_terminate_during_initialize_skips_loop() {
        struct Quitter;

        impl Agent<TestMsg> for Quitter {
            fn name(&self) -> &str {
                "quitter"
            }

            fn initialize(&mut self, setup: &mut Setup<Self, TestMsg>) -> Result<(), BusError> {
                setup.on_notification(TestKind::Tick, |_, _, _| Ok(()))?;
                setup.ctx.terminate();
                Ok(())
            }
        }

        let broker = Broker::<TestMsg>::shared();
        let handle = spawn(&broker, Quitter).unwrap();
        assert!(handle.join().is_ok());
        assert_eq!(broker.publish_notification(TestMsg::Tick(1)), 0);
    }

    #[test]
    fn test_handler_panic_unregisters() {
        struct Fragile;

        impl Agent<TestMsg> for Fragile {
            fn name(&self) -> &str {
                "fragile"
            }

            fn initialize(&mut self, setup: &mut Setup<Self, TestMsg>) -> Result<(), BusError> {
                setup.on_notification(TestKind::Tick, |_, _, _| panic!("boom"))
            }
        }

        let broker = Broker::<TestMsg>::shared();
        let handle = spawn(&broker, Fragile).unwrap();
        let id = handle.id().clone();
        assert!(broker.is_registered(&id));

        broker.publish_notification(TestMsg::Tick(1));
        match handle.join() {
            Err(AgentError::Panicked(message)) => assert_eq!(message, "boom"),
            other => panic!("expected panic error, got ok={}", other.is_ok()),
        }
        assert!(!broker.is_registered(&id));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_lost_registration_is_not_logged() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();

        let outcome = tracing::subscriber::with_default(subscriber, || {
            let broker = Broker::<TestMsg>::shared();
            let runner = AgentRunner::new(Arc::clone(&broker), Worker::named("evicted"))
                .setup()
                .unwrap();
            broker.unregister(runner.id());
            runner.run()
        });

        assert!(matches!(
            outcome,
            Err(AgentError::Bus(BusError::NotRegistered(_)))
        ));
        let text = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert!(text.contains("Agent unregistered"));
        assert!(!text.contains("not registered"));
        assert!(!text.contains("stopped on error"));
    }
}
