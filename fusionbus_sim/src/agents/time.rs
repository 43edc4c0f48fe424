//! Global clock: broadcasts ticks until the run ends.

use crate::messages::{Origin, SimKind, SimMessage};
use crate::stats::Statistics;
use fusionbus_core::{Agent, AgentContext, Broker, BusError, Setup};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Publishes `Tick(1..=duration)`, one every `tick_time`.
///
/// The ticks come from a helper thread so the agent's own loop stays free
/// to observe the shutdown and crash notifications that stop the clock.
pub struct TimeAgent {
    tick_time: Duration,
    duration: u32,
    stats: Arc<Statistics>,
    stop: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
}

impl TimeAgent {
    pub const NAME: &'static str = "time";

    pub fn new(tick_time: Duration, duration: u32, stats: Arc<Statistics>) -> Self {
        Self {
            tick_time,
            duration,
            stats,
            stop: Arc::new(AtomicBool::new(false)),
            ticker: None,
        }
    }

    /// Waits for the ticker thread to exit.
    pub fn join_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            if ticker.join().is_err() {
                warn!("Ticker thread panicked");
            }
        }
    }

    fn halt(&self, ctx: &mut AgentContext<SimMessage>) {
        self.stop.store(true, Ordering::SeqCst);
        ctx.terminate();
    }
}

impl Agent<SimMessage> for TimeAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initialize(&mut self, setup: &mut Setup<Self, SimMessage>) -> Result<(), BusError> {
        setup.on_notification(SimKind::Terminated, |agent, ctx, message| {
            if message.is_shutdown() {
                agent.halt(ctx);
            }
            Ok(())
        })?;
        setup.on_notification(SimKind::Crashed, |agent, ctx, _| {
            agent.halt(ctx);
            Ok(())
        })?;

        let clock = Clock {
            broker: Arc::clone(setup.broker()),
            stats: Arc::clone(&self.stats),
            stop: Arc::clone(&self.stop),
            tick_time: self.tick_time,
            duration: self.duration,
        };
        self.ticker = Some(thread::spawn(move || clock.run()));
        Ok(())
    }
}

struct Clock {
    broker: Arc<Broker<SimMessage>>,
    stats: Arc<Statistics>,
    stop: Arc<AtomicBool>,
    tick_time: Duration,
    duration: u32,
}

impl Clock {
    fn run(self) {
        for tick in 1..=self.duration {
            if self.stop.load(Ordering::SeqCst) {
                debug!(tick, "Clock stopped");
                return;
            }
            self.stats.record_tick();
            let receivers = self.broker.publish_notification(SimMessage::Tick(tick));
            trace!(tick, receivers, "Tick");
            thread::sleep(self.tick_time);
        }

        if !self.stop.load(Ordering::SeqCst) {
            info!(ticks = self.duration, "Duration elapsed, shutting down");
            self.broker
                .publish_notification(SimMessage::terminated(TimeAgent::NAME, Origin::System));
        }
    }
}
