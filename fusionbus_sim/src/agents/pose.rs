//! Pose source: reports where the robot is at each tick.

use super::{stop_on_crash, stop_on_shutdown};
use crate::messages::{Origin, SimKind, SimMessage};
use crate::model::Pose;
use fusionbus_core::{Agent, AgentContext, BusError, Setup};
use tracing::{debug, warn};

pub struct PoseAgent {
    poses: Vec<Pose>,
    last_time: u32,
}

impl PoseAgent {
    pub const NAME: &'static str = "pose";

    pub fn new(poses: Vec<Pose>) -> Self {
        let last_time = poses.iter().map(|p| p.time).max().unwrap_or(0);
        Self { poses, last_time }
    }

    fn on_tick(&mut self, ctx: &mut AgentContext<SimMessage>, tick: u32) {
        if let Some(pose) = self.poses.iter().find(|p| p.time == tick) {
            if ctx.publish_request(SimMessage::PoseUpdate(*pose)).is_none() {
                warn!(tick, "No fusion agent available, pose dropped");
            }
        }

        if tick >= self.last_time {
            debug!(tick, "Pose source finished");
            ctx.publish_notification(SimMessage::terminated(Self::NAME, Origin::Pose));
            ctx.terminate();
        }
    }
}

impl Agent<SimMessage> for PoseAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initialize(&mut self, setup: &mut Setup<Self, SimMessage>) -> Result<(), BusError> {
        setup.on_notification(SimKind::Tick, |agent, ctx, message| {
            if let SimMessage::Tick(tick) = message {
                agent.on_tick(ctx, *tick);
            }
            Ok(())
        })?;
        stop_on_shutdown(setup)?;
        stop_on_crash(setup)
    }
}
