//! Simulation agents. Each runs on its own thread via [`fusionbus_core::spawn`].

mod camera;
mod fusion;
mod lidar;
mod pose;
mod time;

pub use camera::CameraAgent;
pub use fusion::FusionAgent;
pub use lidar::{LidarAgent, LidarDatabase};
pub use pose::PoseAgent;
pub use time::TimeAgent;

use crate::messages::{SimKind, SimMessage};
use fusionbus_core::{Agent, BusError, Setup};

/// Stops the agent on run shutdown. Sensor terminations are ignored.
fn stop_on_shutdown<A: Agent<SimMessage>>(
    setup: &mut Setup<A, SimMessage>,
) -> Result<(), BusError> {
    setup.on_notification(SimKind::Terminated, |_, ctx, message| {
        if message.is_shutdown() {
            ctx.terminate();
        }
        Ok(())
    })
}

/// Stops the agent as soon as any sensor reports a crash.
fn stop_on_crash<A: Agent<SimMessage>>(setup: &mut Setup<A, SimMessage>) -> Result<(), BusError> {
    setup.on_notification(SimKind::Crashed, |_, ctx, _| {
        ctx.terminate();
        Ok(())
    })
}
