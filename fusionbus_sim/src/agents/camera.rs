//! Camera sensor: replays its detections, delayed by its frequency.

use super::{stop_on_crash, stop_on_shutdown};
use crate::config::CameraConfig;
use crate::messages::{Origin, SimKind, SimMessage};
use crate::model::StampedDetections;
use crate::stats::Statistics;
use fusionbus_core::{Agent, AgentContext, BusError, Setup};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct CameraAgent {
    name: String,
    frequency: u32,
    detections: Vec<StampedDetections>,
    last_time: u32,
    stats: Arc<Statistics>,
    last_frame: Option<StampedDetections>,
    fault: Option<String>,
}

impl CameraAgent {
    pub fn new(config: &CameraConfig, stats: Arc<Statistics>) -> Self {
        let last_time = config.detections.iter().map(|d| d.time).max().unwrap_or(0);
        Self {
            name: config.name(),
            frequency: config.frequency,
            detections: config.detections.clone(),
            last_time,
            stats,
            last_frame: None,
            fault: None,
        }
    }

    /// Most recent frame sent to the trackers.
    pub fn last_frame(&self) -> Option<&StampedDetections> {
        self.last_frame.as_ref()
    }

    /// Error message, if the camera failed.
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    fn on_tick(&mut self, ctx: &mut AgentContext<SimMessage>, tick: u32) {
        let due: Vec<StampedDetections> = match tick.checked_sub(self.frequency) {
            Some(time) => self.detections.iter().filter(|d| d.time == time).cloned().collect(),
            None => Vec::new(),
        };

        let fault = due
            .iter()
            .flat_map(|frame| &frame.detected_objects)
            .find(|o| o.is_fault());
        if let Some(fault) = fault {
            warn!(camera = %self.name, error = %fault.description, "Camera fault");
            self.fault = Some(fault.description.clone());
            ctx.publish_notification(SimMessage::Crashed {
                sensor: self.name.clone(),
                error: fault.description.clone(),
            });
            ctx.terminate();
            return;
        }
        for frame in due {
            self.send(ctx, tick, frame);
        }

        if tick >= self.last_time.saturating_add(self.frequency) {
            debug!(camera = %self.name, tick, "Camera finished");
            ctx.publish_notification(SimMessage::terminated(self.name.clone(), Origin::Camera));
            ctx.terminate();
        }
    }

    fn send(&mut self, ctx: &AgentContext<SimMessage>, tick: u32, frame: StampedDetections) {
        self.stats.add_detected(frame.detected_objects.len());
        self.last_frame = Some(frame.clone());

        let request = SimMessage::DetectObjects {
            camera: self.name.clone(),
            sent_tick: tick,
            detections: frame,
        };
        if ctx.publish_request(request).is_none() {
            warn!(camera = %self.name, tick, "No tracker available, frame dropped");
        }
    }
}

impl Agent<SimMessage> for CameraAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, setup: &mut Setup<Self, SimMessage>) -> Result<(), BusError> {
        setup.on_notification(SimKind::Tick, |camera, ctx, message| {
            if let SimMessage::Tick(tick) = message {
                camera.on_tick(ctx, *tick);
            }
            Ok(())
        })?;
        stop_on_shutdown(setup)?;
        stop_on_crash(setup)
    }
}
