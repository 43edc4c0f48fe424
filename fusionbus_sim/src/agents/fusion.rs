//! Fusion agent: places tracked objects on the global map and decides when
//! the run is over.

use crate::fusion::FusionMap;
use crate::messages::{Origin, SimKind, SimMessage};
use crate::model::{Pose, SensorFault, TrackedObject};
use crate::stats::Statistics;
use fusionbus_core::{Agent, AgentContext, BusError, Setup};
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct FusionAgent {
    map: FusionMap,
    stats: Arc<Statistics>,
    sensors: usize,
    sensors_finished: usize,
    /// Tracked objects whose pose has not arrived yet
    unplaced: Vec<TrackedObject>,
    fault: Option<SensorFault>,
}

impl FusionAgent {
    pub const NAME: &'static str = "fusion";

    /// `sensors` is the number of sensor terminations that end the run.
    pub fn new(sensors: usize, stats: Arc<Statistics>) -> Self {
        Self {
            map: FusionMap::new(),
            stats,
            sensors,
            sensors_finished: 0,
            unplaced: Vec::new(),
            fault: None,
        }
    }

    pub fn map(&self) -> &FusionMap {
        &self.map
    }

    pub fn fault(&self) -> Option<&SensorFault> {
        self.fault.as_ref()
    }

    /// Objects still waiting for their pose.
    pub fn unplaced(&self) -> &[TrackedObject] {
        &self.unplaced
    }

    fn place(&mut self, object: TrackedObject) {
        match self.map.pose_at(object.time) {
            Some(pose) => {
                if self.map.integrate(&object, &pose) {
                    self.stats.add_landmark();
                }
            }
            None => self.unplaced.push(object),
        }
    }

    fn retry_unplaced(&mut self) {
        for object in std::mem::take(&mut self.unplaced) {
            self.place(object);
        }
    }

    fn on_pose(&mut self, pose: Pose) {
        self.map.add_pose(pose);
        self.retry_unplaced();
    }

    fn on_sensor_finished(&mut self, ctx: &mut AgentContext<SimMessage>, sender: &str) {
        self.sensors_finished += 1;
        debug!(
            sensor = sender,
            finished = self.sensors_finished,
            total = self.sensors,
            "Sensor finished"
        );
        if self.sensors_finished >= self.sensors {
            info!(landmarks = self.map.landmarks().len(), "All sensors finished");
            ctx.publish_notification(SimMessage::terminated(Self::NAME, Origin::System));
            ctx.terminate();
        }
    }
}

impl Agent<SimMessage> for FusionAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initialize(&mut self, setup: &mut Setup<Self, SimMessage>) -> Result<(), BusError> {
        setup.on_request(SimKind::TrackedObjects, |fusion, ctx, request| {
            if let SimMessage::TrackedObjects { objects, .. } = request.message() {
                for object in objects {
                    fusion.place(object.clone());
                }
            }
            ctx.resolve(&request, true);
            Ok(())
        })?;
        setup.on_request(SimKind::PoseUpdate, |fusion, ctx, request| {
            if let SimMessage::PoseUpdate(pose) = request.message() {
                fusion.on_pose(*pose);
            }
            ctx.resolve(&request, true);
            Ok(())
        })?;
        setup.on_notification(SimKind::Tick, |fusion, _, _| {
            fusion.retry_unplaced();
            Ok(())
        })?;
        setup.on_notification(SimKind::Terminated, |fusion, ctx, message| {
            if let SimMessage::Terminated { sender, origin } = message {
                match origin {
                    Origin::System => ctx.terminate(),
                    _ => fusion.on_sensor_finished(ctx, sender),
                }
            }
            Ok(())
        })?;
        setup.on_notification(SimKind::Crashed, |fusion, ctx, message| {
            if let SimMessage::Crashed { sensor, error } = message {
                error!(%sensor, %error, "Sensor crashed, stopping simulation");
                fusion.fault = Some(SensorFault::new(sensor.clone(), error.clone()));
            }
            ctx.terminate();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CloudPoint;
    use fusionbus_core::{AgentId, AgentRunner, Broker};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn object(id: &str, time: u32) -> TrackedObject {
        TrackedObject {
            id: id.to_string(),
            time,
            description: id.to_lowercase(),
            coordinates: vec![CloudPoint::new(1.0, 0.0)],
        }
    }

    fn tracked(objects: Vec<TrackedObject>) -> SimMessage {
        SimMessage::TrackedObjects {
            lidar: "lidar_1".to_string(),
            objects,
        }
    }

    #[test]
    fn test_waits_for_pose_then_ends_run() {
        let broker = Broker::<SimMessage>::shared();
        let watcher = AgentId::from_seed("watcher", 1);
        broker.register(&watcher);
        broker.subscribe_notification(SimKind::Terminated, &watcher).unwrap();

        let stats = Arc::new(Statistics::new());
        let fusion = FusionAgent::new(2, Arc::clone(&stats));
        let runner = AgentRunner::new(Arc::clone(&broker), fusion).setup().unwrap();

        let early = broker
            .publish_request(tracked(vec![object("Wall_1", 2), object("Door", 1)]))
            .unwrap();
        let pose = broker
            .publish_request(SimMessage::PoseUpdate(Pose { time: 1, x: 0.0, y: 0.0, yaw: 0.0 }))
            .unwrap();
        broker.publish_notification(SimMessage::terminated("lidar_1", Origin::Lidar));
        broker.publish_notification(SimMessage::terminated("pose", Origin::Pose));
        let fusion = runner.run().unwrap();

        assert_eq!(early.reply.get_timeout(WAIT), Ok(true));
        assert_eq!(pose.reply.get_timeout(WAIT), Ok(true));
        assert_eq!(fusion.map().landmarks().len(), 1);
        assert_eq!(fusion.map().landmarks()[0].id, "Door");
        assert_eq!(fusion.unplaced().len(), 1);
        assert_eq!(stats.snapshot().num_landmarks, 1);
        assert!(fusion.fault().is_none());

        let mut shutdown = false;
        while let Ok(Some(delivery)) = broker.consume_timeout(&watcher, Duration::from_millis(10)) {
            shutdown |= delivery.message().is_shutdown();
        }
        assert!(shutdown);
    }

    #[test]
    fn test_crash_records_fault() {
        let broker = Broker::<SimMessage>::shared();
        let runner = AgentRunner::new(
            Arc::clone(&broker),
            FusionAgent::new(3, Arc::new(Statistics::new())),
        )
        .setup()
        .unwrap();

        broker.publish_notification(SimMessage::Crashed {
            sensor: "camera_2".to_string(),
            error: "Camera disconnected".to_string(),
        });
        let fusion = runner.run().unwrap();
        assert_eq!(
            fusion.fault(),
            Some(&SensorFault::new("camera_2", "Camera disconnected"))
        );
    }
}
