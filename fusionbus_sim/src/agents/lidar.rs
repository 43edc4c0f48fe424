//! LiDAR tracking worker. Workers form a pool; each detection frame is
//! handled by exactly one of them.

use super::stop_on_crash;
use crate::config::LidarConfig;
use crate::messages::{Origin, SimKind, SimMessage};
use crate::model::{DetectedObject, StampedCloudPoints, TrackedObject};
use crate::stats::Statistics;
use fusionbus_core::{Agent, AgentContext, BusError, Request, Setup};
use std::sync::Arc;
use tracing::{debug, warn};

/// Recorded scans, shared read-only by every worker.
#[derive(Debug, Default)]
pub struct LidarDatabase {
    scans: Vec<StampedCloudPoints>,
}

impl LidarDatabase {
    pub fn new(scans: Vec<StampedCloudPoints>) -> Self {
        Self { scans }
    }

    pub fn lookup(&self, id: &str, time: u32) -> Option<&StampedCloudPoints> {
        self.scans.iter().find(|s| s.id == id && s.time == time)
    }

    /// Returns true if the recording marks the sensor as failed at `time`.
    pub fn fault_at(&self, time: u32) -> bool {
        self.lookup(DetectedObject::FAULT_ID, time).is_some()
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }
}

pub struct LidarAgent {
    name: String,
    frequency: u32,
    database: Arc<LidarDatabase>,
    stats: Arc<Statistics>,
    cameras: usize,
    cameras_finished: usize,
    tick: u32,
    queue: Vec<Request<SimMessage>>,
    last_frame: Vec<TrackedObject>,
    fault: Option<String>,
}

impl LidarAgent {
    pub fn new(
        config: &LidarConfig,
        cameras: usize,
        database: Arc<LidarDatabase>,
        stats: Arc<Statistics>,
    ) -> Self {
        Self {
            name: config.name(),
            frequency: config.frequency,
            database,
            stats,
            cameras,
            cameras_finished: 0,
            tick: 0,
            queue: Vec::new(),
            last_frame: Vec::new(),
            fault: None,
        }
    }

    /// Objects of the most recent frame sent to fusion.
    pub fn last_frame(&self) -> &[TrackedObject] {
        &self.last_frame
    }

    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    fn on_tick(&mut self, ctx: &mut AgentContext<SimMessage>, tick: u32) {
        self.tick = tick;
        if self.database.fault_at(tick) {
            let error = format!("{} disconnected", self.name);
            warn!(lidar = %self.name, tick, "LiDAR fault");
            self.fault = Some(error.clone());
            ctx.publish_notification(SimMessage::Crashed {
                sensor: self.name.clone(),
                error,
            });
            ctx.terminate();
            return;
        }
        self.process_ready(ctx);
        self.finish_if_done(ctx);
    }

    fn is_ready(&self, request: &Request<SimMessage>) -> bool {
        match request.message() {
            SimMessage::DetectObjects { detections, .. } => {
                detections.time.saturating_add(self.frequency) <= self.tick
            }
            _ => true,
        }
    }

    fn process_ready(&mut self, ctx: &AgentContext<SimMessage>) {
        let queued = std::mem::take(&mut self.queue);
        let (ready, waiting): (Vec<_>, Vec<_>) =
            queued.into_iter().partition(|r| self.is_ready(r));
        self.queue = waiting;
        for request in ready {
            self.track(ctx, &request);
            ctx.resolve(&request, true);
        }
    }

    fn track(&mut self, ctx: &AgentContext<SimMessage>, request: &Request<SimMessage>) {
        let SimMessage::DetectObjects {
            camera, detections, ..
        } = request.message()
        else {
            return;
        };

        let objects: Vec<TrackedObject> = detections
            .detected_objects
            .iter()
            .filter_map(|object| match self.database.lookup(&object.id, detections.time) {
                Some(scan) => Some(TrackedObject {
                    id: object.id.clone(),
                    time: detections.time,
                    description: object.description.clone(),
                    coordinates: scan.to_cloud_points(),
                }),
                None => {
                    warn!(
                        lidar = %self.name,
                        object = %object.id,
                        time = detections.time,
                        "No scan recorded for detected object"
                    );
                    None
                }
            })
            .collect();

        debug!(lidar = %self.name, %camera, tracked = objects.len(), "Tracked frame");
        if objects.is_empty() {
            return;
        }

        self.stats.add_tracked(objects.len());
        self.last_frame = objects.clone();
        let frame = SimMessage::TrackedObjects {
            lidar: self.name.clone(),
            objects,
        };
        if ctx.publish_request(frame).is_none() {
            warn!(lidar = %self.name, "No fusion agent available, tracked objects dropped");
        }
    }

    fn finish_if_done(&mut self, ctx: &mut AgentContext<SimMessage>) {
        if ctx.is_terminating() || self.cameras_finished < self.cameras || !self.queue.is_empty() {
            return;
        }
        debug!(lidar = %self.name, tick = self.tick, "LiDAR finished");
        ctx.publish_notification(SimMessage::terminated(self.name.clone(), Origin::Lidar));
        ctx.terminate();
    }
}

impl Agent<SimMessage> for LidarAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, setup: &mut Setup<Self, SimMessage>) -> Result<(), BusError> {
        setup.on_request(SimKind::DetectObjects, |lidar, ctx, request| {
            lidar.queue.push(request);
            lidar.process_ready(ctx);
            Ok(())
        })?;
        setup.on_notification(SimKind::Tick, |lidar, ctx, message| {
            if let SimMessage::Tick(tick) = message {
                lidar.on_tick(ctx, *tick);
            }
            Ok(())
        })?;
        setup.on_notification(SimKind::Terminated, |lidar, ctx, message| {
            match message {
                SimMessage::Terminated {
                    origin: Origin::Camera,
                    ..
                } => {
                    lidar.cameras_finished += 1;
                    lidar.finish_if_done(ctx);
                }
                SimMessage::Terminated {
                    origin: Origin::System,
                    ..
                } => ctx.terminate(),
                _ => {}
            }
            Ok(())
        })?;
        stop_on_crash(setup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CloudPoint, StampedDetections};
    use fusionbus_core::{AgentId, AgentRunner, Broker};
    use std::time::Duration;

    fn scan(id: &str, time: u32, points: Vec<Vec<f64>>) -> StampedCloudPoints {
        StampedCloudPoints {
            id: id.to_string(),
            time,
            cloud_points: points,
        }
    }

    fn detect(time: u32, ids: &[&str]) -> SimMessage {
        SimMessage::DetectObjects {
            camera: "camera_1".to_string(),
            sent_tick: time + 1,
            detections: StampedDetections {
                time,
                detected_objects: ids.iter().map(|id| DetectedObject::new(*id, "desc")).collect(),
            },
        }
    }

    fn fusion_stub(broker: &Broker<SimMessage>) -> AgentId {
        let id = AgentId::from_seed("fusion", 1);
        broker.register(&id);
        broker.subscribe_request(SimKind::TrackedObjects, &id).unwrap();
        broker.subscribe_notification(SimKind::Terminated, &id).unwrap();
        id
    }

    #[test]
    fn test_database_lookup() {
        let db = LidarDatabase::new(vec![
            scan("Wall_1", 2, vec![vec![1.0, 2.0, 0.0]]),
            scan("ERROR", 5, vec![]),
        ]);
        assert_eq!(db.len(), 2);
        assert!(db.lookup("Wall_1", 2).is_some());
        assert!(db.lookup("Wall_1", 3).is_none());
        assert!(db.fault_at(5));
        assert!(!db.fault_at(2));
    }

    #[test]
    fn test_tracks_after_frequency_then_finishes() {
        let broker = Broker::<SimMessage>::shared();
        let fusion = fusion_stub(&broker);
        let stats = Arc::new(Statistics::new());
        let database = Arc::new(LidarDatabase::new(vec![
            scan("Wall_1", 1, vec![vec![1.0, 2.0, 0.3], vec![3.0, 4.0, 0.3]]),
            scan("Door", 1, vec![vec![5.0, 6.0, 0.0]]),
        ]));
        let config = LidarConfig { id: 2, frequency: 2 };
        let lidar = LidarAgent::new(&config, 1, database, Arc::clone(&stats));
        let runner = AgentRunner::new(Arc::clone(&broker), lidar).setup().unwrap();

        broker.publish_notification(SimMessage::Tick(1));
        broker.publish_notification(SimMessage::Tick(2));
        let ticket = broker.publish_request(detect(1, &["Wall_1", "Door", "Ghost"])).unwrap();
        broker.publish_notification(SimMessage::terminated("camera_1", Origin::Camera));
        broker.publish_notification(SimMessage::Tick(3));
        let lidar = runner.run().unwrap();

        assert_eq!(ticket.reply.get_timeout(Duration::from_secs(5)), Ok(true));
        assert_eq!(stats.snapshot().num_tracked_objects, 2);
        assert_eq!(lidar.last_frame().len(), 2);
        assert_eq!(
            lidar.last_frame()[0].coordinates,
            vec![CloudPoint::new(1.0, 2.0), CloudPoint::new(3.0, 4.0)]
        );

        let mut received = Vec::new();
        while let Ok(Some(delivery)) = broker.consume_timeout(&fusion, Duration::from_millis(10)) {
            received.push(delivery.message().clone());
        }
        // Camera termination, the tracked frame, then the worker's own termination
        assert_eq!(received.len(), 3);
        assert!(matches!(
            &received[1],
            SimMessage::TrackedObjects { lidar, objects } if lidar == "lidar_2" && objects.len() == 2
        ));
        assert_eq!(received[2], SimMessage::terminated("lidar_2", Origin::Lidar));
    }

    #[test]
    fn test_recorded_fault_crashes_worker() {
        let broker = Broker::<SimMessage>::shared();
        let database = Arc::new(LidarDatabase::new(vec![scan("ERROR", 2, vec![])]));
        let stats = Arc::new(Statistics::new());
        let lidar = LidarAgent::new(&LidarConfig::default(), 1, database, stats);
        let runner = AgentRunner::new(Arc::clone(&broker), lidar).setup().unwrap();

        broker.publish_notification(SimMessage::Tick(1));
        broker.publish_notification(SimMessage::Tick(2));
        let lidar = runner.run().unwrap();
        assert_eq!(lidar.fault(), Some("lidar_1 disconnected"));
    }
}
