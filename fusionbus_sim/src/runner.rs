//! Simulation runner: wires every agent to one broker and collects results.

use crate::agents::{CameraAgent, FusionAgent, LidarAgent, LidarDatabase, PoseAgent, TimeAgent};
use crate::config::SimConfig;
use crate::error::SimError;
use crate::messages::{Origin, SimMessage};
use crate::model::{Landmark, Pose, SensorFault, StampedDetections, TrackedObject};
use crate::stats::{Statistics, StatsSnapshot};
use fusionbus_core::{spawn, Agent, AgentHandle, Broker};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct SimOutcome {
    pub statistics: StatsSnapshot,
    /// Landmarks in discovery order
    pub landmarks: Vec<Landmark>,
    pub poses: Vec<Pose>,
    pub fault: Option<SensorFault>,
    /// Last frame each camera sent, keyed by camera name
    pub last_camera_frames: BTreeMap<String, StampedDetections>,
    /// Last objects each LiDAR worker tracked, keyed by worker name
    pub last_lidar_frames: BTreeMap<String, Vec<TrackedObject>>,
}

impl SimOutcome {
    /// Returns true if a sensor failure ended the run.
    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }
}

/// One configured simulation.
pub struct Simulation {
    config: SimConfig,
}

struct RunningAgents {
    fusion: AgentHandle<FusionAgent>,
    lidars: Vec<AgentHandle<LidarAgent>>,
    pose: AgentHandle<PoseAgent>,
    cameras: Vec<AgentHandle<CameraAgent>>,
    time: AgentHandle<TimeAgent>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Runs to completion on fresh threads and blocks until every agent exits.
    pub fn run(&self) -> Result<SimOutcome, SimError> {
        let broker = Broker::<SimMessage>::shared();
        let stats = Arc::new(Statistics::new());

        let agents = match self.start(&broker, &stats) {
            Ok(agents) => agents,
            Err(e) => {
                // Release whatever already started
                broker.publish_notification(SimMessage::terminated("runner", Origin::System));
                return Err(e);
            }
        };
        info!(
            agents = broker.registered_agents(),
            cameras = self.config.cameras.len(),
            lidars = self.config.lidar_workers.len(),
            ticks = self.config.duration,
            "Simulation started"
        );

        let outcome = Self::collect(agents, &stats)?;
        info!(
            runtime = outcome.statistics.system_runtime,
            landmarks = outcome.landmarks.len(),
            fault = outcome.is_fault(),
            "Simulation finished"
        );
        Ok(outcome)
    }

    /// Spawns every agent. The clock goes last so that all subscriptions
    /// exist before the first tick.
    fn start(
        &self,
        broker: &Arc<Broker<SimMessage>>,
        stats: &Arc<Statistics>,
    ) -> Result<RunningAgents, SimError> {
        let config = &self.config;
        let database = Arc::new(LidarDatabase::new(config.lidar_data.clone()));

        let fusion = spawn(broker, FusionAgent::new(config.sensor_count(), Arc::clone(stats)))?;
        let lidars = config
            .lidar_workers
            .iter()
            .map(|lidar| {
                let agent = LidarAgent::new(
                    lidar,
                    config.cameras.len(),
                    Arc::clone(&database),
                    Arc::clone(stats),
                );
                spawn(broker, agent)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let pose = spawn(broker, PoseAgent::new(config.poses.clone()))?;
        let cameras = config
            .cameras
            .iter()
            .map(|camera| spawn(broker, CameraAgent::new(camera, Arc::clone(stats))))
            .collect::<Result<Vec<_>, _>>()?;
        let time = spawn(
            broker,
            TimeAgent::new(config.tick_time(), config.duration, Arc::clone(stats)),
        )?;

        Ok(RunningAgents {
            fusion,
            lidars,
            pose,
            cameras,
            time,
        })
    }

    fn collect(agents: RunningAgents, stats: &Statistics) -> Result<SimOutcome, SimError> {
        let mut time = agents.time.join()?;
        time.join_ticker();
        debug!("Clock stopped");

        let cameras = agents
            .cameras
            .into_iter()
            .map(AgentHandle::join)
            .collect::<Result<Vec<_>, _>>()?;
        agents.pose.join()?;
        let lidars = agents
            .lidars
            .into_iter()
            .map(AgentHandle::join)
            .collect::<Result<Vec<_>, _>>()?;
        let fusion = agents.fusion.join()?;

        let fault = fusion
            .fault()
            .cloned()
            .or_else(|| {
                cameras
                    .iter()
                    .find_map(|c| c.fault().map(|e| SensorFault::new(c.name(), e)))
            })
            .or_else(|| {
                lidars
                    .iter()
                    .find_map(|l| l.fault().map(|e| SensorFault::new(l.name(), e)))
            });

        Ok(SimOutcome {
            statistics: stats.snapshot(),
            landmarks: fusion.map().landmarks().to_vec(),
            poses: fusion.map().poses().to_vec(),
            fault,
            last_camera_frames: cameras
                .iter()
                .filter_map(|c| c.last_frame().map(|f| (c.name().to_string(), f.clone())))
                .collect(),
            last_lidar_frames: lidars
                .iter()
                .filter(|l| !l.last_frame().is_empty())
                .map(|l| (l.name().to_string(), l.last_frame().to_vec()))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::ScenarioId;

    fn fast(mut config: SimConfig) -> SimConfig {
        config.tick_time_ms = 2;
        config
    }

    #[test]
    fn test_nominal_run_maps_every_object() {
        let simulation = Simulation::new(fast(ScenarioId::Nominal.config())).unwrap();
        let outcome = simulation.run().unwrap();

        assert!(!outcome.is_fault());
        assert_eq!(outcome.statistics.num_detected_objects, 4);
        assert_eq!(outcome.statistics.num_tracked_objects, 4);
        assert_eq!(outcome.statistics.num_landmarks, 3);

        let mut ids: Vec<_> = outcome.landmarks.iter().map(|l| l.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["Chair_Base_1", "Door", "Wall_1"]);

        // Wall_1 was seen twice and refined into a three-point landmark
        let wall = outcome.landmarks.iter().find(|l| l.id == "Wall_1").unwrap();
        assert_eq!(wall.coordinates.len(), 3);
        assert_eq!(outcome.poses.len(), 8);
    }

    #[test]
    fn test_camera_fault_stops_run() {
        let simulation = Simulation::new(fast(ScenarioId::CameraFault.config())).unwrap();
        let outcome = simulation.run().unwrap();

        assert_eq!(
            outcome.fault,
            Some(SensorFault::new("camera_2", "Camera disconnected"))
        );
        assert!(outcome.statistics.system_runtime < u64::from(simulation.config().duration));
        assert!(!outcome.last_camera_frames.contains_key("camera_2"));
    }

    #[test]
    fn test_sensorless_run_ends_on_pose_source() {
        let config = SimConfig {
            tick_time_ms: 1,
            duration: 100,
            ..SimConfig::default()
        };
        let outcome = Simulation::new(config).unwrap().run().unwrap();
        assert!(!outcome.is_fault());
        assert!(outcome.landmarks.is_empty());
        assert!(outcome.statistics.system_runtime < 100);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SimConfig {
            duration: 0,
            ..SimConfig::default()
        };
        assert!(matches!(
            Simulation::new(config),
            Err(SimError::InvalidConfig(_))
        ));
    }
}
