//! Built-in scenarios for running without a configuration file.

use crate::config::{CameraConfig, LidarConfig, SimConfig};
use crate::model::{DetectedObject, Pose, StampedCloudPoints, StampedDetections};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Two cameras, two LiDAR workers, every sensor finishes normally
    Nominal,

    /// Same rig, but the second camera fails mid-run
    CameraFault,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![ScenarioId::Nominal, ScenarioId::CameraFault]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Nominal => "nominal",
            ScenarioId::CameraFault => "camera_fault",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Nominal => "2 cameras, 2 LiDAR workers, 8 poses; builds a 3-landmark map",
            ScenarioId::CameraFault => "camera_2 reports a disconnect at tick 5; run stops with an error report",
        }
    }

    /// Builds the scenario's configuration.
    pub fn config(&self) -> SimConfig {
        let camera_2 = match self {
            ScenarioId::Nominal => frame(3, &[("Door", "Door")]),
            ScenarioId::CameraFault => frame(3, &[(DetectedObject::FAULT_ID, "Camera disconnected")]),
        };

        SimConfig {
            tick_time_ms: 10,
            duration: 50,
            cameras: vec![
                CameraConfig {
                    id: 1,
                    frequency: 1,
                    detections: vec![
                        frame(2, &[("Wall_1", "Wall"), ("Chair_Base_1", "Chair Base")]),
                        frame(4, &[("Wall_1", "Wall")]),
                    ],
                },
                CameraConfig {
                    id: 2,
                    frequency: 2,
                    detections: vec![camera_2],
                },
            ],
            lidar_workers: vec![
                LidarConfig { id: 1, frequency: 1 },
                LidarConfig { id: 2, frequency: 2 },
            ],
            lidar_data: vec![
                scan("Wall_1", 2, &[[0.5, -2.1, 0.1], [0.8, -2.3, 0.2]]),
                scan("Chair_Base_1", 2, &[[1.2, 0.3, 0.1]]),
                scan("Door", 3, &[[3.1, 1.0, 0.0], [3.2, 1.4, 0.0]]),
                scan("Wall_1", 4, &[[0.4, -2.0, 0.1], [0.9, -2.2, 0.2], [1.3, -2.4, 0.2]]),
            ],
            poses: (1..=8)
                .map(|t| Pose {
                    time: t,
                    x: 0.25 * f64::from(t),
                    y: 0.1 * f64::from(t),
                    yaw: 5.0 * f64::from(t),
                })
                .collect(),
        }
    }
}

fn frame(time: u32, objects: &[(&str, &str)]) -> StampedDetections {
    StampedDetections {
        time,
        detected_objects: objects
            .iter()
            .map(|(id, description)| DetectedObject::new(*id, *description))
            .collect(),
    }
}

fn scan(id: &str, time: u32, points: &[[f64; 3]]) -> StampedCloudPoints {
    StampedCloudPoints {
        id: id.to_string(),
        time,
        cloud_points: points.iter().map(|p| p.to_vec()).collect(),
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nominal" => Ok(ScenarioId::Nominal),
            "camera_fault" | "camerafault" | "fault" => Ok(ScenarioId::CameraFault),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
