//! Simulation configuration, loaded from a single JSON document.

use crate::error::SimError;
use crate::model::{Pose, StampedCloudPoints, StampedDetections};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// One camera and everything it will report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: u32,
    /// Ticks between capturing a frame and sending it.
    pub frequency: u32,
    #[serde(default)]
    pub detections: Vec<StampedDetections>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            id: 1,
            frequency: 1,
            detections: Vec::new(),
        }
    }
}

impl CameraConfig {
    pub fn name(&self) -> String {
        format!("camera_{}", self.id)
    }
}

/// One LiDAR worker of the tracking pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LidarConfig {
    pub id: u32,
    /// Ticks a detection must age before the worker can track it.
    pub frequency: u32,
}

impl Default for LidarConfig {
    fn default() -> Self {
        Self { id: 1, frequency: 1 }
    }
}

impl LidarConfig {
    pub fn name(&self) -> String {
        format!("lidar_{}", self.id)
    }
}

/// Complete description of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Wall-clock length of one tick in milliseconds
    pub tick_time_ms: u64,

    /// Number of ticks after which the run is cut off
    pub duration: u32,

    pub cameras: Vec<CameraConfig>,
    pub lidar_workers: Vec<LidarConfig>,

    /// Scans shared by every LiDAR worker
    pub lidar_data: Vec<StampedCloudPoints>,

    pub poses: Vec<Pose>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_time_ms: 10,
            duration: 30,
            cameras: Vec::new(),
            lidar_workers: Vec::new(),
            lidar_data: Vec::new(),
            poses: Vec::new(),
        }
    }
}

impl SimConfig {
    /// Reads and validates a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))?;
        Self::from_json(&text)
    }

    /// Parses and validates a configuration document.
    pub fn from_json(text: &str) -> Result<Self, SimError> {
        let config: SimConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn tick_time(&self) -> Duration {
        Duration::from_millis(self.tick_time_ms)
    }

    /// Number of sensors whose termination ends the run: every camera,
    /// every LiDAR worker and the pose source.
    pub fn sensor_count(&self) -> usize {
        self.cameras.len() + self.lidar_workers.len() + 1
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.duration == 0 {
            return Err(SimError::invalid_config("duration must be at least one tick"));
        }
        if !self.cameras.is_empty() && self.lidar_workers.is_empty() {
            return Err(SimError::invalid_config(
                "cameras are configured but no LiDAR worker can track their detections",
            ));
        }

        let mut seen = HashSet::new();
        if let Some(camera) = self.cameras.iter().find(|c| !seen.insert(c.id)) {
            return Err(SimError::invalid_config(format!(
                "duplicate camera id {}",
                camera.id
            )));
        }
        seen.clear();
        if let Some(lidar) = self.lidar_workers.iter().find(|l| !seen.insert(l.id)) {
            return Err(SimError::invalid_config(format!(
                "duplicate LiDAR worker id {}",
                lidar.id
            )));
        }
        Ok(())
    }
}
