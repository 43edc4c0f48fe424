//! Domain values exchanged between the simulated sensors and the fusion agent.

use serde::{Deserialize, Serialize};

/// An object reported by a camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub id: String,
    pub description: String,
}

impl DetectedObject {
    /// Object id a camera uses to report its own failure.
    pub const FAULT_ID: &'static str = "ERROR";

    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }

    /// Returns true if this entry signals a sensor fault.
    pub fn is_fault(&self) -> bool {
        self.id == Self::FAULT_ID
    }
}

/// All objects one camera saw at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedDetections {
    pub time: u32,
    pub detected_objects: Vec<DetectedObject>,
}

/// A 2D point. Local (sensor) or global (map) frame depending on context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CloudPoint {
    pub x: f64,
    pub y: f64,
}

impl CloudPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Raw LiDAR scan of one object at one tick.
///
/// Points are `[x, y, z, ...]` rows; only `x` and `y` are used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedCloudPoints {
    pub id: String,
    pub time: u32,
    pub cloud_points: Vec<Vec<f64>>,
}

impl StampedCloudPoints {
    /// Projects the scan onto the ground plane, skipping malformed rows.
    pub fn to_cloud_points(&self) -> Vec<CloudPoint> {
        self.cloud_points
            .iter()
            .filter_map(|row| match row.as_slice() {
                [x, y, ..] => Some(CloudPoint::new(*x, *y)),
                _ => None,
            })
            .collect()
    }
}

/// A detected object enriched with LiDAR geometry, in the sensor frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub id: String,
    pub time: u32,
    pub description: String,
    pub coordinates: Vec<CloudPoint>,
}

/// Robot pose at one tick. `yaw` is in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub time: u32,
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
}

/// An object placed on the global map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub id: String,
    pub description: String,
    pub coordinates: Vec<CloudPoint>,
}

/// A sensor failure that ended the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorFault {
    pub sensor: String,
    pub error: String,
}

impl SensorFault {
    pub fn new(sensor: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            sensor: sensor.into(),
            error: error.into(),
        }
    }
}
