//! JSON report of a finished run.

use crate::error::SimError;
use crate::model::{Landmark, Pose, StampedDetections, TrackedObject};
use crate::runner::SimOutcome;
use crate::stats::StatsSnapshot;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Report of a run in which every sensor finished.
#[derive(Debug, Clone, Serialize)]
pub struct ValidReport {
    #[serde(flatten)]
    pub statistics: StatsSnapshot,
    pub landmarks: Vec<Landmark>,
}

/// Report of a run stopped by a sensor failure: the state each sensor
/// last reported, for post-mortem.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub error: String,
    pub faulty_sensor: String,
    pub last_camera_frames: BTreeMap<String, StampedDetections>,
    pub last_lidar_frames: BTreeMap<String, Vec<TrackedObject>>,
    pub poses: Vec<Pose>,
    pub statistics: StatsSnapshot,
}

/// What gets written to the output file.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutputReport {
    Valid(ValidReport),
    Error(ErrorReport),
}

impl OutputReport {
    pub fn from_outcome(outcome: &SimOutcome) -> Self {
        match &outcome.fault {
            None => OutputReport::Valid(ValidReport {
                statistics: outcome.statistics,
                landmarks: outcome.landmarks.clone(),
            }),
            Some(fault) => OutputReport::Error(ErrorReport {
                error: fault.error.clone(),
                faulty_sensor: fault.sensor.clone(),
                last_camera_frames: outcome.last_camera_frames.clone(),
                last_lidar_frames: outcome.last_lidar_frames.clone(),
                poses: outcome.poses.clone(),
                statistics: outcome.statistics,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, OutputReport::Error(_))
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path).map_err(|e| SimError::io(path, e))?;
        file.write_all(json.as_bytes())
            .map_err(|e| SimError::io(path, e))?;
        Ok(())
    }
}
