//! Messages exchanged by the simulation agents.

use crate::model::{Pose, StampedDetections, TrackedObject};
use fusionbus_core::Message;
use serde::{Deserialize, Serialize};

/// Who announced a termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    Camera,
    Lidar,
    Pose,
    /// The whole run is over; every agent stops.
    System,
}

/// Every message routed in a simulation run.
#[derive(Debug, Clone, PartialEq)]
pub enum SimMessage {
    // Notifications
    /// Clock tick, starting at 1.
    Tick(u32),
    /// A sensor is done, or (with `Origin::System`) the run is over.
    Terminated { sender: String, origin: Origin },
    /// A sensor failed; the run stops.
    Crashed { sensor: String, error: String },

    // Requests
    /// Camera output, routed to one LiDAR worker.
    DetectObjects {
        camera: String,
        sent_tick: u32,
        detections: StampedDetections,
    },
    /// LiDAR output, routed to the fusion agent.
    TrackedObjects {
        lidar: String,
        objects: Vec<TrackedObject>,
    },
    /// Current robot pose, routed to the fusion agent.
    PoseUpdate(Pose),
}

/// Routing tag of a [`SimMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimKind {
    Tick,
    Terminated,
    Crashed,
    DetectObjects,
    TrackedObjects,
    PoseUpdate,
}

impl SimMessage {
    pub fn terminated(sender: impl Into<String>, origin: Origin) -> Self {
        SimMessage::Terminated {
            sender: sender.into(),
            origin,
        }
    }

    /// Returns true for the run-wide shutdown notification.
    pub fn is_shutdown(&self) -> bool {
        matches!(
            self,
            SimMessage::Terminated {
                origin: Origin::System,
                ..
            }
        )
    }
}

impl Message for SimMessage {
    type Kind = SimKind;

    /// Whether the receiver handled the request.
    type Reply = bool;

    fn kind(&self) -> SimKind {
        match self {
            SimMessage::Tick(_) => SimKind::Tick,
            SimMessage::Terminated { .. } => SimKind::Terminated,
            SimMessage::Crashed { .. } => SimKind::Crashed,
            SimMessage::DetectObjects { .. } => SimKind::DetectObjects,
            SimMessage::TrackedObjects { .. } => SimKind::TrackedObjects,
            SimMessage::PoseUpdate(_) => SimKind::PoseUpdate,
        }
    }
}
