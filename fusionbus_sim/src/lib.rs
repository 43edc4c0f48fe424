//! fusionbus Sim - Sensor-fusion simulation on the fusionbus broker
//!
//! A small robot rig built from independent agents, each on its own thread:
//!
//! - **TimeAgent** broadcasts clock ticks
//! - **CameraAgent**s replay recorded detections
//! - **LidarAgent**s form a worker pool that attaches point clouds to them
//! - **PoseAgent** reports where the robot is
//! - **FusionAgent** places everything on a global map and ends the run
//!
//! Agents only talk through the broker: notifications for ticks and
//! lifecycle events, requests for sensor data.

pub mod agents;
pub mod config;
pub mod error;
pub mod exporter;
pub mod fusion;
pub mod messages;
pub mod model;
pub mod runner;
pub mod scenarios;
pub mod stats;

pub use config::{CameraConfig, LidarConfig, SimConfig};
pub use error::SimError;
pub use exporter::{ErrorReport, OutputReport, ValidReport};
pub use fusion::FusionMap;
pub use messages::{Origin, SimKind, SimMessage};
pub use runner::{SimOutcome, Simulation};
pub use scenarios::ScenarioId;
pub use stats::{Statistics, StatsSnapshot};
