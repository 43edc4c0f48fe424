//! Run-wide counters shared by all agents.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated concurrently from agent threads.
#[derive(Debug, Default)]
pub struct Statistics {
    system_runtime: AtomicU64,
    detected_objects: AtomicU64,
    tracked_objects: AtomicU64,
    landmarks: AtomicU64,
}

/// Point-in-time copy of [`Statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub system_runtime: u64,
    pub num_detected_objects: u64,
    pub num_tracked_objects: u64,
    pub num_landmarks: u64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one elapsed tick.
    pub fn record_tick(&self) {
        self.system_runtime.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_detected(&self, count: usize) {
        self.detected_objects.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_tracked(&self, count: usize) {
        self.tracked_objects.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_landmark(&self) {
        self.landmarks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            system_runtime: self.system_runtime.load(Ordering::Relaxed),
            num_detected_objects: self.detected_objects.load(Ordering::Relaxed),
            num_tracked_objects: self.tracked_objects.load(Ordering::Relaxed),
            num_landmarks: self.landmarks.load(Ordering::Relaxed),
        }
    }
}
