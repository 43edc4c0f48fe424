//! Global map built from tracked objects and robot poses.

use crate::model::{CloudPoint, Landmark, Pose, TrackedObject};
use nalgebra::{Rotation2, Vector2};
use std::collections::HashMap;

/// Landmarks in the global frame plus the pose history used to place them.
#[derive(Debug, Default)]
pub struct FusionMap {
    landmarks: Vec<Landmark>,
    index: HashMap<String, usize>,
    poses: Vec<Pose>,
}

impl FusionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pose. A later pose for the same tick replaces the earlier one.
    pub fn add_pose(&mut self, pose: Pose) {
        match self.poses.iter_mut().find(|p| p.time == pose.time) {
            Some(existing) => *existing = pose,
            None => self.poses.push(pose),
        }
    }

    pub fn pose_at(&self, time: u32) -> Option<Pose> {
        self.poses.iter().find(|p| p.time == time).copied()
    }

    /// Moves sensor-frame coordinates into the global frame.
    pub fn transform(coordinates: &[CloudPoint], pose: &Pose) -> Vec<CloudPoint> {
        let rotation = Rotation2::new(pose.yaw.to_radians());
        let translation = Vector2::new(pose.x, pose.y);
        coordinates
            .iter()
            .map(|p| {
                let global = rotation * Vector2::new(p.x, p.y) + translation;
                CloudPoint::new(global.x, global.y)
            })
            .collect()
    }

    /// Places `object` on the map using `pose`.
    ///
    /// Returns true if the object became a new landmark. A known landmark is
    /// refined by averaging the overlapping points; the longer tail is kept.
    pub fn integrate(&mut self, object: &TrackedObject, pose: &Pose) -> bool {
        let global = Self::transform(&object.coordinates, pose);

        if let Some(&slot) = self.index.get(&object.id) {
            let landmark = &mut self.landmarks[slot];
            landmark.coordinates = merge(&landmark.coordinates, &global);
            return false;
        }

        self.index.insert(object.id.clone(), self.landmarks.len());
        self.landmarks.push(Landmark {
            id: object.id.clone(),
            description: object.description.clone(),
            coordinates: global,
        });
        true
    }

    /// Landmarks in discovery order.
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    pub fn landmark(&self, id: &str) -> Option<&Landmark> {
        self.index.get(id).map(|&slot| &self.landmarks[slot])
    }

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }
}

fn merge(old: &[CloudPoint], new: &[CloudPoint]) -> Vec<CloudPoint> {
    let overlap = old.len().min(new.len());
    let longer = if old.len() >= new.len() { old } else { new };

    old.iter()
        .zip(new)
        .map(|(a, b)| CloudPoint::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0))
        .chain(longer[overlap..].iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    fn pose(time: u32, x: f64, y: f64, yaw: f64) -> Pose {
        Pose { time, x, y, yaw }
    }

    fn tracked(id: &str, points: &[(f64, f64)]) -> TrackedObject {
        TrackedObject {
            id: id.to_string(),
            time: 1,
            description: format!("{id} description"),
            coordinates: points.iter().map(|&(x, y)| CloudPoint::new(x, y)).collect(),
        }
    }

    fn assert_close(actual: &CloudPoint, x: f64, y: f64) {
        assert!(
            (actual.x - x).abs() < EPS && (actual.y - y).abs() < EPS,
            "expected ({x}, {y}), got ({}, {})",
            actual.x,
            actual.y
        );
    }

    #[test]
    fn test_transform_rotates_then_translates() {
        let points = [CloudPoint::new(1.0, 0.0)];
        let global = FusionMap::transform(&points, &pose(1, 2.0, 3.0, 90.0));
        assert_close(&global[0], 2.0, 4.0);

        let global = FusionMap::transform(&points, &pose(1, 0.0, 0.0, 180.0));
        assert_close(&global[0], -1.0, 0.0);
    }

    #[test]
    fn test_integrate_new_then_refine() {
        let mut map = FusionMap::new();
        let origin = pose(1, 0.0, 0.0, 0.0);

        assert!(map.integrate(&tracked("Wall_1", &[(0.0, 0.0), (2.0, 2.0)]), &origin));
        assert!(!map.integrate(
            &tracked("Wall_1", &[(2.0, 0.0), (4.0, 4.0), (6.0, 6.0)]),
            &origin
        ));

        let wall = map.landmark("Wall_1").unwrap();
        assert_eq!(wall.description, "Wall_1 description");
        assert_eq!(wall.coordinates.len(), 3);
        assert_close(&wall.coordinates[0], 1.0, 0.0);
        assert_close(&wall.coordinates[1], 3.0, 3.0);
        assert_close(&wall.coordinates[2], 6.0, 6.0);
    }

    #[test]
    fn test_landmarks_keep_discovery_order() {
        let mut map = FusionMap::new();
        let origin = pose(1, 0.0, 0.0, 0.0);
        map.integrate(&tracked("Door", &[(1.0, 1.0)]), &origin);
        map.integrate(&tracked("Chair", &[(2.0, 2.0)]), &origin);
        map.integrate(&tracked("Door", &[(3.0, 3.0)]), &origin);

        let ids: Vec<_> = map.landmarks().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["Door", "Chair"]);
    }

    #[test]
    fn test_pose_lookup() {
        let mut map = FusionMap::new();
        map.add_pose(pose(1, 0.0, 0.0, 0.0));
        map.add_pose(pose(2, 1.0, 0.0, 0.0));
        map.add_pose(pose(2, 5.0, 0.0, 0.0));

        assert_eq!(map.poses().len(), 2);
        assert_eq!(map.pose_at(2).map(|p| p.x), Some(5.0));
        assert!(map.pose_at(3).is_none());
    }

    proptest! {
        #[test]
        fn prop_transform_preserves_distance_to_robot(
            x in -100.0f64..100.0,
            y in -100.0f64..100.0,
            px in -50.0f64..50.0,
            py in -50.0f64..50.0,
            yaw in -360.0f64..360.0,
        ) {
            let robot = pose(1, px, py, yaw);
            let global = FusionMap::transform(&[CloudPoint::new(x, y)], &robot);
            let local_dist = (x * x + y * y).sqrt();
            let global_dist = ((global[0].x - px).powi(2) + (global[0].y - py).powi(2)).sqrt();
            prop_assert!((local_dist - global_dist).abs() < 1e-6);
        }
    }
}
