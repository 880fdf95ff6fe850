//! Platform self-localization: fuses GPS, IMU and LiDAR into one pose.
//!
//! GPS fixes are expressed in a local east-north-up frame anchored at the
//! first fix. The platform estimator carries attitude rows so IMU readings
//! correct orientation without touching position.

use crate::{
    error::{CoreError, Result},
    estimator::{EstimatorConfig, ProjectedPoint, StateEstimator},
    kf::DVec,
};
use sensor_models::{
    AttitudeObservation, GeoOrigin, GpsFix, ImuSample, LidarScan, PositionObservation,
    PositionVelocityObservation, SensorPayload,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub platform: EstimatorConfig,
    pub obstacle: EstimatorConfig,
    pub gps: PositionObservation,
    pub imu: AttitudeObservation,
    /// Radar-style observation used to refine obstacle estimators
    pub obstacle_observation: PositionVelocityObservation,
    /// LiDAR returns closer than this become obstacles (m)
    pub obstacle_range: f64,
    /// Spacing of obstacle path predictions (s)
    pub obstacle_step: f64,
    pub pose_history_len: usize,
    /// Obstacle estimators kept; the least recently used is dropped first
    pub max_obstacle_estimators: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            platform: EstimatorConfig::platform(),
            obstacle: EstimatorConfig::obstacle(),
            gps: PositionObservation::gps(),
            imu: AttitudeObservation::imu(),
            obstacle_observation: PositionVelocityObservation::new(1.0, 0.5),
            obstacle_range: 10.0,
            obstacle_step: 0.5,
            pose_history_len: 100,
            max_obstacle_estimators: 64,
        }
    }
}

/// Snapshot of the fused platform state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusedPose {
    pub timestamp: f64,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub attitude: [f64; 3],
    pub acceleration: [f64; 3],
    /// Positional 1-σ per axis
    pub uncertainty: [f64; 3],
}

/// Obstacle derived from a near LiDAR return, in local coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub position: [f64; 3],
    pub range: f64,
    pub azimuth: f64,
}

pub struct PlatformFusion {
    pub config: FusionConfig,
    estimator: StateEstimator,
    origin: Option<GeoOrigin>,
    acceleration: [f64; 3],
    obstacles: Vec<Obstacle>,
    poses: VecDeque<FusedPose>,
    /// Estimator per obstacle id with the call count of its last use
    obstacle_estimators: HashMap<u64, (StateEstimator, u64)>,
    obstacle_calls: u64,
}

impl PlatformFusion {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            estimator: StateEstimator::new(config.platform.clone()),
            poses: VecDeque::with_capacity(config.pose_history_len),
            config,
            origin: None,
            acceleration: [0.0; 3],
            obstacles: Vec::new(),
            obstacle_estimators: HashMap::new(),
            obstacle_calls: 0,
        }
    }

    /// Predict one platform step, then apply `payload`.
    ///
    /// Radar target lists carry no platform state and are ignored here.
    pub fn ingest(&mut self, payload: &SensorPayload, timestamp: f64) -> Result<()> {
        payload.validate()?;
        self.estimator.predict();
        match payload {
            SensorPayload::Gps(fix) => self.apply_gps(fix)?,
            SensorPayload::Imu(sample) => self.apply_imu(sample)?,
            SensorPayload::Lidar(scan) => self.apply_lidar(scan),
            SensorPayload::Radar(_) => return Ok(()),
        }
        self.record_pose(timestamp);
        Ok(())
    }

    fn apply_gps(&mut self, fix: &GpsFix) -> Result<()> {
        let origin = *self.origin.get_or_insert_with(|| GeoOrigin::from_fix(fix));
        let local = origin.to_local(fix);
        self.estimator
            .update(&self.config.gps, &DVec::from_row_slice(&local))
    }

    fn apply_imu(&mut self, sample: &ImuSample) -> Result<()> {
        self.acceleration = sample.acceleration();
        self.estimator
            .update(&self.config.imu, &DVec::from_row_slice(&sample.attitude()))
    }

    fn apply_lidar(&mut self, scan: &LidarScan) {
        let [px, py, pz] = self.estimator.position();
        self.obstacles = scan
            .near_returns(self.config.obstacle_range)
            .into_iter()
            .map(|ret| Obstacle {
                position: [
                    px + ret.range * ret.azimuth.cos(),
                    py + ret.range * ret.azimuth.sin(),
                    pz,
                ],
                range: ret.range,
                azimuth: ret.azimuth,
            })
            .collect();
        debug!(obstacles = self.obstacles.len(), "lidar scan fused");
    }

    fn record_pose(&mut self, timestamp: f64) {
        if self.poses.len() >= self.config.pose_history_len {
            self.poses.pop_front();
        }
        let pose = self.current_pose(timestamp);
        self.poses.push_back(pose);
    }

    fn current_pose(&self, timestamp: f64) -> FusedPose {
        let sigma = self.estimator.uncertainty();
        FusedPose {
            timestamp,
            position: self.estimator.position(),
            velocity: self.estimator.velocity(),
            attitude: self.estimator.attitude().unwrap_or([0.0; 3]),
            acceleration: self.acceleration,
            uncertainty: [sigma[0], sigma[1], sigma[2]],
        }
    }

    /// Latest fused pose, if any reading has been fused.
    pub fn pose(&self) -> Option<&FusedPose> {
        self.poses.back()
    }

    pub fn pose_history(&self) -> impl Iterator<Item = &FusedPose> {
        self.poses.iter()
    }

    /// Platform position once at least one fix has been fused.
    pub fn position(&self) -> Option<[f64; 3]> {
        self.origin.map(|_| self.estimator.position())
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    /// Track an obstacle by id and project its path `horizon` seconds ahead.
    ///
    /// The first call for an id seeds its estimator; later calls predict and
    /// correct it before projecting.
    pub fn predict_obstacle_path(
        &mut self,
        id: u64,
        position: [f64; 3],
        velocity: [f64; 3],
        horizon: f64,
    ) -> Result<Vec<ProjectedPoint>> {
        if position.iter().chain(&velocity).any(|v| !v.is_finite()) {
            return Err(CoreError::MalformedInput(format!(
                "obstacle {id} has non-finite kinematics"
            )));
        }
        let step = self.config.obstacle_step;
        self.obstacle_calls += 1;
        let call = self.obstacle_calls;
        if let Some((est, last_used)) = self.obstacle_estimators.get_mut(&id) {
            *last_used = call;
            est.predict();
            let z = DVec::from_iterator(6, position.iter().chain(&velocity).copied());
            est.update(&self.config.obstacle_observation, &z)?;
            return Ok(est.project(horizon, step));
        }
        self.evict_obstacles(self.config.max_obstacle_estimators.saturating_sub(1));
        let est = StateEstimator::seeded(self.config.obstacle.clone(), position, Some(velocity));
        let path = est.project(horizon, step);
        self.obstacle_estimators.insert(id, (est, call));
        Ok(path)
    }

    /// Drop least recently used obstacle estimators until at most `keep` remain.
    fn evict_obstacles(&mut self, keep: usize) {
        while self.obstacle_estimators.len() > keep {
            let Some(oldest) = self
                .obstacle_estimators
                .iter()
                .min_by_key(|(_, (_, last_used))| *last_used)
                .map(|(id, _)| *id)
            else {
                break;
            };
            self.obstacle_estimators.remove(&oldest);
            debug!(obstacle = oldest, "obstacle estimator evicted");
        }
    }

    pub fn tracked_obstacles(&self) -> usize {
        self.obstacle_estimators.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn gps(lat: f64, lon: f64, alt: f64) -> SensorPayload {
        SensorPayload::Gps(GpsFix { lat, lon, alt })
    }

    #[test]
    fn first_fix_anchors_local_frame() {
        let mut fusion = PlatformFusion::new(FusionConfig::default());
        assert!(fusion.pose().is_none());
        assert!(fusion.position().is_none());

        fusion.ingest(&gps(48.0, 11.0, 500.0), 0.0).unwrap();
        let p = fusion.position().unwrap();
        assert_abs_diff_eq!(p[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p[1], 0.0, epsilon = 1e-6);

        fusion.ingest(&gps(48.001, 11.0, 500.0), 0.1).unwrap();
        let p = fusion.position().unwrap();
        assert!(p[1] > 40.0, "moved north, got {p:?}");
    }

    #[test]
    fn imu_updates_attitude_and_acceleration() {
        let mut fusion = PlatformFusion::new(FusionConfig::default());
        let imu = ImuSample::from_slice(&[0.0, 0.0, 0.5, 0.1, 0.2, 9.8]).unwrap();
        fusion.ingest(&SensorPayload::Imu(imu), 1.0).unwrap();
        let pose = fusion.pose().unwrap();
        assert_abs_diff_eq!(pose.attitude[2], 0.5, epsilon = 0.01);
        assert_eq!(pose.acceleration, [0.1, 0.2, 9.8]);
        // Attitude does not leak into position
        assert!(fusion.position().is_none());
    }

    #[test]
    fn near_lidar_returns_become_obstacles() {
        let mut fusion = PlatformFusion::new(FusionConfig::default());
        let scan = LidarScan {
            distances: vec![5.0, 25.0],
            angles: vec![std::f64::consts::FRAC_PI_2, 0.0],
            intensities: vec![],
        };
        fusion.ingest(&SensorPayload::Lidar(scan), 0.0).unwrap();
        let obstacles = fusion.obstacles();
        assert_eq!(obstacles.len(), 1);
        assert_abs_diff_eq!(obstacles[0].position[1], 5.0, epsilon = 1e-9);
    }

    #[test]
    fn pose_history_is_bounded() {
        let config = FusionConfig {
            pose_history_len: 3,
            ..Default::default()
        };
        let mut fusion = PlatformFusion::new(config);
        for i in 0..5 {
            fusion.ingest(&gps(10.0, 10.0, i as f64), i as f64).unwrap();
        }
        assert_eq!(fusion.pose_history().count(), 3);
        assert_abs_diff_eq!(fusion.pose().unwrap().timestamp, 4.0);
    }

    #[test]
    fn obstacle_path_is_projected_at_half_second_steps() {
        let mut fusion = PlatformFusion::new(FusionConfig::default());
        let path = fusion
            .predict_obstacle_path(7, [0.0, 0.0, 0.0], [2.0, 0.0, 0.0], 2.0)
            .unwrap();
        assert_eq!(path.len(), 4);
        assert_abs_diff_eq!(path[3].t, 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(path[3].x, 4.0, epsilon = 1e-9);

        let again = fusion
            .predict_obstacle_path(7, [0.2, 0.0, 0.0], [2.0, 0.0, 0.0], 1.0)
            .unwrap();
        assert_eq!(again.len(), 2);
        assert!(fusion
            .predict_obstacle_path(8, [f64::NAN, 0.0, 0.0], [0.0; 3], 1.0)
            .is_err());
    }

    #[test]
    fn obstacle_estimators_are_capped_by_recent_use() {
        let config = FusionConfig {
            max_obstacle_estimators: 3,
            ..Default::default()
        };
        let mut fusion = PlatformFusion::new(config);
        for id in 0..3 {
            fusion
                .predict_obstacle_path(id, [id as f64, 0.0, 0.0], [1.0, 0.0, 0.0], 1.0)
                .unwrap();
        }
        // Refresh 0 so 1 becomes the oldest
        fusion
            .predict_obstacle_path(0, [0.1, 0.0, 0.0], [1.0, 0.0, 0.0], 1.0)
            .unwrap();
        for id in 3..10 {
            fusion
                .predict_obstacle_path(id, [id as f64, 0.0, 0.0], [1.0, 0.0, 0.0], 1.0)
                .unwrap();
            assert!(fusion.tracked_obstacles() <= 3);
        }
        assert_eq!(fusion.tracked_obstacles(), 3);
        assert!(fusion.obstacle_estimators.contains_key(&9));
        assert!(!fusion.obstacle_estimators.contains_key(&1));
    }
}
