//! Per-entity state estimator wrapping the (extended) Kalman filter.
//!
//! An estimator owns its state vector and covariance. Before any measurement
//! the state is zero with a very large covariance, so predictions are always
//! defined but carry no confidence.

use crate::{
    ekf::ExtendedKalmanFilter,
    error::{CoreError, Result},
    kf::{CvKfConfig, DMat, DVec, KalmanFilter, KINEMATIC_DIM},
};
use sensor_models::ObservationModel;
use serde::{Deserialize, Serialize};

/// Which rows the estimator carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateLayout {
    /// [x, y, z, vx, vy, vz]
    Kinematic,
    /// [x, y, z, vx, vy, vz, roll, pitch, yaw]
    KinematicAttitude,
}

impl StateLayout {
    pub fn dim(&self) -> usize {
        match self {
            StateLayout::Kinematic => KINEMATIC_DIM,
            StateLayout::KinematicAttitude => KINEMATIC_DIM + 3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub layout: StateLayout,
    /// Default prediction step (s)
    pub dt: f64,
    /// Diagonal of the initial covariance
    pub initial_variance: f64,
    pub kf: CvKfConfig,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self::track()
    }
}

impl EstimatorConfig {
    /// Tracked objects: one prediction per frame.
    pub fn track() -> Self {
        Self {
            layout: StateLayout::Kinematic,
            dt: 1.0,
            initial_variance: 1000.0,
            kf: CvKfConfig::default(),
        }
    }

    /// Platform self-localization at 10 Hz with attitude.
    pub fn platform() -> Self {
        Self {
            layout: StateLayout::KinematicAttitude,
            dt: 0.1,
            ..Self::track()
        }
    }

    /// Obstacles seen by the platform: 10 Hz, kinematic only.
    pub fn obstacle() -> Self {
        Self {
            dt: 0.1,
            ..Self::track()
        }
    }
}

/// One point of a forward projection.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Seconds ahead of the current estimate
    pub t: f64,
    /// Positional 1-σ (m)
    pub sigma: f64,
}

#[derive(Clone, Debug)]
pub struct StateEstimator {
    pub config: EstimatorConfig,
    state: DVec,
    cov: DMat,
    filter: ExtendedKalmanFilter,
    updates: u64,
}

impl StateEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        let n = config.layout.dim();
        Self {
            state: DVec::zeros(n),
            cov: DMat::identity(n, n) * config.initial_variance,
            filter: ExtendedKalmanFilter::new(config.kf.clone()),
            updates: 0,
            config,
        }
    }

    /// Estimator initialised at a known position (and velocity, if any).
    /// The covariance stays at its initial value.
    pub fn seeded(config: EstimatorConfig, position: [f64; 3], velocity: Option<[f64; 3]>) -> Self {
        let mut est = Self::new(config);
        for i in 0..3 {
            est.state[i] = position[i];
            est.state[i + 3] = velocity.map_or(0.0, |v| v[i]);
        }
        est
    }

    pub fn state(&self) -> &DVec {
        &self.state
    }

    pub fn covariance(&self) -> &DMat {
        &self.cov
    }

    /// Number of successful measurement updates.
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    /// Advance by the configured time step.
    pub fn predict(&mut self) {
        self.predict_dt(self.config.dt);
    }

    pub fn predict_dt(&mut self, dt: f64) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }
        let (state, cov) = self.filter.predict(&self.state, &self.cov, dt);
        self.state = state;
        self.cov = cov;
    }

    /// Correct the estimate against `z` observed through `model`.
    ///
    /// On error the estimate is left untouched.
    pub fn update(&mut self, model: &dyn ObservationModel, z: &DVec) -> Result<()> {
        if self.state.len() < model.min_state_dim() {
            return Err(CoreError::MalformedInput(format!(
                "observation needs a {}-state, estimator has {}",
                model.min_state_dim(),
                self.state.len()
            )));
        }
        if z.len() != model.dim() {
            return Err(CoreError::MalformedInput(format!(
                "expected {} measurement values, got {}",
                model.dim(),
                z.len()
            )));
        }
        if z.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::MalformedInput("non-finite measurement".into()));
        }

        let hx = model.apply(&self.state);
        let h = model.h_matrix(&self.state);
        let r = model.r_matrix();
        let res = self.filter.update_ekf(
            &self.state,
            &self.cov,
            z,
            &hx,
            &h,
            &r,
            model.angular_components(),
        )?;
        self.state = res.state;
        self.cov = res.cov;
        self.updates += 1;
        Ok(())
    }

    pub fn position(&self) -> [f64; 3] {
        [self.state[0], self.state[1], self.state[2]]
    }

    pub fn velocity(&self) -> [f64; 3] {
        [self.state[3], self.state[4], self.state[5]]
    }

    /// Roll, pitch, yaw when the layout carries attitude.
    pub fn attitude(&self) -> Option<[f64; 3]> {
        (self.state.len() >= KINEMATIC_DIM + 3)
            .then(|| [self.state[6], self.state[7], self.state[8]])
    }

    /// Per-row 1-σ of the whole state.
    pub fn uncertainty(&self) -> Vec<f64> {
        self.cov.diagonal().iter().map(|v| v.max(0.0).sqrt()).collect()
    }

    /// Mean positional 1-σ.
    pub fn position_sigma(&self) -> f64 {
        position_sigma(&self.cov)
    }

    /// Apply the transition model `floor(horizon / step)` times without
    /// correction. The estimator itself is not modified.
    pub fn project(&self, horizon: f64, step: f64) -> Vec<ProjectedPoint> {
        if !(horizon > 0.0 && step > 0.0 && horizon.is_finite()) {
            return Vec::new();
        }
        let n = (horizon / step).floor() as usize;
        let mut state = self.state.clone();
        let mut cov = self.cov.clone();
        (1..=n)
            .map(|k| {
                let (s, c) = self.filter.predict(&state, &cov, step);
                state = s;
                cov = c;
                ProjectedPoint {
                    x: state[0],
                    y: state[1],
                    z: state[2],
                    t: k as f64 * step,
                    sigma: position_sigma(&cov),
                }
            })
            .collect()
    }
}

fn position_sigma(cov: &DMat) -> f64 {
    ((cov[(0, 0)] + cov[(1, 1)] + cov[(2, 2)]).max(0.0) / 3.0).sqrt()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
