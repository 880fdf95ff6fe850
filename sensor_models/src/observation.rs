//! Observation models: H matrix, R matrix, h(x), Jacobians.
//!
//! Every model observes a subset of the estimator state rows. The state
//! layout is shared with the estimator:
//!
//! | rows  | meaning                 |
//! |-------|-------------------------|
//! | 0..3  | position x, y, z        |
//! | 3..6  | velocity vx, vy, vz     |
//! | 6..9  | attitude roll, pitch, yaw (platform layout only) |
//!
//! # Measurement types supported
//! - **Position** (GPS, LiDAR centroid): z = [x, y, z], constant H
//! - **Position + velocity** (radar target): z = [x, y, z, vx, vy, vz]
//! - **Attitude** (IMU): z = [roll, pitch, yaw]
//! - **Polar 2D** (LiDAR return): z = [range, azimuth], H is the Jacobian at x̂

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

pub type DMat = DMatrix<f64>;
pub type DVec = DVector<f64>;

/// Trait for a sensor observation model over a state of arbitrary length.
pub trait ObservationModel {
    /// Length of the observation vector.
    fn dim(&self) -> usize;
    /// Smallest state length this model can observe.
    fn min_state_dim(&self) -> usize;
    /// Observation matrix H (linearised at `state` for nonlinear models).
    fn h_matrix(&self, state: &DVec) -> DMat;
    /// Measurement noise covariance R.
    fn r_matrix(&self) -> DMat;
    /// Map state to expected measurement h(x).
    fn apply(&self, state: &DVec) -> DVec;
    /// Observation components holding angles (innovation is wrapped to ±π).
    fn angular_components(&self) -> &[usize] {
        &[]
    }
}

/// Build a `rows.len() × n` matrix selecting `rows` out of an `n`-state.
pub fn selection_matrix(rows: &[usize], n: usize) -> DMat {
    let mut h = DMat::zeros(rows.len(), n);
    for (i, &row) in rows.iter().enumerate() {
        h[(i, row)] = 1.0;
    }
    h
}

fn diagonal_variance(sigmas: &[f64]) -> DMat {
    DMatrix::from_diagonal(&DVector::from_iterator(
        sigmas.len(),
        sigmas.iter().map(|s| s * s),
    ))
}

fn pick(state: &DVec, rows: &[usize]) -> DVec {
    DVector::from_iterator(rows.len(), rows.iter().map(|&r| state[r]))
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

const POSITION_ROWS: [usize; 3] = [0, 1, 2];

/// Cartesian position observation (GPS fix in local metres, LiDAR centroid).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PositionObservation {
    /// Std deviation per axis (x, y, z)
    pub sigma: [f64; 3],
}

impl PositionObservation {
    pub fn new(sigma: [f64; 3]) -> Self {
        Self { sigma }
    }

    /// Consumer-grade GPS: 5 m horizontal, 10 m vertical.
    pub fn gps() -> Self {
        Self::new([5.0, 5.0, 10.0])
    }
}

impl ObservationModel for PositionObservation {
    fn dim(&self) -> usize {
        3
    }

    fn min_state_dim(&self) -> usize {
        6
    }

    fn h_matrix(&self, state: &DVec) -> DMat {
        selection_matrix(&POSITION_ROWS, state.len())
    }

    fn r_matrix(&self) -> DMat {
        diagonal_variance(&self.sigma)
    }

    fn apply(&self, state: &DVec) -> DVec {
        pick(state, &POSITION_ROWS)
    }
}

// ---------------------------------------------------------------------------
// Position + velocity
// ---------------------------------------------------------------------------

const KINEMATIC_ROWS: [usize; 6] = [0, 1, 2, 3, 4, 5];

/// Radar target report: position and Doppler-derived velocity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PositionVelocityObservation {
    pub sigma_pos: f64,
    pub sigma_vel: f64,
}

impl PositionVelocityObservation {
    pub fn new(sigma_pos: f64, sigma_vel: f64) -> Self {
        Self {
            sigma_pos,
            sigma_vel,
        }
    }
}

impl ObservationModel for PositionVelocityObservation {
    fn dim(&self) -> usize {
        6
    }

    fn min_state_dim(&self) -> usize {
        6
    }

    fn h_matrix(&self, state: &DVec) -> DMat {
        selection_matrix(&KINEMATIC_ROWS, state.len())
    }

    fn r_matrix(&self) -> DMat {
        let p = self.sigma_pos;
        let v = self.sigma_vel;
        diagonal_variance(&[p, p, p, v, v, v])
    }

    fn apply(&self, state: &DVec) -> DVec {
        pick(state, &KINEMATIC_ROWS)
    }
}

// ---------------------------------------------------------------------------
// Attitude
// ---------------------------------------------------------------------------

const ATTITUDE_ROWS: [usize; 3] = [6, 7, 8];
const ATTITUDE_ANGLES: [usize; 3] = [0, 1, 2];

/// IMU attitude observation: roll, pitch, yaw (radians).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttitudeObservation {
    pub sigma: [f64; 3],
}

impl AttitudeObservation {
    pub fn new(sigma: [f64; 3]) -> Self {
        Self { sigma }
    }

    /// Typical MEMS IMU: 0.1 rad roll/pitch, 0.2 rad yaw.
    pub fn imu() -> Self {
        Self::new([0.1, 0.1, 0.2])
    }
}

impl ObservationModel for AttitudeObservation {
    fn dim(&self) -> usize {
        3
    }

    fn min_state_dim(&self) -> usize {
        9
    }

    fn h_matrix(&self, state: &DVec) -> DMat {
        selection_matrix(&ATTITUDE_ROWS, state.len())
    }

    fn r_matrix(&self) -> DMat {
        diagonal_variance(&self.sigma)
    }

    fn apply(&self, state: &DVec) -> DVec {
        pick(state, &ATTITUDE_ROWS)
    }

    fn angular_components(&self) -> &[usize] {
        &ATTITUDE_ANGLES
    }
}

// ---------------------------------------------------------------------------
// Polar 2D (LiDAR return: range + azimuth)
// ---------------------------------------------------------------------------

const POLAR_ANGLES: [usize; 1] = [1];

/// Polar observation from a sensor at `sensor_pos`.
/// z = [range, azimuth], azimuth measured counter-clockwise from +x.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolarObservation {
    /// Sensor position in the local frame (x, y)
    pub sensor_pos: [f64; 2],
    /// Range noise std dev (metres)
    pub sigma_r: f64,
    /// Azimuth noise std dev (radians)
    pub sigma_az: f64,
}

impl PolarObservation {
    pub fn new(sensor_pos: [f64; 2], sigma_r: f64, sigma_az: f64) -> Self {
        Self {
            sensor_pos,
            sigma_r,
            sigma_az,
        }
    }

    /// Convert polar [range, az] to cartesian [x, y] in the local frame.
    pub fn polar_to_cartesian(&self, range: f64, azimuth: f64) -> (f64, f64) {
        let x = self.sensor_pos[0] + range * azimuth.cos();
        let y = self.sensor_pos[1] + range * azimuth.sin();
        (x, y)
    }

    /// Compute [range, azimuth] from a state vector.
    pub fn state_to_polar(&self, state: &DVec) -> (f64, f64) {
        let dx = state[0] - self.sensor_pos[0];
        let dy = state[1] - self.sensor_pos[1];
        let range = (dx * dx + dy * dy).sqrt();
        let az = dy.atan2(dx);
        (range, az)
    }
}

impl ObservationModel for PolarObservation {
    fn dim(&self) -> usize {
        2
    }

    fn min_state_dim(&self) -> usize {
        6
    }

    fn h_matrix(&self, state: &DVec) -> DMat {
        let dx = state[0] - self.sensor_pos[0];
        let dy = state[1] - self.sensor_pos[1];
        let r2 = (dx * dx + dy * dy).max(1e-6);
        let r = r2.sqrt();

        // ∂range/∂px = dx/r,   ∂range/∂py = dy/r
        // ∂az/∂px = -dy/r²,    ∂az/∂py = dx/r²
        let mut h = DMat::zeros(2, state.len());
        h[(0, 0)] = dx / r;
        h[(0, 1)] = dy / r;
        h[(1, 0)] = -dy / r2;
        h[(1, 1)] = dx / r2;
        h
    }

    fn r_matrix(&self) -> DMat {
        diagonal_variance(&[self.sigma_r, self.sigma_az])
    }

    fn apply(&self, state: &DVec) -> DVec {
        let (r, az) = self.state_to_polar(state);
        DVector::from_vec(vec![r, az])
    }

    fn angular_components(&self) -> &[usize] {
        &POLAR_ANGLES
    }
}
