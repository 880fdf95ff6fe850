//! Kalman filter: predict and update steps.
//!
//! # Design choices
//! - Linear KF with a constant-velocity (CV) motion model on the first six
//!   state rows. Any rows beyond six (platform attitude) follow a random walk.
//! - State and covariance are dynamically sized so one filter serves both the
//!   6-state object layout and the 9-state platform layout.
//! - A singular innovation covariance is reported as an error; the caller
//!   keeps the predicted state.
//!
//! ## State vector
//! x = [px, py, pz, vx, vy, vz (, roll, pitch, yaw)]ᵀ
//!
//! ## CV Transition model
//! F = I + dt * [[0₃ I₃]; [0₃ 0₃]] on the kinematic block, identity elsewhere.
//!
//! ## Process noise Q (discrete white-noise acceleration)
//! Q_pos = q·dt⁴/4, Q_pos_vel = q·dt³/2, Q_vel = q·dt², Q_att = q_att·dt

use crate::error::{CoreError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

pub type DVec = DVector<f64>;
pub type DMat = DMatrix<f64>;

/// Number of kinematic rows (position + velocity).
pub const KINEMATIC_DIM: usize = 6;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Trait for a Kalman filter model (predict + update).
pub trait KalmanFilter {
    /// Predict state and covariance forward by `dt` seconds.
    fn predict(&self, state: &DVec, cov: &DMat, dt: f64) -> (DVec, DMat);

    /// Update state and covariance given an observation `z`, observation
    /// matrix `H` and measurement noise `R`.
    fn update(&self, state: &DVec, cov: &DMat, z: &DVec, h: &DMat, r: &DMat)
        -> Result<KfUpdateResult>;
}

/// Result of a KF update step.
#[derive(Clone, Debug)]
pub struct KfUpdateResult {
    pub state: DVec,
    pub cov: DMat,
    /// Innovation ν = z − H·x
    pub innovation: DVec,
    /// Innovation covariance S = H·P·Hᵀ + R
    pub innovation_cov: DMat,
    /// Kalman gain K
    pub kalman_gain: DMat,
}

// ---------------------------------------------------------------------------
// Constant Velocity model
// ---------------------------------------------------------------------------

/// Configuration for the CV Kalman filter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CvKfConfig {
    /// Acceleration noise std dev (m/s²) driving the kinematic block.
    pub process_noise_std: f64,
    /// Random-walk std dev for attitude rows (rad/√s).
    pub attitude_noise_std: f64,
}

impl Default for CvKfConfig {
    fn default() -> Self {
        Self {
            process_noise_std: 0.1,
            attitude_noise_std: 0.01,
        }
    }
}

/// Constant-Velocity Kalman filter over an n-state (n ≥ 6).
#[derive(Clone, Debug)]
pub struct CvKalmanFilter {
    pub config: CvKfConfig,
}

impl CvKalmanFilter {
    pub fn new(config: CvKfConfig) -> Self {
        Self { config }
    }

    /// Build state transition matrix F for an `n`-state and timestep dt.
    pub fn transition_matrix(n: usize, dt: f64) -> DMat {
        let mut f = DMat::identity(n, n);
        // position += velocity * dt
        f[(0, 3)] = dt;
        f[(1, 4)] = dt;
        f[(2, 5)] = dt;
        f
    }

    /// Build process noise matrix Q for an `n`-state and timestep dt.
    pub fn process_noise(&self, n: usize, dt: f64) -> DMat {
        let q = self.config.process_noise_std.powi(2);
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let dt4 = dt3 * dt;

        let mut qm = DMat::zeros(n, n);
        for i in 0..3usize {
            qm[(i, i)] = q * dt4 / 4.0;
            qm[(i + 3, i + 3)] = q * dt2;
            qm[(i, i + 3)] = q * dt3 / 2.0;
            qm[(i + 3, i)] = q * dt3 / 2.0;
        }
        let qa = self.config.attitude_noise_std.powi(2) * dt.abs();
        for i in KINEMATIC_DIM..n {
            qm[(i, i)] = qa;
        }
        qm
    }
}

impl KalmanFilter for CvKalmanFilter {
    fn predict(&self, state: &DVec, cov: &DMat, dt: f64) -> (DVec, DMat) {
        let n = state.len();
        let f = Self::transition_matrix(n, dt);
        let q = self.process_noise(n, dt);
        let predicted_state = &f * state;
        let predicted_cov = &f * cov * f.transpose() + q;
        (predicted_state, predicted_cov)
    }

    fn update(
        &self,
        state: &DVec,
        cov: &DMat,
        z: &DVec,
        h: &DMat,
        r: &DMat,
    ) -> Result<KfUpdateResult> {
        let hx = h * state;
        joseph_update(state, cov, z - hx, h, r)
    }
}

/// Shared correction step: gain from S via LU, Joseph-form covariance.
pub(crate) fn joseph_update(
    state: &DVec,
    cov: &DMat,
    innovation: DVec,
    h: &DMat,
    r: &DMat,
) -> Result<KfUpdateResult> {
    let n = state.len();

    // Innovation covariance: S = H·P·Hᵀ + R
    let s = h * cov * h.transpose() + r;

    // Kalman gain: K = P·Hᵀ·S⁻¹  (LU for numerical stability)
    let s_inv = s
        .clone()
        .lu()
        .try_inverse()
        .ok_or(CoreError::SingularInnovation)?;
    let k = cov * h.transpose() * &s_inv;

    let new_state = state + &k * &innovation;

    // Updated covariance: Joseph form P' = (I−KH)·P·(I−KH)ᵀ + K·R·Kᵀ
    let i_kh = DMat::identity(n, n) - &k * h;
    let new_cov = &i_kh * cov * i_kh.transpose() + &k * r * k.transpose();

    Ok(KfUpdateResult {
        state: new_state,
        cov: new_cov,
        innovation,
        innovation_cov: s,
        kalman_gain: k,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn state6(v: [f64; 6]) -> DVec {
        DVec::from_row_slice(&v)
    }

    #[test]
    fn predict_constant_velocity() {
        let kf = CvKalmanFilter::new(CvKfConfig::default());
        // Object at (0,0,0) moving at (10,0,0) m/s
        let state = state6([0.0, 0.0, 0.0, 10.0, 0.0, 0.0]);
        let cov = DMat::identity(6, 6);

        let (pred_state, pred_cov) = kf.predict(&state, &cov, 1.0);
        assert_abs_diff_eq!(pred_state[0], 10.0, epsilon = 1e-9); // x moved
        assert_abs_diff_eq!(pred_state[3], 10.0, epsilon = 1e-9); // vx unchanged
        assert!(pred_cov[(0, 0)] > cov[(0, 0)]);
    }

    #[test]
    fn attitude_rows_random_walk() {
        let kf = CvKalmanFilter::new(CvKfConfig::default());
        let mut state = DVec::zeros(9);
        state[8] = 0.5;
        let cov = DMat::identity(9, 9);
        let (pred_state, pred_cov) = kf.predict(&state, &cov, 0.1);
        assert_abs_diff_eq!(pred_state[8], 0.5, epsilon = 1e-12);
        assert!(pred_cov[(8, 8)] > 1.0);
        assert_abs_diff_eq!(pred_cov[(6, 0)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn update_reduces_uncertainty() {
        let kf = CvKalmanFilter::new(CvKfConfig::default());
        let state = state6([100.0, 50.0, 0.0, 5.0, 2.0, 0.0]);
        let cov = DMat::identity(6, 6) * 100.0;

        // 2D cartesian observation
        let h = DMat::from_row_slice(2, 6, &[1., 0., 0., 0., 0., 0., 0., 1., 0., 0., 0., 0.]);
        let r = DMat::from_diagonal(&DVec::from_vec(vec![9.0, 9.0])); // 3m std dev
        let z = DVec::from_vec(vec![101.0, 51.0]);

        let res = kf.update(&state, &cov, &z, &h, &r).unwrap();
        // Posterior covariance trace must be less than prior
        assert!(res.cov.trace() < cov.trace(), "Update should reduce uncertainty");
        assert!(res.state[0] > 100.0 && res.state[0] < 101.0);
    }

    #[test]
    fn singular_innovation_is_an_error() {
        let kf = CvKalmanFilter::new(CvKfConfig::default());
        let state = DVec::zeros(6);
        let cov = DMat::zeros(6, 6);
        let h = DMat::from_row_slice(1, 6, &[1., 0., 0., 0., 0., 0.]);
        let r = DMat::zeros(1, 1);
        let z = DVec::from_vec(vec![1.0]);
        assert_eq!(
            kf.update(&state, &cov, &z, &h, &r).unwrap_err(),
            CoreError::SingularInnovation
        );
    }
}
