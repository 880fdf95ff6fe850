//! Extended Kalman Filter (EKF) implementation.
//!
//! Unlike the standard KF, the EKF linearizes non-linear observation models
//! by computing the Jacobian at the current state estimate. Linear models go
//! through the same path with h(x) = H·x.

use crate::error::Result;
use crate::kf::{joseph_update, CvKalmanFilter, CvKfConfig, DMat, DVec, KalmanFilter, KfUpdateResult};
use std::f64::consts::{PI, TAU};

/// Wrap an angle to (−π, π].
pub fn wrap_angle(a: f64) -> f64 {
    let w = (a + PI).rem_euclid(TAU) - PI;
    if w == -PI {
        PI
    } else {
        w
    }
}

/// Extended Kalman Filter implementation.
/// It reuses the Constant Velocity prediction from CvKalmanFilter but
/// supports non-linear updates.
#[derive(Clone, Debug)]
pub struct ExtendedKalmanFilter {
    pub cv_kf: CvKalmanFilter,
}

impl ExtendedKalmanFilter {
    pub fn new(config: CvKfConfig) -> Self {
        Self {
            cv_kf: CvKalmanFilter::new(config),
        }
    }

    /// Update step for EKF.
    /// `hx` is the predicted measurement h(x_pred), `h_jacobian` the Jacobian
    /// evaluated at x_pred. Innovation components listed in `angular` are
    /// wrapped to (−π, π].
    pub fn update_ekf(
        &self,
        state: &DVec,
        cov: &DMat,
        z: &DVec,
        hx: &DVec,
        h_jacobian: &DMat,
        r: &DMat,
        angular: &[usize],
    ) -> Result<KfUpdateResult> {
        // Innovation: ν = z − h(x)
        let mut innovation = z - hx;
        for &i in angular {
            if i < innovation.len() {
                innovation[i] = wrap_angle(innovation[i]);
            }
        }
        joseph_update(state, cov, innovation, h_jacobian, r)
    }
}

impl KalmanFilter for ExtendedKalmanFilter {
    fn predict(&self, state: &DVec, cov: &DMat, dt: f64) -> (DVec, DMat) {
        self.cv_kf.predict(state, cov, dt)
    }

    fn update(
        &self,
        state: &DVec,
        cov: &DMat,
        z: &DVec,
        h: &DMat,
        r: &DMat,
    ) -> Result<KfUpdateResult> {
        // Fallback to linear: h(x) = H * x
        let hx = h * state;
        self.update_ekf(state, cov, z, &hx, h, r, &[])
    }
}
