//! Simulated objects and their image-plane trajectories.
//!
//! Each target has a true state `[px, py, vx, vy]` (pixels, pixels per
//! second for camera targets; metres for radar targets) and a `MotionSpec`
//! describing how it moves.

use overwatch_core::types::SensorSource;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How a target moves between frames.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MotionSpec {
    Stationary,
    /// No acceleration
    ConstantVelocity,
    /// Constant turn rate on the XY plane. `omega` = yaw rate (rad/s).
    ConstantTurn { omega: f64 },
    /// Cross-track velocity flips sign every `period` seconds.
    Zigzag { period: f64 },
    /// Velocity takes a uniform kick of up to `kick` per step.
    RandomWalk { kick: f64 },
    /// Head for `goal` at `speed`, stopping within one step of it.
    Seek { goal: [f64; 2], speed: f64 },
}

/// A simulated object with ground-truth state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Target {
    pub id: u64,
    pub class_name: String,
    /// Which sensor reports it
    pub source: SensorSource,
    /// True state [px, py, vx, vy]
    pub state: [f64; 4],
    /// Box width and height (camera targets)
    pub size: [f64; 2],
    pub motion: MotionSpec,
    /// Target appears after this time
    pub appear_at: Option<f64>,
    /// Target disappears after this time
    pub disappear_at: Option<f64>,
    /// Detector misses the target in `[start, end)`
    pub blackout: Option<(f64, f64)>,
}

impl Target {
    pub fn camera(id: u64, class_name: &str, source: SensorSource, state: [f64; 4], size: [f64; 2]) -> Self {
        Self {
            id,
            class_name: class_name.into(),
            source,
            state,
            size,
            motion: MotionSpec::ConstantVelocity,
            appear_at: None,
            disappear_at: None,
            blackout: None,
        }
    }

    pub fn radar(id: u64, class_name: &str, state: [f64; 4]) -> Self {
        Self::camera(id, class_name, SensorSource::Radar, state, [0.0, 0.0])
    }

    pub fn with_motion(mut self, motion: MotionSpec) -> Self {
        self.motion = motion;
        self
    }

    /// Propagate the true state by `dt` seconds.
    pub fn step<R: Rng>(&mut self, t: f64, dt: f64, rng: &mut R) {
        let s = &mut self.state;
        match &self.motion {
            MotionSpec::Stationary => {
                s[2] = 0.0;
                s[3] = 0.0;
            }
            MotionSpec::ConstantVelocity => {}
            MotionSpec::ConstantTurn { omega } => {
                let v = s[2].hypot(s[3]);
                let heading = s[3].atan2(s[2]) + omega * dt;
                s[2] = v * heading.cos();
                s[3] = v * heading.sin();
            }
            MotionSpec::Zigzag { period } => {
                let leg = |time: f64| (time / period.max(dt)).floor() as i64;
                if leg(t + dt) != leg(t) {
                    s[3] = -s[3];
                }
            }
            MotionSpec::RandomWalk { kick } => {
                s[2] += rng.gen::<f64>() * kick * 2.0 - kick;
                s[3] += rng.gen::<f64>() * kick * 2.0 - kick;
            }
            MotionSpec::Seek { goal, speed } => {
                let dx = goal[0] - s[0];
                let dy = goal[1] - s[1];
                let dist = dx.hypot(dy);
                if dist > speed * dt {
                    s[2] = speed * dx / dist;
                    s[3] = speed * dy / dist;
                } else {
                    s[2] = 0.0;
                    s[3] = 0.0;
                }
            }
        }
        s[0] += s[2] * dt;
        s[1] += s[3] * dt;
    }

    /// True if the target exists at time `t`.
    pub fn is_active(&self, t: f64) -> bool {
        if let Some(appear) = self.appear_at {
            if t < appear {
                return false;
            }
        }
        if let Some(disappear) = self.disappear_at {
            if t >= disappear {
                return false;
            }
        }
        true
    }

    /// True if the detector can see the target at time `t`.
    pub fn is_visible(&self, t: f64) -> bool {
        self.is_active(t) && !self.blackout.is_some_and(|(start, end)| t >= start && t < end)
    }

    /// Image-plane box around the current position.
    pub fn bbox(&self) -> [f64; 4] {
        let [w, h] = self.size;
        let [x, y, ..] = self.state;
        [x - w / 2.0, y - h / 2.0, x + w / 2.0, y + h / 2.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn seek_stops_at_goal() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut t = Target::radar(0, "drone", [100.0, 0.0, 0.0, 0.0]).with_motion(MotionSpec::Seek {
            goal: [0.0, 0.0],
            speed: 30.0,
        });
        for k in 0..10 {
            t.step(k as f64, 1.0, &mut rng);
        }
        assert!((t.state[0] - 10.0).abs() < 1e-9);
        assert_eq!(t.state[2], 0.0);
    }

    #[test]
    fn zigzag_flips_cross_track_velocity() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut t = Target::camera(0, "person", SensorSource::Visual, [0.0, 0.0, 2.0, 1.0], [10.0, 20.0])
            .with_motion(MotionSpec::Zigzag { period: 2.0 });
        t.step(0.0, 1.0, &mut rng);
        assert_eq!(t.state[3], 1.0);
        t.step(1.0, 1.0, &mut rng);
        assert_eq!(t.state[3], -1.0);
    }

    #[test]
    fn blackout_hides_but_keeps_active() {
        let mut t = Target::camera(0, "person", SensorSource::Visual, [0.0; 4], [10.0, 20.0]);
        t.blackout = Some((5.0, 10.0));
        assert!(t.is_visible(4.0));
        assert!(!t.is_visible(5.0));
        assert!(t.is_active(5.0));
        assert!(t.is_visible(10.0));
    }
}
