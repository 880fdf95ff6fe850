//! Behavior and movement-pattern classification from a track's centres.
//!
//! # Design choices
//! - Motion is measured per history step (frame-to-frame displacement), in
//!   the same units as the centres.
//! - Direction changes are only taken between non-zero steps; a stationary
//!   step has no heading to compare.
//! - Rules are ordered; the first match wins.

use crate::{
    error::{CoreError, Result},
    geometry::angle_between,
};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    /// Not enough history to assert anything
    #[default]
    Unclassified,
    Stationary,
    Moving,
    Approaching,
    Fleeing,
    Circling,
    Erratic,
    Aggressive,
}

impl Behavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Behavior::Unclassified => "unclassified",
            Behavior::Stationary => "stationary",
            Behavior::Moving => "moving",
            Behavior::Approaching => "approaching",
            Behavior::Fleeing => "fleeing",
            Behavior::Circling => "circling",
            Behavior::Erratic => "erratic",
            Behavior::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementPattern {
    #[default]
    Unknown,
    Linear,
    Random,
    Circular,
    Zigzag,
    Rapid,
    Stationary,
    Coordinated,
}

impl MovementPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementPattern::Unknown => "unknown",
            MovementPattern::Linear => "linear",
            MovementPattern::Random => "random",
            MovementPattern::Circular => "circular",
            MovementPattern::Zigzag => "zigzag",
            MovementPattern::Rapid => "rapid",
            MovementPattern::Stationary => "stationary",
            MovementPattern::Coordinated => "coordinated",
        }
    }
}

impl fmt::Display for MovementPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Most recent centres considered
    pub window: usize,
    pub min_history: usize,
    pub stationary_speed: f64,
    pub fast_speed: f64,
    /// Degrees
    pub erratic_avg_turn: f64,
    pub erratic_max_turn: f64,
    pub circling_avg_turn: f64,
    /// Decrease in distance to the platform that counts as approaching
    pub approach_distance: f64,
    pub rapid_window: usize,
    pub rapid_speed: f64,
    pub rapid_acceleration: f64,
    pub rapid_turn: f64,
    pub circular_turn: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            window: 10,
            min_history: 3,
            stationary_speed: 1.0,
            fast_speed: 20.0,
            erratic_avg_turn: 45.0,
            erratic_max_turn: 90.0,
            circling_avg_turn: 20.0,
            approach_distance: 10.0,
            rapid_window: 4,
            rapid_speed: 20.0,
            rapid_acceleration: 10.0,
            rapid_turn: 60.0,
            circular_turn: 45.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Motion features
// ---------------------------------------------------------------------------

/// Kinematic summary of a run of centres.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionFeatures {
    pub avg_speed: f64,
    pub max_speed: f64,
    /// Degrees, 0 when no pair of non-zero steps exists
    pub avg_direction_change: f64,
    pub max_direction_change: f64,
    pub max_acceleration: f64,
    /// Distance to the platform at the last sample minus at the first
    pub range_change: Option<f64>,
}

impl MotionFeatures {
    pub fn from_centers(centers: &[Vector2<f64>], platform: Option<Vector2<f64>>) -> Result<Self> {
        if centers.len() < 2 {
            return Err(CoreError::InsufficientHistory {
                needed: 2,
                have: centers.len(),
            });
        }
        let steps: Vec<Vector2<f64>> = centers.windows(2).map(|w| w[1] - w[0]).collect();
        let speeds: Vec<f64> = steps.iter().map(|s| s.norm()).collect();

        let turns: Vec<f64> = steps
            .windows(2)
            .filter(|w| w[0].norm() > f64::EPSILON && w[1].norm() > f64::EPSILON)
            .map(|w| angle_between(&w[0], &w[1]))
            .collect();

        let max_acceleration = steps
            .windows(2)
            .map(|w| (w[1] - w[0]).norm())
            .fold(0.0, f64::max);

        let range_change = platform.map(|p| {
            let first = (centers[0] - p).norm();
            let last = (centers[centers.len() - 1] - p).norm();
            last - first
        });

        Ok(Self {
            avg_speed: mean(&speeds),
            max_speed: speeds.iter().copied().fold(0.0, f64::max),
            avg_direction_change: mean(&turns),
            max_direction_change: turns.iter().copied().fold(0.0, f64::max),
            max_acceleration,
            range_change,
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Result of the short-window rapid-movement check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RapidMovement {
    pub max_speed: f64,
    pub max_acceleration: f64,
    pub max_direction_change: f64,
    /// Sharp heading reversals
    pub evasive: bool,
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct BehaviorClassifier {
    pub config: BehaviorConfig,
}

impl BehaviorClassifier {
    pub fn new(config: BehaviorConfig) -> Self {
        Self { config }
    }

    fn recent<'a>(&self, centers: &'a [Vector2<f64>], window: usize) -> &'a [Vector2<f64>] {
        &centers[centers.len().saturating_sub(window)..]
    }

    /// Classify the most recent `window` centres (oldest first).
    pub fn classify(&self, centers: &[Vector2<f64>], platform: Option<Vector2<f64>>) -> Behavior {
        let cfg = &self.config;
        if centers.len() < cfg.min_history {
            return Behavior::Unclassified;
        }
        let recent = self.recent(centers, cfg.window);
        let Ok(f) = MotionFeatures::from_centers(recent, platform) else {
            return Behavior::Unclassified;
        };

        let approaching = f
            .range_change
            .is_some_and(|d| d < -cfg.approach_distance);

        if f.avg_speed < cfg.stationary_speed {
            Behavior::Stationary
        } else if approaching {
            if f.avg_speed > cfg.fast_speed {
                Behavior::Aggressive
            } else {
                Behavior::Approaching
            }
        } else if f.avg_direction_change > cfg.erratic_avg_turn
            || f.max_direction_change > cfg.erratic_max_turn
        {
            Behavior::Erratic
        } else if f.avg_direction_change > cfg.circling_avg_turn {
            Behavior::Circling
        } else if f.avg_speed > cfg.fast_speed {
            Behavior::Fleeing
        } else {
            Behavior::Moving
        }
    }

    /// Check the last `rapid_window` centres for sudden motion.
    pub fn rapid_movement(&self, centers: &[Vector2<f64>]) -> Option<RapidMovement> {
        let cfg = &self.config;
        if centers.len() < cfg.rapid_window.max(3) {
            return None;
        }
        let f = MotionFeatures::from_centers(self.recent(centers, cfg.rapid_window), None).ok()?;
        let rapid = f.max_speed > cfg.rapid_speed
            || f.max_acceleration > cfg.rapid_acceleration
            || f.max_direction_change > cfg.rapid_turn;
        rapid.then(|| RapidMovement {
            max_speed: f.max_speed,
            max_acceleration: f.max_acceleration,
            max_direction_change: f.max_direction_change,
            evasive: f.max_direction_change > cfg.rapid_turn,
        })
    }

    /// Pattern label: group membership first, then rapid motion, then the
    /// behavior label.
    pub fn movement_pattern(
        &self,
        behavior: Behavior,
        rapid: Option<&RapidMovement>,
        grouped: bool,
    ) -> MovementPattern {
        if grouped {
            return MovementPattern::Coordinated;
        }
        if let Some(r) = rapid {
            return if r.evasive {
                MovementPattern::Zigzag
            } else if r.max_direction_change > self.config.circular_turn {
                MovementPattern::Circular
            } else if r.max_speed > self.config.rapid_speed {
                MovementPattern::Rapid
            } else {
                MovementPattern::Linear
            };
        }
        match behavior {
            Behavior::Erratic => MovementPattern::Random,
            Behavior::Circling => MovementPattern::Circular,
            Behavior::Stationary => MovementPattern::Stationary,
            _ => MovementPattern::Linear,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn path(points: &[(f64, f64)]) -> Vec<Vector2<f64>> {
        points.iter().map(|&(x, y)| Vector2::new(x, y)).collect()
    }

    fn line(n: usize, step: (f64, f64)) -> Vec<Vector2<f64>> {
        (0..n)
            .map(|i| Vector2::new(i as f64 * step.0, i as f64 * step.1))
            .collect()
    }

    #[test]
    fn short_history_is_unclassified() {
        let c = BehaviorClassifier::default();
        assert_eq!(c.classify(&[], None), Behavior::Unclassified);
        assert_eq!(c.classify(&line(2, (5.0, 0.0)), None), Behavior::Unclassified);
        assert_ne!(c.classify(&line(3, (5.0, 0.0)), None), Behavior::Unclassified);
    }

    #[test]
    fn stationary_and_moving() {
        let c = BehaviorClassifier::default();
        assert_eq!(c.classify(&line(5, (0.1, 0.0)), None), Behavior::Stationary);
        assert_eq!(c.classify(&line(5, (5.0, 0.0)), None), Behavior::Moving);
        assert_eq!(c.classify(&line(5, (30.0, 0.0)), None), Behavior::Fleeing);
    }

    #[test]
    fn approach_trend_relative_to_platform() {
        let c = BehaviorClassifier::default();
        let platform = Some(Vector2::new(100.0, 0.0));
        assert_eq!(c.classify(&line(5, (5.0, 0.0)), platform), Behavior::Approaching);
        assert_eq!(c.classify(&line(5, (-5.0, 0.0)), platform), Behavior::Moving);
        // Fast and closing in
        let far = Some(Vector2::new(1000.0, 0.0));
        assert_eq!(c.classify(&line(5, (30.0, 0.0)), far), Behavior::Aggressive);
    }

    #[test]
    fn zigzag_is_erratic() {
        let c = BehaviorClassifier::default();
        let zz = path(&[(0.0, 0.0), (5.0, 5.0), (10.0, 0.0), (15.0, 5.0), (20.0, 0.0)]);
        assert_eq!(c.classify(&zz, None), Behavior::Erratic);
    }

    #[test]
    fn gentle_turning_is_circling() {
        let c = BehaviorClassifier::default();
        // Constant 30° turn per step
        let mut pts = vec![Vector2::new(0.0, 0.0)];
        let mut heading: f64 = 0.0;
        for _ in 0..6 {
            let last = pts[pts.len() - 1];
            pts.push(last + Vector2::new(heading.cos(), heading.sin()) * 5.0);
            heading += 30f64.to_radians();
        }
        assert_eq!(c.classify(&pts, None), Behavior::Circling);
    }

    #[test]
    fn only_last_window_counts() {
        let c = BehaviorClassifier::default();
        let mut pts = path(&[(0.0, 0.0), (50.0, 50.0), (0.0, 100.0)]);
        let tail = line(10, (0.1, 0.0));
        pts.extend(tail.iter().map(|p| p + Vector2::new(0.0, 100.0)));
        assert_eq!(c.classify(&pts, None), Behavior::Stationary);
    }

    #[test]
    fn features_ignore_zero_steps() {
        let f = MotionFeatures::from_centers(&line(4, (0.0, 0.0)), None).unwrap();
        assert_abs_diff_eq!(f.avg_direction_change, 0.0);
        assert!(MotionFeatures::from_centers(&line(1, (0.0, 0.0)), None).is_err());
    }

    #[test]
    fn rapid_movement_detection() {
        let c = BehaviorClassifier::default();
        assert!(c.rapid_movement(&line(4, (5.0, 0.0))).is_none());
        assert!(c.rapid_movement(&line(3, (50.0, 0.0))).is_none());

        let fast = c.rapid_movement(&line(4, (25.0, 0.0))).unwrap();
        assert!(!fast.evasive);
        assert_eq!(
            c.movement_pattern(Behavior::Fleeing, Some(&fast), false),
            MovementPattern::Rapid
        );

        let jink = path(&[(0.0, 0.0), (5.0, 0.0), (0.0, 1.0), (5.0, 1.0)]);
        let evasive = c.rapid_movement(&jink).unwrap();
        assert!(evasive.evasive);
        assert_eq!(
            c.movement_pattern(Behavior::Erratic, Some(&evasive), false),
            MovementPattern::Zigzag
        );
    }

    #[test]
    fn pattern_falls_back_to_behavior() {
        let c = BehaviorClassifier::default();
        assert_eq!(c.movement_pattern(Behavior::Erratic, None, false), MovementPattern::Random);
        assert_eq!(c.movement_pattern(Behavior::Circling, None, false), MovementPattern::Circular);
        assert_eq!(c.movement_pattern(Behavior::Stationary, None, false), MovementPattern::Stationary);
        assert_eq!(c.movement_pattern(Behavior::Moving, None, false), MovementPattern::Linear);
        assert_eq!(c.movement_pattern(Behavior::Moving, None, true), MovementPattern::Coordinated);
    }
}
