//! Track: identity, latest observation, estimator, status, history and the
//! annotations attached by analysis.

use crate::{
    behavior::{Behavior, MovementPattern},
    estimator::StateEstimator,
    geometry::BoundingBox,
    prediction::ForecastPoint,
    threat::ThreatLevel,
    types::{Detection, FrameId, SensorSource, TrackId},
};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default capacity of the per-track history ring buffer.
pub const HISTORY_LEN: usize = 100;

/// Lifecycle status of a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    /// Born this frame from an unmatched detection
    New,
    /// Updated by a detection this frame
    Matched,
    /// Missed at least the last frame; destroyed past the miss limit
    Lost,
}

/// One past observation of a track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub frame: FrameId,
    pub timestamp: f64,
    pub bbox: BoundingBox,
    pub position: [f64; 3],
    pub confidence: f64,
}

impl HistoryEntry {
    pub fn from_detection(frame: FrameId, det: &Detection) -> Self {
        Self {
            frame,
            timestamp: det.timestamp,
            bbox: det.footprint,
            position: det.position(),
            confidence: det.confidence,
        }
    }

    pub fn center(&self) -> Vector2<f64> {
        self.bbox.center()
    }
}

/// A single tracked object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    /// Unique identifier, never reused
    pub id: TrackId,
    pub class_name: String,
    pub source: SensorSource,
    pub confidence: f64,
    pub bbox: BoundingBox,
    /// Filtered position (metric for range sensors, image plane otherwise)
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub status: TrackStatus,
    /// Frames observed
    pub age: u32,
    /// Consecutive unmatched frames
    pub missed_frames: u32,
    pub first_seen: f64,
    pub last_seen: f64,
    pub threat_level: ThreatLevel,
    pub threat_score: f64,
    pub behavior: Behavior,
    pub movement_pattern: MovementPattern,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicted_positions: Vec<ForecastPoint>,
    /// Past observations (most recent last)
    pub history: VecDeque<HistoryEntry>,
    #[serde(skip)]
    pub estimator: Option<StateEstimator>,
}

impl Track {
    /// Create a new track from its first detection.
    pub fn new(id: TrackId, frame: FrameId, det: &Detection, estimator: StateEstimator) -> Self {
        let mut history = VecDeque::with_capacity(HISTORY_LEN);
        history.push_back(HistoryEntry::from_detection(frame, det));
        Self {
            id,
            class_name: det.class_name.clone(),
            source: det.source,
            confidence: det.confidence,
            bbox: det.footprint,
            position: estimator.position(),
            velocity: estimator.velocity(),
            status: TrackStatus::New,
            age: 1,
            missed_frames: 0,
            first_seen: det.timestamp,
            last_seen: det.timestamp,
            threat_level: ThreatLevel::default(),
            threat_score: 0.0,
            behavior: Behavior::default(),
            movement_pattern: MovementPattern::default(),
            predicted_positions: Vec::new(),
            history,
            estimator: Some(estimator),
        }
    }

    /// Push an entry, evicting the oldest past `capacity`.
    pub fn push_history(&mut self, entry: HistoryEntry, capacity: usize) {
        while self.history.len() >= capacity.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    /// Centres of the history, oldest first.
    pub fn centers(&self) -> Vec<Vector2<f64>> {
        self.history.iter().map(HistoryEntry::center).collect()
    }

    /// Latest centre and the displacement between the last two centres.
    pub fn last_motion(&self) -> Option<(Vector2<f64>, Vector2<f64>)> {
        let n = self.history.len();
        let last = self.history.back()?.center();
        let velocity = if n >= 2 {
            last - self.history[n - 2].center()
        } else {
            Vector2::zeros()
        };
        Some((last, velocity))
    }

    pub fn speed(&self) -> f64 {
        let [vx, vy, vz] = self.velocity;
        (vx * vx + vy * vy + vz * vz).sqrt()
    }

    /// Returns 2D projected [x, y] position.
    pub fn position_2d(&self) -> (f64, f64) {
        (self.position[0], self.position[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{estimator::EstimatorConfig, types::DetectionRecord};

    fn detection(x: f64) -> Detection {
        DetectionRecord::image(SensorSource::Visual, "person", 0.9, [x, 0.0, x + 10.0, 20.0], x)
            .validate()
            .unwrap()
    }

    #[test]
    fn history_evicts_oldest() {
        let det = detection(0.0);
        let est = StateEstimator::seeded(EstimatorConfig::track(), det.position(), None);
        let mut track = Track::new(TrackId(1), FrameId(0), &det, est);
        for i in 1..=5u64 {
            let d = detection(i as f64);
            track.push_history(HistoryEntry::from_detection(FrameId(i), &d), 3);
        }
        assert_eq!(track.history.len(), 3);
        assert_eq!(track.history[0].frame, FrameId(3));
        assert_eq!(track.history[2].frame, FrameId(5));
    }

    #[test]
    fn last_motion_uses_final_two_centres() {
        let det = detection(0.0);
        let est = StateEstimator::seeded(EstimatorConfig::track(), det.position(), None);
        let mut track = Track::new(TrackId(1), FrameId(0), &det, est);
        let (_, v) = track.last_motion().unwrap();
        assert_eq!(v, Vector2::zeros());
        track.push_history(HistoryEntry::from_detection(FrameId(1), &detection(4.0)), HISTORY_LEN);
        let (c, v) = track.last_motion().unwrap();
        assert_eq!(c, Vector2::new(9.0, 10.0));
        assert_eq!(v, Vector2::new(4.0, 0.0));
    }

    #[test]
    fn serializes_without_estimator() {
        let det = detection(0.0);
        let est = StateEstimator::seeded(EstimatorConfig::track(), det.position(), None);
        let track = Track::new(TrackId(9), FrameId(0), &det, est);
        let json = serde_json::to_string(&track).unwrap();
        assert!(json.contains("\"threat_level\":\"LOW\""));
        let back: Track = serde_json::from_str(&json).unwrap();
        assert!(back.estimator.is_none());
        assert_eq!(back.id, TrackId(9));
    }
}
