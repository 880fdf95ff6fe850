//! Track lifecycle management: birth, hit/miss bookkeeping, deletion.
//!
//! # Track Management Policy
//! - **Birth**: each unmatched detection spawns a `New` track with a fresh id.
//! - **Hit**: the estimator is predicted one step and corrected against the
//!   detection; the track becomes `Matched` and its miss counter resets.
//! - **Miss**: the track becomes `Lost`; it is destroyed once its consecutive
//!   misses exceed `max_missed`. A lost track that is matched again within
//!   that window is reinstated with the same id.

use crate::{
    error::Result,
    estimator::{EstimatorConfig, StateEstimator},
    kf::DVec,
    track::{HistoryEntry, Track, TrackStatus, HISTORY_LEN},
    types::{Detection, FrameId, TrackId},
};
use sensor_models::{PositionObservation, PositionVelocityObservation};
use serde::{Deserialize, Serialize};

/// Configuration for track management policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackManagerConfig {
    /// Consecutive misses tolerated before destruction
    pub max_missed: u32,
    /// Minimum IoU (strictly exceeded) for a detection to match a track
    pub iou_threshold: f64,
    pub history_len: usize,
    pub estimator: EstimatorConfig,
    /// Position noise for detections without velocity (1σ per axis)
    pub position_sigma: [f64; 3],
    /// Radar returns carrying Doppler velocity
    pub radar_sigma_pos: f64,
    pub radar_sigma_vel: f64,
}

impl Default for TrackManagerConfig {
    fn default() -> Self {
        Self {
            max_missed: 30,
            iou_threshold: 0.3,
            history_len: HISTORY_LEN,
            estimator: EstimatorConfig::track(),
            position_sigma: [2.0, 2.0, 2.0],
            radar_sigma_pos: 5.0,
            radar_sigma_vel: 1.0,
        }
    }
}

/// Manages id allocation and per-track state transitions.
pub struct TrackManager {
    pub config: TrackManagerConfig,
    next_id: u64,
    position_model: PositionObservation,
    radar_model: PositionVelocityObservation,
}

impl TrackManager {
    pub fn new(config: TrackManagerConfig) -> Self {
        Self {
            position_model: PositionObservation::new(config.position_sigma),
            radar_model: PositionVelocityObservation::new(config.radar_sigma_pos, config.radar_sigma_vel),
            config,
            next_id: 0,
        }
    }

    fn next_track_id(&mut self) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Create a new track from an unmatched detection.
    pub fn birth_track(&mut self, det: &Detection, frame: FrameId) -> Track {
        let id = self.next_track_id();
        let estimator = StateEstimator::seeded(self.config.estimator.clone(), det.position(), det.velocity());
        Track::new(id, frame, det, estimator)
    }

    /// Apply a matched detection to `track`.
    ///
    /// The observation overwrites the descriptive fields; the kinematic fields
    /// come from the estimator. A failed correction keeps the prediction.
    pub fn register_hit(&self, track: &mut Track, det: &Detection, frame: FrameId) -> Result<()> {
        track.status = TrackStatus::Matched;
        track.missed_frames = 0;
        track.age = track.age.saturating_add(1);
        track.confidence = det.confidence;
        track.bbox = det.footprint;
        track.last_seen = det.timestamp;
        if !det.class_name.is_empty() {
            track.class_name = det.class_name.clone();
        }
        track.push_history(HistoryEntry::from_detection(frame, det), self.config.history_len);

        let Some(est) = track.estimator.as_mut() else {
            track.position = det.position();
            return Ok(());
        };
        est.predict();
        let position = det.position();
        let outcome = match det.velocity() {
            Some(v) => {
                let z = DVec::from_iterator(6, position.iter().chain(&v).copied());
                est.update(&self.radar_model, &z)
            }
            None => est.update(&self.position_model, &DVec::from_row_slice(&position)),
        };
        track.position = est.position();
        track.velocity = est.velocity();
        outcome
    }

    /// Call after a track received no detection this frame.
    /// Returns true when the track must be destroyed.
    pub fn register_miss(&self, track: &mut Track) -> bool {
        track.missed_frames = track.missed_frames.saturating_add(1);
        track.status = TrackStatus::Lost;
        track.missed_frames > self.config.max_missed
    }

    /// Remove tracks past the miss limit. Returns the destroyed ids.
    pub fn prune_lost(&self, tracks: &mut Vec<Track>) -> Vec<TrackId> {
        let limit = self.config.max_missed;
        let mut destroyed = Vec::new();
        tracks.retain(|t| {
            let keep = t.missed_frames <= limit;
            if !keep {
                destroyed.push(t.id);
            }
            keep
        });
        destroyed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
