//! Multi-object tracker: the per-frame cycle.
//!
//! # Processing steps per frame
//! 1. Validate detection records (malformed ones are dropped and counted)
//! 2. Greedy IoU association against the active tracks
//! 3. Update matched tracks (estimator predict + correct)
//! 4. Register misses on unmatched tracks
//! 5. Birth new tracks for unmatched detections
//! 6. Destroy tracks past the miss limit

use crate::{
    association::greedy_iou_match,
    track::{Track, TrackStatus},
    track_manager::{TrackManager, TrackManagerConfig},
    types::{Detection, DetectionRecord, FrameId, TrackId},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one tracker step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame: FrameId,
    /// Detections accepted after validation
    pub detections: usize,
    /// Records dropped as malformed
    pub dropped: usize,
    pub matched: usize,
    pub births: Vec<TrackId>,
    pub destroyed: Vec<TrackId>,
    pub active_tracks: usize,
    /// Wall-clock processing time
    pub elapsed_us: u64,
}

pub struct MultiObjectTracker {
    manager: TrackManager,
    /// Active tracks, ascending id
    tracks: Vec<Track>,
}

impl MultiObjectTracker {
    pub fn new(config: TrackManagerConfig) -> Self {
        Self {
            manager: TrackManager::new(config),
            tracks: Vec::new(),
        }
    }

    pub fn config(&self) -> &TrackManagerConfig {
        &self.manager.config
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn tracks_mut(&mut self) -> &mut [Track] {
        &mut self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|i| &self.tracks[i])
    }

    /// Validate records, dropping malformed ones. Returns the survivors and
    /// the drop count.
    pub fn validate(frame: FrameId, records: &[DetectionRecord]) -> (Vec<Detection>, usize) {
        let mut dropped = 0;
        let detections = records
            .iter()
            .filter_map(|rec| match rec.validate() {
                Ok(det) => Some(det),
                Err(err) => {
                    warn!(%frame, error = %err, "dropping detection");
                    dropped += 1;
                    None
                }
            })
            .collect();
        (detections, dropped)
    }

    /// Process one frame of detections.
    pub fn process_frame(&mut self, frame: FrameId, records: &[DetectionRecord]) -> FrameReport {
        let start = Instant::now();

        // ----------------------------------------------------------------
        // Step 1: Validation
        // ----------------------------------------------------------------
        let (detections, dropped) = Self::validate(frame, records);

        // ----------------------------------------------------------------
        // Step 2: Association
        // ----------------------------------------------------------------
        let threshold = self.manager.config.iou_threshold;
        let assoc = greedy_iou_match(&self.tracks, &detections, threshold);

        // ----------------------------------------------------------------
        // Step 3: Update matched tracks
        // ----------------------------------------------------------------
        for &(ti, di) in &assoc.pairs {
            let track = &mut self.tracks[ti];
            if let Err(err) = self.manager.register_hit(track, &detections[di], frame) {
                warn!(track = %track.id, error = %err, "estimator update failed, keeping prediction");
            }
        }

        // ----------------------------------------------------------------
        // Step 4: Misses
        // ----------------------------------------------------------------
        for &ti in &assoc.unmatched_tracks {
            self.manager.register_miss(&mut self.tracks[ti]);
        }

        // ----------------------------------------------------------------
        // Step 5: Births (ids are monotonic, so the vec stays sorted)
        // ----------------------------------------------------------------
        let mut births = Vec::with_capacity(assoc.unmatched_detections.len());
        for &di in &assoc.unmatched_detections {
            let track = self.manager.birth_track(&detections[di], frame);
            info!(track = %track.id, class = %track.class_name, source = %track.source, "track born");
            births.push(track.id);
            self.tracks.push(track);
        }

        // ----------------------------------------------------------------
        // Step 6: Destroy
        // ----------------------------------------------------------------
        let destroyed = self.manager.prune_lost(&mut self.tracks);
        for id in &destroyed {
            info!(track = %id, "track destroyed");
        }

        let report = FrameReport {
            frame,
            detections: detections.len(),
            dropped,
            matched: assoc.pairs.len(),
            births,
            destroyed,
            active_tracks: self.tracks.len(),
            elapsed_us: start.elapsed().as_micros() as u64,
        };
        debug!(
            %frame,
            matched = report.matched,
            births = report.births.len(),
            destroyed = report.destroyed.len(),
            active = report.active_tracks,
            "frame processed"
        );
        report
    }

    /// Number of tracks currently in the given status.
    pub fn count_status(&self, status: TrackStatus) -> usize {
        self.tracks.iter().filter(|t| t.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
