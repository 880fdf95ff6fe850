//! Greedy IoU association of detections to tracks.
//!
//! # Algorithm
//! 1. Compute the IoU of every (track, detection) pair of the same modality.
//!    Rows are independent and computed in parallel.
//! 2. Visit tracks in ascending `TrackId`. Each takes the not-yet-claimed
//!    detection with the highest IoU strictly above the threshold; only a
//!    strictly greater IoU replaces the current best, so the earliest
//!    submitted detection wins ties.
//!
//! This is a greedy heuristic and does not produce a maximum-weight matching:
//! an early track can claim a detection that a later track overlaps better.
//! The order is part of the observable id-assignment behavior.

use crate::{geometry::iou, track::Track, types::Detection};
use rayon::prelude::*;

/// Output of one association pass. Indices refer to the input slices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Association {
    /// (track_idx, detection_idx)
    pub pairs: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// IoU matrix `[track][detection]`; cross-modality pairs score 0.
pub fn iou_matrix(tracks: &[Track], detections: &[Detection]) -> Vec<Vec<f64>> {
    tracks
        .par_iter()
        .map(|track| {
            detections
                .iter()
                .map(|det| {
                    if det.source == track.source {
                        iou(&track.bbox, &det.footprint)
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect()
}

/// Greedy matching; `tracks` must be sorted by ascending id.
pub fn greedy_iou_match(tracks: &[Track], detections: &[Detection], threshold: f64) -> Association {
    debug_assert!(tracks.windows(2).all(|w| w[0].id < w[1].id));

    let scores = iou_matrix(tracks, detections);
    let mut claimed = vec![false; detections.len()];
    let mut out = Association::default();

    for (ti, row) in scores.iter().enumerate() {
        let mut best: Option<(usize, f64)> = None;
        for (di, &score) in row.iter().enumerate() {
            if claimed[di] || score <= threshold {
                continue;
            }
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((di, score));
            }
        }
        match best {
            Some((di, _)) => {
                claimed[di] = true;
                out.pairs.push((ti, di));
            }
            None => out.unmatched_tracks.push(ti),
        }
    }

    out.unmatched_detections = claimed
        .iter()
        .enumerate()
        .filter(|(_, &c)| !c)
        .map(|(di, _)| di)
        .collect();
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
