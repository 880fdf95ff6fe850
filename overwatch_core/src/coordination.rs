//! Coordinated-group detection: spatial formations (DBSCAN) intersected with
//! velocity-aligned sets.
//!
//! # Design choices
//! - DBSCAN runs on raw coordinates. Neighbourhood queries go through a
//!   uniform grid whose cell size equals `eps`, so only the 3×3 block of
//!   cells around a point needs to be scanned.
//! - A point counts towards its own neighbourhood (`min_samples = 2` means
//!   one other point within `eps`).
//! - Velocity alignment is greedy in ascending `TrackId`. Near-stationary
//!   tracks are excluded because their heading is noise.
//! - Each formation joins at most one aligned set, so a track belongs to at
//!   most one group per cycle.

use crate::{
    geometry::angle_between,
    track::{Track, TrackStatus},
    types::TrackId,
};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A Uniform Grid spatial index for 2D points.
pub struct SpatialGrid {
    cell_size: f64,
    /// Maps cell key (ix, iy) to a list of point indices.
    cells: HashMap<(i64, i64), Vec<usize>>,
}

impl SpatialGrid {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    fn key(&self, x: f64, y: f64) -> (i64, i64) {
        (
            (x / self.cell_size).floor() as i64,
            (y / self.cell_size).floor() as i64,
        )
    }

    pub fn insert(&mut self, idx: usize, x: f64, y: f64) {
        let key = self.key(x, y);
        self.cells.entry(key).or_default().push(idx);
    }

    /// Indices in the cell containing (x, y) and its 8 direct neighbours.
    pub fn query_nearby(&self, x: f64, y: f64) -> Vec<usize> {
        let (ix, iy) = self.key(x, y);
        let mut results = Vec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(indices) = self.cells.get(&(ix + dx, iy + dy)) {
                    results.extend_from_slice(indices);
                }
            }
        }
        results
    }
}

/// DBSCAN cluster labels; `None` marks noise.
pub fn dbscan(points: &[Vector2<f64>], eps: f64, min_samples: usize) -> Vec<Option<usize>> {
    let mut labels: Vec<Option<usize>> = vec![None; points.len()];
    if !(eps > 0.0 && eps.is_finite()) {
        return labels;
    }
    let mut grid = SpatialGrid::new(eps);
    for (i, p) in points.iter().enumerate() {
        grid.insert(i, p.x, p.y);
    }
    let neighbours = |i: usize| -> Vec<usize> {
        let p = points[i];
        let mut n: Vec<usize> = grid
            .query_nearby(p.x, p.y)
            .into_iter()
            .filter(|&j| (points[j] - p).norm() <= eps)
            .collect();
        n.sort_unstable();
        n
    };

    let mut visited = vec![false; points.len()];
    let mut cluster = 0;
    for i in 0..points.len() {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        let seeds = neighbours(i);
        if seeds.len() < min_samples {
            continue;
        }
        labels[i] = Some(cluster);
        let mut queue = seeds;
        let mut head = 0;
        while head < queue.len() {
            let j = queue[head];
            head += 1;
            if labels[j].is_none() {
                labels[j] = Some(cluster);
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;
            let more = neighbours(j);
            if more.len() >= min_samples {
                queue.extend(more);
            }
        }
        cluster += 1;
    }
    labels
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormationType {
    Cluster,
    Linear,
    LargeFormation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinatedGroup {
    pub members: BTreeSet<TrackId>,
    pub formation_type: FormationType,
    pub movement_aligned: bool,
    pub confidence: f64,
}

/// Last position and last displacement of one track.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackMotion {
    pub id: TrackId,
    pub position: Vector2<f64>,
    pub velocity: Vector2<f64>,
}

impl TrackMotion {
    pub fn from_track(track: &Track) -> Option<Self> {
        track.last_motion().map(|(position, velocity)| Self {
            id: track.id,
            position,
            velocity,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub min_tracks: usize,
    /// History entries a track needs before it takes part
    pub min_history: usize,
    pub eps: f64,
    pub min_samples: usize,
    /// Degrees
    pub alignment_angle: f64,
    pub min_speed: f64,
    pub large_formation: usize,
    pub aligned_confidence: f64,
    pub large_formation_confidence: f64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            min_tracks: 3,
            min_history: 3,
            eps: 10.0,
            min_samples: 2,
            alignment_angle: 30.0,
            min_speed: 0.5,
            large_formation: 4,
            aligned_confidence: 0.8,
            large_formation_confidence: 0.6,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CoordinationDetector {
    pub config: CoordinationConfig,
}

impl CoordinationDetector {
    pub fn new(config: CoordinationConfig) -> Self {
        Self { config }
    }

    /// Spatial formations as sorted index lists, in cluster order.
    pub fn formations(&self, motions: &[TrackMotion]) -> Vec<Vec<usize>> {
        let points: Vec<Vector2<f64>> = motions.iter().map(|m| m.position).collect();
        let labels = dbscan(&points, self.config.eps, self.config.min_samples);
        let n_clusters = labels.iter().flatten().max().map_or(0, |m| m + 1);
        let mut out = vec![Vec::new(); n_clusters];
        for (i, label) in labels.iter().enumerate() {
            if let Some(c) = label {
                out[*c].push(i);
            }
        }
        out.retain(|f| f.len() >= self.config.min_samples);
        out
    }

    /// Greedy velocity-aligned sets (each of at least two members).
    pub fn aligned_sets(&self, motions: &[TrackMotion]) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..motions.len()).collect();
        order.sort_by_key(|&i| motions[i].id);

        let moving = |i: usize| motions[i].velocity.norm() >= self.config.min_speed;
        let mut assigned = vec![false; motions.len()];
        let mut sets = Vec::new();
        for (k, &i) in order.iter().enumerate() {
            if assigned[i] || !moving(i) {
                continue;
            }
            let mut set = vec![i];
            for &j in &order[k + 1..] {
                if assigned[j] || !moving(j) {
                    continue;
                }
                if angle_between(&motions[i].velocity, &motions[j].velocity) < self.config.alignment_angle {
                    set.push(j);
                }
            }
            if set.len() >= 2 {
                for &m in &set {
                    assigned[m] = true;
                }
                sets.push(set);
            }
        }
        sets
    }

    pub fn detect(&self, motions: &[TrackMotion]) -> Vec<CoordinatedGroup> {
        let cfg = &self.config;
        if motions.len() < cfg.min_tracks {
            return Vec::new();
        }
        let formations = self.formations(motions);
        let aligned = self.aligned_sets(motions);
        let ids = |idx: &[usize]| -> BTreeSet<TrackId> { idx.iter().map(|&i| motions[i].id).collect() };

        let mut groups = Vec::new();
        let mut reported = vec![false; formations.len()];
        for (fi, formation) in formations.iter().enumerate() {
            let required = 2.min(formation.len() / 2);
            let joined = aligned.iter().any(|set| {
                let common = formation.iter().filter(|m| set.contains(*m)).count();
                common >= required && common > 0
            });
            if joined {
                reported[fi] = true;
                groups.push(CoordinatedGroup {
                    members: ids(formation),
                    formation_type: if formation.len() > 3 {
                        FormationType::Linear
                    } else {
                        FormationType::Cluster
                    },
                    movement_aligned: true,
                    confidence: cfg.aligned_confidence,
                });
            }
        }
        for (fi, formation) in formations.iter().enumerate() {
            if !reported[fi] && formation.len() >= cfg.large_formation {
                groups.push(CoordinatedGroup {
                    members: ids(formation),
                    formation_type: FormationType::LargeFormation,
                    movement_aligned: false,
                    confidence: cfg.large_formation_confidence,
                });
            }
        }
        groups
    }

    /// Groups among tracks observed this frame with enough history.
    pub fn detect_tracks(&self, tracks: &[Track]) -> Vec<CoordinatedGroup> {
        let motions: Vec<TrackMotion> = tracks
            .iter()
            .filter(|t| t.status != TrackStatus::Lost && t.history.len() >= self.config.min_history)
            .filter_map(TrackMotion::from_track)
            .collect();
        self.detect(&motions)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn motion(id: u64, pos: (f64, f64), heading_deg: f64, speed: f64) -> TrackMotion {
        let h = heading_deg.to_radians();
        TrackMotion {
            id: TrackId(id),
            position: Vector2::new(pos.0, pos.1),
            velocity: Vector2::new(h.cos(), h.sin()) * speed,
        }
    }

    #[test]
    fn dbscan_separates_clusters_and_noise() {
        let pts: Vec<_> = [(0.0, 0.0), (3.0, 0.0), (100.0, 100.0), (104.0, 99.0), (500.0, 0.0)]
            .iter()
            .map(|&(x, y)| Vector2::new(x, y))
            .collect();
        let labels = dbscan(&pts, 10.0, 2);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
        assert!(labels[0].is_some() && labels[2].is_some());
        assert_eq!(labels[4], None);
    }

    #[test]
    fn dbscan_chains_through_neighbours() {
        // Each point is within eps of the next only
        let pts: Vec<_> = (0..5).map(|i| Vector2::new(i as f64 * 9.0, 0.0)).collect();
        let labels = dbscan(&pts, 10.0, 2);
        assert!(labels.iter().all(|l| *l == Some(0)));
    }

    #[test]
    fn four_close_tracks_three_aligned() {
        let detector = CoordinationDetector::default();
        let motions = vec![
            motion(1, (0.0, 0.0), 0.0, 5.0),
            motion(2, (3.0, 1.0), 10.0, 5.0),
            motion(3, (1.0, 4.0), 15.0, 4.0),
            motion(4, (4.0, 4.0), 180.0, 5.0),
        ];
        let groups = detector.detect(&motions);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].movement_aligned);
        assert_eq!(groups[0].members.len(), 4);
        assert_eq!(groups[0].formation_type, FormationType::Linear);
    }

    #[test]
    fn unaligned_large_formation_is_reported_with_low_confidence() {
        let detector = CoordinationDetector::default();
        let motions = vec![
            motion(1, (0.0, 0.0), 0.0, 5.0),
            motion(2, (3.0, 1.0), 90.0, 5.0),
            motion(3, (1.0, 4.0), 180.0, 5.0),
            motion(4, (4.0, 4.0), 270.0, 5.0),
        ];
        let groups = detector.detect(&motions);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].formation_type, FormationType::LargeFormation);
        assert!(!groups[0].movement_aligned);
        assert_eq!(groups[0].confidence, 0.6);
    }

    #[test]
    fn small_aligned_pair_is_a_cluster() {
        let detector = CoordinationDetector::default();
        let motions = vec![
            motion(1, (0.0, 0.0), 0.0, 5.0),
            motion(2, (2.0, 0.0), 5.0, 5.0),
            motion(3, (200.0, 0.0), 0.0, 5.0),
        ];
        let groups = detector.detect(&motions);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].formation_type, FormationType::Cluster);
        assert_eq!(
            groups[0].members,
            [TrackId(1), TrackId(2)].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn too_few_tracks_or_stationary() {
        let detector = CoordinationDetector::default();
        let two = vec![motion(1, (0.0, 0.0), 0.0, 5.0), motion(2, (1.0, 0.0), 0.0, 5.0)];
        assert!(detector.detect(&two).is_empty());

        let parked = vec![
            motion(1, (0.0, 0.0), 0.0, 0.1),
            motion(2, (1.0, 0.0), 0.0, 0.1),
            motion(3, (2.0, 0.0), 0.0, 0.1),
        ];
        assert!(detector.aligned_sets(&parked).is_empty());
        assert!(detector.detect(&parked).is_empty());
    }

    #[test]
    fn alignment_threshold_is_strict() {
        let detector = CoordinationDetector::new(CoordinationConfig {
            alignment_angle: 0.0,
            ..CoordinationConfig::default()
        });
        let same_heading = vec![motion(1, (0.0, 0.0), 0.0, 5.0), motion(2, (2.0, 0.0), 0.0, 5.0)];
        assert!(detector.aligned_sets(&same_heading).is_empty());

        let default = CoordinationDetector::default();
        assert_eq!(default.aligned_sets(&same_heading), vec![vec![0, 1]]);
    }
}
