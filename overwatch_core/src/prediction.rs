//! Forecasting: future positions from a track's history, and threat
//! escalation from current state plus per-class historical patterns.

use crate::{
    assessment::ThreatRecord,
    behavior::Behavior,
    threat::{behavior_multiplier, is_armed, ThreatLevel},
    track::HistoryEntry,
    types::TrackId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

// ---------------------------------------------------------------------------
// Position forecast
// ---------------------------------------------------------------------------

/// History entries used to estimate the average velocity.
const FORECAST_WINDOW: usize = 10;
const FORECAST_MIN_HISTORY: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: f64,
    pub position: [f64; 3],
}

/// Linear extrapolation over `horizon` seconds in `steps` equal steps using
/// the average velocity of the last entries.
///
/// Empty when the history is shorter than three entries, when `horizon ≤ 0`
/// or `steps == 0`, or when timestamps do not strictly increase.
pub fn predict_future_positions(
    history: &VecDeque<HistoryEntry>,
    horizon: f64,
    steps: usize,
) -> Vec<ForecastPoint> {
    if history.len() < FORECAST_MIN_HISTORY || steps == 0 || !(horizon > 0.0 && horizon.is_finite()) {
        return Vec::new();
    }
    let recent: Vec<&HistoryEntry> = history
        .iter()
        .skip(history.len().saturating_sub(FORECAST_WINDOW))
        .collect();

    let mut sum = [0.0; 3];
    for pair in recent.windows(2) {
        let dt = pair[1].timestamp - pair[0].timestamp;
        if !(dt > 0.0) {
            return Vec::new();
        }
        for (axis, acc) in sum.iter_mut().enumerate() {
            *acc += (pair[1].position[axis] - pair[0].position[axis]) / dt;
        }
    }
    let n = (recent.len() - 1) as f64;
    let velocity = sum.map(|s| s / n);

    let Some(last) = recent.last() else {
        return Vec::new();
    };
    let dt = horizon / steps as f64;
    (1..=steps)
        .map(|k| {
            let t = k as f64 * dt;
            ForecastPoint {
                timestamp: last.timestamp + t,
                position: [
                    last.position[0] + velocity[0] * t,
                    last.position[1] + velocity[1] * t,
                    last.position[2] + velocity[2] * t,
                ],
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Threat evolution
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendedAction {
    Monitor,
    Intercept,
    Engage,
}

impl RecommendedAction {
    pub fn for_level(level: ThreatLevel) -> Self {
        match level {
            ThreatLevel::Low => RecommendedAction::Monitor,
            ThreatLevel::Medium => RecommendedAction::Intercept,
            ThreatLevel::High => RecommendedAction::Engage,
        }
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A scored object as seen by one assessment cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreatSnapshot {
    pub track_id: TrackId,
    pub class_name: String,
    pub level: ThreatLevel,
    pub score: f64,
    pub behavior: Behavior,
    pub speed: f64,
    pub position: [f64; 3],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreatPrediction {
    pub object_id: TrackId,
    pub class_name: String,
    pub current_threat: ThreatLevel,
    /// Probability-like score in [0, 1]
    pub predicted_escalation: f64,
    /// Seconds
    pub time_to_critical: f64,
    pub recommended_action: RecommendedAction,
    pub confidence: f64,
    pub timestamp: f64,
}

/// Per-class behaviour learned from the threat history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreatPattern {
    /// Fraction of consecutive sightings whose level went up
    pub escalation_rate: f64,
    /// min(1, sightings / 10)
    pub persistence: f64,
    pub average_level: f64,
    pub last_seen: f64,
    pub samples: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// History records needed before any pattern is learned
    pub min_pattern_samples: usize,
    /// Speed at which the speed factor saturates
    pub speed_norm: f64,
    /// Distance beyond which proximity contributes nothing
    pub proximity_norm: f64,
    /// Proximity factor when the platform position is unknown
    pub unknown_proximity: f64,
    pub base_time_to_critical: f64,
    pub min_time_to_critical: f64,
    pub intercept_above: f64,
    pub engage_above: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            min_pattern_samples: 3,
            speed_norm: 50.0,
            proximity_norm: 200.0,
            unknown_proximity: 0.5,
            base_time_to_critical: 300.0,
            min_time_to_critical: 10.0,
            intercept_above: 0.8,
            engage_above: 0.9,
        }
    }
}

/// Learn escalation and persistence per class from past cycles.
///
/// Classes seen fewer than twice get no pattern.
pub fn analyze_threat_patterns<'a, I>(records: I, config: &PredictionConfig) -> BTreeMap<String, ThreatPattern>
where
    I: IntoIterator<Item = &'a ThreatRecord>,
{
    let mut by_class: BTreeMap<String, Vec<(f64, ThreatLevel)>> = BTreeMap::new();
    let mut n_records = 0;
    for record in records {
        n_records += 1;
        for threat in &record.threats {
            by_class
                .entry(threat.class_name.clone())
                .or_default()
                .push((record.timestamp, threat.level));
        }
    }

    if n_records < config.min_pattern_samples {
        return BTreeMap::new();
    }
    by_class
        .into_iter()
        .filter(|(_, seen)| seen.len() >= 2)
        .map(|(class, seen)| {
            let n = seen.len();
            let increases = seen.windows(2).filter(|w| w[1].1 > w[0].1).count();
            let average_level = seen.iter().map(|(_, l)| l.value()).sum::<f64>() / n as f64;
            let last_seen = seen.iter().map(|(t, _)| *t).fold(f64::NEG_INFINITY, f64::max);
            let pattern = ThreatPattern {
                escalation_rate: increases as f64 / (n - 1) as f64,
                persistence: (n as f64 / 10.0).min(1.0),
                average_level,
                last_seen,
                samples: n,
            };
            (class, pattern)
        })
        .collect()
}

fn pattern_factor(pattern: &ThreatPattern) -> f64 {
    if pattern.escalation_rate > 0.5 {
        1.5
    } else if pattern.persistence > 0.7 {
        1.2
    } else {
        1.0
    }
}

/// Mean of the speed, proximity, behavior and armament factors.
pub fn base_escalation(threat: &ThreatSnapshot, platform: Option<[f64; 3]>, config: &PredictionConfig) -> f64 {
    let speed = (threat.speed / config.speed_norm).clamp(0.0, 1.0);
    let proximity = match platform {
        Some(p) => {
            let d = ((threat.position[0] - p[0]).powi(2) + (threat.position[1] - p[1]).powi(2)
                + (threat.position[2] - p[2]).powi(2))
            .sqrt();
            1.0 - (d / config.proximity_norm).min(1.0)
        }
        None => config.unknown_proximity,
    };
    let behavior = ((behavior_multiplier(threat.behavior) - 0.8) / 0.8).clamp(0.0, 1.0);
    let armament = if is_armed(&threat.class_name) { 1.0 } else { 0.0 };
    let base = (speed + proximity + behavior + armament) / 4.0;
    if base.is_finite() {
        base
    } else {
        0.0
    }
}

/// Combine the current threat with its class pattern into a prediction.
pub fn predict_threat_evolution(
    threat: &ThreatSnapshot,
    patterns: &BTreeMap<String, ThreatPattern>,
    platform: Option<[f64; 3]>,
    timestamp: f64,
    config: &PredictionConfig,
) -> ThreatPrediction {
    let base = base_escalation(threat, platform, config);
    let pattern = patterns.get(&threat.class_name);
    let factor = pattern.map_or(1.0, pattern_factor);
    let escalation = (base * factor).min(1.0);

    let level_factor = match threat.level {
        ThreatLevel::Low => 3.0,
        ThreatLevel::Medium => 1.5,
        ThreatLevel::High => 0.5,
    };
    let mut time_to_critical = config.base_time_to_critical * level_factor;
    if escalation > base {
        time_to_critical = (time_to_critical / factor).max(config.min_time_to_critical);
    }

    let mut action = RecommendedAction::for_level(threat.level);
    if escalation > config.intercept_above && action == RecommendedAction::Monitor {
        action = RecommendedAction::Intercept;
    }
    if escalation > config.engage_above && action == RecommendedAction::Intercept {
        action = RecommendedAction::Engage;
    }

    ThreatPrediction {
        object_id: threat.track_id,
        class_name: threat.class_name.clone(),
        current_threat: threat.level,
        predicted_escalation: escalation,
        time_to_critical,
        recommended_action: action,
        confidence: if patterns.is_empty() { 0.5 } else { 0.7 },
        timestamp,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{geometry::BoundingBox, types::FrameId};
    use approx::assert_abs_diff_eq;

    fn entry(t: f64, x: f64, y: f64) -> HistoryEntry {
        HistoryEntry {
            frame: FrameId(t as u64),
            timestamp: t,
            bbox: BoundingBox::around(x, y, 1.0, 1.0),
            position: [x, y, 0.0],
            confidence: 1.0,
        }
    }

    fn snapshot(class_name: &str, level: ThreatLevel) -> ThreatSnapshot {
        ThreatSnapshot {
            track_id: TrackId(1),
            class_name: class_name.into(),
            level,
            score: level.value(),
            behavior: Behavior::Moving,
            speed: 0.0,
            position: [1000.0, 0.0, 0.0],
        }
    }

    fn record(t: f64, threats: Vec<ThreatSnapshot>) -> ThreatRecord {
        ThreatRecord {
            timestamp: t,
            threats,
            predictions: Vec::new(),
        }
    }

    #[test]
    fn forecast_extrapolates_average_velocity() {
        let history: VecDeque<_> = (0..5).map(|i| entry(i as f64, 2.0 * i as f64, 1.0)).collect();
        let out = predict_future_positions(&history, 5.0, 10);
        assert_eq!(out.len(), 10);
        assert_abs_diff_eq!(out[9].timestamp, 9.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out[9].position[0], 18.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out[0].position[1], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn forecast_edge_cases_are_empty() {
        let short: VecDeque<_> = (0..2).map(|i| entry(i as f64, 0.0, 0.0)).collect();
        assert!(predict_future_positions(&short, 5.0, 10).is_empty());

        let history: VecDeque<_> = (0..5).map(|i| entry(i as f64, i as f64, 0.0)).collect();
        assert!(predict_future_positions(&history, 0.0, 10).is_empty());
        assert!(predict_future_positions(&history, 5.0, 0).is_empty());

        let stalled: VecDeque<_> = [entry(0.0, 0.0, 0.0), entry(1.0, 1.0, 0.0), entry(1.0, 2.0, 0.0)]
            .into_iter()
            .collect();
        assert!(predict_future_positions(&stalled, 5.0, 10).is_empty());
    }

    #[test]
    fn patterns_need_three_records_and_two_sightings() {
        let cfg = PredictionConfig::default();
        let history = vec![
            record(0.0, vec![snapshot("truck", ThreatLevel::Low), snapshot("drone", ThreatLevel::Low)]),
            record(5.0, vec![snapshot("truck", ThreatLevel::Medium), snapshot("tank", ThreatLevel::High)]),
            record(10.0, vec![snapshot("truck", ThreatLevel::High), snapshot("drone", ThreatLevel::Low)]),
        ];
        assert!(analyze_threat_patterns(&history[..2], &cfg).is_empty());

        let patterns = analyze_threat_patterns(&history, &cfg);
        assert!(!patterns.contains_key("tank"));
        let drone = &patterns["drone"];
        assert_eq!(drone.samples, 2);
        assert_abs_diff_eq!(drone.escalation_rate, 0.0);
        let truck = &patterns["truck"];
        assert_abs_diff_eq!(truck.escalation_rate, 1.0);
        assert_abs_diff_eq!(truck.persistence, 0.3);
        assert_abs_diff_eq!(truck.average_level, 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(truck.last_seen, 10.0);
    }

    #[test]
    fn any_learned_pattern_raises_confidence() {
        let cfg = PredictionConfig::default();
        let history: Vec<_> = (0..3)
            .map(|i| record(i as f64, vec![snapshot("truck", ThreatLevel::Low)]))
            .collect();
        let patterns = analyze_threat_patterns(&history, &cfg);
        let p = predict_threat_evolution(&snapshot("car", ThreatLevel::Low), &patterns, None, 3.0, &cfg);
        assert_abs_diff_eq!(p.confidence, 0.7);
    }

    #[test]
    fn base_escalation_factors() {
        let cfg = PredictionConfig::default();
        let mut tank = snapshot("tank", ThreatLevel::High);
        tank.speed = 100.0;
        tank.behavior = Behavior::Aggressive;
        tank.position = [0.0, 0.0, 0.0];
        // speed 1, proximity 1, behavior 1, armament 1
        assert_abs_diff_eq!(base_escalation(&tank, Some([0.0; 3]), &cfg), 1.0, epsilon = 1e-12);

        let car = snapshot("car", ThreatLevel::Low);
        // speed 0, proximity 0.5 (unknown), behavior 0.25, armament 0
        assert_abs_diff_eq!(base_escalation(&car, None, &cfg), 0.1875, epsilon = 1e-12);
    }

    #[test]
    fn prediction_without_history() {
        let cfg = PredictionConfig::default();
        let p = predict_threat_evolution(&snapshot("car", ThreatLevel::Low), &BTreeMap::new(), None, 3.0, &cfg);
        assert_eq!(p.recommended_action, RecommendedAction::Monitor);
        assert_abs_diff_eq!(p.time_to_critical, 900.0);
        assert_abs_diff_eq!(p.confidence, 0.5);
        assert_abs_diff_eq!(p.timestamp, 3.0);
    }

    #[test]
    fn escalating_pattern_shortens_time_and_promotes_action() {
        let cfg = PredictionConfig::default();
        let history: Vec<_> = [ThreatLevel::Low, ThreatLevel::Medium, ThreatLevel::High]
            .into_iter()
            .enumerate()
            .map(|(i, l)| record(i as f64, vec![snapshot("weapon", l)]))
            .collect();
        let patterns = analyze_threat_patterns(&history, &cfg);

        let mut threat = snapshot("weapon", ThreatLevel::Low);
        threat.speed = 50.0;
        threat.position = [0.0; 3];
        threat.behavior = Behavior::Approaching;
        // base = (1 + 1 + 0.625 + 1) / 4 = 0.90625, ×1.5 → 1.0
        let p = predict_threat_evolution(&threat, &patterns, Some([0.0; 3]), 0.0, &cfg);
        assert_abs_diff_eq!(p.predicted_escalation, 1.0);
        assert_eq!(p.recommended_action, RecommendedAction::Engage);
        assert_abs_diff_eq!(p.time_to_critical, 600.0);
        assert_abs_diff_eq!(p.confidence, 0.7);
    }
}
