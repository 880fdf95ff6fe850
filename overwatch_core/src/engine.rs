//! Engine facade: the single owner of all mutable tracking state.
//!
//! # Design choices
//! - One `parking_lot::Mutex` guards [`EngineState`]. Each detector frame and
//!   each assessment cycle runs under exactly one critical section, so
//!   association always sees a consistent track table.
//! - Sensor readings are queued on arrival and fused on the next tick.
//!   Radar target lists become range detections for the next frame.
//! - Alerts are handed to the [`AlertSink`] after the lock is released.

use crate::{
    assessment::{AlertSink, AssessmentConfig, Clock, LogAlertSink, SystemClock, ThreatHistory, ThreatRecord},
    behavior::{BehaviorClassifier, BehaviorConfig},
    coordination::{CoordinatedGroup, CoordinationConfig, CoordinationDetector},
    error::{CoreError, Result},
    estimator::ProjectedPoint,
    fusion::{FusedPose, FusionConfig, PlatformFusion},
    prediction::{
        analyze_threat_patterns, predict_future_positions, predict_threat_evolution, PredictionConfig,
        ThreatPrediction, ThreatSnapshot,
    },
    threat::{EnvironmentContext, MissionContext, ThreatContext, ThreatInput, ThreatLevel, ThreatScorer},
    track::{HistoryEntry, Track},
    track_manager::TrackManagerConfig,
    tracker::{FrameReport, MultiObjectTracker},
    types::{DetectionRecord, FrameId, TrackId},
};
use nalgebra::Vector2;
use sensor_models::{SensorKind, SensorPayload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Complete engine configuration; every field falls back to its default.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tracking: TrackManagerConfig,
    pub behavior: BehaviorConfig,
    pub coordination: CoordinationConfig,
    pub prediction: PredictionConfig,
    pub assessment: AssessmentConfig,
    pub fusion: FusionConfig,
    /// Forecast attached to each track (s)
    pub forecast_horizon: f64,
    pub forecast_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tracking: TrackManagerConfig::default(),
            behavior: BehaviorConfig::default(),
            coordination: CoordinationConfig::default(),
            prediction: PredictionConfig::default(),
            assessment: AssessmentConfig::default(),
            fusion: FusionConfig::default(),
            forecast_horizon: 5.0,
            forecast_steps: 10,
        }
    }
}

struct EngineState {
    tracker: MultiObjectTracker,
    fusion: PlatformFusion,
    /// Readings waiting for the next tick, with arrival time
    pending_readings: Vec<(SensorPayload, f64)>,
    /// Radar returns waiting for the next frame
    pending_radar: Vec<DetectionRecord>,
    groups: Vec<CoordinatedGroup>,
    alerts: Vec<ThreatPrediction>,
    history: ThreatHistory,
    mission: MissionContext,
    environment: EnvironmentContext,
    last_analysis: Option<f64>,
    next_radar_id: u64,
}

pub struct Engine {
    config: EngineConfig,
    scorer: ThreatScorer,
    classifier: BehaviorClassifier,
    coordination: CoordinationDetector,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn AlertSink>,
    state: parking_lot::Mutex<EngineState>,
}

impl Engine {
    /// Engine on the wall clock, logging its alerts.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_parts(
            config,
            ThreatScorer::default(),
            Arc::new(SystemClock::default()),
            Arc::new(LogAlertSink),
        )
    }

    pub fn with_parts(
        config: EngineConfig,
        scorer: ThreatScorer,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        let state = EngineState {
            tracker: MultiObjectTracker::new(config.tracking.clone()),
            fusion: PlatformFusion::new(config.fusion.clone()),
            pending_readings: Vec::new(),
            pending_radar: Vec::new(),
            groups: Vec::new(),
            alerts: Vec::new(),
            history: ThreatHistory::new(config.assessment.history_len),
            mission: MissionContext::default(),
            environment: EnvironmentContext::default(),
            last_analysis: None,
            next_radar_id: 0,
        };
        Self {
            classifier: BehaviorClassifier::new(config.behavior.clone()),
            coordination: CoordinationDetector::new(config.coordination.clone()),
            scorer,
            clock,
            sink,
            state: parking_lot::Mutex::new(state),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn context(&self, state: &EngineState) -> ThreatContext {
        ThreatContext {
            hour: self.clock.hour(),
            mission: state.mission,
            environment: state.environment,
        }
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Run one detector frame (plus any queued radar returns) through the
    /// tracker and re-annotate every track.
    pub fn submit_detections(&self, frame: FrameId, mut records: Vec<DetectionRecord>) -> FrameReport {
        let mut state = self.state.lock();
        if !state.pending_radar.is_empty() {
            records.append(&mut state.pending_radar);
        }
        let report = state.tracker.process_frame(frame, &records);
        self.annotate(&mut state);
        report
    }

    /// Queue a typed sensor reading.
    pub fn update_sensor(&self, payload: SensorPayload) -> Result<()> {
        payload.validate()?;
        let now = self.clock.now();
        let mut state = self.state.lock();
        match payload {
            SensorPayload::Radar(report) => {
                let mut queued = 0;
                for target in report.targets.iter().filter(|t| t.is_finite()) {
                    let id = state.next_radar_id;
                    state.next_radar_id += 1;
                    let class_name = target.class_name.as_deref().unwrap_or("unknown");
                    let mut record = DetectionRecord::radar(class_name, target.position, Some(target.velocity), now);
                    record.id = id;
                    record.confidence = target.confidence;
                    state.pending_radar.push(record);
                    queued += 1;
                }
                debug!(queued, "radar targets queued");
            }
            other => state.pending_readings.push((other, now)),
        }
        Ok(())
    }

    /// Queue a flat reading, e.g. `("gps", [lat, lon, alt])`.
    pub fn update_sensor_values(&self, kind: &str, values: &[f64]) -> Result<()> {
        let kind: SensorKind = kind.parse()?;
        self.update_sensor(SensorPayload::from_values(kind, values)?)
    }

    pub fn update_mission_context(&self, tag: &str) -> Result<()> {
        let mission: MissionContext = tag.parse()?;
        self.state.lock().mission = mission;
        info!(?mission, "mission context updated");
        Ok(())
    }

    pub fn update_environment_context(&self, tag: &str) -> Result<()> {
        let environment: EnvironmentContext = tag.parse()?;
        self.state.lock().environment = environment;
        info!(?environment, "environment context updated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Analysis
    // -----------------------------------------------------------------------

    fn annotate(&self, state: &mut EngineState) {
        let EngineState {
            tracker, fusion, groups, mission, environment, ..
        } = state;
        let ctx = ThreatContext {
            hour: self.clock.hour(),
            mission: *mission,
            environment: *environment,
        };

        *groups = self.coordination.detect_tracks(tracker.tracks());
        let grouped: BTreeSet<TrackId> = groups.iter().flat_map(|g| g.members.iter().copied()).collect();
        let platform = fusion.position().map(|p| Vector2::new(p[0], p[1]));

        for track in tracker.tracks_mut() {
            let centers = track.centers();
            track.behavior = self.classifier.classify(&centers, platform);
            let rapid = self.classifier.rapid_movement(&centers);
            track.movement_pattern =
                self.classifier
                    .movement_pattern(track.behavior, rapid.as_ref(), grouped.contains(&track.id));
            self.rescore(track, &ctx);
            track.predicted_positions =
                predict_future_positions(&track.history, self.config.forecast_horizon, self.config.forecast_steps);
        }
    }

    fn rescore(&self, track: &mut Track, ctx: &ThreatContext) {
        let input = ThreatInput {
            class_name: &track.class_name,
            confidence: track.confidence,
            source: track.source,
            behavior: Some(track.behavior),
            pattern: Some(track.movement_pattern),
        };
        let scored = self.scorer.score(&input, ctx);
        track.threat_score = scored.score;
        track.threat_level = scored.level;
    }

    /// Fuse queued readings. Rejected readings are logged and dropped.
    pub fn fuse_pending(&self) -> usize {
        Self::fuse_locked(&mut self.state.lock())
    }

    fn fuse_locked(state: &mut EngineState) -> usize {
        let pending = std::mem::take(&mut state.pending_readings);
        let mut fused = 0;
        for (payload, t) in &pending {
            match state.fusion.ingest(payload, *t) {
                Ok(()) => fused += 1,
                Err(e) => warn!(kind = %payload.kind(), error = %e, "sensor reading dropped"),
            }
        }
        fused
    }

    /// Fuse pending readings, then run a full analysis if one is due.
    ///
    /// Fusion and analysis share one critical section.
    pub fn tick(&self) -> Result<Option<ThreatRecord>> {
        let now = self.checked_now()?;
        let (record, alerts) = {
            let mut state = self.state.lock();
            Self::fuse_locked(&mut state);
            let due = match state.last_analysis {
                Some(last) => now - last >= self.config.assessment.analysis_interval,
                None => true,
            };
            if !due {
                return Ok(None);
            }
            self.assess_locked(&mut state, now)
        };
        self.deliver(&alerts)?;
        Ok(Some(record))
    }

    /// Snapshot the current threats, predict their evolution, record the
    /// cycle and emit alerts.
    pub fn run_assessment_cycle(&self) -> Result<ThreatRecord> {
        let now = self.checked_now()?;
        let (record, alerts) = self.assess_locked(&mut self.state.lock(), now);
        self.deliver(&alerts)?;
        Ok(record)
    }

    fn checked_now(&self) -> Result<f64> {
        let now = self.clock.now();
        if now.is_finite() {
            Ok(now)
        } else {
            Err(CoreError::NumericDegenerate("clock returned a non-finite time"))
        }
    }

    fn assess_locked(&self, state: &mut EngineState, now: f64) -> (ThreatRecord, Vec<ThreatPrediction>) {
        let ctx = self.context(state);
        let EngineState {
            tracker, fusion, history, alerts, last_analysis, ..
        } = state;

        // Step 1: re-evaluate every track under the current context
        let mut threats = Vec::with_capacity(tracker.tracks().len());
        for track in tracker.tracks_mut() {
            self.rescore(track, &ctx);
            threats.push(ThreatSnapshot {
                track_id: track.id,
                class_name: track.class_name.clone(),
                level: track.threat_level,
                score: track.threat_score,
                behavior: track.behavior,
                speed: track.speed(),
                position: track.position,
            });
        }
        *last_analysis = Some(now);

        // Idle cycles leave the history untouched
        if threats.is_empty() {
            alerts.clear();
            debug!(history = history.len(), "assessment cycle idle");
            return (
                ThreatRecord {
                    timestamp: now,
                    threats,
                    predictions: Vec::new(),
                },
                Vec::new(),
            );
        }

        // Step 2: per-class patterns from the history so far
        let patterns = analyze_threat_patterns(history.iter(), &self.config.prediction);

        // Step 3: predictions and alert selection
        let platform = fusion.position();
        let predictions: Vec<ThreatPrediction> = threats
            .iter()
            .map(|t| predict_threat_evolution(t, &patterns, platform, now, &self.config.prediction))
            .collect();
        *alerts = predictions
            .iter()
            .filter(|p| {
                p.current_threat == ThreatLevel::High
                    || p.predicted_escalation > self.config.assessment.alert_escalation
            })
            .cloned()
            .collect();

        // Step 4: commit
        let record = ThreatRecord {
            timestamp: now,
            threats,
            predictions,
        };
        history.push(record.clone());
        info!(
            threats = record.threats.len(),
            alerts = alerts.len(),
            history = history.len(),
            "assessment cycle complete"
        );
        (record, alerts.clone())
    }

    /// Offer every alert to the sink; failures are logged and reported once.
    fn deliver(&self, alerts: &[ThreatPrediction]) -> Result<()> {
        let mut failed = 0;
        let mut first_error = None;
        for alert in alerts {
            if let Err(e) = self.sink.emit(alert) {
                error!(track = %alert.object_id, class = %alert.class_name, error = %e, "alert delivery failed");
                failed += 1;
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(CoreError::AlertDelivery(format!(
                "{failed} of {} alerts undelivered, first: {e}",
                alerts.len()
            ))),
        }
    }

    /// Track an external obstacle and project its path.
    pub fn predict_obstacle_path(
        &self,
        id: u64,
        position: [f64; 3],
        velocity: [f64; 3],
        horizon: f64,
    ) -> Result<Vec<ProjectedPoint>> {
        self.state
            .lock()
            .fusion
            .predict_obstacle_path(id, position, velocity, horizon)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_active_tracks(&self) -> Vec<Track> {
        self.state.lock().tracker.tracks().to_vec()
    }

    /// Alerts of the latest assessment cycle.
    pub fn get_threat_alerts(&self) -> Vec<ThreatPrediction> {
        self.state.lock().alerts.clone()
    }

    /// Groups found on the latest frame.
    pub fn get_coordinated_groups(&self) -> Vec<CoordinatedGroup> {
        self.state.lock().groups.clone()
    }

    pub fn fused_pose(&self) -> Option<FusedPose> {
        self.state.lock().fusion.pose().cloned()
    }

    pub fn current_threat_level(&self) -> f64 {
        let cfg = &self.config.assessment;
        self.state
            .lock()
            .history
            .aggregate_level(cfg.aggregate_records, cfg.aggregate_threats, cfg.idle_level)
    }

    /// Assessment records, oldest first.
    pub fn threat_history(&self) -> Vec<ThreatRecord> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// The last `max` history entries of a track, oldest first.
    pub fn get_track_history(&self, id: TrackId, max: usize) -> Vec<HistoryEntry> {
        let state = self.state.lock();
        state
            .tracker
            .track(id)
            .map(|t| {
                let skip = t.history.len().saturating_sub(max);
                t.history.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assessment::{CollectingAlertSink, ManualClock},
        behavior::Behavior,
        prediction::base_escalation,
        types::SensorSource,
    };
    use sensor_models::{RadarReport, RadarTarget};

    fn engine() -> (Engine, Arc<ManualClock>, Arc<CollectingAlertSink>) {
        let clock = Arc::new(ManualClock::default());
        let sink = Arc::new(CollectingAlertSink::default());
        let engine = Engine::with_parts(EngineConfig::default(), ThreatScorer::default(), clock.clone(), sink.clone());
        (engine, clock, sink)
    }

    fn visual(class_name: &str, conf: f64, x: f64, t: f64) -> DetectionRecord {
        DetectionRecord::image(SensorSource::Visual, class_name, conf, [x, 0.0, x + 20.0, 40.0], t)
    }

    #[test]
    fn behavior_is_unclassified_until_three_frames() {
        let (engine, _, _) = engine();
        engine.submit_detections(FrameId(0), vec![visual("person", 0.9, 0.0, 0.0)]);
        engine.submit_detections(FrameId(1), vec![visual("person", 0.9, 2.0, 1.0)]);
        let tracks = engine.get_active_tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].behavior, Behavior::Unclassified);
        assert!(tracks[0].predicted_positions.is_empty());

        engine.submit_detections(FrameId(2), vec![visual("person", 0.9, 4.0, 2.0)]);
        let tracks = engine.get_active_tracks();
        assert_eq!(tracks[0].behavior, Behavior::Moving);
        assert_eq!(tracks[0].predicted_positions.len(), 10);
    }

    #[test]
    fn radar_targets_join_the_next_frame() {
        let (engine, _, _) = engine();
        let report = RadarReport {
            targets: vec![RadarTarget {
                position: [100.0, 50.0, 0.0],
                velocity: [1.0, 0.0, 0.0],
                class_name: Some("drone".into()),
                confidence: Some(0.8),
            }],
        };
        engine.update_sensor(SensorPayload::Radar(report)).unwrap();
        assert!(engine.get_active_tracks().is_empty());

        let frame = engine.submit_detections(FrameId(0), Vec::new());
        assert_eq!(frame.births.len(), 1);
        let tracks = engine.get_active_tracks();
        assert_eq!(tracks[0].source, SensorSource::Radar);
        assert_eq!(tracks[0].class_name, "drone");
    }

    #[test]
    fn gps_reading_fuses_on_tick() {
        let (engine, _, _) = engine();
        engine.update_sensor_values("gps", &[48.0, 2.0, 100.0]).unwrap();
        assert!(engine.fused_pose().is_none());
        engine.tick().unwrap();
        assert!(engine.fused_pose().is_some());
    }

    #[test]
    fn tick_analyses_against_the_pose_it_just_fused() {
        let (engine, _, _) = engine();
        let tank = DetectionRecord::image(SensorSource::Thermal, "tank", 0.9, [0.0, 0.0, 30.0, 20.0], 0.0);
        engine.submit_detections(FrameId(0), vec![tank]);
        engine.update_sensor_values("gps", &[48.0, 2.0, 100.0]).unwrap();

        let record = engine.tick().unwrap().expect("first tick analyses");
        let platform = engine.fused_pose().map(|p| p.position);
        assert!(platform.is_some());
        let expected = base_escalation(&record.threats[0], platform, &engine.config().prediction).min(1.0);
        assert!((record.predictions[0].predicted_escalation - expected).abs() < 1e-12);
    }

    #[test]
    fn bad_sensor_and_context_tags_are_rejected() {
        let (engine, _, _) = engine();
        assert!(matches!(
            engine.update_sensor_values("sonar", &[1.0]),
            Err(CoreError::UnknownSensor(_))
        ));
        assert!(engine.update_sensor_values("gps", &[1.0]).is_err());
        assert!(matches!(
            engine.update_mission_context("picnic"),
            Err(CoreError::UnknownContext(_))
        ));
        assert!(engine.update_mission_context("high_security").is_ok());
        assert!(engine.update_environment_context("urban").is_ok());
    }

    #[test]
    fn analysis_runs_on_its_interval() {
        let (engine, clock, _) = engine();
        engine.submit_detections(FrameId(0), vec![visual("car", 0.5, 0.0, 0.0)]);
        assert!(engine.tick().unwrap().is_some());
        clock.advance(2.0);
        assert!(engine.tick().unwrap().is_none());
        clock.advance(3.0);
        assert!(engine.tick().unwrap().is_some());
        assert_eq!(engine.threat_history().len(), 2);
    }

    #[test]
    fn high_threat_reaches_the_sink() {
        let (engine, _, sink) = engine();
        let tank = DetectionRecord::image(SensorSource::Thermal, "tank", 0.9, [0.0, 0.0, 30.0, 20.0], 0.0);
        engine.submit_detections(FrameId(0), vec![tank]);
        let record = engine.run_assessment_cycle().unwrap();
        assert_eq!(record.threats.len(), 1);
        assert_eq!(record.threats[0].level, ThreatLevel::High);
        assert_eq!(engine.get_threat_alerts().len(), 1);
        assert_eq!(sink.alerts().len(), 1);
        assert!(engine.current_threat_level() > 0.9);
    }

    #[test]
    fn track_history_is_truncated_to_max() {
        let (engine, _, _) = engine();
        for f in 0..6 {
            engine.submit_detections(FrameId(f), vec![visual("person", 0.9, f as f64, f as f64)]);
        }
        let id = engine.get_active_tracks()[0].id;
        let recent = engine.get_track_history(id, 4);
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[3].frame, FrameId(5));
        assert!(engine.get_track_history(TrackId(999), 4).is_empty());
    }

    /// Refuses its first alert, accepts the rest.
    #[derive(Default)]
    struct FailOnceSink {
        attempts: parking_lot::Mutex<Vec<String>>,
    }

    impl AlertSink for FailOnceSink {
        fn emit(&self, alert: &ThreatPrediction) -> Result<()> {
            let mut attempts = self.attempts.lock();
            attempts.push(alert.class_name.clone());
            if attempts.len() == 1 {
                Err(CoreError::AlertDelivery("link down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn failed_alert_does_not_block_the_rest() {
        let sink = Arc::new(FailOnceSink::default());
        let engine = Engine::with_parts(
            EngineConfig::default(),
            ThreatScorer::default(),
            Arc::new(ManualClock::default()),
            sink.clone(),
        );
        let tank = DetectionRecord::image(SensorSource::Thermal, "tank", 0.9, [0.0, 0.0, 30.0, 20.0], 0.0);
        let missile =
            DetectionRecord::image(SensorSource::Thermal, "missile", 0.9, [200.0, 200.0, 210.0, 205.0], 0.0);
        engine.submit_detections(FrameId(0), vec![tank, missile]);

        let result = engine.run_assessment_cycle();
        assert!(matches!(result, Err(CoreError::AlertDelivery(_))));
        assert_eq!(engine.get_threat_alerts().len(), 2);
        assert_eq!(*sink.attempts.lock(), vec!["tank".to_string(), "missile".to_string()]);
        // The cycle was still committed
        assert_eq!(engine.threat_history().len(), 1);
    }

    #[test]
    fn idle_cycles_leave_history_alone() {
        let (engine, clock, _) = engine();
        let truck = DetectionRecord::image(SensorSource::Visual, "truck", 0.9, [0.0, 0.0, 30.0, 20.0], 0.0);
        engine.submit_detections(FrameId(0), vec![truck]);
        engine.run_assessment_cycle().unwrap();

        for f in 1..40 {
            engine.submit_detections(FrameId(f), Vec::new());
        }
        assert!(engine.get_active_tracks().is_empty());

        for _ in 0..60 {
            clock.advance(5.0);
            let record = engine.tick().unwrap().expect("analysis due");
            assert!(record.threats.is_empty());
        }
        let history = engine.threat_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].threats[0].class_name, "truck");
        assert!(engine.get_threat_alerts().is_empty());
    }

    fn square(class_name: &str, cx: f64, cy: f64, t: f64) -> DetectionRecord {
        DetectionRecord::image(SensorSource::Visual, class_name, 0.8, [cx - 2.0, cy - 2.0, cx + 2.0, cy + 2.0], t)
    }

    #[test]
    fn newcomer_cannot_complete_a_group() {
        let (engine, _, _) = engine();
        for f in 0..3u64 {
            let t = f as f64;
            engine.submit_detections(FrameId(f), vec![square("vehicle", t, 0.0, t), square("vehicle", 6.0 + t, 0.0, t)]);
        }
        engine.submit_detections(
            FrameId(3),
            vec![
                square("vehicle", 3.0, 0.0, 3.0),
                square("vehicle", 9.0, 0.0, 3.0),
                square("vehicle", 6.0, 6.0, 3.0),
            ],
        );
        let tracks = engine.get_active_tracks();
        assert_eq!(tracks.len(), 3);
        assert!(tracks.iter().any(|t| t.history.len() == 1));
        assert!(engine.get_coordinated_groups().is_empty());

        // Two more frames give the newcomer enough history to join
        for f in 4..6u64 {
            let t = f as f64;
            engine.submit_detections(
                FrameId(f),
                vec![
                    square("vehicle", t, 0.0, t),
                    square("vehicle", 6.0 + t, 0.0, t),
                    square("vehicle", 3.0 + t, 6.0, t),
                ],
            );
        }
        let groups = engine.get_coordinated_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 3);
    }
}
