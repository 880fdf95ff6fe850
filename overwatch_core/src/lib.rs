//! `overwatch_core` — Tracking, platform fusion and threat assessment.
//!
//! # Module layout
//! - [`types`]         — IDs, sensor sources, detection records and measurements
//! - [`geometry`]      — Bounding boxes, IoU, vector angles
//! - [`kf`] / [`ekf`]  — Linear and extended Kalman updates
//! - [`estimator`]     — Per-object / per-platform state estimator
//! - [`fusion`]        — GPS / IMU / LiDAR platform fusion, obstacle paths
//! - [`track`]         — Track struct, status and history
//! - [`association`]   — IoU matrix and greedy matching
//! - [`track_manager`] — Birth / hit / miss / deletion logic
//! - [`tracker`]       — Per-frame tracker cycle
//! - [`behavior`]      — Behavior labels, rapid movement, movement patterns
//! - [`threat`]        — Threat scorer and context rules
//! - [`coordination`]  — Formation and velocity-alignment groups
//! - [`prediction`]    — Position forecast and threat evolution
//! - [`assessment`]    — Threat history, clocks, alert sinks, background loop
//! - [`engine`]        — Facade owning all state under one lock

pub mod assessment;
pub mod association;
pub mod behavior;
pub mod coordination;
pub mod ekf;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod fusion;
pub mod geometry;
pub mod kf;
pub mod prediction;
pub mod threat;
pub mod track;
pub mod track_manager;
pub mod tracker;
pub mod types;

pub use assessment::{
    AlertSink, AssessmentConfig, AssessmentLoop, Clock, CollectingAlertSink, LogAlertSink, ManualClock,
    ShutdownReport, SystemClock, ThreatHistory, ThreatRecord,
};
pub use behavior::{Behavior, BehaviorClassifier, BehaviorConfig, MovementPattern};
pub use coordination::{CoordinatedGroup, CoordinationConfig, CoordinationDetector, FormationType};
pub use engine::{Engine, EngineConfig};
pub use error::{CoreError, Result};
pub use fusion::{FusedPose, FusionConfig, Obstacle};
pub use geometry::{angle_between, iou, BoundingBox};
pub use prediction::{predict_future_positions, ForecastPoint, RecommendedAction, ThreatPrediction};
pub use threat::{
    EnvironmentContext, MissionContext, ThreatContext, ThreatInput, ThreatLevel, ThreatScore, ThreatScorer,
};
pub use track::{HistoryEntry, Track, TrackStatus};
pub use tracker::{FrameReport, MultiObjectTracker};
pub use types::{Detection, DetectionRecord, FrameId, Measurement, SensorSource, TrackId};
