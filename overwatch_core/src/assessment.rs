//! Continuous threat assessment: bounded threat history, injectable clock,
//! alert sink and the background loop that drives [`Engine::tick`].
//!
//! # Design choices
//! - The loop owns no state. Every cycle runs through the engine, which
//!   serializes it against detection ingestion under one lock.
//! - The shutdown channel doubles as the interruptible sleep, so `stop()`
//!   never waits for a full interval. The in-flight cycle always commits its
//!   history record before the thread exits.
//! - Sleep length adapts to the aggregate threat level: busier skies are
//!   assessed more often.

use crate::{
    engine::Engine,
    error::Result,
    prediction::{ThreatPrediction, ThreatSnapshot},
};
use chrono::Timelike;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    /// Minimum seconds between two full analyses
    pub analysis_interval: f64,
    /// Loop sleep at zero threat (s)
    pub base_interval: f64,
    /// Loop sleep floor (s)
    pub min_interval: f64,
    /// How strongly the aggregate level shortens the sleep
    pub interval_gain: f64,
    /// Sleep after a failed cycle (s)
    pub backoff: f64,
    pub history_len: usize,
    /// Records inspected by the aggregate level
    pub aggregate_records: usize,
    /// Threat count at which the aggregate stops gathering
    pub aggregate_threats: usize,
    /// Aggregate level when nothing has been assessed yet
    pub idle_level: f64,
    /// Predicted escalation above which a non-HIGH threat still alerts
    pub alert_escalation: f64,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            analysis_interval: 5.0,
            base_interval: 1.0,
            min_interval: 0.2,
            interval_gain: 0.8,
            backoff: 0.5,
            history_len: 50,
            aggregate_records: 5,
            aggregate_threats: 10,
            idle_level: 0.1,
            alert_escalation: 0.7,
        }
    }
}

impl AssessmentConfig {
    /// `max(min_interval, base_interval − gain·level)`.
    pub fn adaptive_interval(&self, level: f64) -> Duration {
        let level = if level.is_finite() { level.clamp(0.0, 1.0) } else { 0.0 };
        let secs = (self.base_interval - self.interval_gain * level).max(self.min_interval);
        Duration::from_secs_f64(secs.max(0.0))
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Outcome of one assessment cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreatRecord {
    pub timestamp: f64,
    pub threats: Vec<ThreatSnapshot>,
    pub predictions: Vec<ThreatPrediction>,
}

/// FIFO of the most recent assessment records.
#[derive(Clone, Debug)]
pub struct ThreatHistory {
    capacity: usize,
    records: VecDeque<ThreatRecord>,
}

impl ThreatHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    /// Append, evicting the oldest record when full.
    pub fn push(&mut self, record: ThreatRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest(&self) -> Option<&ThreatRecord> {
        self.records.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ThreatRecord> {
        self.records.iter()
    }

    /// Mean level value of the threats in the most recent records.
    ///
    /// Walks back at most `max_records` records and stops once
    /// `max_threats` threats are gathered. `idle` when nothing was seen.
    pub fn aggregate_level(&self, max_records: usize, max_threats: usize, idle: f64) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for record in self.records.iter().rev().take(max_records) {
            for threat in &record.threats {
                sum += threat.level.value();
                count += 1;
            }
            if count >= max_threats {
                break;
            }
        }
        if count == 0 {
            idle
        } else {
            sum / count as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Time source for the engine.
pub trait Clock: Send + Sync {
    /// Monotonic seconds since an arbitrary epoch.
    fn now(&self) -> f64;
    /// Local hour of day, 0–23.
    fn hour(&self) -> u32;
}

/// Wall clock: `Instant` for elapsed time, local time for the hour.
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn hour(&self) -> u32 {
        chrono::Local::now().hour()
    }
}

/// Hand-driven clock for tests and simulation.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<(f64, u32)>,
}

impl ManualClock {
    pub fn new(now: f64, hour: u32) -> Self {
        Self {
            inner: Mutex::new((now, hour % 24)),
        }
    }

    pub fn set(&self, now: f64) {
        self.inner.lock().0 = now;
    }

    pub fn advance(&self, dt: f64) {
        self.inner.lock().0 += dt;
    }

    pub fn set_hour(&self, hour: u32) {
        self.inner.lock().1 = hour % 24;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0.0, 12)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.inner.lock().0
    }

    fn hour(&self) -> u32 {
        self.inner.lock().1
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Receives alerts after the engine lock has been released.
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: &ThreatPrediction) -> Result<()>;
}

/// Writes every alert to the log.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn emit(&self, alert: &ThreatPrediction) -> Result<()> {
        warn!(
            track = %alert.object_id,
            class = %alert.class_name,
            level = %alert.current_threat,
            escalation = alert.predicted_escalation,
            action = %alert.recommended_action,
            "threat alert"
        );
        Ok(())
    }
}

/// Keeps every alert in memory.
#[derive(Debug, Default)]
pub struct CollectingAlertSink {
    alerts: Mutex<Vec<ThreatPrediction>>,
}

impl CollectingAlertSink {
    pub fn alerts(&self) -> Vec<ThreatPrediction> {
        self.alerts.lock().clone()
    }
}

impl AlertSink for CollectingAlertSink {
    fn emit(&self, alert: &ThreatPrediction) -> Result<()> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Background loop
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Full analyses completed
    pub cycles_run: u64,
    pub failed_cycles: u64,
    pub history_len: usize,
}

#[derive(Default)]
struct LoopStats {
    cycles_run: u64,
    failed_cycles: u64,
}

/// Handle to the assessment thread.
pub struct AssessmentLoop {
    stop_tx: Sender<()>,
    handle: JoinHandle<LoopStats>,
    engine: Arc<Engine>,
}

impl AssessmentLoop {
    pub fn spawn(engine: Arc<Engine>) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker = Arc::clone(&engine);
        let handle = thread::spawn(move || {
            debug!("assessment loop started");
            let cfg = worker.config().assessment.clone();
            let mut stats = LoopStats::default();
            loop {
                let sleep = match worker.tick() {
                    Ok(ran) => {
                        if ran.is_some() {
                            stats.cycles_run += 1;
                        }
                        cfg.adaptive_interval(worker.current_threat_level())
                    }
                    Err(e) => {
                        stats.failed_cycles += 1;
                        error!(error = %e, "assessment cycle failed");
                        Duration::from_secs_f64(cfg.backoff.max(0.0))
                    }
                };
                match stop_rx.recv_timeout(sleep) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("assessment loop stopped");
            stats
        });
        Self {
            stop_tx,
            handle,
            engine,
        }
    }

    /// Signal the thread and wait for the in-flight cycle to finish.
    pub fn stop(self) -> ShutdownReport {
        // A full channel means a stop is already pending.
        let _ = self.stop_tx.try_send(());
        let stats = match self.handle.join() {
            Ok(stats) => stats,
            Err(_) => {
                error!("assessment thread panicked");
                LoopStats::default()
            }
        };
        let report = ShutdownReport {
            cycles_run: stats.cycles_run,
            failed_cycles: stats.failed_cycles,
            history_len: self.engine.threat_history().len(),
        };
        info!(
            cycles = report.cycles_run,
            failed = report.failed_cycles,
            history = report.history_len,
            "assessment loop shut down"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{behavior::Behavior, threat::ThreatLevel, types::TrackId};
    use approx::assert_abs_diff_eq;

    fn record(t: f64, levels: &[ThreatLevel]) -> ThreatRecord {
        ThreatRecord {
            timestamp: t,
            threats: levels
                .iter()
                .enumerate()
                .map(|(i, &level)| ThreatSnapshot {
                    track_id: TrackId(i as u64),
                    class_name: "drone".into(),
                    level,
                    score: level.value(),
                    behavior: Behavior::Moving,
                    speed: 0.0,
                    position: [0.0; 3],
                })
                .collect(),
            predictions: Vec::new(),
        }
    }

    #[test]
    fn adaptive_interval_shrinks_with_level() {
        let cfg = AssessmentConfig::default();
        assert_abs_diff_eq!(cfg.adaptive_interval(0.0).as_secs_f64(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(cfg.adaptive_interval(0.5).as_secs_f64(), 0.6, epsilon = 1e-9);
        assert_abs_diff_eq!(cfg.adaptive_interval(1.0).as_secs_f64(), 0.2, epsilon = 1e-9);
        assert!(cfg.adaptive_interval(0.9) >= cfg.adaptive_interval(1.0));
        assert_abs_diff_eq!(cfg.adaptive_interval(f64::NAN).as_secs_f64(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn history_evicts_oldest() {
        let mut history = ThreatHistory::new(3);
        for t in 0..5 {
            history.push(record(t as f64, &[]));
        }
        assert_eq!(history.len(), 3);
        assert_abs_diff_eq!(history.iter().next().map(|r| r.timestamp).unwrap_or(-1.0), 2.0);
        assert_abs_diff_eq!(history.latest().map(|r| r.timestamp).unwrap_or(-1.0), 4.0);
    }

    #[test]
    fn aggregate_level_defaults_and_averages() {
        let mut history = ThreatHistory::new(50);
        assert_abs_diff_eq!(history.aggregate_level(5, 10, 0.1), 0.1);
        history.push(record(0.0, &[ThreatLevel::High, ThreatLevel::Low]));
        assert_abs_diff_eq!(history.aggregate_level(5, 10, 0.1), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn aggregate_level_stops_at_threat_cap() {
        let mut history = ThreatHistory::new(50);
        history.push(record(0.0, &[ThreatLevel::Low; 10]));
        history.push(record(1.0, &[ThreatLevel::High; 10]));
        // Only the newest record is needed to reach ten threats
        assert_abs_diff_eq!(history.aggregate_level(5, 10, 0.1), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn manual_clock_is_settable() {
        let clock = ManualClock::new(10.0, 25);
        assert_eq!(clock.hour(), 1);
        clock.advance(2.5);
        assert_abs_diff_eq!(clock.now(), 12.5);
        clock.set(3.0);
        clock.set_hour(22);
        assert_abs_diff_eq!(clock.now(), 3.0);
        assert_eq!(clock.hour(), 22);
    }
}
