//! Replay: serialize/deserialize scenario logs for offline runs.

use overwatch_core::types::DetectionRecord;
use sensor_models::SensorPayload;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// A full recorded scenario run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayLog {
    pub scenario_name: String,
    pub seed: u64,
    pub frame_dt: f64,
    pub mission: String,
    pub environment: String,
    pub hour: u32,
    /// Detector frames in chronological order
    pub frames: Vec<SimFrame>,
    /// Ground-truth target states, one entry per frame
    pub ground_truth: Vec<GroundTruthFrame>,
}

/// Everything delivered to the engine for one frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimFrame {
    pub index: u64,
    pub time: f64,
    /// Platform telemetry and radar reports, delivered before the detections
    pub sensors: Vec<SensorPayload>,
    pub detections: Vec<DetectionRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroundTruthFrame {
    pub time: f64,
    pub targets: Vec<TargetState>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetState {
    pub id: u64,
    pub class_name: String,
    pub state: [f64; 4],
}

/// Save a replay log to a JSON file.
pub fn save_replay(log: &ReplayLog, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, log)?;
    Ok(())
}

/// Load a replay log from a JSON file.
pub fn load_replay(path: &Path) -> anyhow::Result<ReplayLog> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let log: ReplayLog = serde_json::from_reader(reader)?;
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::{Scenario, ScenarioKind};

    #[test]
    fn save_then_load_preserves_frames() {
        let log = Scenario::build(ScenarioKind::Intrusion, 9).generate();
        let path = std::env::temp_dir().join(format!("overwatch_replay_{}.json", std::process::id()));
        save_replay(&log, &path).unwrap();
        let loaded = load_replay(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.scenario_name, "intrusion");
        assert_eq!(loaded.frames.len(), log.frames.len());
        let ids = |l: &ReplayLog| l.frames[3].detections.iter().map(|d| d.id).collect::<Vec<_>>();
        assert_eq!(ids(&loaded), ids(&log));
        assert_eq!(loaded.mission, "restricted_airspace");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_replay(Path::new("/nonexistent/overwatch.json")).is_err());
    }
}
