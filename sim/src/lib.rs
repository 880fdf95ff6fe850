//! `sim` — Scenario simulator: target trajectories, detector frames, replay.

pub mod detector_sim;
pub mod replay;
pub mod scenarios;
pub mod target;

pub use detector_sim::{DetectorParams, DetectorSimulator, PlatformPath};
pub use replay::{load_replay, save_replay, ReplayLog, SimFrame};
pub use scenarios::{Scenario, ScenarioKind};
pub use target::{MotionSpec, Target};
