//! Scenario definitions.
//!
//! Each scenario is a named set of targets, a detector model, a platform
//! path and the mission context the engine should run under. All scenarios
//! are deterministic given the same seed.

use crate::{
    detector_sim::{DetectorParams, DetectorSimulator, PlatformPath},
    replay::{GroundTruthFrame, ReplayLog, SimFrame, TargetState},
    target::{MotionSpec, Target},
};
use overwatch_core::types::SensorSource;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Which pre-defined scenario to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// Armored column moving in formation at night, with a circling drone
    Convoy,
    /// Radar drone closing on the platform, armed person on camera
    Intrusion,
    /// Urban daytime crowd of cars, bicycles, people and animals
    CivilianMix,
    /// Intermittent detector with a long blackout on one target
    Dropout,
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    /// Number of detector frames
    pub frames: usize,
    /// Time between frames (s)
    pub frame_dt: f64,
    pub mission: String,
    pub environment: String,
    /// Local hour the scenario is set at
    pub hour: u32,
    pub detector: DetectorParams,
    pub platform: PlatformPath,
    pub targets: Vec<Target>,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::Convoy => Self::convoy(seed),
            ScenarioKind::Intrusion => Self::intrusion(seed),
            ScenarioKind::CivilianMix => Self::civilian_mix(seed),
            ScenarioKind::Dropout => Self::dropout(seed),
        }
    }

    fn base(name: &str, seed: u64, frames: usize) -> Self {
        Scenario {
            name: name.into(),
            seed,
            frames,
            frame_dt: 1.0,
            mission: "general".into(),
            environment: "normal".into(),
            hour: 12,
            detector: DetectorParams::default(),
            platform: PlatformPath::default(),
            targets: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 1: Convoy
    // -----------------------------------------------------------------------
    fn convoy(seed: u64) -> Self {
        let mut s = Self::base("convoy", seed, 40);
        s.mission = "border_patrol".into();
        s.environment = "border".into();
        s.hour = 22;
        s.detector.p_detection = 1.0;

        // Column of 6×6 boxes spaced 8 px apart, 2 px/s eastward
        s.targets = (0..4)
            .map(|i| {
                Target::camera(
                    i,
                    "military_vehicle",
                    SensorSource::Thermal,
                    [100.0 + 8.0 * i as f64, 300.0, 2.0, 0.0],
                    [6.0, 6.0],
                )
            })
            .collect();
        s.targets.push(
            Target::camera(4, "drone", SensorSource::Visual, [500.0, 150.0, 3.0, 0.0], [20.0, 20.0])
                .with_motion(MotionSpec::ConstantTurn { omega: 0.4 }),
        );
        s
    }

    // -----------------------------------------------------------------------
    // Scenario 2: Intrusion
    // -----------------------------------------------------------------------
    fn intrusion(seed: u64) -> Self {
        let mut s = Self::base("intrusion", seed, 30);
        s.mission = "restricted_airspace".into();
        s.platform.obstacle = Some([6.0, std::f64::consts::FRAC_PI_4]);
        s.detector.p_detection = 1.0;

        // Closes on the platform origin at 22 m/s
        s.targets.push(
            Target::radar(0, "drone", [480.0, 360.0, 0.0, 0.0]).with_motion(MotionSpec::Seek {
                goal: [0.0, 0.0],
                speed: 22.0,
            }),
        );
        s.targets.push(
            Target::camera(1, "armed_person", SensorSource::Visual, [200.0, 400.0, 1.5, -0.5], [16.0, 40.0])
                .with_motion(MotionSpec::Zigzag { period: 3.0 }),
        );
        s
    }

    // -----------------------------------------------------------------------
    // Scenario 3: Civilian mix
    // -----------------------------------------------------------------------
    fn civilian_mix(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
        let mut s = Self::base("civilian_mix", seed, 60);
        s.environment = "urban".into();
        s.hour = 14;
        s.detector.clutter_rate = 0.3;

        let classes: [(&str, [f64; 2], f64); 4] = [
            ("car", [40.0, 20.0], 4.0),
            ("bicycle", [14.0, 20.0], 2.0),
            ("civilian", [12.0, 30.0], 1.0),
            ("animal", [16.0, 12.0], 1.5),
        ];
        s.targets = (0..12)
            .map(|i| {
                let (class_name, size, speed) = classes[i % classes.len()];
                let x = 60.0 + rng.gen::<f64>() * 680.0;
                let y = 60.0 + rng.gen::<f64>() * 480.0;
                let heading = rng.gen::<f64>() * std::f64::consts::TAU;
                let motion = if class_name == "animal" {
                    MotionSpec::RandomWalk { kick: 0.3 }
                } else {
                    MotionSpec::ConstantVelocity
                };
                Target::camera(
                    i as u64,
                    class_name,
                    SensorSource::Visual,
                    [x, y, speed * heading.cos(), speed * heading.sin()],
                    size,
                )
                .with_motion(motion)
            })
            .collect();
        s
    }

    // -----------------------------------------------------------------------
    // Scenario 4: Dropout
    // -----------------------------------------------------------------------
    fn dropout(seed: u64) -> Self {
        let mut s = Self::base("dropout", seed, 80);
        s.mission = "surveillance".into();
        s.detector.p_detection = 0.7;

        s.targets = vec![
            Target::camera(0, "person", SensorSource::Visual, [150.0, 200.0, 1.0, 0.0], [20.0, 40.0]),
            Target::camera(1, "truck", SensorSource::Thermal, [400.0, 350.0, -2.0, 0.0], [50.0, 30.0]),
            Target::camera(2, "person", SensorSource::Visual, [600.0, 100.0, 0.0, 0.0], [20.0, 40.0])
                .with_motion(MotionSpec::Stationary),
        ];
        // Longer than the miss limit: the track dies and is reborn
        s.targets[2].blackout = Some((10.0, 45.0));
        s.targets[1].disappear_at = Some(60.0);
        s
    }

    /// Run the scenario and record every frame plus ground truth.
    pub fn generate(&self) -> ReplayLog {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut sim = DetectorSimulator::new(self.detector.clone(), self.platform.clone(), self.seed.wrapping_add(2));
        let mut targets = self.targets.clone();
        let mut frames = Vec::with_capacity(self.frames);
        let mut ground_truth = Vec::with_capacity(self.frames);

        for k in 0..self.frames {
            let t = k as f64 * self.frame_dt;
            let mut sensors = sim.telemetry(t);
            if let Some(report) = sim.radar_report(&targets, t) {
                sensors.push(sensor_models::SensorPayload::Radar(report));
            }
            frames.push(SimFrame {
                index: k as u64,
                time: t,
                sensors,
                detections: sim.detections(&targets, t),
            });
            ground_truth.push(GroundTruthFrame {
                time: t,
                targets: targets
                    .iter()
                    .filter(|tg| tg.is_active(t))
                    .map(|tg| TargetState {
                        id: tg.id,
                        class_name: tg.class_name.clone(),
                        state: tg.state,
                    })
                    .collect(),
            });
            for target in &mut targets {
                target.step(t, self.frame_dt, &mut rng);
            }
        }

        ReplayLog {
            scenario_name: self.name.clone(),
            seed: self.seed,
            frame_dt: self.frame_dt,
            mission: self.mission.clone(),
            environment: self.environment.clone(),
            hour: self.hour,
            frames,
            ground_truth,
        }
    }
}
