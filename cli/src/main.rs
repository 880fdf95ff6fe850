//! `overwatch` CLI: scenario runs and replays through the threat engine.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use overwatch_core::{
    Behavior, CoordinatedGroup, Engine, EngineConfig, FrameId, FusedPose, LogAlertSink, ManualClock,
    MovementPattern, ThreatLevel, ThreatPrediction, ThreatScorer, TrackStatus,
};
use serde::Serialize;
use sim::replay::{load_replay, save_replay, ReplayLog};
use sim::scenarios::{Scenario, ScenarioKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

#[derive(Parser)]
#[command(name = "overwatch", about = "Aerial surveillance tracking and threat assessment")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a named scenario and run it through the engine.
    RunScenario {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Override the scenario's frame count
        #[arg(long)]
        frames: Option<usize>,
        /// Partial engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write the run summary to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also save the generated replay log
        #[arg(long)]
        save_replay: Option<PathBuf>,
    },
    /// Load a previously recorded log and run it through the engine.
    Replay {
        /// Path to replay JSON file
        input: PathBuf,
        /// Partial engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write the run summary to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RunScenario {
            scenario,
            seed,
            frames,
            config,
            output,
            save_replay: save_path,
        } => {
            let mut scenario = Scenario::build(scenario, seed);
            if let Some(n) = frames {
                scenario.frames = n;
            }
            println!(
                "Generating scenario '{}' (seed={}, frames={})...",
                scenario.name, seed, scenario.frames
            );
            let log = scenario.generate();
            if let Some(rpath) = save_path.as_deref() {
                save_replay(&log, rpath)?;
                println!("Replay saved to {}", rpath.display());
            }
            run(&log, config.as_deref(), output.as_deref())?;
        }
        Commands::Replay { input, config, output } => {
            let log = load_replay(&input).with_context(|| format!("loading replay {}", input.display()))?;
            run(&log, config.as_deref(), output.as_deref())?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    let config = serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

#[derive(Serialize)]
struct TrackSummary {
    id: String,
    class_name: String,
    status: TrackStatus,
    threat_level: ThreatLevel,
    threat_score: f64,
    behavior: Behavior,
    movement_pattern: MovementPattern,
    age: u32,
}

#[derive(Serialize)]
struct RunSummary {
    scenario: String,
    seed: u64,
    frames: usize,
    births: usize,
    destroyed: usize,
    dropped: usize,
    assessment_cycles: usize,
    alerts_raised: usize,
    threat_level: f64,
    elapsed_s: f64,
    tracks: Vec<TrackSummary>,
    groups: Vec<CoordinatedGroup>,
    alerts: Vec<ThreatPrediction>,
    fused_pose: Option<FusedPose>,
}

fn run(log: &ReplayLog, config_path: Option<&Path>, output_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let clock = Arc::new(ManualClock::new(0.0, log.hour));
    let engine = Engine::with_parts(config, ThreatScorer::default(), clock.clone(), Arc::new(LogAlertSink));
    engine.update_mission_context(&log.mission)?;
    engine.update_environment_context(&log.environment)?;

    println!("Running '{}' ({} frames)...", log.scenario_name, log.frames.len());
    let start = std::time::Instant::now();
    let (mut births, mut destroyed, mut dropped) = (0, 0, 0);
    let (mut cycles, mut alerts_raised) = (0, 0);

    for frame in &log.frames {
        clock.set(frame.time);
        for payload in &frame.sensors {
            if let Err(e) = engine.update_sensor(payload.clone()) {
                warn!(frame = frame.index, error = %e, "sensor reading rejected");
            }
        }
        let report = engine.submit_detections(FrameId(frame.index), frame.detections.clone());
        births += report.births.len();
        destroyed += report.destroyed.len();
        dropped += report.dropped;

        match engine.tick() {
            Ok(Some(_)) => {
                cycles += 1;
                alerts_raised += engine.get_threat_alerts().len();
            }
            Ok(None) => {}
            Err(e) => warn!(frame = frame.index, error = %e, "assessment cycle failed"),
        }
    }
    let elapsed = start.elapsed();

    let tracks = engine.get_active_tracks();
    let groups = engine.get_coordinated_groups();
    let alerts = engine.get_threat_alerts();

    println!(
        "Done: {} births, {} destroyed, {} dropped, {} assessment cycles, elapsed={:.3}s",
        births,
        destroyed,
        dropped,
        cycles,
        elapsed.as_secs_f64()
    );
    println!("{:<6} {:<18} {:<8} {:<7} {:<13} {:<12}", "id", "class", "status", "threat", "behavior", "pattern");
    for t in &tracks {
        println!(
            "{:<6} {:<18} {:<8} {:<7} {:<13} {:<12}",
            t.id.to_string(),
            t.class_name,
            format!("{:?}", t.status),
            t.threat_level.to_string(),
            t.behavior.to_string(),
            t.movement_pattern.as_str(),
        );
    }
    for g in &groups {
        let members: Vec<String> = g.members.iter().map(|m| m.to_string()).collect();
        println!(
            "Group {:?}: [{}] aligned={} confidence={:.1}",
            g.formation_type,
            members.join(", "),
            g.movement_aligned,
            g.confidence
        );
    }
    for a in &alerts {
        println!(
            "ALERT {} {} level={} escalation={:.2} ttc={:.0}s action={}",
            a.object_id, a.class_name, a.current_threat, a.predicted_escalation, a.time_to_critical, a.recommended_action
        );
    }

    if let Some(opath) = output_path {
        let summary = RunSummary {
            scenario: log.scenario_name.clone(),
            seed: log.seed,
            frames: log.frames.len(),
            births,
            destroyed,
            dropped,
            assessment_cycles: cycles,
            alerts_raised,
            threat_level: engine.current_threat_level(),
            elapsed_s: elapsed.as_secs_f64(),
            tracks: tracks
                .iter()
                .map(|t| TrackSummary {
                    id: t.id.to_string(),
                    class_name: t.class_name.clone(),
                    status: t.status,
                    threat_level: t.threat_level,
                    threat_score: t.threat_score,
                    behavior: t.behavior,
                    movement_pattern: t.movement_pattern,
                    age: t.age,
                })
                .collect(),
            groups,
            alerts,
            fused_pose: engine.fused_pose(),
        };
        std::fs::write(opath, serde_json::to_string_pretty(&summary)?)?;
        println!("Summary saved to {}", opath.display());
    }

    Ok(())
}
