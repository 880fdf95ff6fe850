//! Threat scoring: class tier × confidence × modality × behavior × pattern,
//! then an ordered list of context rules, then a clamp to [0, 1].
//!
//! # Design choices
//! - Every multiplier lives in a lookup table keyed by an enum.
//! - Context rules are trait objects so deployments can inject their own
//!   ordered list. Order matters: floors and multipliers do not commute.
//! - The scorer holds no mutable state; identical inputs give identical
//!   outputs.

use crate::{behavior::{Behavior, MovementPattern}, error::CoreError, types::SensorSource};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

// ---------------------------------------------------------------------------
// Threat level
// ---------------------------------------------------------------------------

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl ThreatLevel {
    pub const HIGH_THRESHOLD: f64 = 0.7;
    pub const MEDIUM_THRESHOLD: f64 = 0.4;

    pub fn from_score(score: f64) -> Self {
        if score >= Self::HIGH_THRESHOLD {
            ThreatLevel::High
        } else if score >= Self::MEDIUM_THRESHOLD {
            ThreatLevel::Medium
        } else {
            ThreatLevel::Low
        }
    }

    /// Numeric weight used when aggregating levels.
    pub fn value(&self) -> f64 {
        match self {
            ThreatLevel::Low => 0.2,
            ThreatLevel::Medium => 0.6,
            ThreatLevel::High => 1.0,
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ThreatLevel::Low => "LOW",
            ThreatLevel::Medium => "MEDIUM",
            ThreatLevel::High => "HIGH",
        })
    }
}

// ---------------------------------------------------------------------------
// Lookup tables
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassTier {
    High,
    Medium,
    Low,
    Unknown,
}

const HIGH_THREAT_CLASSES: &[&str] = &[
    "tank",
    "military_vehicle",
    "armed_person",
    "missile",
    "aircraft",
    "drone",
    "weapon",
];
const MEDIUM_THREAT_CLASSES: &[&str] = &["person", "vehicle", "truck", "boat", "helicopter"];
const LOW_THREAT_CLASSES: &[&str] = &["civilian", "animal", "bicycle", "car"];
const ARMED_CLASSES: &[&str] = &["tank", "military_vehicle", "armed_person", "missile", "weapon"];

impl ClassTier {
    pub fn of(class_name: &str) -> Self {
        let class = class_name.trim().to_ascii_lowercase();
        let class = class.as_str();
        if HIGH_THREAT_CLASSES.contains(&class) {
            ClassTier::High
        } else if MEDIUM_THREAT_CLASSES.contains(&class) {
            ClassTier::Medium
        } else if LOW_THREAT_CLASSES.contains(&class) {
            ClassTier::Low
        } else {
            ClassTier::Unknown
        }
    }

    pub fn base_score(&self) -> f64 {
        match self {
            ClassTier::High => 0.7,
            ClassTier::Medium => 0.4,
            ClassTier::Low => 0.1,
            ClassTier::Unknown => 0.2,
        }
    }
}

/// Classes that carry weapons.
pub fn is_armed(class_name: &str) -> bool {
    ARMED_CLASSES.contains(&class_name.trim().to_ascii_lowercase().as_str())
}

pub fn source_multiplier(source: SensorSource) -> f64 {
    match source {
        SensorSource::Visual => 1.0,
        SensorSource::Thermal => 1.2,
        SensorSource::Radar => 1.1,
        SensorSource::Lidar => 1.0,
        SensorSource::Acoustic => 0.9,
    }
}

pub fn behavior_multiplier(behavior: Behavior) -> f64 {
    match behavior {
        Behavior::Unclassified => 1.0,
        Behavior::Stationary => 0.8,
        Behavior::Moving => 1.0,
        Behavior::Approaching => 1.3,
        Behavior::Fleeing => 1.1,
        Behavior::Circling => 1.2,
        Behavior::Erratic => 1.4,
        Behavior::Aggressive => 1.6,
    }
}

pub fn pattern_multiplier(pattern: MovementPattern) -> f64 {
    match pattern {
        MovementPattern::Linear => 1.0,
        MovementPattern::Random => 0.9,
        MovementPattern::Circular => 1.1,
        MovementPattern::Zigzag => 1.3,
        MovementPattern::Coordinated => 1.5,
        MovementPattern::Rapid | MovementPattern::Stationary | MovementPattern::Unknown => 1.0,
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionContext {
    #[default]
    General,
    Surveillance,
    HighSecurity,
    RestrictedArea,
    BorderPatrol,
    RestrictedAirspace,
    NoFlyZone,
}

impl FromStr for MissionContext {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(MissionContext::General),
            "surveillance" => Ok(MissionContext::Surveillance),
            "high_security" => Ok(MissionContext::HighSecurity),
            "restricted_area" => Ok(MissionContext::RestrictedArea),
            "border_patrol" => Ok(MissionContext::BorderPatrol),
            "restricted_airspace" => Ok(MissionContext::RestrictedAirspace),
            "no_fly_zone" => Ok(MissionContext::NoFlyZone),
            other => Err(CoreError::UnknownContext(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentContext {
    #[default]
    Normal,
    Urban,
    Rural,
    Maritime,
    MilitaryZone,
    Border,
}

impl FromStr for EnvironmentContext {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(EnvironmentContext::Normal),
            "urban" => Ok(EnvironmentContext::Urban),
            "rural" => Ok(EnvironmentContext::Rural),
            "maritime" => Ok(EnvironmentContext::Maritime),
            "military_zone" => Ok(EnvironmentContext::MilitaryZone),
            "border" => Ok(EnvironmentContext::Border),
            other => Err(CoreError::UnknownContext(other.to_string())),
        }
    }
}

/// Situation the scorer evaluates against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatContext {
    /// Local hour of day, 0–23
    pub hour: u32,
    pub mission: MissionContext,
    pub environment: EnvironmentContext,
}

impl Default for ThreatContext {
    fn default() -> Self {
        Self {
            hour: 12,
            mission: MissionContext::default(),
            environment: EnvironmentContext::default(),
        }
    }
}

impl ThreatContext {
    pub fn is_night(&self) -> bool {
        self.hour < 6 || self.hour > 20
    }
}

/// Everything known about one object when scoring it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThreatInput<'a> {
    pub class_name: &'a str,
    pub confidence: f64,
    pub source: SensorSource,
    pub behavior: Option<Behavior>,
    pub pattern: Option<MovementPattern>,
}

impl ThreatInput<'_> {
    fn is_class(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.class_name.eq_ignore_ascii_case(n))
    }
}

// ---------------------------------------------------------------------------
// Context rules
// ---------------------------------------------------------------------------

/// One named adjustment applied after the multiplicative factors.
pub trait ContextRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, score: f64, input: &ThreatInput<'_>, ctx: &ThreatContext) -> f64;
}

type Predicate = fn(&ThreatInput<'_>, &ThreatContext) -> bool;

/// Multiply the score by `factor` when `applies` holds.
pub struct ScaleRule {
    pub name: &'static str,
    pub factor: f64,
    pub applies: Predicate,
}

impl ContextRule for ScaleRule {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, score: f64, input: &ThreatInput<'_>, ctx: &ThreatContext) -> f64 {
        if (self.applies)(input, ctx) {
            score * self.factor
        } else {
            score
        }
    }
}

/// Drones never score below `floor`, or `restricted_floor` in airspace
/// where they are prohibited.
pub struct DroneFloor {
    pub floor: f64,
    pub restricted_floor: f64,
}

impl ContextRule for DroneFloor {
    fn name(&self) -> &str {
        "drone_floor"
    }

    fn apply(&self, score: f64, input: &ThreatInput<'_>, ctx: &ThreatContext) -> f64 {
        if !input.is_class(&["drone"]) {
            return score;
        }
        let floor = match ctx.mission {
            MissionContext::NoFlyZone | MissionContext::RestrictedAirspace => self.restricted_floor,
            _ => self.floor,
        };
        score.max(floor)
    }
}

/// The standard rule set, in application order.
pub fn default_rules() -> Vec<Box<dyn ContextRule>> {
    use EnvironmentContext as Env;
    use MissionContext as Mission;

    vec![
        Box::new(ScaleRule {
            name: "night_person",
            factor: 1.2,
            applies: |i, c| c.is_night() && i.is_class(&["person"]),
        }),
        Box::new(ScaleRule {
            name: "secure_mission_person",
            factor: 1.3,
            applies: |i, c| {
                matches!(c.mission, Mission::HighSecurity | Mission::RestrictedArea)
                    && i.is_class(&["person"])
            },
        }),
        Box::new(ScaleRule {
            name: "night_vehicle_patrol",
            factor: 1.3,
            applies: |i, c| {
                c.is_night()
                    && matches!(c.mission, Mission::BorderPatrol | Mission::HighSecurity)
                    && i.is_class(&["vehicle"])
            },
        }),
        Box::new(DroneFloor {
            floor: 0.7,
            restricted_floor: 0.8,
        }),
        Box::new(ScaleRule {
            name: "restricted_aircraft",
            factor: 1.4,
            applies: |i, c| {
                matches!(c.mission, Mission::RestrictedAirspace | Mission::HighSecurity)
                    && i.is_class(&["aircraft"])
            },
        }),
        Box::new(ScaleRule {
            name: "urban_common_object",
            factor: 0.8,
            applies: |i, c| c.environment == Env::Urban && i.is_class(&["person", "car", "bicycle"]),
        }),
        Box::new(ScaleRule {
            name: "military_zone",
            factor: 1.2,
            applies: |_, c| c.environment == Env::MilitaryZone,
        }),
        Box::new(ScaleRule {
            name: "border_vehicle",
            factor: 1.3,
            applies: |i, c| c.environment == Env::Border && i.is_class(&["vehicle", "truck", "group"]),
        }),
    ]
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreatScore {
    pub score: f64,
    pub level: ThreatLevel,
}

pub struct ThreatScorer {
    rules: Vec<Box<dyn ContextRule>>,
}

impl Default for ThreatScorer {
    fn default() -> Self {
        Self::with_rules(default_rules())
    }
}

impl fmt::Debug for ThreatScorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreatScorer")
            .field("rules", &self.rule_names())
            .finish()
    }
}

impl ThreatScorer {
    pub fn with_rules(rules: Vec<Box<dyn ContextRule>>) -> Self {
        Self { rules }
    }

    /// Append a rule; it runs after all existing ones.
    pub fn push_rule(&mut self, rule: Box<dyn ContextRule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Score before context rules and clamping.
    pub fn intrinsic_score(&self, input: &ThreatInput<'_>) -> f64 {
        let confidence = if input.confidence.is_finite() {
            input.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let mut score = ClassTier::of(input.class_name).base_score();
        score *= 0.5 + 0.5 * confidence;
        score *= source_multiplier(input.source);
        if let Some(b) = input.behavior {
            score *= behavior_multiplier(b);
        }
        if let Some(p) = input.pattern {
            score *= pattern_multiplier(p);
        }
        score
    }

    pub fn score(&self, input: &ThreatInput<'_>, ctx: &ThreatContext) -> ThreatScore {
        let contextual = self
            .rules
            .iter()
            .fold(self.intrinsic_score(input), |s, rule| rule.apply(s, input, ctx));
        let score = contextual.clamp(0.0, 1.0);
        ThreatScore {
            score,
            level: ThreatLevel::from_score(score),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
