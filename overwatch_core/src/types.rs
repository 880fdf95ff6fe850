//! Fundamental types shared across the engine: identifiers, sensing
//! modalities and detections.

use crate::{
    error::{CoreError, Result},
    geometry::BoundingBox,
};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

// ---------------------------------------------------------------------------
// Identifier types
// ---------------------------------------------------------------------------

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TrackId(pub u64);

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FrameId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Sensing modality
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorSource {
    Visual,
    Thermal,
    Radar,
    Lidar,
    Acoustic,
}

impl SensorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorSource::Visual => "visual",
            SensorSource::Thermal => "thermal",
            SensorSource::Radar => "radar",
            SensorSource::Lidar => "lidar",
            SensorSource::Acoustic => "acoustic",
        }
    }

    /// Confidence assumed when a range/bearing sensor reports none.
    /// Image sensors must always report one.
    pub fn default_confidence(&self) -> Option<f64> {
        match self {
            SensorSource::Radar => Some(0.7),
            SensorSource::Lidar => Some(0.6),
            SensorSource::Acoustic => Some(0.4),
            SensorSource::Visual | SensorSource::Thermal => None,
        }
    }
}

impl fmt::Display for SensorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "visual" => Ok(SensorSource::Visual),
            "thermal" => Ok(SensorSource::Thermal),
            "radar" => Ok(SensorSource::Radar),
            "lidar" => Ok(SensorSource::Lidar),
            "acoustic" => Ok(SensorSource::Acoustic),
            other => Err(CoreError::MalformedInput(format!("unknown source `{other}`"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Detections
// ---------------------------------------------------------------------------

/// Half-extent of the footprint box drawn around a radar return.
const RADAR_FOOTPRINT_HALF: f64 = 25.0;
/// Acoustic bearings are projected onto a nominal 800×600 frame.
const ACOUSTIC_ORIGIN: (f64, f64) = (400.0, 300.0);
const ACOUSTIC_SCALE: f64 = 100.0;
const ACOUSTIC_FOOTPRINT_HALF: f64 = 20.0;

/// A detection as delivered by the external detector or a range sensor.
///
/// Geometry fields are optional on the wire; which of them are required
/// depends on `source` and is checked by [`DetectionRecord::validate`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionRecord {
    pub id: u64,
    pub source: Option<SensorSource>,
    pub class_name: String,
    pub confidence: Option<f64>,
    pub bounding_box: Option<[f64; 4]>,
    pub position: Option<[f64; 3]>,
    pub velocity: Option<[f64; 3]>,
    pub dimensions: Option<[f64; 3]>,
    pub direction: Option<[f64; 2]>,
    pub intensity: Option<f64>,
    pub timestamp: f64,
}

impl DetectionRecord {
    /// Image-plane detection (visual or thermal camera).
    pub fn image(
        source: SensorSource,
        class_name: &str,
        confidence: f64,
        bbox: [f64; 4],
        timestamp: f64,
    ) -> Self {
        Self {
            source: Some(source),
            class_name: class_name.to_string(),
            confidence: Some(confidence),
            bounding_box: Some(bbox),
            timestamp,
            ..Default::default()
        }
    }

    /// Radar return with position and optional Doppler velocity.
    pub fn radar(
        class_name: &str,
        position: [f64; 3],
        velocity: Option<[f64; 3]>,
        timestamp: f64,
    ) -> Self {
        Self {
            source: Some(SensorSource::Radar),
            class_name: class_name.to_string(),
            position: Some(position),
            velocity,
            timestamp,
            ..Default::default()
        }
    }

    /// Validate geometry for the record's modality.
    pub fn validate(&self) -> Result<Detection> {
        let source = self
            .source
            .ok_or_else(|| CoreError::MalformedInput(format!("detection {} has no source", self.id)))?;

        let confidence = match self.confidence.or(source.default_confidence()) {
            Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
            Some(_) => return Err(self.malformed("non-finite confidence")),
            None => return Err(self.malformed("missing confidence")),
        };

        let measurement = match source {
            SensorSource::Visual | SensorSource::Thermal => {
                let bbox = self
                    .bounding_box
                    .map(BoundingBox::from_array)
                    .ok_or_else(|| self.malformed("missing bounding box"))?;
                Measurement::Image { bbox }
            }
            SensorSource::Radar => {
                let position = finite3(self.position).ok_or_else(|| self.malformed("missing position"))?;
                let velocity = match self.velocity {
                    Some(v) => Some(finite3(Some(v)).ok_or_else(|| self.malformed("non-finite velocity"))?),
                    None => None,
                };
                Measurement::Range { position, velocity }
            }
            SensorSource::Lidar => {
                let position = finite3(self.position).ok_or_else(|| self.malformed("missing position"))?;
                let dimensions = finite3(Some(self.dimensions.unwrap_or([1.0, 1.0, 1.0])))
                    .filter(|d| d.iter().all(|v| *v > 0.0))
                    .ok_or_else(|| self.malformed("invalid dimensions"))?;
                Measurement::Volume {
                    position,
                    dimensions,
                }
            }
            SensorSource::Acoustic => {
                let direction = self
                    .direction
                    .filter(|d| d.iter().all(|v| v.is_finite()))
                    .ok_or_else(|| self.malformed("missing direction"))?;
                Measurement::Bearing {
                    direction,
                    intensity: self.intensity.filter(|i| i.is_finite()).unwrap_or(0.0),
                }
            }
        };

        let footprint = measurement.footprint();
        if !footprint.is_valid() {
            return Err(self.malformed("degenerate bounding box"));
        }

        Ok(Detection {
            id: self.id,
            source,
            class_name: self.class_name.trim().to_ascii_lowercase(),
            confidence,
            measurement,
            footprint,
            timestamp: self.timestamp,
        })
    }

    fn malformed(&self, what: &str) -> CoreError {
        CoreError::MalformedInput(format!("detection {}: {what}", self.id))
    }
}

fn finite3(v: Option<[f64; 3]>) -> Option<[f64; 3]> {
    v.filter(|a| a.iter().all(|x| x.is_finite()))
}

/// Modality-specific geometry of a validated detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Measurement {
    /// Camera detection in image coordinates
    Image { bbox: BoundingBox },
    /// Radar return in local metres
    Range {
        position: [f64; 3],
        velocity: Option<[f64; 3]>,
    },
    /// LiDAR cluster: centroid and extent
    Volume {
        position: [f64; 3],
        dimensions: [f64; 3],
    },
    /// Acoustic bearing (unit-ish direction in the image plane)
    Bearing { direction: [f64; 2], intensity: f64 },
}

impl Measurement {
    /// Planar box used for IoU association.
    pub fn footprint(&self) -> BoundingBox {
        match self {
            Measurement::Image { bbox } => *bbox,
            Measurement::Range { position, .. } => BoundingBox::around(
                position[0],
                position[1],
                RADAR_FOOTPRINT_HALF,
                RADAR_FOOTPRINT_HALF,
            ),
            Measurement::Volume {
                position,
                dimensions,
            } => BoundingBox::around(
                position[0],
                position[1],
                dimensions[0] / 2.0,
                dimensions[1] / 2.0,
            ),
            Measurement::Bearing { direction, .. } => BoundingBox::around(
                ACOUSTIC_ORIGIN.0 + direction[0] * ACOUSTIC_SCALE,
                ACOUSTIC_ORIGIN.1 + direction[1] * ACOUSTIC_SCALE,
                ACOUSTIC_FOOTPRINT_HALF,
                ACOUSTIC_FOOTPRINT_HALF,
            ),
        }
    }
}

/// A validated detection, consumed once by the tracker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: u64,
    pub source: SensorSource,
    /// Lower-cased class label
    pub class_name: String,
    /// Clamped to [0, 1]
    pub confidence: f64,
    pub measurement: Measurement,
    pub footprint: BoundingBox,
    pub timestamp: f64,
}

impl Detection {
    pub fn center(&self) -> Vector2<f64> {
        self.footprint.center()
    }

    /// Position fed to the state estimator: metric position for range
    /// sensors, footprint centre (z = 0) otherwise.
    pub fn position(&self) -> [f64; 3] {
        match &self.measurement {
            Measurement::Range { position, .. } | Measurement::Volume { position, .. } => *position,
            _ => {
                let c = self.center();
                [c.x, c.y, 0.0]
            }
        }
    }

    pub fn velocity(&self) -> Option<[f64; 3]> {
        match &self.measurement {
            Measurement::Range { velocity, .. } => *velocity,
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn image_detection_requires_box() {
        let mut rec = DetectionRecord::image(
            SensorSource::Visual,
            "Person",
            0.8,
            [10.0, 10.0, 20.0, 30.0],
            0.0,
        );
        let det = rec.validate().unwrap();
        assert_eq!(det.class_name, "person");
        assert_abs_diff_eq!(det.center().x, 15.0);

        rec.bounding_box = None;
        assert!(matches!(rec.validate(), Err(CoreError::MalformedInput(_))));
    }

    #[test]
    fn degenerate_box_is_malformed() {
        let rec = DetectionRecord::image(
            SensorSource::Thermal,
            "car",
            0.5,
            [10.0, 10.0, 10.0, 30.0],
            0.0,
        );
        assert!(rec.validate().is_err());
    }

    #[test]
    fn radar_defaults_confidence_and_footprint() {
        let rec = DetectionRecord::radar("vehicle", [100.0, 50.0, 0.0], Some([1.0, 0.0, 0.0]), 1.0);
        let det = rec.validate().unwrap();
        assert_abs_diff_eq!(det.confidence, 0.7);
        assert_eq!(det.footprint, BoundingBox::new(75.0, 25.0, 125.0, 75.0));
        assert_eq!(det.velocity(), Some([1.0, 0.0, 0.0]));
    }

    #[test]
    fn lidar_uses_unit_dimensions_by_default() {
        let rec = DetectionRecord {
            source: Some(SensorSource::Lidar),
            class_name: "unknown".into(),
            position: Some([4.0, 2.0, 0.0]),
            ..Default::default()
        };
        let det = rec.validate().unwrap();
        assert_eq!(det.footprint, BoundingBox::new(3.5, 1.5, 4.5, 2.5));
        assert_abs_diff_eq!(det.confidence, 0.6);
    }

    #[test]
    fn acoustic_bearing_projects_onto_frame() {
        let rec = DetectionRecord {
            source: Some(SensorSource::Acoustic),
            class_name: "drone".into(),
            direction: Some([1.0, -0.5]),
            intensity: Some(0.9),
            ..Default::default()
        };
        let det = rec.validate().unwrap();
        assert_eq!(det.footprint, BoundingBox::new(480.0, 230.0, 520.0, 270.0));
        assert_abs_diff_eq!(det.confidence, 0.4);
    }

    #[test]
    fn visual_without_confidence_is_malformed() {
        let rec = DetectionRecord {
            source: Some(SensorSource::Visual),
            class_name: "car".into(),
            bounding_box: Some([0.0, 0.0, 1.0, 1.0]),
            ..Default::default()
        };
        assert!(rec.validate().is_err());
    }

    #[test]
    fn record_deserializes_with_missing_fields() {
        let json = r#"{"id": 7, "source": "radar", "class_name": "truck", "position": [1, 2, 3]}"#;
        let rec: DetectionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.source, Some(SensorSource::Radar));
        assert!(rec.validate().is_ok());
    }
}
