//! Platform sensor payloads: GPS, IMU, LiDAR scans and radar target lists.
//!
//! Payloads are validated on construction; a malformed reading is rejected
//! with a [`ReadingError`] and never reaches the estimator.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Errors raised while validating a sensor payload.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReadingError {
    #[error("unknown sensor kind `{0}`")]
    UnknownSensor(String),

    #[error("{kind} reading needs {expected} values, got {got}")]
    TooShort {
        kind: SensorKind,
        expected: usize,
        got: usize,
    },

    #[error("{kind} reading contains a non-finite value")]
    NonFinite { kind: SensorKind },

    #[error("lidar scan has {distances} distances but {angles} angles")]
    LengthMismatch { distances: usize, angles: usize },

    #[error("{kind} readings cannot be built from a flat value array")]
    NotFlat { kind: SensorKind },
}

/// Platform telemetry channels accepted by the fusion layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Gps,
    Imu,
    Lidar,
    Radar,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorKind::Gps => "gps",
            SensorKind::Imu => "imu",
            SensorKind::Lidar => "lidar",
            SensorKind::Radar => "radar",
        };
        f.write_str(name)
    }
}

impl FromStr for SensorKind {
    type Err = ReadingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gps" => Ok(SensorKind::Gps),
            "imu" => Ok(SensorKind::Imu),
            "lidar" => Ok(SensorKind::Lidar),
            "radar" => Ok(SensorKind::Radar),
            other => Err(ReadingError::UnknownSensor(other.to_string())),
        }
    }
}

fn check_values(kind: SensorKind, values: &[f64], expected: usize) -> Result<(), ReadingError> {
    if values.len() < expected {
        return Err(ReadingError::TooShort {
            kind,
            expected,
            got: values.len(),
        });
    }
    if values[..expected].iter().any(|v| !v.is_finite()) {
        return Err(ReadingError::NonFinite { kind });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// GPS
// ---------------------------------------------------------------------------

/// A GPS fix in geodetic coordinates (degrees, metres).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl GpsFix {
    /// Build from `[lat, lon, alt]`.
    pub fn from_slice(values: &[f64]) -> Result<Self, ReadingError> {
        check_values(SensorKind::Gps, values, 3)?;
        Ok(Self {
            lat: values[0],
            lon: values[1],
            alt: values[2],
        })
    }
}

// ---------------------------------------------------------------------------
// IMU
// ---------------------------------------------------------------------------

/// Attitude (radians) and body acceleration (m/s²).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
}

impl ImuSample {
    /// Build from `[roll, pitch, yaw, ax, ay, az]`.
    pub fn from_slice(values: &[f64]) -> Result<Self, ReadingError> {
        check_values(SensorKind::Imu, values, 6)?;
        Ok(Self {
            roll: values[0],
            pitch: values[1],
            yaw: values[2],
            ax: values[3],
            ay: values[4],
            az: values[5],
        })
    }

    pub fn attitude(&self) -> [f64; 3] {
        [self.roll, self.pitch, self.yaw]
    }

    pub fn acceleration(&self) -> [f64; 3] {
        [self.ax, self.ay, self.az]
    }
}

// ---------------------------------------------------------------------------
// LiDAR
// ---------------------------------------------------------------------------

/// One planar LiDAR sweep: paired distances (m) and angles (rad).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LidarScan {
    pub distances: Vec<f64>,
    pub angles: Vec<f64>,
    #[serde(default)]
    pub intensities: Vec<f64>,
}

/// A single LiDAR return retained as an obstacle candidate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LidarReturn {
    /// Index of the return within its scan
    pub index: usize,
    pub range: f64,
    pub azimuth: f64,
}

impl LidarScan {
    pub fn validate(&self) -> Result<(), ReadingError> {
        if self.distances.len() != self.angles.len() {
            return Err(ReadingError::LengthMismatch {
                distances: self.distances.len(),
                angles: self.angles.len(),
            });
        }
        Ok(())
    }

    /// Returns closer than `max_range`, skipping non-finite samples.
    pub fn near_returns(&self, max_range: f64) -> Vec<LidarReturn> {
        self.distances
            .iter()
            .zip(&self.angles)
            .enumerate()
            .filter(|(_, (d, a))| d.is_finite() && a.is_finite() && **d >= 0.0 && **d < max_range)
            .map(|(index, (&range, &azimuth))| LidarReturn {
                index,
                range,
                azimuth,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Radar
// ---------------------------------------------------------------------------

/// One radar target: local position (m), velocity (m/s), optional label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RadarTarget {
    pub position: [f64; 3],
    #[serde(default)]
    pub velocity: [f64; 3],
    #[serde(default, rename = "class")]
    pub class_name: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl RadarTarget {
    pub fn is_finite(&self) -> bool {
        self.position.iter().chain(&self.velocity).all(|v| v.is_finite())
    }
}

/// Radar target list for one sweep.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RadarReport {
    pub targets: Vec<RadarTarget>,
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// A typed platform telemetry reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum SensorPayload {
    Gps(GpsFix),
    Imu(ImuSample),
    Lidar(LidarScan),
    Radar(RadarReport),
}

impl SensorPayload {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorPayload::Gps(_) => SensorKind::Gps,
            SensorPayload::Imu(_) => SensorKind::Imu,
            SensorPayload::Lidar(_) => SensorKind::Lidar,
            SensorPayload::Radar(_) => SensorKind::Radar,
        }
    }

    /// Parse the flat-array telemetry forms (`gps`, `imu`).
    pub fn from_values(kind: SensorKind, values: &[f64]) -> Result<Self, ReadingError> {
        match kind {
            SensorKind::Gps => GpsFix::from_slice(values).map(SensorPayload::Gps),
            SensorKind::Imu => ImuSample::from_slice(values).map(SensorPayload::Imu),
            SensorKind::Lidar | SensorKind::Radar => Err(ReadingError::NotFlat { kind }),
        }
    }

    /// Re-check invariants of a payload that arrived already structured
    /// (e.g. deserialized).
    pub fn validate(&self) -> Result<(), ReadingError> {
        match self {
            SensorPayload::Gps(fix) => {
                check_values(SensorKind::Gps, &[fix.lat, fix.lon, fix.alt], 3)
            }
            SensorPayload::Imu(s) => check_values(
                SensorKind::Imu,
                &[s.roll, s.pitch, s.yaw, s.ax, s.ay, s.az],
                6,
            ),
            SensorPayload::Lidar(scan) => scan.validate(),
            SensorPayload::Radar(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_kind_parses_case_insensitively() {
        assert_eq!("GPS".parse::<SensorKind>(), Ok(SensorKind::Gps));
        assert_eq!(" lidar ".parse::<SensorKind>(), Ok(SensorKind::Lidar));
        assert!(matches!(
            "sonar".parse::<SensorKind>(),
            Err(ReadingError::UnknownSensor(_))
        ));
    }

    #[test]
    fn gps_requires_three_finite_values() {
        assert!(GpsFix::from_slice(&[48.0, 11.0, 500.0]).is_ok());
        assert_eq!(
            GpsFix::from_slice(&[48.0, 11.0]),
            Err(ReadingError::TooShort {
                kind: SensorKind::Gps,
                expected: 3,
                got: 2
            })
        );
        assert_eq!(
            GpsFix::from_slice(&[48.0, f64::NAN, 1.0]),
            Err(ReadingError::NonFinite {
                kind: SensorKind::Gps
            })
        );
    }

    #[test]
    fn imu_splits_attitude_and_acceleration() {
        let imu = ImuSample::from_slice(&[0.1, 0.2, 0.3, 1.0, 2.0, 9.8]).unwrap();
        assert_eq!(imu.attitude(), [0.1, 0.2, 0.3]);
        assert_eq!(imu.acceleration(), [1.0, 2.0, 9.8]);
    }

    #[test]
    fn lidar_keeps_only_near_returns() {
        let scan = LidarScan {
            distances: vec![4.0, 12.0, f64::NAN, 9.9],
            angles: vec![0.0, 0.5, 1.0, 1.5],
            intensities: vec![],
        };
        assert!(scan.validate().is_ok());
        let near = scan.near_returns(10.0);
        assert_eq!(near.len(), 2);
        assert_eq!(near[0].index, 0);
        assert_eq!(near[1].index, 3);
    }

    #[test]
    fn lidar_rejects_mismatched_arrays() {
        let scan = LidarScan {
            distances: vec![1.0, 2.0],
            angles: vec![0.0],
            intensities: vec![],
        };
        assert!(matches!(
            scan.validate(),
            Err(ReadingError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn flat_values_only_for_gps_and_imu() {
        assert!(SensorPayload::from_values(SensorKind::Gps, &[1.0, 2.0, 3.0]).is_ok());
        assert!(matches!(
            SensorPayload::from_values(SensorKind::Radar, &[1.0]),
            Err(ReadingError::NotFlat { .. })
        ));
    }
}
